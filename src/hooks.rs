use std::borrow::Cow;

use actix_web::http::StatusCode;
use tracing::Instrument as _;

use crate::{
    config::{Config, FaultStatus},
    github::{ApiError, GithubClient, RepoRef, RepositoryEvent, TopicsApi},
};

/// What a delivery asks for, before anything is sent to GitHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Pong,
    Ignored(&'static str),
    Tag(RepoRef),
}

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("payload has no repository owner or name")]
    MissingRepository,
    #[error("payload is not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("failed to get topics: {0}")]
    GetTopics(#[source] ApiError),
    #[error("failed to set topics: {0}")]
    SetTopics(#[source] ApiError),
}

impl HookError {
    pub fn status(&self, fault_status: FaultStatus) -> StatusCode {
        let fault = |internal| match fault_status {
            FaultStatus::Internal => internal,
            FaultStatus::Unauthorized => StatusCode::UNAUTHORIZED,
        };
        match self {
            HookError::MissingRepository => StatusCode::BAD_REQUEST,
            HookError::MalformedPayload(_) => fault(StatusCode::BAD_REQUEST),
            HookError::GetTopics(ApiError::Status { .. })
            | HookError::SetTopics(ApiError::Status { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            HookError::GetTopics(_) | HookError::SetTopics(_) => {
                fault(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn message(&self, status: StatusCode) -> &'static str {
        if status == StatusCode::UNAUTHORIZED {
            return "unauthorized";
        }
        match self {
            HookError::MissingRepository => "missing repo info",
            HookError::MalformedPayload(_) => "malformed payload",
            HookError::GetTopics(_) => "failed to get topics",
            HookError::SetTopics(_) => "failed",
        }
    }
}

/// Final answer to a delivery, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: StatusCode,
    pub body: Cow<'static, str>,
}

impl Outcome {
    pub fn new(status: StatusCode, body: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn bad_signature() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "bad signature")
    }
}

/// Applies the allow-list to an already authenticated delivery.
///
/// `ping` and unsupported events are answered without looking at the body.
pub fn decide(organization: &str, event: &str, body: &[u8]) -> Result<Decision, HookError> {
    let payload = match event {
        "ping" => return Ok(Decision::Pong),
        "push" => {
            let payload: RepositoryEvent = serde_json::from_slice(body)?;
            match (payload.owner(), payload.name()) {
                (Some(owner), Some(_)) if owner != organization => {
                    return Ok(Decision::Ignored("ignored - not our org"))
                }
                (Some(_), Some(_)) => {}
                _ => return Err(HookError::MissingRepository),
            }
            payload
        }
        "repository" => {
            let payload: RepositoryEvent = serde_json::from_slice(body)?;
            if payload.action.as_deref() != Some("created") {
                return Ok(Decision::Ignored("ignored - not a creation"));
            }
            payload
        }
        _ => return Ok(Decision::Ignored("ignored - unsupported event")),
    };

    if payload.owner() != Some(organization) {
        return Ok(Decision::Ignored("ignored"));
    }
    let name = payload.name().ok_or(HookError::MissingRepository)?;
    Ok(Decision::Tag(RepoRef {
        owner: organization.to_owned(),
        name: name.to_owned(),
    }))
}

/// Set union of `names` and `topic`: first occurrence wins, `topic` goes last
/// when it's new.
pub fn with_topic(names: Vec<String>, topic: &str) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(names.len() + 1);
    for name in names.into_iter().chain(std::iter::once(topic.to_owned())) {
        if !merged.contains(&name) {
            merged.push(name);
        }
    }
    merged
}

/// Everything needed to answer a delivery on one worker.
pub struct Hooks {
    pub organization: String,
    pub topic: String,
    pub fault_status: FaultStatus,
    pub api: Box<dyn TopicsApi>,
}

impl Hooks {
    pub fn from_config(config: &Config) -> Self {
        Self {
            organization: config.organization.clone(),
            topic: config.topic.clone(),
            fault_status: config.fault_status,
            api: Box::new(GithubClient::new(
                config.github_api_url.clone(),
                config.github_token.clone(),
            )),
        }
    }

    pub async fn handle(&self, event: &str, body: &[u8]) -> Outcome {
        let span = tracing::info_span!(
            "processing delivery",
            event,
            repo = tracing::field::Empty,
        );
        match self.dispatch(event, body).instrument(span).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let status = err.status(self.fault_status);
                match &err {
                    HookError::GetTopics(ApiError::Status { status, body })
                    | HookError::SetTopics(ApiError::Status { status, body }) => {
                        tracing::error!(
                            upstream.status = status.as_u16(),
                            upstream.body = body.as_str(),
                            "{}",
                            err
                        );
                    }
                    HookError::MissingRepository | HookError::MalformedPayload(_) => {
                        tracing::warn!(event, "Rejected delivery: {}", err);
                    }
                    _ => tracing::error!("{}", err),
                }
                Outcome::new(status, err.message(status))
            }
        }
    }

    async fn dispatch(&self, event: &str, body: &[u8]) -> Result<Outcome, HookError> {
        let repo = match decide(&self.organization, event, body)? {
            Decision::Pong => return Ok(Outcome::ok("pong")),
            Decision::Ignored(reason) => {
                tracing::info!(reason, "Ignoring delivery");
                return Ok(Outcome::ok(reason));
            }
            Decision::Tag(repo) => repo,
        };
        tracing::Span::current().record("repo", &tracing::field::display(&repo));
        tracing::info!("Processing webhook for {}", repo);

        let current = self
            .api
            .get_topics(&repo)
            .await
            .map_err(HookError::GetTopics)?;
        let names = with_topic(current, &self.topic);
        tracing::info!(topics = ?names, "Adding topic {} to {}", self.topic, repo);

        self.api
            .replace_topics(&repo, &names)
            .await
            .map_err(HookError::SetTopics)?;
        tracing::info!("Added {} to {}", self.topic, repo);
        Ok(Outcome::ok("ok"))
    }
}
