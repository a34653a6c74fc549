use std::fmt;

use actix_web::http::StatusCode;
use async_trait::async_trait;
use secstr::SecUtf8;

pub const EVENT_HEADER: &str = "X-GitHub-Event";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct User {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Repository {
    pub name: Option<String>,
    pub owner: Option<User>,
}

/// The slice of a `push` or `repository` delivery the hooks care about.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RepositoryEvent {
    pub action: Option<String>,
    pub repository: Option<Repository>,
}

impl RepositoryEvent {
    pub fn owner(&self) -> Option<&str> {
        self.repository
            .as_ref()?
            .owner
            .as_ref()?
            .login
            .as_deref()
            .filter(|login| !login.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.repository
            .as_ref()?
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Topics {
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("GitHub API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to send request to GitHub: {0}")]
    Send(String),
    #[error("failed to decode GitHub response: {0}")]
    Decode(String),
}

/// Repository topic endpoints of the GitHub REST API.
///
/// `replace_topics` overwrites the whole list; merging is up to the caller.
#[async_trait(?Send)]
pub trait TopicsApi {
    async fn get_topics(&self, repo: &RepoRef) -> Result<Vec<String>, ApiError>;
    async fn replace_topics(&self, repo: &RepoRef, names: &[String]) -> Result<(), ApiError>;
}

pub struct GithubClient {
    http: awc::Client,
    base_url: String,
    token: SecUtf8,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// awc builds its TLS config from the process-level rustls provider.
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

impl GithubClient {
    pub fn new(base_url: impl Into<String>, token: SecUtf8) -> Self {
        install_crypto_provider();
        Self {
            http: awc::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn topics_url(&self, repo: &RepoRef) -> String {
        format!("{}/repos/{}/{}/topics", self.base_url, repo.owner, repo.name)
    }

    fn request(&self, method: awc::http::Method, repo: &RepoRef) -> awc::ClientRequest {
        self.http
            .request(method, self.topics_url(repo))
            .insert_header(("Accept", "application/vnd.github+json"))
            .insert_header((
                "Authorization",
                format!("Bearer {}", self.token.unsecure()),
            ))
            .insert_header(("X-GitHub-Api-Version", API_VERSION))
            .insert_header(("User-Agent", USER_AGENT))
    }
}

async fn error_for_status<S>(resp: &mut awc::ClientResponse<S>) -> Result<(), ApiError>
where
    S: futures::Stream<Item = Result<actix_web::web::Bytes, awc::error::PayloadError>> + Unpin,
{
    if resp.status().is_success() {
        return Ok(());
    }
    let body = resp
        .body()
        .await
        .map(|body| String::from_utf8_lossy(&body).into_owned())
        .unwrap_or_else(|err| format!("<failed to read body: {}>", err));
    Err(ApiError::Status {
        status: resp.status(),
        body,
    })
}

#[async_trait(?Send)]
impl TopicsApi for GithubClient {
    async fn get_topics(&self, repo: &RepoRef) -> Result<Vec<String>, ApiError> {
        let mut resp = self
            .request(awc::http::Method::GET, repo)
            .send()
            .await
            .map_err(|err| ApiError::Send(err.to_string()))?;
        error_for_status(&mut resp).await?;

        let topics: Topics = resp
            .json()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        Ok(topics.names)
    }

    async fn replace_topics(&self, repo: &RepoRef, names: &[String]) -> Result<(), ApiError> {
        let mut resp = self
            .request(awc::http::Method::PUT, repo)
            .send_json(&Topics {
                names: names.to_vec(),
            })
            .await
            .map_err(|err| ApiError::Send(err.to_string()))?;
        error_for_status(&mut resp).await
    }
}
