use actix_web::{
    body::BoxBody, dev::Payload, error::ResponseError, http::StatusCode, web, web::Bytes,
    FromRequest, HttpRequest, HttpResponse, Responder,
};
use futures::future::{FutureExt as _, LocalBoxFuture};
use secstr::SecStr;

use crate::{
    github::EVENT_HEADER,
    hooks::{Hooks, Outcome},
    signature,
};

/// Authenticated webhook delivery: event name and the exact bytes GitHub
/// signed.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: String,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("bad signature")]
    InvalidSignature,
    #[error("failed reading request data: {0}")]
    ActixError(#[from] actix_web::Error),
}

impl ResponseError for WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::ActixError(err) => err.as_response_error().status_code(),
        }
    }

    fn error_response(&self) -> HttpResponse {
        Outcome::new(self.status_code(), self.to_string()).into_response()
    }
}

#[derive(Debug, Default, Clone)]
pub struct WebhookConfig {
    pub key: Option<SecStr>,
}

impl WebhookConfig {
    pub fn new(key: SecStr) -> Self {
        Self { key: Some(key) }
    }
}

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

impl FromRequest for Delivery {
    type Error = WebhookError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let req = req.clone();

        Box::pin(Bytes::from_request(&req, payload).map(
            move |bytes| -> Result<Self, Self::Error> {
                let bytes = bytes?;
                let key = req
                    .app_data::<WebhookConfig>()
                    .and_then(|config| config.key.as_ref())
                    .map(|key| key.unsecure());
                if key.is_none() {
                    tracing::error!("Webhook secret is not configured");
                }

                if !signature::verify(key, header(&req, signature::HEADER), &bytes) {
                    return Err(WebhookError::InvalidSignature);
                }

                Ok(Self {
                    event: header(&req, EVENT_HEADER).unwrap_or_default().to_owned(),
                    body: bytes,
                })
            },
        ))
    }
}

impl Outcome {
    pub fn into_response(self) -> HttpResponse {
        HttpResponse::build(self.status)
            .content_type("text/plain; charset=utf-8")
            .body(self.body.into_owned())
    }
}

impl Responder for Outcome {
    type Body = BoxBody;

    fn respond_to(self, _req: &HttpRequest) -> HttpResponse<Self::Body> {
        self.into_response()
    }
}

/// Which handler a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Root,
    Webhook,
}

/// Paths served at `/` and, when set, under a prefix such as `/prod`.
#[derive(Debug, Clone, Default)]
pub struct Routes {
    prefix: Option<String>,
}

impl Routes {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    fn roots(&self) -> Vec<String> {
        let mut roots = vec!["/".to_owned()];
        if let Some(prefix) = &self.prefix {
            roots.push(prefix.clone());
            roots.push(format!("{}/", prefix));
        }
        roots
    }

    fn webhooks(&self) -> Vec<String> {
        let mut webhooks = vec!["/webhook".to_owned()];
        if let Some(prefix) = &self.prefix {
            webhooks.push(format!("{}/webhook", prefix));
        }
        webhooks
    }

    pub fn resolve(&self, path: &str) -> Option<Route> {
        if self.roots().iter().any(|root| root == path) {
            Some(Route::Root)
        } else if self.webhooks().iter().any(|webhook| webhook == path) {
            Some(Route::Webhook)
        } else {
            None
        }
    }

    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        for root in self.roots() {
            cfg.route(&root, web::get().to(root_health));
        }
        for path in self.webhooks() {
            cfg.service(
                web::resource(path)
                    .route(web::get().to(webhook_health))
                    .route(web::post().to(webhook)),
            );
        }
    }
}

pub async fn root_health() -> Outcome {
    Outcome::ok("Webhook server is running")
}

pub async fn webhook_health() -> Outcome {
    Outcome::ok("ok")
}

pub async fn webhook(delivery: Delivery, hooks: web::Data<Hooks>) -> Outcome {
    hooks.handle(&delivery.event, &delivery.body).await
}
