use std::collections::HashMap;

use actix_web::http::StatusCode;
use secstr::SecStr;
use serde::{Deserialize as _, Deserializer};

use crate::{
    body::RawBody,
    github::EVENT_HEADER,
    hooks::{Hooks, Outcome},
    http::{Route, Routes},
    signature,
};

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEvent {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    pub raw_path: Option<String>,
    pub path: Option<String>,
    pub http_method: Option<String>,
    pub request_context: Option<RequestContext>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct RequestContext {
    pub http: Option<HttpContext>,
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct HttpContext {
    pub method: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl From<Outcome> for ProxyResponse {
    fn from(outcome: Outcome) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_owned(),
            "text/plain; charset=utf-8".to_owned(),
        );
        Self {
            status_code: outcome.status.as_u16(),
            headers,
            body: outcome.body.into_owned(),
        }
    }
}

impl ProxyEvent {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn method(&self) -> &str {
        self.request_context
            .as_ref()
            .and_then(|ctx| ctx.http.as_ref())
            .and_then(|http| http.method.as_deref())
            .or_else(|| self.http_method.as_deref())
            .unwrap_or("GET")
    }

    fn path(&self) -> &str {
        self.raw_path
            .as_deref()
            .or_else(|| {
                self.request_context
                    .as_ref()
                    .and_then(|ctx| ctx.http.as_ref())
                    .and_then(|http| http.path.as_deref())
            })
            .or_else(|| self.path.as_deref())
            .unwrap_or("/")
    }
}

/// Routes, authenticates and answers a single proxy event.
pub async fn handle(
    event: ProxyEvent,
    secret: &SecStr,
    routes: &Routes,
    hooks: &Hooks,
) -> ProxyResponse {
    let method = event.method().to_ascii_uppercase();
    let outcome = match (routes.resolve(event.path()), method.as_str()) {
        (Some(Route::Root), "GET") => Outcome::ok("Webhook server is running"),
        (Some(Route::Webhook), "GET") => Outcome::ok("ok"),
        (Some(Route::Webhook), "POST") => deliver(event, secret, hooks).await,
        (Some(_), _) => Outcome::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        (None, _) => Outcome::new(StatusCode::NOT_FOUND, "not found"),
    };
    outcome.into()
}

async fn deliver(event: ProxyEvent, secret: &SecStr, hooks: &Hooks) -> Outcome {
    let signature = event.header(signature::HEADER).map(str::to_owned);
    let github_event = event.header(EVENT_HEADER).unwrap_or_default().to_owned();

    let body = match RawBody::from_proxy(event.body, event.is_base64_encoded).into_bytes() {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!("Rejected webhook body: {}", err);
            return Outcome::bad_signature();
        }
    };
    if !signature::verify(Some(secret.unsecure()), signature.as_deref(), &body) {
        return Outcome::bad_signature();
    }
    tracing::debug!("Signature OK");

    hooks.handle(&github_event, &body).await
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::*;
    use crate::{
        config::FaultStatus,
        hooks::tests::{fake_hooks, payload, Call, FakeGithub, Reply, ORG, TOPIC},
        signature::sign,
    };

    const SECRET: &[u8] = b"testsecret";

    fn secret() -> SecStr {
        SecStr::new(SECRET.to_vec())
    }

    fn routes() -> Routes {
        Routes::new(Some("/prod".to_owned()))
    }

    fn happy() -> FakeGithub {
        FakeGithub::new(Reply::Names(vec!["foo"]), Reply::Names(vec![]))
    }

    fn event(event: &str, body: &[u8], signature: &str, encode: bool) -> ProxyEvent {
        let body = if encode {
            base64::engine::general_purpose::STANDARD.encode(body)
        } else {
            String::from_utf8(body.to_vec()).unwrap()
        };
        serde_json::from_value(serde_json::json!({
            "version": "2.0",
            "routeKey": "POST /webhook",
            "rawPath": "/webhook",
            "rawQueryString": "",
            "requestContext": { "http": { "method": "POST", "path": "/webhook" } },
            "headers": {
                "x-hub-signature-256": signature,
                "x-github-event": event,
                "content-type": "application/json",
            },
            "isBase64Encoded": encode,
            "body": body,
        }))
        .unwrap()
    }

    fn tamper(signature: &str) -> String {
        let mut tampered = signature.to_owned();
        let last = if tampered.ends_with('0') { '1' } else { '0' };
        tampered.pop();
        tampered.push(last);
        tampered
    }

    #[actix_web::test]
    async fn plain_and_base64_bodies_verify_alike() {
        let body = br#"{"zen":"Keep it logically awesome.","hook_id":123}"#;
        let good = sign(SECRET, body);
        let bad = tamper(&good);

        for encode in &[false, true] {
            let (hooks, _) = fake_hooks(happy(), FaultStatus::Internal);
            let resp = handle(event("ping", body, &good, *encode), &secret(), &routes(), &hooks).await;
            assert_eq!((resp.status_code, resp.body.as_str()), (200, "pong"));

            let resp = handle(event("ping", body, &bad, *encode), &secret(), &routes(), &hooks).await;
            assert_eq!((resp.status_code, resp.body.as_str()), (401, "bad signature"));
        }
    }

    #[actix_web::test]
    async fn base64_push_is_processed_like_plain() {
        let body = payload(None, Some(ORG), Some("demo-repo"));
        let signature = sign(SECRET, &body);

        let mut puts = Vec::new();
        for encode in &[false, true] {
            let api = happy();
            let calls = api.calls.clone();
            let (hooks, _) = fake_hooks(api, FaultStatus::Internal);
            let resp = handle(
                event("push", &body, &signature, *encode),
                &secret(),
                &routes(),
                &hooks,
            )
            .await;
            assert_eq!(resp.status_code, 200);
            puts.push(calls.borrow().last().cloned());
        }
        assert_eq!(puts[0], puts[1]);
        match &puts[0] {
            Some(Call::Put(_, names)) => assert!(names.iter().any(|n| n == TOPIC)),
            other => panic!("expected PUT, got {:?}", other),
        }
    }

    #[actix_web::test]
    async fn missing_body_or_header_is_unauthorized() {
        let (hooks, calls) = fake_hooks(happy(), FaultStatus::Internal);

        let mut no_body = event("ping", b"{}", &sign(SECRET, b"{}"), false);
        no_body.body = None;
        let mut no_header = event("ping", b"{}", &sign(SECRET, b"{}"), false);
        no_header.headers.remove("x-hub-signature-256");
        let mut broken_base64 = event("ping", b"{}", &sign(SECRET, b"{}"), true);
        broken_base64.body = Some("%%%".to_owned());

        for event in vec![no_body, no_header, broken_base64] {
            let resp = handle(event, &secret(), &routes(), &hooks).await;
            assert_eq!(resp.status_code, 401);
        }
        assert!(calls.borrow().is_empty());
    }

    #[actix_web::test]
    async fn header_names_are_case_insensitive() {
        let (hooks, _) = fake_hooks(happy(), FaultStatus::Internal);
        let body = b"{}";
        let mut event = event("ping", body, "", false);
        event.headers = vec![
            ("X-Hub-Signature-256".to_owned(), sign(SECRET, body)),
            ("X-GitHub-Event".to_owned(), "ping".to_owned()),
        ]
        .into_iter()
        .collect();

        let resp = handle(event, &secret(), &routes(), &hooks).await;
        assert_eq!((resp.status_code, resp.body.as_str()), (200, "pong"));
    }

    #[actix_web::test]
    async fn health_checks_and_unknown_routes() {
        let (hooks, _) = fake_hooks(happy(), FaultStatus::Internal);
        let cases = vec![
            (r#"{"rawPath":"/prod/","requestContext":{"http":{"method":"GET"}}}"#, 200),
            (r#"{"path":"/prod/webhook","httpMethod":"GET"}"#, 200),
            (r#"{"rawPath":"/","requestContext":{"http":{"method":"POST"}}}"#, 405),
            (r#"{"rawPath":"/nope","requestContext":{"http":{"method":"GET"}}}"#, 404),
        ];
        for (json, status) in cases {
            let event: ProxyEvent = serde_json::from_str(json).unwrap();
            let resp = handle(event, &secret(), &routes(), &hooks).await;
            assert_eq!(resp.status_code, status, "{}", json);
        }
    }

    #[actix_web::test]
    async fn null_headers_are_empty() {
        let (hooks, calls) = fake_hooks(happy(), FaultStatus::Internal);

        let event: ProxyEvent = serde_json::from_str(
            r#"{"path":"/","httpMethod":"GET","headers":null,"body":null,"isBase64Encoded":false}"#,
        )
        .unwrap();
        assert!(event.headers.is_empty());
        let resp = handle(event, &secret(), &routes(), &hooks).await;
        assert_eq!((resp.status_code, resp.body.as_str()), (200, "Webhook server is running"));

        let event: ProxyEvent = serde_json::from_str(
            r#"{"path":"/webhook","httpMethod":"POST","headers":null,"body":"{}"}"#,
        )
        .unwrap();
        let resp = handle(event, &secret(), &routes(), &hooks).await;
        assert_eq!((resp.status_code, resp.body.as_str()), (401, "bad signature"));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn response_uses_proxy_field_names() {
        let resp = ProxyResponse::from(Outcome::ok("pong"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["body"], "pong");
        assert_eq!(json["headers"]["content-type"], "text/plain; charset=utf-8");
    }
}
