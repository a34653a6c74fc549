use actix_web::web::Bytes;
use base64::Engine as _;

/// Proxy request body in the form the gateway handed it over. Bodies read
/// straight off an HTTP connection are already bytes and skip this.
#[derive(Debug, Clone)]
pub enum RawBody {
    Text(String),
    Base64(String),
}

#[derive(Debug, thiserror::Error)]
#[error("body is flagged as base64 but doesn't decode: {0}")]
pub struct BodyError(#[from] base64::DecodeError);

impl RawBody {
    /// Builds a body from a proxy-style `(body, isBase64Encoded)` pair.
    pub fn from_proxy(body: Option<String>, is_base64_encoded: bool) -> Self {
        let body = body.unwrap_or_default();
        if is_base64_encoded {
            RawBody::Base64(body)
        } else {
            RawBody::Text(body)
        }
    }

    /// Bytes exactly as the sender signed them.
    pub fn into_bytes(self) -> Result<Bytes, BodyError> {
        match self {
            RawBody::Text(text) => Ok(Bytes::from(text)),
            RawBody::Base64(encoded) => Ok(Bytes::from(
                base64::engine::general_purpose::STANDARD.decode(encoded.trim())?,
            )),
        }
    }
}
