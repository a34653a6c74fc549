use hmac::{Hmac, Mac as _};
use sha2::Sha256;

pub const HEADER: &str = "X-Hub-Signature-256";
const PREFIX: &str = "sha256=";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`X-Hub-Signature-256` header isn't found")]
    HeaderNotFound,
    #[error("`X-Hub-Signature-256` has invalid length")]
    InvalidLength,
    #[error("`X-Hub-Signature-256` must start with `sha256=`")]
    InvalidPrefix,
    #[error("signature must be 64 hex digits")]
    NotHex,
    #[error("HMAC key is not specified")]
    NoHmacKey,
    #[error("request body is empty")]
    EmptyBody,
    #[error("signature doesn't match")]
    Mismatch,
}

#[derive(Debug, Clone)]
pub struct Signature(pub [u8; 32]);

impl Signature {
    pub fn parse(header: &str) -> Result<Self, Error> {
        let sig_b = header.as_bytes();
        let prefix = PREFIX.as_bytes();
        if !sig_b.starts_with(prefix) {
            return Err(Error::InvalidPrefix);
        }
        let sig_b = &sig_b[prefix.len()..];
        if sig_b.len() != 64 {
            return Err(Error::InvalidLength);
        }

        hex::FromHex::from_hex(sig_b)
            .map(Self)
            .map_err(|_| Error::NotHex)
    }

    /// Checks the signature against HMAC-SHA256 of `body` keyed by `secret`.
    ///
    /// The comparison runs in constant time.
    pub fn check(&self, secret: &[u8], body: &[u8]) -> Result<(), Error> {
        if secret.is_empty() {
            return Err(Error::NoHmacKey);
        }
        if body.is_empty() {
            return Err(Error::EmptyBody);
        }
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| Error::NoHmacKey)?;
        mac.update(body);
        mac.verify_slice(&self.0).map_err(|_| Error::Mismatch)
    }
}

/// Same as [`try_verify`], collapsed to a yes/no answer. The reason for a
/// rejection only goes to the log.
pub fn verify(secret: Option<&[u8]>, header: Option<&str>, body: &[u8]) -> bool {
    match try_verify(secret, header, body) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(reason = %err, "Rejected webhook signature");
            false
        }
    }
}

pub fn try_verify(secret: Option<&[u8]>, header: Option<&str>, body: &[u8]) -> Result<(), Error> {
    let secret = secret.ok_or(Error::NoHmacKey)?;
    let signature = Signature::parse(header.ok_or(Error::HeaderNotFound)?)?;
    signature.check(secret, body)
}

#[cfg(test)]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
    mac.update(body);
    format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes()))
}
