use secstr::{SecStr, SecUtf8};
use serde::{Deserialize, Deserializer};

pub const ENV_PREFIX: &str = "TOPIC_HOOK_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_secstr")]
    pub webhook_secret: SecStr,
    #[serde(deserialize_with = "deserialize_secutf8")]
    pub github_token: SecUtf8,
    /// Only repositories owned by this login are touched.
    pub organization: String,
    /// Topic guaranteed to be present after a successful delivery.
    pub topic: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Extra mount point for every route, e.g. an API Gateway stage (`/prod`).
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub fault_status: FaultStatus,
}

/// Status used for faults that are neither a bad signature nor an upstream
/// rejection: malformed payloads, transport errors, undecodable replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultStatus {
    /// `400` for malformed payloads, `500` for everything else.
    Internal,
    /// Answer `401` like a signature failure.
    Unauthorized,
}

impl Default for FaultStatus {
    fn default() -> Self {
        FaultStatus::Internal
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Env(#[from] envy::Error),
    #[error("`{}{}` must not be empty", ENV_PREFIX, .0.to_uppercase())]
    Empty(&'static str),
    #[error("`{0}` is not a valid GitHub topic")]
    InvalidTopic(String),
    #[error("path prefix `{0}` must start with `/` and must not end with one")]
    InvalidPathPrefix(String),
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_owned()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_owned()
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

fn deserialize_secstr<'de, D>(de: D) -> Result<SecStr, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(de).map(|s| SecStr::new(s.into_bytes()))
}

fn deserialize_secutf8<'de, D>(de: D) -> Result<SecUtf8, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(de).map(SecUtf8::from)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        envy::prefixed(ENV_PREFIX).from_env::<Self>()?.validate()
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter::<_, Self>(vars)?.validate()
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.webhook_secret.unsecure().is_empty() {
            return Err(ConfigError::Empty("webhook_secret"));
        }
        if self.github_token.unsecure().is_empty() {
            return Err(ConfigError::Empty("github_token"));
        }
        if self.organization.is_empty() {
            return Err(ConfigError::Empty("organization"));
        }
        if !is_valid_topic(&self.topic) {
            return Err(ConfigError::InvalidTopic(self.topic));
        }
        self.path_prefix = match self.path_prefix.take().filter(|p| !p.is_empty()) {
            Some(prefix) if !prefix.starts_with('/') || prefix.ends_with('/') => {
                return Err(ConfigError::InvalidPathPrefix(prefix));
            }
            prefix => prefix,
        };
        self.github_api_url = self.github_api_url.trim_end_matches('/').to_owned();
        Ok(self)
    }
}

/// GitHub accepts lowercase letters, digits and hyphens, at most 50 characters,
/// not starting with a hyphen.
fn is_valid_topic(topic: &str) -> bool {
    let mut chars = topic.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    topic.len() <= 50 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
