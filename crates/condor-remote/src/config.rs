use serde::{Deserialize, Serialize};

/// Settings shared by every upstream session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Per-request timeout, covering connect and body transfer.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Sent as `Authorization: Bearer` to upstreams that need it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("condor/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            auth_token: None,
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: RemoteConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RemoteConfig::default());
        assert_eq!(config.timeout_secs, 30);
        assert!(config.user_agent.starts_with("condor/"));
    }

    #[test]
    fn builder_methods() {
        let config = RemoteConfig::default().with_timeout(5).with_token("secret");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
    }
}
