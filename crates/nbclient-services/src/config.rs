//! Client configuration
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:8888/"
//! token = "secret"
//!
//! [http]
//! timeout_secs = 30
//!
//! [polling]
//! running_interval_secs = 10
//! specs_interval_secs = 61
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `server.base_url`
pub const ENV_BASE_URL: &str = "NBCLIENT_BASE_URL";
/// Environment variable overriding `server.token`
pub const ENV_TOKEN: &str = "NBCLIENT_TOKEN";

/// Server connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Server base URL
    pub base_url: String,
    /// API token
    pub token: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8888/".to_string(),
            token: None,
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Polling intervals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSection {
    /// Running-session list refresh interval
    pub running_interval_secs: u64,
    /// Kernel spec refresh interval
    pub specs_interval_secs: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            running_interval_secs: 10,
            specs_interval_secs: 61,
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `[server]`
    pub server: ServerSection,
    /// `[http]`
    pub http: HttpSection,
    /// `[polling]`
    pub polling: PollingSection,
}

impl ClientConfig {
    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` on invalid TOML.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, `ConfigError::Parse`
    /// if it is not valid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `NBCLIENT_BASE_URL` / `NBCLIENT_TOKEN` when set
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(ENV_BASE_URL).ok(),
            std::env::var(ENV_TOKEN).ok(),
        )
    }

    fn with_overrides(mut self, base_url: Option<String>, token: Option<String>) -> Self {
        if let Some(url) = base_url.filter(|u| !u.is_empty()) {
            self.server.base_url = url;
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.server.token = Some(token);
        }
        self
    }

    /// With base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.server.base_url = url.into();
        self
    }

    /// With token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.server.token = Some(token.into());
        self
    }

    /// Request timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    /// Running-session poll interval
    #[inline]
    #[must_use]
    pub fn running_interval(&self) -> Duration {
        Duration::from_secs(self.polling.running_interval_secs)
    }

    /// Kernel spec poll interval
    #[inline]
    #[must_use]
    pub fn specs_interval(&self) -> Duration {
        Duration::from_secs(self.polling.specs_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = ClientConfig::from_toml_str("[http]\ntimeout_secs = 5\n").unwrap();
        assert_eq!(config.server, ServerSection::default());
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.running_interval(), Duration::from_secs(10));
        assert_eq!(config.specs_interval(), Duration::from_secs(61));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nbase_url = \"http://example.com:9999/lab/\"\ntoken = \"abc\"\n\n[polling]\nrunning_interval_secs = 2"
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.base_url, "http://example.com:9999/lab/");
        assert_eq!(config.server.token.as_deref(), Some("abc"));
        assert_eq!(config.polling.running_interval_secs, 2);
        assert_eq!(config.polling.specs_interval_secs, 61);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = ClientConfig::from_toml_str("[http]\ntimeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn overrides_ignore_empty_values() {
        let config = ClientConfig::default()
            .with_overrides(Some("http://other:1/".into()), Some(String::new()));
        assert_eq!(config.server.base_url, "http://other:1/");
        assert_eq!(config.server.token, None);
    }
}
