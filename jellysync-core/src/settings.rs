//! Worker settings.
//!
//! Loaded from a YAML file; every field has a default so an empty document is
//! a valid configuration:
//!
//! ```yaml
//! default_user: jellysync-bot
//! origin: https://jel.ly.fish/oauth/callback
//! http:
//!   retries: 30
//!   server_error_backoff_ms: 2000
//!   rate_limit_backoff_ms: 5000
//!   oauth_retries: 10
//! pipeline:
//!   concurrency: 3
//! integrations:
//!   github:
//!     appId: "..."
//!     appSecret: "..."
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SyncError};
use crate::types::Token;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Handle of the service account used when an actor has no credential.
    pub default_user: Option<String>,
    /// OAuth redirect URI.
    pub origin: Option<String>,
    pub http: HttpSettings,
    pub pipeline: PipelineSettings,
    /// Per-provider app credentials, keyed by provider name.
    pub integrations: BTreeMap<String, Token>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub retries: u32,
    pub server_error_backoff_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub oauth_retries: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            retries: 30,
            server_error_backoff_ms: 2000,
            rate_limit_backoff_ms: 5000,
            oauth_retries: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Fan-out limit inside one batch.
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { concurrency: 3 }
    }
}

impl Settings {
    /// Load settings from `path`.
    ///
    /// A missing or unreadable file is `SyncError::Io`; malformed YAML is
    /// `SyncError::Settings` naming the file.
    pub fn load_at(path: &Path) -> Result<Self, SyncError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        serde_yaml::from_str(&contents).map_err(|source| SyncError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, SyncError> {
        serde_yaml::from_str(contents).map_err(|source| SyncError::Settings {
            path: "<inline>".into(),
            source,
        })
    }

    /// App credentials for `provider`, if configured.
    pub fn token(&self, provider: &str) -> Option<&Token> {
        self.integrations.get(provider)
    }
}
