//! Error types for jellysync-core.
//!
//! [`SyncError`] is the single error surface shared by every jellysync crate.
//! Collaborators recognise failures through [`SyncError::kind`], which maps
//! each variant onto the fixed catalog of named kinds in [`ErrorKind`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error used for failures raised by collaborators (storage backends,
/// HTTP transports, provider adapters).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The external service kept failing after all retries were spent, or the
    /// request could not be performed at all.
    #[error("external service responded with {status} to {url}")]
    ExternalRequest {
        url: String,
        status: u16,
        body: Option<String>,
    },

    /// Transport-level failure (connection refused, TLS, DNS). Never retried.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },

    /// The external service kept rate limiting (429) or timing out (408).
    #[error("external service rate limit with {status} to {url}")]
    RateLimit { url: String, status: u16 },

    /// A caller passed an argument the operation cannot use.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// An external event is missing fields an adapter needs.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A request could not be built, e.g. its URL does not parse.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An intent's `$eval` placeholders did not resolve, or the intent is not an object.
    #[error("could not evaluate template: {0}")]
    InvalidTemplate(String),

    /// No type could be determined for an intent.
    #[error("invalid type: {0}")]
    InvalidType(String),

    /// An actor id or default user handle did not resolve to a user record.
    #[error("no such actor: {0}")]
    NoActor(String),

    /// No integration is registered under the provider name, or it lacks OAuth.
    #[error("no compatible integration: {0}")]
    NoCompatibleIntegration(String),

    /// A record the operation depends on does not exist.
    #[error("no such element: {0}")]
    NoElement(String),

    #[error("no external resource: {0}")]
    NoExternalResource(String),

    /// The provider token has no `app_id`/`app_secret`.
    #[error("no application credentials found for integration: {0}")]
    NoIntegrationAppCredentials(String),

    /// The external account does not map onto the requested local user.
    #[error("no matching user: {0}")]
    NoMatchingUser(String),

    /// OAuth is configured but cannot proceed, e.g. no origin URL.
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Neither the actor nor the default user holds a credential for the provider.
    #[error("no OAuth user: {0}")]
    OAuthNoUser(String),

    #[error("permission error: {0}")]
    Permissions(String),

    /// The OAuth token endpoint answered with an unexpected status or an
    /// unusable token.
    #[error("OAuth request error: {0}")]
    OAuthRequest(String),

    /// A required OAuth option (app id, secret, redirect URI, scopes, code) is missing.
    #[error("invalid OAuth option: {0}")]
    OAuthInvalidOption(String),

    /// The OAuth token endpoint rejected the grant (4xx).
    #[error("{url} responded with {status}: {body}")]
    OAuthUnsuccessfulResponse {
        url: String,
        status: u16,
        body: String,
    },

    /// Failure reported by the storage collaborator.
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),

    /// Failure reported by a provider adapter.
    #[error("integration error: {0}")]
    Integration(#[source] BoxError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file exists but is not valid YAML for [`crate::settings::Settings`].
    #[error("failed to parse settings at {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Named error kinds that collaborators match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SyncExternalRequestError,
    SyncInvalidArg,
    SyncInvalidEvent,
    SyncInvalidRequest,
    SyncInvalidTemplate,
    SyncInvalidType,
    SyncNoActor,
    SyncNoCompatibleIntegration,
    SyncNoElement,
    SyncNoExternalResource,
    SyncNoIntegrationAppCredentials,
    SyncNoMatchingUser,
    SyncOAuthError,
    SyncOAuthNoUserError,
    SyncPermissionsError,
    SyncRateLimit,
    OAuthRequestError,
    OAuthInvalidOption,
    OAuthUnsuccessfulResponse,
    Storage,
    Integration,
    Internal,
}

/// The four failure classes callers use to decide between skip, fail and
/// requeue, plus a bucket for local faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    ActorResolution,
    ExternalService,
    Permission,
    Internal,
}

impl ErrorKind {
    /// Catalog name, as exported to collaborators.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SyncExternalRequestError => "SyncExternalRequestError",
            ErrorKind::SyncInvalidArg => "SyncInvalidArg",
            ErrorKind::SyncInvalidEvent => "SyncInvalidEvent",
            ErrorKind::SyncInvalidRequest => "SyncInvalidRequest",
            ErrorKind::SyncInvalidTemplate => "SyncInvalidTemplate",
            ErrorKind::SyncInvalidType => "SyncInvalidType",
            ErrorKind::SyncNoActor => "SyncNoActor",
            ErrorKind::SyncNoCompatibleIntegration => "SyncNoCompatibleIntegration",
            ErrorKind::SyncNoElement => "SyncNoElement",
            ErrorKind::SyncNoExternalResource => "SyncNoExternalResource",
            ErrorKind::SyncNoIntegrationAppCredentials => "SyncNoIntegrationAppCredentials",
            ErrorKind::SyncNoMatchingUser => "SyncNoMatchingUser",
            ErrorKind::SyncOAuthError => "SyncOAuthError",
            ErrorKind::SyncOAuthNoUserError => "SyncOAuthNoUserError",
            ErrorKind::SyncPermissionsError => "SyncPermissionsError",
            ErrorKind::SyncRateLimit => "SyncRateLimit",
            ErrorKind::OAuthRequestError => "OAuthRequestError",
            ErrorKind::OAuthInvalidOption => "OAuthInvalidOption",
            ErrorKind::OAuthUnsuccessfulResponse => "OAuthUnsuccessfulResponse",
            ErrorKind::Storage => "StorageError",
            ErrorKind::Integration => "IntegrationError",
            ErrorKind::Internal => "InternalError",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::SyncInvalidArg
            | ErrorKind::SyncInvalidEvent
            | ErrorKind::SyncInvalidRequest
            | ErrorKind::SyncInvalidTemplate
            | ErrorKind::SyncInvalidType
            | ErrorKind::SyncNoCompatibleIntegration
            | ErrorKind::SyncOAuthError
            | ErrorKind::OAuthInvalidOption => ErrorCategory::Configuration,
            ErrorKind::SyncNoActor
            | ErrorKind::SyncOAuthNoUserError
            | ErrorKind::SyncNoIntegrationAppCredentials => ErrorCategory::ActorResolution,
            ErrorKind::SyncExternalRequestError
            | ErrorKind::SyncRateLimit
            | ErrorKind::SyncNoExternalResource
            | ErrorKind::OAuthRequestError
            | ErrorKind::OAuthUnsuccessfulResponse => ErrorCategory::ExternalService,
            ErrorKind::SyncNoMatchingUser | ErrorKind::SyncPermissionsError => {
                ErrorCategory::Permission
            }
            ErrorKind::SyncNoElement
            | ErrorKind::Storage
            | ErrorKind::Integration
            | ErrorKind::Internal => ErrorCategory::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    /// Catalog kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ExternalRequest { .. } | SyncError::Transport { .. } => {
                ErrorKind::SyncExternalRequestError
            }
            SyncError::RateLimit { .. } => ErrorKind::SyncRateLimit,
            SyncError::InvalidArg(_) => ErrorKind::SyncInvalidArg,
            SyncError::InvalidEvent(_) => ErrorKind::SyncInvalidEvent,
            SyncError::InvalidRequest(_) => ErrorKind::SyncInvalidRequest,
            SyncError::InvalidTemplate(_) => ErrorKind::SyncInvalidTemplate,
            SyncError::InvalidType(_) => ErrorKind::SyncInvalidType,
            SyncError::NoActor(_) => ErrorKind::SyncNoActor,
            SyncError::NoCompatibleIntegration(_) => ErrorKind::SyncNoCompatibleIntegration,
            SyncError::NoElement(_) => ErrorKind::SyncNoElement,
            SyncError::NoExternalResource(_) => ErrorKind::SyncNoExternalResource,
            SyncError::NoIntegrationAppCredentials(_) => {
                ErrorKind::SyncNoIntegrationAppCredentials
            }
            SyncError::NoMatchingUser(_) => ErrorKind::SyncNoMatchingUser,
            SyncError::OAuth(_) => ErrorKind::SyncOAuthError,
            SyncError::OAuthNoUser(_) => ErrorKind::SyncOAuthNoUserError,
            SyncError::Permissions(_) => ErrorKind::SyncPermissionsError,
            SyncError::OAuthRequest(_) => ErrorKind::OAuthRequestError,
            SyncError::OAuthInvalidOption(_) => ErrorKind::OAuthInvalidOption,
            SyncError::OAuthUnsuccessfulResponse { .. } => ErrorKind::OAuthUnsuccessfulResponse,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Integration(_) => ErrorKind::Integration,
            SyncError::Json(_) | SyncError::Io { .. } | SyncError::Settings { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether a worker should requeue the job that produced this error
    /// rather than mark it permanently failed.
    pub fn is_transient(&self) -> bool {
        self.kind().category() == ErrorCategory::ExternalService
    }
}
