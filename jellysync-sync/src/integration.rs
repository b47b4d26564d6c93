//! Provider adapter capabilities and the provider registry.
//!
//! A provider is described by an [`IntegrationDefinition`] (static facts and
//! the hooks that run without an instance) which builds [`Integration`]
//! instances bound to one [`IntegrationContext`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jellysync_core::{Contract, Sequence, SyncError, SyncStorage, Token};
use serde_json::Value;

use crate::instance::IntegrationContext;

/// Options handed to `translate`/`mirror`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOptions {
    /// Id of the local actor the action runs as.
    pub actor: String,
}

/// Everything an adapter instance is constructed with.
#[derive(Clone)]
pub struct IntegrationOptions {
    pub token: Token,
    pub default_user: Option<String>,
    pub context: IntegrationContext,
}

/// Raw inbound webhook, as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub raw: String,
    pub headers: BTreeMap<String, String>,
}

/// One live adapter instance.
#[async_trait]
pub trait Integration: Send + Sync {
    async fn initialize(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), SyncError> {
        Ok(())
    }

    /// Turn an inbound external event into local intents.
    async fn translate(
        &self,
        event: &Contract,
        options: &ActionOptions,
    ) -> Result<Sequence, SyncError>;

    /// Push a local record out to the provider; returns follow-up intents.
    async fn mirror(&self, contract: &Contract, options: &ActionOptions)
        -> Result<Sequence, SyncError>;

    async fn get_file(&self, file: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Err(SyncError::NoExternalResource(format!(
            "file {file} is not available"
        )))
    }
}

/// Static side of a provider.
#[async_trait]
pub trait IntegrationDefinition: Send + Sync {
    /// Base URL of the provider's OAuth endpoints, for OAuth-capable providers.
    fn oauth_base_url(&self) -> Option<&str> {
        None
    }

    fn oauth_scopes(&self) -> &[String] {
        &[]
    }

    /// Verify an inbound webhook against the provider's secrets.
    fn is_event_valid(&self, token: &Token, event: &RawEvent) -> bool;

    fn create(&self, options: IntegrationOptions) -> Arc<dyn Integration>;

    /// The external account that `credentials` belong to.
    async fn whoami(
        &self,
        _storage: &dyn SyncStorage,
        _credentials: &Value,
    ) -> Result<Value, SyncError> {
        Err(SyncError::NoCompatibleIntegration(
            "integration does not support whoami".to_owned(),
        ))
    }

    /// Local user record matching an external user; `slug` is `<slug>@latest`.
    async fn match_user(
        &self,
        _storage: &dyn SyncStorage,
        _external_user: &Value,
        _slug: &str,
    ) -> Result<Option<Contract>, SyncError> {
        Err(SyncError::NoCompatibleIntegration(
            "integration does not support user matching".to_owned(),
        ))
    }

    async fn external_user_sync_event_data(
        &self,
        _storage: &dyn SyncStorage,
        _external_user: &Value,
    ) -> Result<Option<Value>, SyncError> {
        Err(SyncError::NoCompatibleIntegration(
            "integration does not support user sync events".to_owned(),
        ))
    }

    fn is_oauth_capable(&self) -> bool {
        self.oauth_base_url().is_some() && !self.oauth_scopes().is_empty()
    }
}

/// Provider name to definition.
#[derive(Clone, Default)]
pub struct IntegrationRegistry {
    definitions: BTreeMap<String, Arc<dyn IntegrationDefinition>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        provider: impl Into<String>,
        definition: Arc<dyn IntegrationDefinition>,
    ) -> &mut Self {
        self.definitions.insert(provider.into(), definition);
        self
    }

    pub fn get(&self, provider: &str) -> Option<&Arc<dyn IntegrationDefinition>> {
        self.definitions.get(provider)
    }

    /// Providers with both an OAuth base URL and scopes, sorted by name.
    pub fn oauth_integrations(&self) -> Vec<&str> {
        self.definitions
            .iter()
            .filter(|(_, definition)| definition.is_oauth_capable())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Definition of an OAuth-capable provider, or `SyncNoCompatibleIntegration`.
    pub fn oauth_integration(
        &self,
        provider: &str,
    ) -> Result<&Arc<dyn IntegrationDefinition>, SyncError> {
        self.get(provider)
            .filter(|definition| definition.is_oauth_capable())
            .ok_or_else(|| {
                SyncError::NoCompatibleIntegration(format!(
                    "There is no compatible integration for provider: {provider}"
                ))
            })
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}
