//! Provider-keyed entry points used by the worker.
//!
//! A [`Synchronizer`] owns the provider registry, the worker settings (app
//! credentials, default user, OAuth origin) and the storage handle, and
//! dispatches each call to the right provider. Missing credentials or
//! providers on the event paths are logged and ignored; on the OAuth paths
//! they are errors.

use std::sync::Arc;

use jellysync_core::{
    AccessToken, Contract, Settings, SyncError, SyncStorage, Token, UpsertOptions,
};
use serde_json::Value;

use crate::http::{HttpClient, RetryPolicy};
use crate::instance::{self, RunOptions};
use crate::integration::{IntegrationDefinition, IntegrationRegistry, RawEvent};
use crate::oauth::{self, OAuthCredentials};
use crate::pipeline::{self, PipelineOptions};

pub struct Synchronizer {
    registry: IntegrationRegistry,
    settings: Settings,
    storage: Arc<dyn SyncStorage>,
    http: HttpClient,
}

impl Synchronizer {
    pub fn new(
        registry: IntegrationRegistry,
        settings: Settings,
        storage: Arc<dyn SyncStorage>,
    ) -> Self {
        let http = HttpClient::with_reqwest(RetryPolicy::from(&settings.http));
        Self {
            registry,
            settings,
            storage,
            http,
        }
    }

    /// Replace the HTTP client, e.g. to change the retry policy.
    pub fn with_http(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    pub fn registry(&self) -> &IntegrationRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Providers that support the OAuth flow.
    pub fn oauth_integrations(&self) -> Vec<&str> {
        self.registry.oauth_integrations()
    }

    fn definition(&self, provider: &str) -> Result<&Arc<dyn IntegrationDefinition>, SyncError> {
        self.registry.get(provider).ok_or_else(|| {
            SyncError::NoCompatibleIntegration(format!(
                "There is no compatible integration for provider: {provider}"
            ))
        })
    }

    fn origin(&self) -> &str {
        self.settings.origin.as_deref().unwrap_or_default()
    }

    fn run_options(&self, provider: &str) -> RunOptions {
        RunOptions {
            storage: self.storage.clone(),
            http: self.http.clone(),
            provider: provider.to_owned(),
            origin: self.settings.origin.clone(),
            default_user: self.settings.default_user.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // OAuth
    // -----------------------------------------------------------------------

    /// Authorization URL a user visits to link `provider` to the record `slug`.
    ///
    /// `None` when the provider is unknown, not OAuth-capable, or has no app id.
    pub fn get_associate_url(
        &self,
        provider: &str,
        slug: &str,
    ) -> Result<Option<String>, SyncError> {
        let Some(definition) = self.registry.get(provider) else {
            return Ok(None);
        };
        let Some(app_id) = self
            .settings
            .token(provider)
            .and_then(|token| token.app_id.as_deref())
            .filter(|id| !id.is_empty())
        else {
            return Ok(None);
        };
        let (Some(base_url), true) = (definition.oauth_base_url(), definition.is_oauth_capable())
        else {
            return Ok(None);
        };

        oauth::get_authorize_url(
            base_url,
            definition.oauth_scopes(),
            Some(&Value::String(slug.to_owned())),
            app_id,
            self.origin(),
        )
        .map(Some)
    }

    /// Exchange an authorization `code` for an access token.
    pub async fn authorize(&self, provider: &str, code: &str) -> Result<AccessToken, SyncError> {
        let definition = self.registry.oauth_integration(provider)?;
        let token = self
            .settings
            .token(provider)
            .filter(|token| token.has_app_credentials())
            .ok_or_else(|| {
                SyncError::NoIntegrationAppCredentials(format!(
                    "No application credentials found for integration: {provider}"
                ))
            })?;
        let base_url = definition.oauth_base_url().unwrap_or_default();
        let credentials = OAuthCredentials {
            app_id: token.app_id.clone().unwrap_or_default(),
            app_secret: token.app_secret.clone().unwrap_or_default(),
            redirect_uri: self.origin().to_owned(),
        };
        oauth::get_access_token(&self.http, base_url, code, &credentials).await
    }

    /// Store `credentials` on `user` under `data.oauth.<provider>`.
    pub async fn associate(
        &self,
        provider: &str,
        mut user: Contract,
        credentials: &AccessToken,
    ) -> Result<Option<Contract>, SyncError> {
        self.definition(provider)?;
        user.set_oauth_credential(provider, credentials)?;
        self.storage
            .upsert_element(
                &user.contract_type,
                user.to_upsert_object()?,
                UpsertOptions::now(),
            )
            .await
    }

    /// The external account `credentials` belong to.
    pub async fn whoami(&self, provider: &str, credentials: &Value) -> Result<Value, SyncError> {
        let definition = self.definition(provider)?;
        definition.whoami(self.storage.as_ref(), credentials).await
    }

    /// The local user matching `external_user`, which must carry `slug`.
    pub async fn match_user(
        &self,
        provider: &str,
        external_user: &Value,
        slug: &str,
    ) -> Result<Option<Contract>, SyncError> {
        let definition = self.definition(provider)?;
        let user = definition
            .match_user(self.storage.as_ref(), external_user, &format!("{slug}@latest"))
            .await?;
        if let Some(user) = &user {
            if user.slug != slug {
                return Err(SyncError::NoMatchingUser(format!(
                    "Could not find matching user for provider: {provider}, slugs do not match {} !== {slug}",
                    user.slug
                )));
            }
        }
        Ok(user)
    }

    /// Event payload that syncs `external_user` into a local user.
    pub async fn external_user_sync_event_data(
        &self,
        provider: &str,
        external_user: &Value,
    ) -> Result<Value, SyncError> {
        let definition = self.definition(provider)?;
        definition
            .external_user_sync_event_data(self.storage.as_ref(), external_user)
            .await?
            .ok_or_else(|| {
                SyncError::NoMatchingUser("Could not generate external user sync event".to_owned())
            })
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Whether an inbound webhook is authentic. Unknown providers and
    /// providers without configured credentials are never valid.
    pub fn is_valid_event(&self, provider: &str, event: &RawEvent) -> bool {
        match (self.registry.get(provider), self.settings.token(provider)) {
            (Some(definition), Some(token)) => definition.is_event_valid(token, event),
            _ => false,
        }
    }

    fn usable(
        &self,
        provider: &str,
        action: &str,
    ) -> Option<(&Arc<dyn IntegrationDefinition>, &Token)> {
        let Some(token) = self.settings.token(provider) else {
            tracing::warn!(integration = %provider, "Ignoring {action} as there is no token");
            return None;
        };
        let Some(definition) = self.registry.get(provider) else {
            tracing::warn!(
                integration = %provider,
                "Ignoring {action} as there is no compatible integration"
            );
            return None;
        };
        Some((definition, token))
    }

    /// Push a local record out to `provider` as `actor`.
    pub async fn mirror(
        &self,
        provider: &str,
        contract: &Contract,
        actor: &str,
    ) -> Result<Vec<Contract>, SyncError> {
        let Some((definition, token)) = self.usable(provider, "mirror") else {
            return Ok(Vec::new());
        };
        pipeline::mirror_contract(
            definition.as_ref(),
            contract,
            self.pipeline_options(provider, token, actor),
        )
        .await
    }

    /// Turn an inbound external event into local records as `actor`.
    pub async fn translate(
        &self,
        provider: &str,
        event: &Contract,
        actor: &str,
    ) -> Result<Vec<Contract>, SyncError> {
        let Some((definition, token)) = self.usable(provider, "translate") else {
            return Ok(Vec::new());
        };

        tracing::info!(
            id = %event.id,
            slug = %event.slug,
            integration = %provider,
            "Translating external event"
        );
        let contracts = pipeline::translate_external_event(
            definition.as_ref(),
            event,
            self.pipeline_options(provider, token, actor),
        )
        .await?;
        let slugs: Vec<&str> = contracts.iter().map(|c| c.slug.as_str()).collect();
        tracing::info!(slugs = ?slugs, "Translated external event");
        Ok(contracts)
    }

    /// Fetch an external file through `provider`.
    pub async fn get_file(
        &self,
        provider: &str,
        file: &str,
    ) -> Result<Option<Vec<u8>>, SyncError> {
        let Some((definition, token)) = self.usable(provider, "file fetch") else {
            return Ok(None);
        };

        tracing::info!(file = %file, integration = %provider, "Retrieving external file");
        instance::run(
            definition.as_ref(),
            token.clone(),
            self.run_options(provider),
            |integration| async move { integration.get_file(file).await },
        )
        .await
    }

    fn pipeline_options(&self, provider: &str, token: &Token, actor: &str) -> PipelineOptions {
        PipelineOptions {
            token: token.clone(),
            actor: actor.to_owned(),
            run: self.run_options(provider),
            concurrency: self.settings.pipeline.concurrency,
        }
    }
}
