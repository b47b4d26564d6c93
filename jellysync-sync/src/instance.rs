//! Integration runtime.
//!
//! [`run`] builds an adapter instance around a capability-limited
//! [`IntegrationContext`], initializes it, hands it to the caller, and always
//! destroys it before returning. The context's [`IntegrationContext::request`]
//! is where OAuth credentials are resolved, injected and refreshed.

use std::future::Future;
use std::sync::Arc;

use jellysync_core::{
    AccessToken, ActorInformation, Contract, MirrorLookup, SyncError, SyncStorage, Token,
    UpsertOptions,
};

use crate::actor;
use crate::http::{HttpClient, HttpResponse, RequestOptions};
use crate::integration::{Integration, IntegrationDefinition, IntegrationOptions};
use crate::oauth::{self, OAuthCredentials};

/// How to reach storage and the network, and whom to act as.
#[derive(Clone)]
pub struct RunOptions {
    pub storage: Arc<dyn SyncStorage>,
    pub http: HttpClient,
    /// Provider name; also the key of stored credentials (`data.oauth.<provider>`).
    pub provider: String,
    /// OAuth redirect URI, required to refresh tokens.
    pub origin: Option<String>,
    /// Handle of the service account used when the actor has no credential.
    pub default_user: Option<String>,
}

struct ContextInner {
    storage: Arc<dyn SyncStorage>,
    http: HttpClient,
    provider: String,
    token: Token,
    oauth_base_url: Option<String>,
    origin: Option<String>,
    default_user: Option<String>,
}

/// What an adapter instance may do: read records, translate usernames,
/// make requests on behalf of an actor, and resolve external identities.
#[derive(Clone)]
pub struct IntegrationContext {
    inner: Arc<ContextInner>,
}

impl IntegrationContext {
    /// Context for one adapter instance of `definition`, running with the
    /// provider's app `token`.
    pub fn new(definition: &dyn IntegrationDefinition, token: Token, options: RunOptions) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                storage: options.storage,
                http: options.http,
                provider: options.provider,
                token,
                oauth_base_url: definition.oauth_base_url().map(str::to_owned),
                origin: options.origin,
                default_user: options.default_user,
            }),
        }
    }

    /// Provider name this context was built for.
    pub fn provider(&self) -> &str {
        &self.inner.provider
    }

    /// The provider's app credentials and extra settings.
    pub fn token(&self) -> &Token {
        &self.inner.token
    }

    /// Look a record up by id.
    pub async fn get_element_by_id(&self, id: &str) -> Result<Option<Contract>, SyncError> {
        self.inner.storage.get_element_by_id(id).await
    }

    /// Look a record up by `<slug>@<version>` or `<slug>@latest`.
    pub async fn get_element_by_slug(&self, slug: &str) -> Result<Option<Contract>, SyncError> {
        self.inner.storage.get_element_by_slug(slug).await
    }

    /// Find the record of `contract_type` that mirrors the external `mirror_id`.
    pub async fn get_element_by_mirror_id(
        &self,
        contract_type: &str,
        mirror_id: &str,
        lookup: MirrorLookup,
    ) -> Result<Option<Contract>, SyncError> {
        self.inner
            .storage
            .get_element_by_mirror_id(contract_type, mirror_id, lookup)
            .await
    }

    /// Local username for a provider-side one.
    pub async fn get_local_username(&self, username: &str) -> Result<String, SyncError> {
        self.inner.storage.get_local_username(username).await
    }

    /// Provider-side username for a local one.
    pub async fn get_remote_username(&self, username: &str) -> Result<String, SyncError> {
        self.inner.storage.get_remote_username(username).await
    }

    /// Id of the local user for an external identity, created on first contact.
    pub async fn get_actor_id(&self, information: &ActorInformation) -> Result<String, SyncError> {
        actor::get_actor_id(self.inner.storage.as_ref(), information).await
    }

    /// Perform `options` on behalf of `actor`.
    ///
    /// Providers without OAuth (no base URL, or no app credentials) get a
    /// plain retrying request. Otherwise the request carries the bearer
    /// token of the actor, or of the default user when the actor has not
    /// linked the provider; a 401 triggers one refresh and one retry.
    pub async fn request(
        &self,
        actor: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, SyncError> {
        if actor.is_empty() {
            return Err(SyncError::NoActor("Missing request actor".to_owned()));
        }
        let inner = &self.inner;
        let Some(base_url) = inner.oauth_base_url.as_deref() else {
            return inner.http.request(&options).await;
        };
        if !inner.token.has_app_credentials() {
            return inner.http.request(&options).await;
        }
        let origin = inner
            .origin
            .as_deref()
            .filter(|o| !o.is_empty())
            .ok_or_else(|| SyncError::OAuth("Missing OAuth origin URL".to_owned()))?;

        let mut user = self.oauth_user(actor).await?;
        tracing::info!(id = %user.id, provider = %inner.provider, "sync OAuth user");

        let credential = user.oauth_credential(&inner.provider)?;
        let response = match &credential {
            Some(credential) => {
                oauth::request(&inner.http, &credential.access_token, options.clone()).await?
            }
            None => inner.http.request(&options).await?,
        };
        let Some(credential) = credential.filter(|_| response.code == 401) else {
            return Ok(response);
        };

        tracing::info!(
            provider = %inner.provider,
            user = %user.slug,
            origin = %origin,
            "refreshing OAuth token"
        );
        let refreshed = self.refresh(base_url, origin, &credential).await?;
        user.set_oauth_credential(&inner.provider, &refreshed)?;
        inner
            .storage
            .upsert_element(
                &user.contract_type,
                user.to_upsert_object()?,
                UpsertOptions::now(),
            )
            .await?;

        oauth::request(&inner.http, &refreshed.access_token, options).await
    }

    async fn refresh(
        &self,
        base_url: &str,
        origin: &str,
        credential: &AccessToken,
    ) -> Result<AccessToken, SyncError> {
        let token = &self.inner.token;
        let credentials = OAuthCredentials {
            app_id: token.app_id.clone().unwrap_or_default(),
            app_secret: token.app_secret.clone().unwrap_or_default(),
            redirect_uri: origin.to_owned(),
        };
        oauth::refresh_access_token(&self.inner.http, base_url, credential, &credentials).await
    }

    /// The record whose credential a request runs with: the actor when it has
    /// linked the provider, the default user otherwise.
    async fn oauth_user(&self, actor: &str) -> Result<Contract, SyncError> {
        let inner = &self.inner;
        let provider = inner.provider.as_str();
        let user = inner
            .storage
            .get_element_by_id(actor)
            .await?
            .ok_or_else(|| SyncError::NoActor(format!("No such actor: {actor}")))?;
        if user.has_oauth_credential(provider) {
            return Ok(user);
        }

        let default_user = inner.default_user.as_deref().ok_or_else(|| {
            SyncError::OAuthNoUser(format!(
                "No default integrations actor to act as {actor} for {provider}"
            ))
        })?;
        let fallback = inner
            .storage
            .get_element_by_slug(&format!("user-{default_user}@latest"))
            .await?
            .ok_or_else(|| SyncError::NoActor(format!("No such actor: {default_user}")))?;
        if !fallback.has_oauth_credential(provider) {
            return Err(SyncError::OAuthNoUser(format!(
                "Default actor {default_user} does not support {provider}"
            )));
        }
        Ok(fallback)
    }
}

/// Run `f` against a fresh adapter instance.
///
/// `destroy` runs on every exit path once `initialize` succeeded. When both
/// `f` and `destroy` fail, the error from `f` wins and the other is logged.
pub async fn run<F, Fut, T>(
    definition: &dyn IntegrationDefinition,
    token: Token,
    options: RunOptions,
    f: F,
) -> Result<T, SyncError>
where
    F: FnOnce(Arc<dyn Integration>) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let provider = options.provider.clone();
    let default_user = options.default_user.clone();
    let context = IntegrationContext::new(definition, token.clone(), options);
    let instance = definition.create(IntegrationOptions {
        token,
        default_user,
        context,
    });

    instance.initialize().await?;
    let result = f(instance.clone()).await;
    let destroyed = instance.destroy().await;

    match (result, destroyed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(destroy_err)) => {
            tracing::error!(
                provider = %provider,
                error = %destroy_err,
                "could not destroy integration after failure"
            );
            Err(err)
        }
    }
}
