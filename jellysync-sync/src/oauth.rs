//! OAuth 2 authorization-code and refresh-token grants.
//!
//! The token endpoint POST retries 5xx responses and reports an exhausted
//! budget as `ExternalRequest`. A 4xx answer is `OAuthUnsuccessfulResponse`;
//! anything else that is not a 200 is `OAuthRequest`.

use jellysync_core::{AccessToken, SyncError};
use serde_json::Value;
use url::Url;

use crate::http::{HttpClient, HttpResponse, RequestOptions};

pub const AUTHORIZE_PATH: &str = "/oauth/authorize";
pub const TOKEN_PATH: &str = "/oauth/token";

/// App credentials plus the redirect URI registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub app_id: String,
    pub app_secret: String,
    pub redirect_uri: String,
}

impl OAuthCredentials {
    fn validate(&self) -> Result<(), SyncError> {
        require(&self.app_id, "Missing appId")?;
        require(&self.app_secret, "Missing appSecret")?;
        require(&self.redirect_uri, "Missing redirectUri")
    }
}

fn require(value: &str, message: &str) -> Result<(), SyncError> {
    if value.is_empty() {
        return Err(SyncError::OAuthInvalidOption(message.to_owned()));
    }
    Ok(())
}

/// URL to send a user to so they can grant access.
///
/// `state` comes back untouched on the redirect; non-string values are
/// JSON-encoded.
pub fn get_authorize_url(
    base_url: &str,
    scopes: &[String],
    state: Option<&Value>,
    app_id: &str,
    redirect_uri: &str,
) -> Result<String, SyncError> {
    require(app_id, "Missing appId")?;
    require(redirect_uri, "Missing redirectUri")?;
    if scopes.is_empty() {
        return Err(SyncError::OAuthInvalidOption(
            "Missing or invalid scopes".to_owned(),
        ));
    }

    let mut url = Url::parse(base_url)
        .and_then(|base| base.join(AUTHORIZE_PATH))
        .map_err(|e| SyncError::OAuthInvalidOption(format!("invalid base url {base_url}: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", app_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &scopes.join(" "));
        match state {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) if text.is_empty() => {}
            Some(Value::String(text)) => {
                query.append_pair("state", text);
            }
            Some(other) => {
                query.append_pair("state", &other.to_string());
            }
        }
    }
    Ok(url.into())
}

/// Exchange a short-lived authorization code for an access token.
pub async fn get_access_token(
    http: &HttpClient,
    base_url: &str,
    code: &str,
    credentials: &OAuthCredentials,
) -> Result<AccessToken, SyncError> {
    credentials.validate()?;
    require(code, "Missing code")?;
    oauth_post(
        http,
        base_url,
        vec![
            ("grant_type", "authorization_code"),
            ("client_id", credentials.app_id.as_str()),
            ("client_secret", credentials.app_secret.as_str()),
            ("redirect_uri", credentials.redirect_uri.as_str()),
            ("code", code),
        ],
    )
    .await
}

/// Swap a stored token's refresh token for a new access token.
pub async fn refresh_access_token(
    http: &HttpClient,
    base_url: &str,
    token: &AccessToken,
    credentials: &OAuthCredentials,
) -> Result<AccessToken, SyncError> {
    credentials.validate()?;
    let refresh_token = token
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SyncError::OAuthInvalidOption("Missing refresh token".to_owned()))?;
    oauth_post(
        http,
        base_url,
        vec![
            ("grant_type", "refresh_token"),
            ("client_id", credentials.app_id.as_str()),
            ("client_secret", credentials.app_secret.as_str()),
            ("redirect_uri", credentials.redirect_uri.as_str()),
            ("refresh_token", refresh_token),
        ],
    )
    .await
}

/// Send `options` as the holder of `access_token`, with the client's default
/// retry budget.
pub async fn request(
    http: &HttpClient,
    access_token: &str,
    mut options: RequestOptions,
) -> Result<HttpResponse, SyncError> {
    options.set_bearer(access_token);
    http.request(&options).await
}

async fn oauth_post(
    http: &HttpClient,
    base_url: &str,
    form: Vec<(&str, &str)>,
) -> Result<AccessToken, SyncError> {
    let grant = form
        .first()
        .map(|(_, grant)| (*grant).to_owned())
        .unwrap_or_default();
    let options = RequestOptions::post(base_url, TOKEN_PATH).form(
        form.into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect(),
    );
    let url = options.describe();
    let response = http
        .request_retrying_server_errors(&options, http.policy().oauth_retries)
        .await?;

    let code = response.code;
    let body = response.body.to_string();
    if code >= 400 {
        return Err(SyncError::OAuthUnsuccessfulResponse {
            url,
            status: code,
            body: format!("{body} to {grant} grant"),
        });
    }
    if code != 200 {
        return Err(SyncError::OAuthRequest(format!(
            "POST {url} responded with {code}: {body}"
        )));
    }

    serde_json::from_value(response.body).map_err(|e| {
        SyncError::OAuthRequest(format!("POST {url} returned an invalid token: {e}"))
    })
}
