//! Domain types shared by the sync layer.
//!
//! Records ("contracts") are stored by the storage collaborator; the sync layer
//! only reads them, derives intents from them and hands partial records back
//! for upsert. Intent payloads stay as raw JSON because forward references may
//! appear anywhere inside them until they are committed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

/// Version stamped on records that do not carry one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Type of the records that carry inbound provider events.
pub const EXTERNAL_EVENT_TYPE: &str = "external-event@1.0.0";

/// Type of local user records.
pub const USER_TYPE: &str = "user@1.0.0";

/// Password hash marking a user that has no local credential.
pub const PASSWORDLESS_HASH: &str = "PASSWORDLESS";

fn default_version() -> String {
    DEFAULT_VERSION.to_owned()
}

fn default_active() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub id: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub contract_type: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub markers: Vec<String>,
    #[serde(default)]
    pub links: Map<String, Value>,
    #[serde(default)]
    pub requires: Vec<Value>,
    #[serde(default)]
    pub capabilities: Vec<Value>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Contract {
    /// Active record at the default version with empty collections.
    pub fn new(slug: impl Into<String>, contract_type: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            slug: slug.into(),
            contract_type: contract_type.into(),
            version: default_version(),
            active: true,
            name: None,
            tags: Vec::new(),
            markers: Vec::new(),
            links: Map::new(),
            requires: Vec::new(),
            capabilities: Vec::new(),
            data: Map::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// `<slug>@<version>`, the form used for provenance stamps and slug lookups.
    pub fn versioned_slug(&self) -> String {
        format!("{}@{}", self.slug, self.version)
    }

    pub fn is_external_event(&self) -> bool {
        self.contract_type == EXTERNAL_EVENT_TYPE
    }

    /// Whether `data.oauth.<provider>` is present.
    pub fn has_oauth_credential(&self, provider: &str) -> bool {
        self.data
            .get("oauth")
            .and_then(|oauth| oauth.get(provider))
            .is_some()
    }

    /// The stored credential for `provider`, if any.
    pub fn oauth_credential(&self, provider: &str) -> Result<Option<AccessToken>, SyncError> {
        match self.data.get("oauth").and_then(|oauth| oauth.get(provider)) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Replace the credential stored under `provider`, leaving other providers untouched.
    pub fn set_oauth_credential(
        &mut self,
        provider: &str,
        token: &AccessToken,
    ) -> Result<(), SyncError> {
        let value = serde_json::to_value(token)?;
        let oauth = self
            .data
            .entry("oauth")
            .or_insert_with(|| Value::Object(Map::new()));
        if !oauth.is_object() {
            *oauth = Value::Object(Map::new());
        }
        if let Value::Object(map) = oauth {
            map.insert(provider.to_owned(), value);
        }
        Ok(())
    }

    /// JSON object handed to `upsert_element`: the record minus its `type`,
    /// which travels as a separate argument.
    pub fn to_upsert_object(&self) -> Result<Value, SyncError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("type");
        }
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// OAuth credential stored on a user record under `data.oauth.<provider>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Per-provider app credentials and provider-specific secrets.
///
/// `app_id`/`app_secret` enable the OAuth flow; anything else (API keys,
/// webhook signature secrets) is kept verbatim in `extra` for the adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default, rename = "appId", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, rename = "appSecret", skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Token {
    pub fn has_app_credentials(&self) -> bool {
        non_empty(&self.app_id) && non_empty(&self.app_secret)
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Actor identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

/// Partial identity of an external user, as far as a provider knows it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorInformation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<PersonName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

/// One record-creation or patch intent produced by a provider adapter.
///
/// `card` is either a partial record (`slug` + `type`) or
/// `{ "id", "type", "patch": [JSON-Patch ops] }`. Values anywhere inside it may
/// be `{ "$eval": "<path>" }` forward references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceItem {
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub actor: Option<String>,
    /// Commit without an originator so the record is mirrored back out as a
    /// fresh request.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_originator: bool,
    pub card: Value,
}

impl SequenceItem {
    pub fn new(time: DateTime<Utc>, actor: impl Into<String>, card: Value) -> Self {
        Self {
            time,
            actor: Some(actor.into()),
            skip_originator: false,
            card,
        }
    }

    pub fn skip_originator(mut self) -> Self {
        self.skip_originator = true;
        self
    }
}

/// One element of a sequence: a single intent or a batch of independent ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SequenceStep {
    Batch(Vec<SequenceItem>),
    Single(SequenceItem),
}

impl SequenceStep {
    /// The step coerced to a batch.
    pub fn into_items(self) -> Vec<SequenceItem> {
        match self {
            SequenceStep::Batch(items) => items,
            SequenceStep::Single(item) => vec![item],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SequenceStep::Batch(items) => items.len(),
            SequenceStep::Single(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<SequenceItem> for SequenceStep {
    fn from(item: SequenceItem) -> Self {
        SequenceStep::Single(item)
    }
}

impl From<Vec<SequenceItem>> for SequenceStep {
    fn from(items: Vec<SequenceItem>) -> Self {
        SequenceStep::Batch(items)
    }
}

/// Ordered intents; steps are committed strictly in order.
pub type Sequence = Vec<SequenceStep>;

// ---------------------------------------------------------------------------
// Storage call options
// ---------------------------------------------------------------------------

/// Options passed alongside every upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOptions {
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
    /// Id of the external event that caused this write.
    pub originator: Option<String>,
}

impl UpsertOptions {
    /// Options for a write performed by the sync layer itself.
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            actor: None,
            originator: None,
        }
    }

    /// Options stamped with the current time and the given actor.
    pub fn by(actor: impl Into<String>) -> Self {
        Self {
            actor: Some(actor.into()),
            ..Self::now()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorLookup {
    /// Match mirror ids by substring instead of exact equality.
    pub use_pattern: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub sort_by: Option<String>,
}

/// `<slug>@<version>` as accepted by slug lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlugRef {
    pub slug: String,
    pub version: VersionRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    Latest,
    Exact(String),
}

impl SlugRef {
    /// Parse `slug@version`; a bare slug or `@latest` selects the latest version.
    pub fn parse(input: &str) -> Self {
        match input.split_once('@') {
            Some((slug, "latest")) | Some((slug, "")) => SlugRef {
                slug: slug.to_owned(),
                version: VersionRef::Latest,
            },
            Some((slug, version)) => SlugRef {
                slug: slug.to_owned(),
                version: VersionRef::Exact(version.to_owned()),
            },
            None => SlugRef {
                slug: input.to_owned(),
                version: VersionRef::Latest,
            },
        }
    }
}

impl fmt::Display for SlugRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            VersionRef::Latest => write!(f, "{}@latest", self.slug),
            VersionRef::Exact(version) => write!(f, "{}@{}", self.slug, version),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
