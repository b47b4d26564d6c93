//! In-process [`SyncStorage`] implementation.
//!
//! Records live in a `Vec` behind a tokio `RwLock`. Every upsert is also
//! appended to a call log so callers can assert on the exact arguments the
//! sync layer passed (type, object, timestamp, actor, originator).

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::error::SyncError;
use crate::patch::{self, PatchOperation};
use crate::storage::SyncStorage;
use crate::types::{Contract, MirrorLookup, QueryOptions, SlugRef, UpsertOptions, VersionRef};

/// One recorded `upsert_element` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCall {
    pub contract_type: String,
    pub object: Value,
    pub options: UpsertOptions,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    contracts: RwLock<Vec<Contract>>,
    upserts: RwLock<Vec<UpsertCall>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store. Records without an id get a fresh one.
    pub fn with_contracts(contracts: impl IntoIterator<Item = Contract>) -> Self {
        let contracts = contracts
            .into_iter()
            .map(|mut contract| {
                if contract.id.is_empty() {
                    contract.id = new_id();
                }
                contract
            })
            .collect();
        Self {
            contracts: RwLock::new(contracts),
            upserts: RwLock::default(),
        }
    }

    /// Insert a record directly, bypassing the upsert log.
    pub async fn insert(&self, mut contract: Contract) -> Contract {
        if contract.id.is_empty() {
            contract.id = new_id();
        }
        self.contracts.write().await.push(contract.clone());
        contract
    }

    pub async fn contracts(&self) -> Vec<Contract> {
        self.contracts.read().await.clone()
    }

    pub async fn upserts(&self) -> Vec<UpsertCall> {
        self.upserts.read().await.clone()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn storage_err(message: impl Into<String>) -> SyncError {
    SyncError::Storage(message.into().into())
}

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

/// Numeric comparison of dotted versions; non-numeric parts compare as text.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn find_by_slug<'a>(contracts: &'a [Contract], slug: &SlugRef) -> Option<&'a Contract> {
    let mut candidates = contracts.iter().filter(|c| c.slug == slug.slug);
    match &slug.version {
        VersionRef::Exact(version) => candidates.find(|c| &c.version == version),
        VersionRef::Latest => candidates.max_by(|a, b| compare_versions(&a.version, &b.version)),
    }
}

/// `issue` matches `issue@1.0.0`; a versioned type must match exactly.
fn type_matches(contract_type: &str, requested: &str) -> bool {
    if contract_type == requested {
        return true;
    }
    !requested.contains('@')
        && contract_type
            .split_once('@')
            .is_some_and(|(base, _)| base == requested)
}

fn mirror_matches(contract: &Contract, mirror_id: &str, lookup: MirrorLookup) -> bool {
    let Some(Value::Array(mirrors)) = contract.data.get("mirrors") else {
        return false;
    };
    mirrors.iter().filter_map(Value::as_str).any(|mirror| {
        if lookup.use_pattern {
            mirror.contains(mirror_id)
        } else {
            mirror == mirror_id
        }
    })
}

/// Subset of JSON schema: `const`, `enum`, `required` and nested `properties`.
fn schema_matches(schema: &Value, value: &Value) -> bool {
    if let Some(expected) = schema.get("const") {
        if expected != value {
            return false;
        }
    }
    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            return false;
        }
    }
    if let Some(Value::Array(required)) = schema.get("required") {
        let present = |key: &Value| {
            key.as_str()
                .is_some_and(|key| value.get(key).is_some_and(|v| !v.is_null()))
        };
        if !required.iter().all(present) {
            return false;
        }
    }
    if let Some(Value::Object(properties)) = schema.get("properties") {
        for (key, subschema) in properties {
            if let Some(field) = value.get(key) {
                if !schema_matches(subschema, field) {
                    return false;
                }
            }
        }
    }
    true
}

fn sort_key(value: &Value, field: &str) -> String {
    match value.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Upsert
// ---------------------------------------------------------------------------

fn apply_patch(
    contracts: &mut [Contract],
    id: &str,
    operations: &Value,
    options: &UpsertOptions,
) -> Result<Option<Contract>, SyncError> {
    let operations: Vec<PatchOperation> = serde_json::from_value(operations.clone())?;
    let existing = contracts
        .iter_mut()
        .find(|c| c.id == id)
        .ok_or_else(|| SyncError::NoElement(id.to_owned()))?;

    let before = serde_json::to_value(&*existing)?;
    let mut doc = before.clone();
    patch::apply(&mut doc, &operations)
        .map_err(|e| storage_err(format!("could not patch {id}: {e}")))?;
    if doc == before {
        return Ok(None);
    }

    let mut updated: Contract = serde_json::from_value(doc)?;
    updated.updated_at = Some(options.timestamp);
    *existing = updated.clone();
    Ok(Some(updated))
}

fn overlay(
    existing: &mut Contract,
    fields: &Map<String, Value>,
    options: &UpsertOptions,
) -> Result<Option<Contract>, SyncError> {
    let before = serde_json::to_value(&*existing)?;
    let mut doc = before.clone();
    if let Value::Object(target) = &mut doc {
        for (key, value) in fields {
            if key == "id" || key == "type" {
                continue;
            }
            target.insert(key.clone(), value.clone());
        }
    }
    if doc == before {
        return Ok(None);
    }

    let mut updated: Contract = serde_json::from_value(doc)?;
    updated.updated_at = Some(options.timestamp);
    *existing = updated.clone();
    Ok(Some(updated))
}

fn insert_new(
    contracts: &mut Vec<Contract>,
    contract_type: &str,
    mut fields: Map<String, Value>,
    options: &UpsertOptions,
) -> Result<Option<Contract>, SyncError> {
    fields.insert("type".into(), Value::String(contract_type.to_owned()));
    let mut contract: Contract = serde_json::from_value(Value::Object(fields))?;
    if contract.id.is_empty() {
        contract.id = new_id();
    }
    contract.created_at = Some(options.timestamp);
    tracing::debug!(id = %contract.id, slug = %contract.slug, "memory store insert");
    contracts.push(contract.clone());
    Ok(Some(contract))
}

#[async_trait]
impl SyncStorage for MemoryStore {
    async fn get_element_by_id(&self, id: &str) -> Result<Option<Contract>, SyncError> {
        let contracts = self.contracts.read().await;
        Ok(contracts.iter().find(|c| c.id == id).cloned())
    }

    async fn get_element_by_slug(&self, slug: &str) -> Result<Option<Contract>, SyncError> {
        let slug = SlugRef::parse(slug);
        let contracts = self.contracts.read().await;
        Ok(find_by_slug(&contracts, &slug).cloned())
    }

    async fn get_element_by_mirror_id(
        &self,
        contract_type: &str,
        mirror_id: &str,
        lookup: MirrorLookup,
    ) -> Result<Option<Contract>, SyncError> {
        let contracts = self.contracts.read().await;
        Ok(contracts
            .iter()
            .filter(|c| type_matches(&c.contract_type, contract_type))
            .find(|c| mirror_matches(c, mirror_id, lookup))
            .cloned())
    }

    async fn upsert_element(
        &self,
        contract_type: &str,
        object: Value,
        options: UpsertOptions,
    ) -> Result<Option<Contract>, SyncError> {
        self.upserts.write().await.push(UpsertCall {
            contract_type: contract_type.to_owned(),
            object: object.clone(),
            options: options.clone(),
        });

        let Value::Object(fields) = object else {
            return Err(SyncError::InvalidArg(format!(
                "upsert of {contract_type} expects an object"
            )));
        };

        let mut contracts = self.contracts.write().await;
        let id = fields
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned);

        if let Some(patch) = fields.get("patch") {
            let id = id.ok_or_else(|| {
                SyncError::InvalidArg(format!("patch of {contract_type} requires an id"))
            })?;
            return apply_patch(&mut contracts, &id, patch, &options);
        }

        let position = match &id {
            Some(id) => contracts.iter().position(|c| &c.id == id),
            None => {
                let slug = fields.get("slug").and_then(Value::as_str).ok_or_else(|| {
                    SyncError::InvalidArg(format!("{contract_type} requires a slug or id"))
                })?;
                let version = fields
                    .get("version")
                    .and_then(Value::as_str)
                    .unwrap_or(crate::types::DEFAULT_VERSION);
                contracts
                    .iter()
                    .position(|c| c.slug == slug && c.version == version)
            }
        };

        match (position, id) {
            (Some(index), _) => overlay(&mut contracts[index], &fields, &options),
            (None, Some(id)) => Err(storage_err(format!(
                "cannot update missing {contract_type} {id}"
            ))),
            (None, None) => insert_new(&mut contracts, contract_type, fields, &options),
        }
    }

    async fn query(
        &self,
        schema: &Value,
        options: QueryOptions,
    ) -> Result<Vec<Contract>, SyncError> {
        let contracts = self.contracts.read().await;
        let mut matched = Vec::new();
        for contract in contracts.iter() {
            let value = serde_json::to_value(contract)?;
            if schema_matches(schema, &value) {
                matched.push((value, contract.clone()));
            }
        }
        if let Some(field) = &options.sort_by {
            matched.sort_by(|(a, _), (b, _)| sort_key(a, field).cmp(&sort_key(b, field)));
        }
        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().take(limit).map(|(_, c)| c).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
