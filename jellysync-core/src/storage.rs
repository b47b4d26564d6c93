//! The storage collaborator seam.
//!
//! The sync layer never owns records; it reads and writes them through a
//! [`SyncStorage`] implementation supplied by the host. [`crate::memory::MemoryStore`]
//! is the in-process implementation used by tests and local tooling.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SyncError;
use crate::types::{Contract, MirrorLookup, QueryOptions, UpsertOptions};

#[async_trait]
pub trait SyncStorage: Send + Sync {
    async fn get_element_by_id(&self, id: &str) -> Result<Option<Contract>, SyncError>;

    /// `slug` is `<slug>@<version>`; `@latest` selects the highest version.
    async fn get_element_by_slug(&self, slug: &str) -> Result<Option<Contract>, SyncError>;

    /// Find a record of `contract_type` whose `data.mirrors` contains `mirror_id`.
    async fn get_element_by_mirror_id(
        &self,
        contract_type: &str,
        mirror_id: &str,
        lookup: MirrorLookup,
    ) -> Result<Option<Contract>, SyncError>;

    /// Insert or update a record.
    ///
    /// `object` is either a full record or `{ "id", "patch": [..] }`. Returns
    /// `None` when nothing was written (the update was a no-op).
    async fn upsert_element(
        &self,
        contract_type: &str,
        object: Value,
        options: UpsertOptions,
    ) -> Result<Option<Contract>, SyncError>;

    /// Records matching a JSON-Schema-like filter.
    async fn query(&self, schema: &Value, options: QueryOptions)
        -> Result<Vec<Contract>, SyncError>;

    /// Map a remote username onto the local one.
    async fn get_local_username(&self, username: &str) -> Result<String, SyncError> {
        Ok(username.to_owned())
    }

    /// Map a local username onto the remote one.
    async fn get_remote_username(&self, username: &str) -> Result<String, SyncError> {
        Ok(username.to_owned())
    }
}
