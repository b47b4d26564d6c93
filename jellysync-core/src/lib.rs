//! jellysync core library: record types, the error catalog, the storage seam.
//!
//! - [`types`]: records, credentials, intents and sequences
//! - [`error`]: [`SyncError`] and the [`ErrorKind`] catalog
//! - [`storage`]: the [`SyncStorage`] capability
//! - [`memory`]: [`MemoryStore`], an in-process [`SyncStorage`]
//! - [`patch`]: JSON-Patch application
//! - [`settings`]: YAML worker settings

pub mod error;
pub mod memory;
pub mod patch;
pub mod settings;
pub mod storage;
pub mod types;

pub use error::{BoxError, ErrorCategory, ErrorKind, SyncError};
pub use memory::{MemoryStore, UpsertCall};
pub use settings::{HttpSettings, PipelineSettings, Settings};
pub use storage::SyncStorage;
pub use types::{
    AccessToken, ActorInformation, Contract, MirrorLookup, PersonName, QueryOptions, Sequence,
    SequenceItem, SequenceStep, Token, UpsertOptions,
};
