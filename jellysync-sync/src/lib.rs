//! # jellysync-sync
//!
//! Bidirectional sync between local records and external providers.
//!
//! - [`http`]: retrying HTTP client
//! - [`oauth`]: authorization-code and refresh-token grants
//! - [`integration`]: provider adapter traits and the registry
//! - [`instance`]: the adapter runtime, with OAuth-aware requests
//! - [`pipeline`]: sequence import with forward references
//! - [`synchronizer`]: provider-keyed entry points for the worker
//! - [`utils`]: helpers for adapter authors

pub mod actor;
pub mod http;
pub mod instance;
pub mod integration;
pub mod oauth;
pub mod pipeline;
pub mod synchronizer;
pub mod utils;

pub use http::{HttpClient, HttpResponse, HttpTransport, RequestOptions, RetryPolicy};
pub use instance::{run, IntegrationContext, RunOptions};
pub use integration::{
    ActionOptions, Integration, IntegrationDefinition, IntegrationOptions, IntegrationRegistry,
    RawEvent,
};
pub use pipeline::{
    import_contracts, mirror_contract, translate_external_event, ImportOptions, PipelineOptions,
};
pub use synchronizer::Synchronizer;
