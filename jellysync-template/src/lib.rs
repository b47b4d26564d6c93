//! # jellysync-template
//!
//! Forward-reference evaluation for intent payloads. A later intent in a
//! sequence may point at a record an earlier intent produces by embedding
//! `{ "$eval": "contracts[0].id" }` anywhere in its card. The placeholder is
//! resolved when that intent is about to be committed.
//!
//! ## Usage
//!
//! ```rust
//! use jellysync_template::{evaluate, References};
//! use serde_json::json;
//!
//! let mut refs = References::new();
//! refs.record(0, None, json!({ "id": "4b2c" }));
//!
//! let card = json!({ "data": { "target": { "$eval": "contracts[0].id" } } });
//! let resolved = evaluate(&card, &refs).unwrap();
//! assert_eq!(resolved, Some(json!({ "data": { "target": "4b2c" } })));
//! ```

pub mod error;
pub mod eval;
pub mod expression;
pub mod references;

pub use error::TemplateError;
pub use eval::{evaluate, has_placeholders, EVAL_KEY};
pub use expression::{Expression, Segment};
pub use references::References;
