//! Serialisation of records, credentials and intents in their stored JSON shape.
//!
//! Each `#[case]` is isolated; no shared state.

use jellysync_core::types::{
    AccessToken, ActorInformation, Contract, SequenceItem, SequenceStep, DEFAULT_VERSION,
};
use rstest::rstest;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[rstest]
#[case::minimal(json!({ "slug": "card-1", "type": "card@1.0.0" }))]
#[case::with_data(json!({
    "id": "7c4b",
    "slug": "issue-1",
    "type": "issue@1.0.0",
    "version": "1.0.0",
    "tags": ["bug"],
    "data": { "mirrors": ["https://api.github.com/repos/acme/app/issues/1"] }
}))]
#[case::timestamps(json!({
    "slug": "user-jane",
    "type": "user@1.0.0",
    "created_at": "2021-03-04T05:06:07Z"
}))]
fn contract_roundtrips_through_json(#[case] input: Value) {
    let contract: Contract = serde_json::from_value(input).expect("parse");
    let encoded = serde_json::to_value(&contract).expect("encode");
    let decoded: Contract = serde_json::from_value(encoded.clone()).expect("decode");
    assert_eq!(contract, decoded);
    assert_eq!(encoded["type"], json!(contract.contract_type));
    assert!(encoded.get("version").is_some());
}

#[test]
fn missing_version_defaults() {
    let contract: Contract =
        serde_json::from_value(json!({ "slug": "a", "type": "card@1.0.0" })).expect("parse");
    assert_eq!(contract.version, DEFAULT_VERSION);
}

// ---------------------------------------------------------------------------
// Credentials and identities
// ---------------------------------------------------------------------------

#[test]
fn access_token_keeps_provider_fields() {
    let token: AccessToken = serde_json::from_value(json!({
        "access_token": "NEW",
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "R2",
        "scope": "users"
    }))
    .expect("parse");
    assert_eq!(token.refresh_token.as_deref(), Some("R2"));
    let encoded = serde_json::to_value(&token).expect("encode");
    assert_eq!(encoded["expires_in"], json!(3600));
}

#[test]
fn actor_information_omits_unknown_fields() {
    let info: ActorInformation =
        serde_json::from_value(json!({ "handle": "johndoe", "name": { "first": "John" } }))
            .expect("parse");
    let encoded = serde_json::to_value(&info).expect("encode");
    assert_eq!(encoded, json!({ "handle": "johndoe", "name": { "first": "John" } }));
}

// ---------------------------------------------------------------------------
// Sequences
// ---------------------------------------------------------------------------

#[test]
fn sequence_mixes_single_steps_and_batches() {
    let sequence: Vec<SequenceStep> = serde_json::from_value(json!([
        { "time": "2021-01-01T00:00:00Z", "actor": "u1", "card": { "slug": "a", "type": "card@1.0.0" } },
        [
            { "time": "2021-01-01T00:00:01Z", "actor": "u1", "card": { "slug": "b", "type": "card@1.0.0" } },
            { "time": "2021-01-01T00:00:02Z", "card": { "slug": "c", "type": "card@1.0.0" } }
        ]
    ]))
    .expect("parse");

    assert_eq!(sequence.len(), 2);
    assert_eq!(sequence[0].len(), 1);
    let batch: Vec<SequenceItem> = sequence[1].clone().into_items();
    assert_eq!(batch.len(), 2);
    assert!(batch[1].actor.is_none());
}
