//! Sequence import against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jellysync_core::types::EXTERNAL_EVENT_TYPE;
use jellysync_core::{
    Contract, MemoryStore, MirrorLookup, QueryOptions, Sequence, SequenceItem, SyncError,
    SyncStorage, UpsertOptions,
};
use jellysync_sync::{import_contracts, ImportOptions};
use rstest::rstest;
use serde_json::{json, Value};

const ACTOR: &str = "actor-1";

fn intent(card: Value) -> SequenceItem {
    SequenceItem::new(Utc::now(), ACTOR, card)
}

fn external_event() -> Contract {
    let mut event = Contract::new("external-event-1", EXTERNAL_EVENT_TYPE);
    event.id = "event-1".into();
    event
}

fn from_event() -> ImportOptions {
    ImportOptions {
        origin: Some(external_event()),
        ..ImportOptions::default()
    }
}

#[tokio::test]
async fn forward_reference_resolves_to_committed_id() {
    let store = MemoryStore::new();
    let sequence: Sequence = vec![
        intent(json!({ "slug": "thread-1", "type": "thread@1.0.0" })).into(),
        intent(json!({
            "slug": "message-1",
            "type": "message@1.0.0",
            "data": { "target": { "$eval": "contracts[0].id" } }
        }))
        .into(),
    ];

    let committed = import_contracts(&store, sequence, &ImportOptions::default())
        .await
        .expect("import");
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].slug, "thread-1");
    assert_eq!(committed[1].data["target"], json!(committed[0].id));
}

#[tokio::test]
async fn batch_members_are_addressed_by_sub_index() {
    let store = MemoryStore::new();
    let sequence: Sequence = vec![
        vec![
            intent(json!({ "slug": "a", "type": "card@1.0.0" })),
            intent(json!({ "slug": "b", "type": "card@1.0.0" })),
        ]
        .into(),
        intent(json!({
            "slug": "link-a-b",
            "type": "link@1.0.0",
            "data": {
                "from": { "id": { "$eval": "contracts[0][0].id" } },
                "to": { "id": { "$eval": "cards[0][1].id" } }
            }
        }))
        .into(),
    ];

    let committed = import_contracts(&store, sequence, &ImportOptions::default())
        .await
        .expect("import");
    assert_eq!(committed.len(), 3);

    let id_of = |slug: &str| {
        committed
            .iter()
            .find(|c| c.slug == slug)
            .map(|c| c.id.clone())
            .expect("committed")
    };
    let link = committed.iter().find(|c| c.slug == "link-a-b").expect("link");
    assert_eq!(link.data["from"]["id"], json!(id_of("a")));
    assert_eq!(link.data["to"]["id"], json!(id_of("b")));
}

#[tokio::test]
async fn wide_batches_commit_every_member() {
    let store = MemoryStore::new();
    let batch: Vec<SequenceItem> = (0..7)
        .map(|i| intent(json!({ "slug": format!("card-{i}"), "type": "card@1.0.0" })))
        .collect();
    let options = ImportOptions {
        concurrency: 2,
        ..ImportOptions::default()
    };

    let committed = import_contracts(&store, vec![batch.into()], &options)
        .await
        .expect("import");
    assert_eq!(committed.len(), 7);
    assert_eq!(store.contracts().await.len(), 7);
}

/// Holds every upsert open for a moment and records how many overlap.
#[derive(Default)]
struct SlowStore {
    inner: MemoryStore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<(String, &'static str)>>,
}

impl SlowStore {
    fn note(&self, slug: &str, event: &'static str) {
        self.log
            .lock()
            .expect("log lock")
            .push((slug.to_owned(), event));
    }

    fn position(&self, slug: &str, event: &str) -> usize {
        self.log
            .lock()
            .expect("log lock")
            .iter()
            .position(|(s, e)| s == slug && *e == event)
            .expect("logged")
    }
}

#[async_trait]
impl SyncStorage for SlowStore {
    async fn get_element_by_id(&self, id: &str) -> Result<Option<Contract>, SyncError> {
        self.inner.get_element_by_id(id).await
    }

    async fn get_element_by_slug(&self, slug: &str) -> Result<Option<Contract>, SyncError> {
        self.inner.get_element_by_slug(slug).await
    }

    async fn get_element_by_mirror_id(
        &self,
        contract_type: &str,
        mirror_id: &str,
        lookup: MirrorLookup,
    ) -> Result<Option<Contract>, SyncError> {
        self.inner
            .get_element_by_mirror_id(contract_type, mirror_id, lookup)
            .await
    }

    async fn upsert_element(
        &self,
        contract_type: &str,
        object: Value,
        options: UpsertOptions,
    ) -> Result<Option<Contract>, SyncError> {
        let slug = object["slug"].as_str().unwrap_or_default().to_owned();
        self.note(&slug, "start");
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = self.inner.upsert_element(contract_type, object, options).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.note(&slug, "end");
        result
    }

    async fn query(
        &self,
        schema: &Value,
        options: QueryOptions,
    ) -> Result<Vec<Contract>, SyncError> {
        self.inner.query(schema, options).await
    }
}

#[tokio::test]
async fn batches_are_bounded_and_steps_run_in_order() {
    let store = SlowStore::default();
    let batch: Vec<SequenceItem> = (0..9)
        .map(|i| intent(json!({ "slug": format!("card-{i}"), "type": "card@1.0.0" })))
        .collect();
    let sequence: Sequence = vec![
        batch.into(),
        intent(json!({
            "slug": "summary",
            "type": "card@1.0.0",
            "data": { "last": { "$eval": "contracts[0][8].id" } }
        }))
        .into(),
    ];
    let options = ImportOptions {
        concurrency: 3,
        ..ImportOptions::default()
    };

    let committed = import_contracts(&store, sequence, &options)
        .await
        .expect("import");
    assert_eq!(committed.len(), 10);
    assert_eq!(store.peak.load(Ordering::SeqCst), 3);

    let summary_start = store.position("summary", "start");
    for i in 0..9 {
        assert!(store.position(&format!("card-{i}"), "end") < summary_start);
    }

    let last = committed.iter().find(|c| c.slug == "card-8").expect("card-8");
    let summary = committed.iter().find(|c| c.slug == "summary").expect("summary");
    assert_eq!(summary.data["last"], json!(last.id));
}

#[tokio::test]
async fn unresolvable_reference_is_invalid_template() {
    let store = MemoryStore::new();
    let sequence: Sequence = vec![
        intent(json!({ "slug": "thread-1", "type": "thread@1.0.0" })).into(),
        intent(json!({
            "slug": "message-1",
            "type": "message@1.0.0",
            "data": { "target": { "$eval": "contracts[5].id" } }
        }))
        .into(),
    ];

    let err = import_contracts(&store, sequence, &ImportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidTemplate(_)), "got {err:?}");
    // Earlier steps stay committed.
    assert_eq!(store.contracts().await.len(), 1);
}

#[tokio::test]
async fn malformed_expression_is_invalid_template() {
    let store = MemoryStore::new();
    let sequence: Sequence = vec![intent(json!({
        "slug": "message-1",
        "type": "message@1.0.0",
        "data": { "target": { "$eval": "contracts[0" } }
    }))
    .into()];

    let err = import_contracts(&store, sequence, &ImportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidTemplate(_)), "got {err:?}");
}

#[rstest]
#[case::record(json!({ "slug": "thread-1", "type": "thread@1.0.0" }))]
#[case::patch(json!({
    "id": "existing",
    "type": "thread@1.0.0",
    "patch": [{ "op": "replace", "path": "/name", "value": "renamed" }]
}))]
#[tokio::test]
async fn intent_without_actor_is_rejected(#[case] card: Value) {
    let store = MemoryStore::new();
    let item = SequenceItem {
        actor: None,
        ..intent(card)
    };

    let err = import_contracts(&store, vec![item.into()], &ImportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NoActor(_)), "got {err:?}");
    assert!(store.upserts().await.is_empty());
}

#[tokio::test]
async fn record_without_type_is_rejected() {
    let store = MemoryStore::new();
    let err = import_contracts(
        &store,
        vec![intent(json!({ "slug": "thread-1" })).into()],
        &ImportOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::InvalidType(_)), "got {err:?}");
}

#[tokio::test]
async fn minimal_records_get_identical_defaults() {
    let store = MemoryStore::new();
    for slug in ["first", "second"] {
        import_contracts(
            &store,
            vec![intent(json!({ "slug": slug, "type": "card@1.0.0" })).into()],
            &ImportOptions::default(),
        )
        .await
        .expect("import");
    }

    let upserts = store.upserts().await;
    assert_eq!(upserts.len(), 2);
    let defaults = |object: &Value| {
        let mut object = object.clone();
        if let Value::Object(map) = &mut object {
            map.remove("slug");
        }
        object
    };
    assert_eq!(defaults(&upserts[0].object), defaults(&upserts[1].object));
    assert_eq!(
        defaults(&upserts[0].object),
        json!({
            "type": "card@1.0.0",
            "active": true,
            "version": "1.0.0",
            "tags": [],
            "markers": [],
            "links": {},
            "requires": [],
            "capabilities": [],
            "data": {}
        })
    );
}

#[tokio::test]
async fn links_are_never_persisted_through_intents() {
    let store = MemoryStore::new();
    let committed = import_contracts(
        &store,
        vec![intent(json!({
            "slug": "thread-1",
            "type": "thread@1.0.0",
            "links": { "has attached element": [{ "id": "x" }] }
        }))
        .into()],
        &ImportOptions::default(),
    )
    .await
    .expect("import");
    assert!(committed[0].links.is_empty());
}

#[tokio::test]
async fn external_event_origin_is_stamped() {
    let store = MemoryStore::new();
    let committed = import_contracts(
        &store,
        vec![intent(json!({ "slug": "thread-1", "type": "thread@1.0.0" })).into()],
        &from_event(),
    )
    .await
    .expect("import");

    assert_eq!(committed[0].data["origin"], json!("external-event-1@1.0.0"));
    let upserts = store.upserts().await;
    assert_eq!(upserts[0].options.originator.as_deref(), Some("event-1"));
    assert_eq!(upserts[0].options.actor.as_deref(), Some(ACTOR));
}

#[tokio::test]
async fn skip_originator_clears_the_originator() {
    let store = MemoryStore::new();
    let item = intent(json!({ "slug": "thread-1", "type": "thread@1.0.0" })).skip_originator();

    let committed = import_contracts(&store, vec![item.into()], &from_event())
        .await
        .expect("import");

    assert!(committed[0].data.get("origin").is_none());
    let upserts = store.upserts().await;
    assert_eq!(upserts[0].options.originator, None);
}

#[tokio::test]
async fn non_event_origin_is_not_stamped() {
    let store = MemoryStore::new();
    let mut origin = Contract::new("thread-9", "thread@1.0.0");
    origin.id = "thread-9-id".into();
    let options = ImportOptions {
        origin: Some(origin),
        ..ImportOptions::default()
    };

    let committed = import_contracts(
        &store,
        vec![intent(json!({ "slug": "message-1", "type": "message@1.0.0" })).into()],
        &options,
    )
    .await
    .expect("import");
    assert!(committed[0].data.get("origin").is_none());
    assert_eq!(
        store.upserts().await[0].options.originator.as_deref(),
        Some("thread-9-id")
    );
}

#[tokio::test]
async fn patches_get_origin_and_stored_type() {
    let store = MemoryStore::new();
    let existing = store
        .insert(Contract::new("thread-1", "thread@1.0.0"))
        .await;

    let committed = import_contracts(
        &store,
        vec![intent(json!({
            "id": existing.id,
            "patch": [{ "op": "add", "path": "/name", "value": "Renamed" }]
        }))
        .into()],
        &from_event(),
    )
    .await
    .expect("import");

    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].name.as_deref(), Some("Renamed"));
    assert_eq!(committed[0].data["origin"], json!("external-event-1@1.0.0"));
    assert_eq!(store.upserts().await[0].contract_type, "thread@1.0.0");
}

#[tokio::test]
async fn skipped_originator_patches_still_carry_the_origin() {
    let store = MemoryStore::new();
    let existing = store
        .insert(Contract::new("thread-1", "thread@1.0.0"))
        .await;
    let item = intent(json!({
        "id": existing.id,
        "patch": [{ "op": "add", "path": "/name", "value": "Renamed" }]
    }))
    .skip_originator();

    let committed = import_contracts(&store, vec![item.into()], &from_event())
        .await
        .expect("import");

    assert_eq!(committed[0].data["origin"], json!("external-event-1@1.0.0"));
    assert_eq!(store.upserts().await[0].options.originator, None);
}

#[tokio::test]
async fn noop_commits_are_left_out_and_unresolvable() {
    let store = MemoryStore::new();
    let card = json!({ "slug": "thread-1", "type": "thread@1.0.0" });
    let sequence: Sequence = vec![intent(card.clone()).into(), intent(card).into()];

    let committed = import_contracts(&store, sequence, &ImportOptions::default())
        .await
        .expect("import");
    assert_eq!(committed.len(), 1);

    let referencing: Sequence = vec![
        intent(json!({ "slug": "thread-1", "type": "thread@1.0.0" })).into(),
        intent(json!({
            "slug": "message-1",
            "type": "message@1.0.0",
            "data": { "target": { "$eval": "contracts[0].id" } }
        }))
        .into(),
    ];
    let err = import_contracts(&store, referencing, &ImportOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidTemplate(_)), "got {err:?}");

    let stored = store.get_element_by_slug("thread-1@latest").await.expect("lookup");
    assert!(stored.is_some());
}
