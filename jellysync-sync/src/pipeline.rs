//! Sequence import: commits adapter intents in order, resolving forward
//! references as it goes.
//!
//! Steps run strictly one after another. The intents inside a batch are
//! independent and committed with bounded concurrency. Every committed record
//! is recorded at `contracts[step]` (or `contracts[step][item]` for batches
//! of more than one intent) so later intents can reference its fields.

use futures::{stream, StreamExt, TryStreamExt};
use jellysync_core::{
    Contract, PipelineSettings, Sequence, SequenceItem, SyncError, SyncStorage, Token,
    UpsertOptions,
};
use jellysync_core::types::DEFAULT_VERSION;
use jellysync_template::References;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::instance::{self, RunOptions};
use crate::integration::{ActionOptions, IntegrationDefinition};

const ORIGIN_POINTER: &str = "/data/origin";

/// Options for [`import_contracts`].
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Record that caused the sequence. External events stamp their
    /// `<slug>@<version>` onto every committed record; any origin's id is
    /// passed to storage as the originator.
    pub origin: Option<Contract>,
    /// Intents committed at once within a batch.
    pub concurrency: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            origin: None,
            concurrency: PipelineSettings::default().concurrency,
        }
    }
}

/// Commit `sequence` through `storage` and return the records written, in
/// commit order. No-op upserts are recorded as `null` and left out of the
/// result.
///
/// A failing intent aborts the import; records committed before it stay.
pub async fn import_contracts(
    storage: &dyn SyncStorage,
    sequence: Sequence,
    options: &ImportOptions,
) -> Result<Vec<Contract>, SyncError> {
    let references = Mutex::new(References::new());
    let concurrency = options.concurrency.max(1);
    let mut committed = Vec::new();

    for (index, step) in sequence.into_iter().enumerate() {
        let items = step.into_items();
        let batched = items.len() != 1;
        tracing::debug!(step = index, intents = items.len(), "importing sequence step");

        let results: Vec<Option<Contract>> = stream::iter(items.into_iter().enumerate())
            .map(|(sub, item)| {
                let references = &references;
                async move {
                    let result = commit(storage, item, options, references).await?;
                    let value = match &result {
                        Some(contract) => serde_json::to_value(contract)?,
                        None => Value::Null,
                    };
                    references
                        .lock()
                        .await
                        .record(index, batched.then_some(sub), value);
                    Ok::<_, SyncError>(result)
                }
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;

        committed.extend(results.into_iter().flatten());
    }

    Ok(committed)
}

async fn commit(
    storage: &dyn SyncStorage,
    item: SequenceItem,
    options: &ImportOptions,
    references: &Mutex<References>,
) -> Result<Option<Contract>, SyncError> {
    let SequenceItem {
        time,
        actor,
        skip_originator,
        card,
    } = item;
    let Value::Object(mut card) = card else {
        return Err(SyncError::InvalidTemplate(format!(
            "intent is not an object: {card}"
        )));
    };
    card.remove("links");

    let event = options.origin.as_ref().filter(|o| o.is_external_event());
    let is_patch = card.contains_key("patch");
    if is_patch {
        if let Some(event) = event {
            append_origin(&mut card, &event.versioned_slug());
        }
    }

    let source = Value::Object(card);
    let evaluated = {
        let env = references.lock().await;
        jellysync_template::evaluate(&source, &env)
    };
    let object = match evaluated {
        Ok(Some(Value::Object(object))) => object,
        Ok(_) => {
            return Err(SyncError::InvalidTemplate(format!(
                "Could not evaluate template in: {source}"
            )))
        }
        Err(err) => {
            return Err(SyncError::InvalidTemplate(format!(
                "{err} in: {source}"
            )))
        }
    };

    let actor = actor
        .filter(|actor| !actor.is_empty())
        .ok_or_else(|| SyncError::NoActor(format!("No actor in intent: {source}")))?;

    let (contract_type, record) = if is_patch {
        (patch_type(storage, &object).await?, Value::Object(object))
    } else {
        let contract_type = declared_type(&object).ok_or_else(|| {
            SyncError::InvalidType(format!("intent has no type: {source}"))
        })?;
        let mut record = with_defaults(object);
        if let (Some(event), false) = (event, skip_originator) {
            stamp_origin(&mut record, &event.versioned_slug());
        }
        (contract_type, Value::Object(record))
    };

    let originator = if skip_originator {
        None
    } else {
        options
            .origin
            .as_ref()
            .map(|origin| origin.id.clone())
            .filter(|id| !id.is_empty())
    };

    tracing::debug!(
        contract_type = %contract_type,
        actor = %actor,
        originator = ?originator,
        patch = is_patch,
        "committing intent"
    );
    storage
        .upsert_element(
            &contract_type,
            record,
            UpsertOptions {
                timestamp: time,
                actor: Some(actor),
                originator,
            },
        )
        .await
}

fn declared_type(object: &Map<String, Value>) -> Option<String> {
    object
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// Type of a patch target: declared on the intent, or read from the stored record.
async fn patch_type(
    storage: &dyn SyncStorage,
    object: &Map<String, Value>,
) -> Result<String, SyncError> {
    if let Some(contract_type) = declared_type(object) {
        return Ok(contract_type);
    }
    let id = object.get("id").and_then(Value::as_str).unwrap_or_default();
    storage
        .get_element_by_id(id)
        .await?
        .map(|contract| contract.contract_type)
        .ok_or_else(|| SyncError::InvalidType(format!("cannot determine the type of {id}")))
}

/// Add an `add /data/origin` operation unless the patch already writes it.
fn append_origin(card: &mut Map<String, Value>, origin: &str) {
    let Some(Value::Array(operations)) = card.get_mut("patch") else {
        return;
    };
    let touched = operations
        .iter()
        .any(|op| op.get("path").and_then(Value::as_str) == Some(ORIGIN_POINTER));
    if !touched {
        operations.push(json!({ "op": "add", "path": ORIGIN_POINTER, "value": origin }));
    }
}

/// `object` laid over the default record skeleton.
fn with_defaults(object: Map<String, Value>) -> Map<String, Value> {
    let defaults = [
        ("active", json!(true)),
        ("version", json!(DEFAULT_VERSION)),
        ("tags", json!([])),
        ("markers", json!([])),
        ("links", json!({})),
        ("requires", json!([])),
        ("capabilities", json!([])),
        ("data", json!({})),
    ];
    let mut record: Map<String, Value> = defaults
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect();
    record.extend(object);
    record
}

fn stamp_origin(record: &mut Map<String, Value>, origin: &str) {
    if let Some(Value::Object(data)) = record.get_mut("data") {
        data.insert("origin".to_owned(), json!(origin));
    }
}

// ---------------------------------------------------------------------------
// Adapter-driven imports
// ---------------------------------------------------------------------------

/// Everything needed to run an adapter and import what it returns.
#[derive(Clone)]
pub struct PipelineOptions {
    pub token: Token,
    /// Local actor the adapter acts as.
    pub actor: String,
    pub run: RunOptions,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Translate,
    Mirror,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Translate => "translate",
            Action::Mirror => "mirror",
        }
    }
}

/// Translate an inbound external event into local records.
pub async fn translate_external_event(
    definition: &dyn IntegrationDefinition,
    event: &Contract,
    options: PipelineOptions,
) -> Result<Vec<Contract>, SyncError> {
    run_integration(definition, event, options, Action::Translate).await
}

/// Mirror a local record out to the provider and import any follow-up intents.
pub async fn mirror_contract(
    definition: &dyn IntegrationDefinition,
    contract: &Contract,
    options: PipelineOptions,
) -> Result<Vec<Contract>, SyncError> {
    run_integration(definition, contract, options, Action::Mirror).await
}

async fn run_integration(
    definition: &dyn IntegrationDefinition,
    contract: &Contract,
    options: PipelineOptions,
    action: Action,
) -> Result<Vec<Contract>, SyncError> {
    let PipelineOptions {
        token,
        actor,
        run,
        concurrency,
    } = options;
    let storage = run.storage.clone();
    let provider = run.provider.clone();

    instance::run(definition, token, run, |integration| async move {
        let action_options = ActionOptions { actor };
        let sequence = match action {
            Action::Translate => integration.translate(contract, &action_options).await?,
            Action::Mirror => integration.mirror(contract, &action_options).await?,
        };
        tracing::debug!(
            provider = %provider,
            action = action.as_str(),
            steps = sequence.len(),
            "processing pipeline sequence"
        );
        let import = ImportOptions {
            origin: Some(contract.clone()),
            concurrency,
        };
        import_contracts(storage.as_ref(), sequence, &import).await
    })
    .await
}
