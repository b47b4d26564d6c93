//! Local user resolution for external identities.
//!
//! An external identity maps onto `user-<normalized handle>`. The first
//! contact inserts the user; later contacts merge what the provider knows
//! into the existing record without overwriting what is already there.

use jellysync_core::types::{PASSWORDLESS_HASH, USER_TYPE};
use jellysync_core::{ActorInformation, Contract, SyncError, SyncStorage, UpsertOptions};
use serde_json::{json, Map, Value};

/// Slug reported for many unrelated identities by some providers.
const COLLAPSED_SLUG: &str = "intercom";

/// Profile fields merged into an existing user when it has no value yet.
const PROFILE_PATHS: [&[&str]; 6] = [
    &["profile", "company"],
    &["profile", "name", "first"],
    &["profile", "name", "last"],
    &["profile", "title"],
    &["profile", "country"],
    &["profile", "city"],
];

/// Lowercase, and replace every character outside `[a-z0-9-]` with `-`.
pub fn normalize_username(username: &str) -> String {
    username
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Id of the local user for `information`, creating or merging as needed.
pub async fn get_actor_id(
    storage: &dyn SyncStorage,
    information: &ActorInformation,
) -> Result<String, SyncError> {
    tracing::info!(
        handle = ?information.handle,
        email = ?information.email,
        "creating sync actor"
    );

    let username = information
        .handle
        .as_deref()
        .filter(|h| !h.is_empty())
        .or(information.email.as_deref().filter(|e| !e.is_empty()))
        .ok_or_else(|| {
            SyncError::InvalidArg("actor information has neither handle nor email".to_owned())
        })?;
    let translated = storage.get_local_username(&username.to_lowercase()).await?;
    let slug = normalize_username(&translated);

    if slug == COLLAPSED_SLUG {
        tracing::warn!(
            handle = ?information.handle,
            email = ?information.email,
            "using \"intercom\" actor"
        );
    }

    let mut user = Contract::new(format!("user-{slug}"), USER_TYPE);
    user.active = information.active.unwrap_or(true);
    user.data = actor_data(information);
    get_or_create(storage, user).await
}

fn actor_data(information: &ActorInformation) -> Map<String, Value> {
    let mut profile = Map::new();
    let scalars = [
        ("title", &information.title),
        ("company", &information.company),
        ("country", &information.country),
        ("city", &information.city),
    ];
    for (key, value) in scalars {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            profile.insert(key.to_owned(), json!(value));
        }
    }
    if let Some(name) = &information.name {
        let mut names = Map::new();
        if let Some(first) = name.first.as_deref().filter(|v| !v.is_empty()) {
            names.insert("first".to_owned(), json!(first));
        }
        if let Some(last) = name.last.as_deref().filter(|v| !v.is_empty()) {
            names.insert("last".to_owned(), json!(last));
        }
        if !names.is_empty() {
            profile.insert("name".to_owned(), Value::Object(names));
        }
    }

    let mut data = Map::new();
    data.insert("hash".to_owned(), json!(PASSWORDLESS_HASH));
    data.insert("roles".to_owned(), json!([]));
    data.insert("profile".to_owned(), Value::Object(profile));
    if let Some(email) = information.email.as_deref().filter(|e| !e.is_empty()) {
        data.insert("email".to_owned(), json!(email));
    }
    data
}

/// Look the user up by slug and version; merge into it if found, insert it
/// otherwise.
pub async fn get_or_create(storage: &dyn SyncStorage, user: Contract) -> Result<String, SyncError> {
    let slug = user.versioned_slug();
    if let Some(mut existing) = storage.get_element_by_slug(&slug).await? {
        merge_actor(&mut existing.data, &user.data);
        tracing::info!(target = %existing.slug, id = %existing.id, "unifying actor contracts");
        storage
            .upsert_element(
                &existing.contract_type,
                existing.to_upsert_object()?,
                UpsertOptions::now(),
            )
            .await?;
        return Ok(existing.id);
    }

    tracing::info!(slug = %user.slug, "inserting non-existent actor");
    let inserted = storage
        .upsert_element(&user.contract_type, user.to_upsert_object()?, UpsertOptions::now())
        .await?;
    if let Some(inserted) = inserted {
        return Ok(inserted.id);
    }

    // A concurrent insert may have won; the upsert was then a no-op.
    storage
        .get_element_by_slug(&slug)
        .await?
        .map(|contract| contract.id)
        .ok_or_else(|| {
            SyncError::NoElement(format!(
                "upsert returned nothing, but {slug} cannot be retrieved"
            ))
        })
}

/// Union e-mails and fill in profile fields the target does not have yet.
pub fn merge_actor(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    if let Some(incoming) = source.get("email") {
        let mut emails: Vec<String> = email_list(target.get("email"));
        emails.extend(email_list(Some(incoming)));
        emails.sort();
        emails.dedup();
        let merged = match emails.as_slice() {
            [single] => json!(single),
            _ => json!(emails),
        };
        target.insert("email".to_owned(), merged);
    }

    for path in PROFILE_PATHS {
        let Some(value) = get_path(source, path) else {
            continue;
        };
        if is_blank(value) || !get_path(target, path).map_or(true, is_blank) {
            continue;
        }
        set_path(target, path, value.clone());
    }
}

fn email_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(email)) if !email.is_empty() => vec![email.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|email| !email.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn get_path<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(map.get(*first)?, |value, key| value.get(*key))
}

fn set_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = map;
    for key in parents {
        let entry = current
            .entry(*key)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert((*last).to_owned(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use jellysync_core::types::PersonName;
    use jellysync_core::MemoryStore;
    use rstest::rstest;

    #[rstest]
    #[case("JohnDoe", "johndoe")]
    #[case("john.doe@example.com", "john-doe-example-com")]
    #[case("jane_doe", "jane-doe")]
    #[case("some--name", "some--name")]
    #[case("Ünïcode", "-n-code")]
    fn usernames_normalize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_username(input), expected);
    }

    fn information() -> ActorInformation {
        ActorInformation {
            handle: Some("JohnDoe".into()),
            email: Some("john@example.com".into()),
            name: Some(PersonName {
                first: Some("John".into()),
                last: Some("Doe".into()),
            }),
            company: Some("Balena".into()),
            ..ActorInformation::default()
        }
    }

    #[tokio::test]
    async fn first_contact_inserts_passwordless_user() {
        let store = MemoryStore::new();
        let id = get_actor_id(&store, &information()).await.expect("actor");

        let user = store
            .get_element_by_id(&id)
            .await
            .expect("lookup")
            .expect("user");
        assert_eq!(user.slug, "user-johndoe");
        assert_eq!(user.contract_type, USER_TYPE);
        assert!(user.active);
        assert_eq!(user.data["hash"], json!("PASSWORDLESS"));
        assert_eq!(user.data["roles"], json!([]));
        assert_eq!(user.data["email"], json!("john@example.com"));
        assert_eq!(user.data["profile"]["name"]["last"], json!("Doe"));
        assert_eq!(user.data["profile"]["company"], json!("Balena"));
    }

    #[tokio::test]
    async fn email_only_identity_uses_email_as_username() {
        let store = MemoryStore::new();
        let info = ActorInformation {
            email: Some("Jane@Example.com".into()),
            active: Some(false),
            ..ActorInformation::default()
        };
        let id = get_actor_id(&store, &info).await.expect("actor");
        let user = store.get_element_by_id(&id).await.expect("lookup").expect("user");
        assert_eq!(user.slug, "user-jane-example-com");
        assert!(!user.active);
    }

    #[tokio::test]
    async fn identity_without_handle_or_email_is_rejected() {
        let store = MemoryStore::new();
        let err = get_actor_id(&store, &ActorInformation::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArg(_)));
    }

    #[tokio::test]
    async fn existing_user_is_merged_not_overwritten() {
        let mut existing = Contract::new("user-johndoe", USER_TYPE);
        existing.data = json!({
            "email": "old@example.com",
            "profile": { "company": "Acme", "name": { "first": "Johnny" } }
        })
        .as_object()
        .cloned()
        .expect("object");
        let store = MemoryStore::with_contracts([existing]);
        let seeded = store.contracts().await[0].id.clone();

        let id = get_actor_id(&store, &information()).await.expect("actor");
        assert_eq!(id, seeded);

        let user = store.get_element_by_id(&id).await.expect("lookup").expect("user");
        assert_eq!(
            user.data["email"],
            json!(["john@example.com", "old@example.com"])
        );
        assert_eq!(user.data["profile"]["company"], json!("Acme"));
        assert_eq!(user.data["profile"]["name"]["first"], json!("Johnny"));
        assert_eq!(user.data["profile"]["name"]["last"], json!("Doe"));
    }

    #[test]
    fn identical_emails_collapse_to_a_single_value() {
        let mut target = json!({ "email": ["a@x.io"] }).as_object().cloned().expect("object");
        let source = json!({ "email": "a@x.io" }).as_object().cloned().expect("object");
        merge_actor(&mut target, &source);
        assert_eq!(target["email"], json!("a@x.io"));
    }

    #[test]
    fn merge_creates_missing_profile_branches() {
        let mut target = Map::new();
        let source = json!({ "profile": { "city": "Athens", "title": "" } })
            .as_object()
            .cloned()
            .expect("object");
        merge_actor(&mut target, &source);
        assert_eq!(target["profile"]["city"], json!("Athens"));
        assert!(target["profile"].get("title").is_none());
    }
}
