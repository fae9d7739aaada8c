use std::{collections::HashSet, time::Duration};

use bson::{Bson, doc, oid::ObjectId};
use docrepo::{
    memory::InMemoryStore,
    patch::{partial_update, value},
    prelude::*,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Record)]
#[serde(default)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    pub age: i32,
}

#[derive(Debug, Default, Serialize, Record)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
}

#[derive(Debug, Default, Serialize, Record)]
pub struct Audit {
    #[serde(rename = "createdBy")]
    pub created_by: String,
    pub revision: Option<i32>,
}

#[derive(Debug, Default, Serialize, Record)]
pub struct Account {
    pub name: String,
    secret: String,
    #[serde(flatten)]
    pub audit: Audit,
    #[record(skip)]
    pub cache: String,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Record)]
#[serde(default, rename_all = "camelCase")]
pub struct Member {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub first_name: String,
    #[serde(rename(serialize = "fullName", deserialize = "fullName"))]
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub login_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Draft,
    Published,
}

#[derive(Debug, Default, Serialize, Record)]
pub struct Post {
    #[record(default)]
    pub status: Status,
    #[record(default)]
    pub pinned_status: Option<Status>,
    pub visits: usize,
    pub tags: HashSet<String>,
}

#[derive(Debug, Serialize, Record)]
pub struct Envelope<T> {
    pub kind: String,
    pub payload: T,
}

#[derive(Debug, Default, Serialize, Record)]
pub struct Profile {
    pub bio: String,
    secret: String,
}

#[derive(Debug, Default, Serialize, Record)]
pub struct Author {
    pub name: String,
    pub profile: Profile,
}

fn user(name: &str, age: i32) -> User {
    User {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        age,
        ..Default::default()
    }
}

async fn seeded(store: &DocumentStore<InMemoryStore>, ctx: &Context) -> Vec<String> {
    let users = store.typed_collection::<User>("users");
    let mut ids = Vec::new();

    for (index, name) in ["Ana", "Bo", "Cy", "Di", "Ed"].into_iter().enumerate() {
        ids.push(users.insert_one(ctx, &user(name, 20 + index as i32)).await.unwrap());
    }

    ids
}

#[tokio::test]
async fn insert_find_update_delete_lifecycle() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();

    let id = users.insert_one(&ctx, &user("Ana", 30)).await.unwrap();
    assert_eq!(id.len(), 24);

    let selected = users
        .find_by_id(&ctx, &id, Some(&Projection::select(["name"])))
        .await
        .unwrap();
    assert_eq!(selected.name, "Ana");
    assert_eq!(selected.email, "");
    assert_eq!(selected.id.map(|oid| oid.to_hex()), Some(id.clone()));

    users
        .update_by_id(&ctx, &id, &User { name: "Ana2".into(), ..Default::default() })
        .await
        .unwrap();

    let updated = users.find_by_id(&ctx, &id, None).await.unwrap();
    assert_eq!(updated.name, "Ana2");
    assert_eq!(updated.email, "ana@example.com");
    assert_eq!(updated.age, 30);

    users.delete_by_id(&ctx, &id).await.unwrap();

    let missing = users.find_by_id(&ctx, &id, None).await;
    assert!(matches!(missing, Err(DocumentStoreError::NotFound(ref missing_id, ref coll)) if missing_id == &id && coll == "users"));

    // deleting again is not an error
    users.delete_by_id(&ctx, &id).await.unwrap();
}

#[tokio::test]
async fn malformed_identities_are_rejected() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();

    assert!(matches!(
        users.find_by_id(&ctx, "not-an-id", None).await,
        Err(DocumentStoreError::InvalidIdentity(..))
    ));
    assert!(matches!(
        users.delete_by_id(&ctx, "123").await,
        Err(DocumentStoreError::InvalidIdentity(..))
    ));
    assert!(matches!(
        users.update_by_id(&ctx, "", &UserPatch { age: value(1), ..Default::default() }).await,
        Err(DocumentStoreError::InvalidIdentity(..))
    ));
}

#[tokio::test]
async fn optional_fields_write_zero_values() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();

    let id = users.insert_one(&ctx, &user("Ana", 30)).await.unwrap();

    // a plain zero is indistinguishable from "not provided"
    let result = users
        .update_by_id(&ctx, &id, &User { age: 0, ..Default::default() })
        .await;
    assert!(matches!(result, Err(DocumentStoreError::EmptyUpdate)));

    users
        .update_by_id(&ctx, &id, &UserPatch { age: value(0), ..Default::default() })
        .await
        .unwrap();

    let updated = users.find_by_id(&ctx, &id, None).await.unwrap();
    assert_eq!(updated.age, 0);
    assert_eq!(updated.name, "Ana");
}

#[tokio::test]
async fn identity_is_never_patched() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();

    let id = users.insert_one(&ctx, &user("Ana", 30)).await.unwrap();

    let only_id = User { id: Some(ObjectId::new()), ..Default::default() };
    assert!(matches!(
        users.update_by_id(&ctx, &id, &only_id).await,
        Err(DocumentStoreError::EmptyUpdate)
    ));

    users
        .update_by_id(&ctx, &id, &doc! { "_id": ObjectId::new(), "email": "ana@work.example" })
        .await
        .unwrap();

    let updated = users.find_by_id(&ctx, &id, None).await.unwrap();
    assert_eq!(updated.id.map(|oid| oid.to_hex()), Some(id));
    assert_eq!(updated.email, "ana@work.example");
}

#[tokio::test]
async fn patches_must_be_record_shaped() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();

    let id = users.insert_one(&ctx, &user("Ana", 30)).await.unwrap();

    assert!(matches!(
        users.update_by_id(&ctx, &id, &Bson::Int32(3)).await,
        Err(DocumentStoreError::InvalidShape(_))
    ));
    assert!(matches!(
        users.update_by_id(&ctx, &id, &None::<User>).await,
        Err(DocumentStoreError::EmptyUpdate)
    ));
    assert!(matches!(
        users.update_by_id(&ctx, &id, &Some(Some(user("Bo", 1)))).await,
        Err(DocumentStoreError::InvalidShape(_))
    ));
}

#[test]
fn derived_records_follow_the_differ_rules() {
    let account = Account {
        name: "acme".into(),
        secret: "hunter2".into(),
        audit: Audit { created_by: "ana".into(), revision: value(0) },
        cache: "warm".into(),
        id: Some(ObjectId::new()),
    };

    let patch = partial_update(&account).unwrap();
    assert_eq!(patch, doc! { "name": "acme", "createdBy": "ana", "revision": 0 });
    assert_eq!(
        patch.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["name", "createdBy", "revision"]
    );
    assert_eq!(partial_update(&account).unwrap(), patch);

    let bare = Account { secret: "hunter2".into(), ..Default::default() };
    assert!(partial_update(&bare).unwrap().is_empty());
}

#[test]
fn serde_naming_decides_patch_keys() {
    let member = Member {
        id: Some(ObjectId::new()),
        first_name: "Ana".into(),
        display_name: "Ana B".into(),
        password: "hunter2".into(),
        login_count: value(0),
    };

    let patch = partial_update(&member).unwrap();
    assert_eq!(patch, doc! { "firstName": "Ana", "fullName": "Ana B", "loginCount": 0_i64 });
    assert!(patch.get("password").is_none());
}

#[tokio::test]
async fn renamed_fields_are_patched_under_their_stored_names() {
    let store = DocumentStore::new(InMemoryStore::new());
    let members = store.typed_collection::<Member>("members");
    let ctx = Context::background();

    let ana = Member {
        first_name: "Ana".into(),
        display_name: "Ana B".into(),
        password: "hunter2".into(),
        ..Default::default()
    };
    let id = members.insert_one(&ctx, &ana).await.unwrap();

    members
        .update_by_id(&ctx, &id, &Member { first_name: "Ann".into(), ..Default::default() })
        .await
        .unwrap();

    let updated = members.find_by_id(&ctx, &id, None).await.unwrap();
    assert_eq!(updated.first_name, "Ann");
    assert_eq!(updated.display_name, "Ana B");
    assert_eq!(updated.password, "");

    let raw = store.collection("members").find_one(&ctx, doc! {}).await.unwrap().unwrap();
    assert_eq!(raw.get("firstName"), Some(&Bson::String("Ann".into())));
    assert!(raw.get("first_name").is_none());
    assert!(raw.get("password").is_none());
}

#[test]
fn defaulted_and_collection_fields_diff_against_empty() {
    assert!(partial_update(&Post::default()).unwrap().is_empty());

    let post = Post {
        status: Status::Published,
        pinned_status: value(Status::Draft),
        visits: 3,
        tags: HashSet::from(["rust".to_string()]),
    };
    let patch = partial_update(&post).unwrap();

    assert_eq!(patch.get("status"), Some(&Bson::String("published".into())));
    assert_eq!(patch.get("pinned_status"), Some(&Bson::String("draft".into())));
    assert!(matches!(patch.get("visits"), Some(Bson::Int32(3) | Bson::Int64(3))));
    assert_eq!(patch.get("tags"), Some(&Bson::Array(vec![Bson::String("rust".into())])));
}

#[test]
fn generic_records_diff_their_payload() {
    let envelope = Envelope { kind: String::new(), payload: 5_i32 };
    assert_eq!(partial_update(&envelope).unwrap(), doc! { "payload": 5 });

    let nested = Envelope { kind: "user".to_string(), payload: user("Ana", 0) };
    let patch = partial_update(&nested).unwrap();
    assert_eq!(patch.get("kind"), Some(&Bson::String("user".into())));
    assert!(matches!(patch.get("payload"), Some(Bson::Document(_))));
}

#[test]
fn nested_records_are_written_whole_or_not_at_all() {
    let unset = Author {
        name: "Ana".into(),
        profile: Profile { secret: "hidden".into(), ..Default::default() },
    };
    // only a non-public field is set, so the profile counts as empty
    assert_eq!(partial_update(&unset).unwrap(), doc! { "name": "Ana" });

    let set = Author {
        name: String::new(),
        profile: Profile { bio: "climber".into(), secret: "hidden".into() },
    };
    assert_eq!(
        partial_update(&set).unwrap(),
        doc! { "profile": { "bio": "climber", "secret": "hidden" } }
    );
}

#[tokio::test]
async fn find_filters_and_projects() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();
    seeded(&store, &ctx).await;

    let older = users
        .find(&ctx, Some(&Filter::new().gte("age", 22)), None)
        .await
        .unwrap();
    assert_eq!(
        older.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(),
        vec!["Cy", "Di", "Ed"]
    );

    let either = Filter::new().or([Filter::new().eq("name", "Ana"), Filter::new().eq("name", "Ed")]);
    let found = users
        .find(&ctx, Some(&either), Some(&Projection::exclude(["email"])))
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|u| u.email.is_empty() && u.id.is_some()));

    let members = users
        .find(&ctx, Some(&Filter::new().member_of("name", ["Bo", "Di", "Zed"])), None)
        .await
        .unwrap();
    assert_eq!(members.len(), 2);

    assert_eq!(users.find_all(&ctx).await.unwrap().len(), 5);
}

#[tokio::test]
async fn count_and_exists_agree() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();

    assert_eq!(users.count(&ctx, None).await.unwrap(), 0);
    assert!(!users.exists(&ctx, None).await.unwrap());

    seeded(&store, &ctx).await;

    for filter in [
        Filter::new(),
        Filter::new().gt("age", 22),
        Filter::new().eq("name", "Nobody"),
        Filter::new().ne("name", "Ana"),
    ] {
        let count = users.count(&ctx, Some(&filter)).await.unwrap();
        let exists = users.exists(&ctx, Some(&filter)).await.unwrap();
        assert_eq!(exists, count > 0, "filter {:?}", filter.build());
    }

    assert_eq!(users.count(&ctx, Some(&Filter::new().lt("age", 22))).await.unwrap(), 2);
}

#[tokio::test]
async fn find_paged_windows_sorted_results() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();
    seeded(&store, &ctx).await;

    let page = users
        .find_paged(&ctx, None, None, 1, 2, vec![Sort::desc("age")])
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.data.iter().map(|u| u.age).collect::<Vec<_>>(), vec![23, 22]);
    assert!(page.has_more(1));

    let filtered = users
        .find_paged(
            &ctx,
            Some(&Filter::new().gte("age", 22)),
            Some(&Projection::select(["name"])),
            0,
            10,
            vec![Sort::asc("name")],
        )
        .await
        .unwrap();
    assert_eq!(filtered.total, 3);
    assert_eq!(filtered.len(), 3);
    assert!(filtered.data.iter().all(|u| u.age == 0));

    // a zero limit leaves the page unbounded
    let rest = users
        .find_paged(&ctx, None, None, 2, 0, Vec::new())
        .await
        .unwrap();
    assert_eq!(rest.total, 5);
    assert_eq!(rest.len(), 3);

    let beyond = users
        .find_paged(&ctx, None, None, 10, 2, Vec::new())
        .await
        .unwrap();
    assert!(beyond.is_empty());
    assert_eq!(beyond.total, 5);
}

#[tokio::test]
async fn upsert_inserts_then_merges() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();
    let by_email = Filter::new().eq("email", "bo@example.com");

    let (id, inserted) = users
        .upsert_by_filter(&ctx, &by_email, &User { name: "Bo".into(), age: 40, ..Default::default() })
        .await
        .unwrap();
    assert!(inserted);

    let created = users.find_by_id(&ctx, &id, None).await.unwrap();
    assert_eq!(created.email, "bo@example.com");
    assert_eq!(created.name, "Bo");

    let (again, inserted) = users
        .upsert_by_filter(&ctx, &by_email, &UserPatch { name: value("Bob".to_string()), ..Default::default() })
        .await
        .unwrap();
    assert!(!inserted);
    assert_eq!(again, id);

    let merged = users.find_by_id(&ctx, &id, None).await.unwrap();
    assert_eq!(merged.name, "Bob");
    assert_eq!(merged.age, 40);
    assert_eq!(users.count(&ctx, None).await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_validates_its_inputs() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();

    assert!(matches!(
        users.upsert_by_filter(&ctx, &Filter::new(), &user("Ana", 1)).await,
        Err(DocumentStoreError::EmptyFilter)
    ));
    assert!(matches!(
        users
            .upsert_by_filter(&ctx, &Filter::new().eq("name", "Ana"), &User::default())
            .await,
        Err(DocumentStoreError::EmptyUpdate)
    ));
    assert_eq!(users.count(&ctx, None).await.unwrap(), 0);
}

#[tokio::test]
async fn store_failures_name_the_operation() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");
    let ctx = Context::background();

    let fixed = User { id: Some(ObjectId::new()), ..user("Ana", 30) };
    users.insert_one(&ctx, &fixed).await.unwrap();

    match users.insert_one(&ctx, &fixed).await {
        Err(DocumentStoreError::Store { operation, collection, .. }) => {
            assert_eq!(operation, "insert_one");
            assert_eq!(collection, "users");
        }
        other => panic!("expected a store error, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_and_expired_contexts_fail_calls() {
    let store = DocumentStore::new(InMemoryStore::new());
    let users = store.typed_collection::<User>("users");

    let ctx = Context::background();
    ctx.cancel();
    assert!(matches!(users.find_all(&ctx).await, Err(DocumentStoreError::Cancelled)));
    assert!(matches!(
        users.insert_one(&ctx, &user("Ana", 1)).await,
        Err(DocumentStoreError::Cancelled)
    ));

    let expired = Context::with_timeout(Duration::ZERO);
    assert!(matches!(users.count(&expired, None).await, Err(DocumentStoreError::DeadlineExceeded)));

    assert_eq!(users.count(&Context::background(), None).await.unwrap(), 0);
}
