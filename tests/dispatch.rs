//! Dispatcher and engine behaviour over the estate entity set, against the in-memory store.

use async_trait::async_trait;
use axum::http::StatusCode;
use estate_crud::access::{AccessManager, AccessRule, Permission, Role};
use estate_crud::dispatch::{Dispatcher, EntityDescriptor, EntityHooks, Flow, RequestContext};
use estate_crud::error::EngineError;
use estate_crud::extractors::Session;
use estate_crud::filter::{FilterOptions, FilterValue};
use estate_crud::model::{descriptors, register_models, user_type, STREET_IN_USE};
use estate_crud::registry::{EntityRegistry, FieldKind, Record};
use estate_crud::response::ResponseEnvelope;
use estate_crud::service::{allowed_columns, CrudEngine};
use estate_crud::store::{Column, Insert, MemoryStore, Transaction, Write};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn rec(v: Value) -> Record {
    Record::from_value(v).unwrap()
}

fn dispatcher_with(store: &MemoryStore, first: Vec<EntityDescriptor>) -> Dispatcher {
    let engine = CrudEngine::new(Arc::new(store.clone()), Arc::new(EntityRegistry::new()));
    let mut d = Dispatcher::new(engine);
    register_models(d.engine().registry()).unwrap();
    for x in first.into_iter().chain(descriptors()) {
        d.register(x).unwrap();
    }
    d
}

fn dispatcher(store: &MemoryStore) -> Dispatcher {
    dispatcher_with(store, Vec::new())
}

fn session(user_type: i64, site: &str) -> Session {
    Session {
        user_type,
        site_id: site.to_string(),
        ..Default::default()
    }
}

fn pairs(items: &[(&str, &str)]) -> HashMap<String, String> {
    items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn ctx(d: &Dispatcher, s: Session, params: &[(&str, &str)], query: &[(&str, &str)]) -> RequestContext {
    d.context(s, pairs(params), pairs(query))
}

fn official(d: &Dispatcher, site: &str) -> RequestContext {
    ctx(d, session(user_type::OFFICIAL, site), &[], &[])
}

fn seed_streets(store: &MemoryStore) {
    store.seed(
        "street",
        vec![
            rec(json!({"id": "st1", "site_id": "s1", "name": "Acacia Avenue"})),
            rec(json!({"id": "st2", "site_id": "s1", "name": "Baobab Close"})),
            rec(json!({"id": "st3", "site_id": "s2", "name": "Cedar Road"})),
        ],
    );
}

#[tokio::test]
async fn count_equals_length_for_directive_only_filters() {
    let store = MemoryStore::new();
    seed_streets(&store);
    store.seed("site", vec![rec(json!({"id": "s1", "subdomain": "acme", "name": "Acme"}))]);
    let d = dispatcher(&store);
    let engine = d.engine();
    for filter in ["", "$order:id", "$limit:50", "$offset:0", "$order:id,$limit:1000"] {
        let opts = FilterOptions::parse(filter, ",");
        for name in engine.registry().names() {
            let (records, count) = engine.list_and_count(&name, &opts, None).await.unwrap();
            assert_eq!(count as usize, records.len(), "{} with {:?}", name, filter);
        }
    }
}

#[test]
fn split_groups_repeated_keys_in_order() {
    let opts = FilterOptions::parse("a:1,a:2,b:3", ",");
    let keys: Vec<_> = opts.iter().map(|(k, _)| k.to_string()).collect();
    assert_eq!(keys, vec!["a", "b"]);
    assert_eq!(opts.get("a"), Some(&FilterValue::Many(vec!["1".into(), "2".into()])));
    assert_eq!(opts.get("b"), Some(&FilterValue::One("3".into())));
}

#[test]
fn single_rule_manager_matches_prefix_and_denies_the_rest() {
    let rule = AccessRule::new("/api/db", Role::Everyone, Permission::All);
    let mgr = AccessManager::with_rules(vec![rule.clone()]);
    assert_eq!(mgr.find("/api/db/assoc"), rule);
    assert_eq!(mgr.find("/other").permission, Permission::None);
}

#[tokio::test]
async fn save_with_every_field_excluded_writes_nothing() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);
    let shape = d.engine().registry().shape("User").unwrap();
    let everything: Vec<String> = shape.fields.iter().map(|f| f.name.to_string()).collect();
    let form = rec(json!({"id": "u1", "email": "a@b.c", "password": "secret"}));
    d.engine().save(None, "User", &form, &everything).await.unwrap();
    assert!(store.journal().is_empty());
}

#[tokio::test]
async fn create_assigns_fresh_id_to_record_and_form() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);
    let mut form = rec(json!({"subdomain": "acme", "name": "Acme Estate", "id": "ignored"}));
    d.engine().create(None, "Site", &mut form, false).await.unwrap();
    let id = form.text("id").unwrap();
    assert!(!id.is_empty());
    assert_ne!(id, "ignored");
    let rows = store.rows("site");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text("id").as_deref(), Some(id.as_str()));
}

/// Writes its own street row and stops the default write.
struct TakeOverSave {
    after_called: Arc<AtomicBool>,
}

#[async_trait]
impl EntityHooks for TakeOverSave {
    async fn before_save(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        _entity: &EntityDescriptor,
        form: &mut Record,
        _resp: &mut ResponseEnvelope,
    ) -> Result<Flow, EngineError> {
        let name = form.text("name").unwrap_or_default();
        tx.insert(&Insert {
            table: "street".into(),
            key: Column::new("id", FieldKind::Text),
            values: vec![
                (Column::new("id", FieldKind::Text), json!("hook-1")),
                (Column::new("site_id", FieldKind::Text), json!(ctx.site_id)),
                (Column::new("name", FieldKind::Text), json!(format!("{} (by hook)", name))),
            ],
        })
        .await?;
        Ok(Flow::Stop)
    }

    async fn after_save(
        &self,
        _tx: &mut dyn Transaction,
        _ctx: &RequestContext,
        _entity: &EntityDescriptor,
        _form: &mut Record,
        _resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        self.after_called.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn before_save_stop_skips_default_write_and_after_save_but_commits() {
    let store = MemoryStore::new();
    let after_called = Arc::new(AtomicBool::new(false));
    let d = dispatcher_with(
        &store,
        vec![EntityDescriptor::new("Street").hooks(TakeOverSave {
            after_called: after_called.clone(),
        })],
    );
    let reply = d.save(&official(&d, "s1"), "street", None, json!({"name": "Elm"})).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(!after_called.load(Ordering::SeqCst));
    assert_eq!(
        store.journal(),
        vec![Write::Insert {
            table: "street".into(),
            key: json!("hook-1"),
        }]
    );
    let rows = store.rows("street");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text("name").as_deref(), Some("Elm (by hook)"));
}

#[tokio::test]
async fn due_update_targets_every_column_but_site() {
    let store = MemoryStore::new();
    store.seed(
        "due",
        vec![rec(json!({"id": "d1", "site_id": "s1", "name": "Levy", "amount": "10.00", "status": 0}))],
    );
    let d = dispatcher(&store);
    let shape = d.engine().registry().shape("Due").unwrap();
    let exclude = vec!["site_id".to_string()];
    let form = shape.copy_compatible(&rec(json!({"id": "d1", "name": "Service charge", "amount": "25.50"})));

    let allowed: Vec<&str> = allowed_columns(&shape, &form, &exclude).iter().map(|f| f.name).collect();
    let expected: Vec<&str> = shape
        .persisted_fields()
        .map(|f| f.name)
        .filter(|n| *n != "site_id")
        .collect();
    assert_eq!(allowed, expected);

    d.engine().save(None, "Due", &form, &exclude).await.unwrap();
    match store.journal().as_slice() {
        [Write::Update { table, key, columns }] => {
            assert_eq!(table, "due");
            assert_eq!(key, &json!("d1"));
            assert_eq!(columns, &expected.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        }
        other => panic!("unexpected writes: {:?}", other),
    }
    assert_eq!(store.rows("due")[0].text("site_id").as_deref(), Some("s1"));
}

#[tokio::test]
async fn get_with_no_matching_rows_is_none() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);
    let got = d.engine().get("Site", "subdomain", "acme", None).await.unwrap();
    assert!(got.is_none());
}

#[tokio::test]
async fn reads_are_scoped_to_the_session_site() {
    let store = MemoryStore::new();
    seed_streets(&store);
    let d = dispatcher(&store);

    let reply = d.list(&official(&d, "s1"), "street").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.get("count"), Some(&json!(2)));

    let reply = d.get(&official(&d, "s1"), "street", "st3").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = d.list(&official(&d, ""), "street").await;
    assert_eq!(reply.body.get("count"), Some(&json!(0)));
}

#[tokio::test]
async fn lookup_by_site_field_cannot_leave_the_session_site() {
    let store = MemoryStore::new();
    seed_streets(&store);
    let d = dispatcher(&store);

    let reply = d.get_by_field(&official(&d, "s1"), "street", "site_id", "s2").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = d.get_by_field(&official(&d, "s2"), "street", "site_id", "s2").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.get("record").unwrap()["id"], json!("st3"));
}

#[tokio::test]
async fn get_by_matches_the_value_literally() {
    let store = MemoryStore::new();
    seed_streets(&store);
    let d = dispatcher(&store);
    let engine = d.engine();
    let none = FilterOptions::new();

    for (field, value) in [("name", "%a%"), ("id", ">st1"), ("name", "")] {
        assert!(
            matches!(engine.get_by("Street", field, value, &none, None).await, Err(EngineError::NotFound(_))),
            "{} = {:?}",
            field,
            value
        );
        assert!(engine.get("Street", field, value, None).await.unwrap().is_none());
    }
    let found = engine.get_by("Street", "id", "st3", &none, None).await.unwrap();
    assert_eq!(found.text("name").as_deref(), Some("Cedar Road"));
}

#[tokio::test]
async fn count_is_the_total_match_count_under_paging() {
    let store = MemoryStore::new();
    seed_streets(&store);
    let d = dispatcher(&store);
    let opts = FilterOptions::parse("$order:id,$limit:1", ",");
    let (records, count) = d.engine().list_and_count("Street", &opts, None).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(count, 3);
    assert!(count as usize > records.len());
}

#[tokio::test]
async fn platform_user_may_override_site() {
    let store = MemoryStore::new();
    seed_streets(&store);
    let d = dispatcher(&store);

    let platform = ctx(&d, session(user_type::PLATFORM, "s1"), &[], &[("_siteID_", "s2")]);
    assert_eq!(platform.site_id, "s2");
    let reply = d.list(&platform, "street").await;
    assert_eq!(reply.body.get("count"), Some(&json!(1)));

    let other = ctx(&d, session(user_type::OFFICIAL, "s1"), &[], &[("_siteID_", "s2")]);
    assert_eq!(other.site_id, "s1");
}

#[tokio::test]
async fn list_filter_is_applied_within_scope() {
    let store = MemoryStore::new();
    seed_streets(&store);
    let d = dispatcher(&store);
    let c = ctx(&d, session(user_type::OFFICIAL, "s1"), &[], &[("_filter", "name:%close%")]);
    let reply = d.list(&c, "street").await;
    assert_eq!(reply.body.get("count"), Some(&json!(1)));
    assert_eq!(reply.body.get("list").unwrap()[0]["id"], json!("st2"));
}

#[tokio::test]
async fn create_injects_session_site_and_returns_id() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);
    let reply = d
        .save(&official(&d, "s1"), "street", Some("new"), json!({"name": "Elm", "site_id": "s2"}))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.get("status"), Some(&json!("ok")));
    let id = reply.body.get("id").and_then(Value::as_str).unwrap().to_string();
    let rows = store.rows("street");
    assert_eq!(rows[0].text("id"), Some(id));
    assert_eq!(rows[0].text("site_id").as_deref(), Some("s1"));
}

#[tokio::test]
async fn update_takes_id_from_path_and_skips_excluded_site() {
    let store = MemoryStore::new();
    seed_streets(&store);
    let d = dispatcher(&store);
    let reply = d
        .save(&official(&d, "s1"), "street", Some("st1"), json!({"id": "st2", "name": "Ash Lane", "site_id": "s9"}))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let rows = store.rows("street");
    let st1 = rows.iter().find(|r| r.text("id").as_deref() == Some("st1")).unwrap();
    assert_eq!(st1.text("name").as_deref(), Some("Ash Lane"));
    assert_eq!(st1.text("site_id").as_deref(), Some("s1"));
}

#[tokio::test]
async fn unknown_or_inaccessible_type_is_bad_request() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);
    let reply = d.list(&official(&d, "s1"), "spaceship").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(!reply.body.error.is_empty());

    let service = ctx(&d, session(user_type::SERVICE, "s1"), &[], &[]);
    let reply = d.list(&service, "street").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_refused_while_units_reference_street() {
    let store = MemoryStore::new();
    seed_streets(&store);
    store.seed(
        "unit",
        vec![rec(json!({"id": "u1", "site_id": "s1", "street_id": "st1", "label": "1A"}))],
    );
    let d = dispatcher(&store);
    let c = ctx(&d, session(user_type::OFFICIAL, "s1"), &[("model", "street"), ("id", "st1")], &[]);
    let reply = d.delete(&c, "street", "st1").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body.error, STREET_IN_USE.message);
    assert_eq!(store.rows("street").len(), 3);

    let c = ctx(&d, session(user_type::OFFICIAL, "s1"), &[("model", "street"), ("id", "st2")], &[]);
    let reply = d.delete(&c, "street", "st2").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(store.rows("street").len(), 2);
}

struct FailAfterSave;

#[async_trait]
impl EntityHooks for FailAfterSave {
    async fn after_save(
        &self,
        _tx: &mut dyn Transaction,
        _ctx: &RequestContext,
        _entity: &EntityDescriptor,
        _form: &mut Record,
        _resp: &mut ResponseEnvelope,
    ) -> Result<(), EngineError> {
        Err(EngineError::Hook("notification failed".into()))
    }
}

#[tokio::test]
async fn after_save_failure_rolls_back_the_write() {
    let store = MemoryStore::new();
    let d = dispatcher_with(&store, vec![EntityDescriptor::new("Street").hooks(FailAfterSave)]);
    let reply = d.save(&official(&d, "s1"), "street", None, json!({"name": "Elm"})).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body.get("id").is_none());
    assert!(store.rows("street").is_empty());
    assert!(store.journal().is_empty());
}

#[tokio::test]
async fn sideload_fetches_each_group_and_skips_unknown_types() {
    let store = MemoryStore::new();
    seed_streets(&store);
    store.seed(
        "unit",
        vec![
            rec(json!({"id": "u1", "site_id": "s1", "street_id": "st1", "label": "1A"})),
            rec(json!({"id": "u2", "site_id": "s1", "street_id": "st2", "label": "2A"})),
            rec(json!({"id": "u3", "site_id": "s2", "street_id": "st1", "label": "9Z"})),
        ],
    );
    let d = dispatcher(&store);
    let c = ctx(
        &d,
        session(user_type::OFFICIAL, "s1"),
        &[],
        &[("_list", "unit-street_id:st1|bogus-x:1|street")],
    );
    let reply = d.get(&c, "street", "st1").await;
    assert_eq!(reply.status, StatusCode::OK);
    let units = reply.body.get("unit").unwrap().as_array().unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0]["id"], json!("u1"));
    assert_eq!(reply.body.get("street").unwrap().as_array().unwrap().len(), 2);
    assert!(reply.body.get("bogus").is_none());

    let reply = d.multi(&c, "unit|street-name:Cedar Road").await;
    assert_eq!(reply.body.get("unit").unwrap().as_array().unwrap().len(), 2);
    assert!(reply.body.get("street").unwrap().as_array().unwrap().is_empty());
}

#[tokio::test]
async fn passwords_are_masked_on_reads() {
    let store = MemoryStore::new();
    let d = dispatcher(&store);
    let admin = ctx(&d, session(user_type::ADMIN, "s1"), &[], &[]);
    let reply = d
        .save(&admin, "user", None, json!({"email": "a@estate.test", "password": "hunter22"}))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let id = reply.body.get("id").and_then(Value::as_str).unwrap().to_string();
    let stored = store.rows("users")[0].text("password").unwrap();
    assert!(stored.starts_with("$argon2"));

    let reply = d.get(&admin, "user", &id).await;
    assert_eq!(reply.body.get("record").unwrap()["password"], json!("***"));
    let reply = d.get_by_field(&admin, "user", "email", "a@estate.test").await;
    assert_eq!(reply.body.get("record").unwrap()["password"], json!("***"));
    let reply = d.list(&admin, "user").await;
    assert_eq!(reply.body.get("list").unwrap()[0]["password"], json!("***"));
}
