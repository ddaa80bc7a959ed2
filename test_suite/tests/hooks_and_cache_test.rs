// Hooks and Cache Test
// Lifecycle hooks and cached reads against a real database

use crudman::{
    ActionConfig, ActionKind, CrudRequest, CrudService, Envelope, ErrorEntry, HookFlow, Hooks,
    ModuleOptions, Predicate, Registry,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use serde_json::{Map, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

mod common;
use common::{companies_section, get, names, send_json, setup_seeded_db, setup_test_app};

#[tokio::test]
async fn test_cached_list_is_invalidated_by_writes() {
    let db = setup_seeded_db().await.expect("Failed to setup test database");
    let section = companies_section(&db).action(ActionKind::List, ActionConfig::new().cache(Some(60)));
    let app = setup_test_app(section, ModuleOptions::default());

    let first = get(&app, "/api/v1/companies").await.json();
    assert_eq!(first["pagination"]["totalItemsCount"], 4);

    // A row written behind the engine's back stays invisible while cached
    common::company::ActiveModel {
        name: Set("Shadow".to_string()),
        employees: Set(1),
        price: Set(1.0),
        active: Set(true),
        logo: Set(None),
        ..Default::default()
    }
    .insert(&db)
    .await
    .unwrap();
    let cached = get(&app, "/api/v1/companies").await.json();
    assert_eq!(cached, first);

    // A write through the engine drops the section's entries
    let created = send_json(
        &app,
        "POST",
        "/api/v1/companies",
        &json!({ "name": "Hooli", "employees": 3, "price": 2.0, "active": true }),
    )
    .await
    .json();
    assert_eq!(created["success"], true, "{created}");
    let fresh = get(&app, "/api/v1/companies").await.json();
    assert_eq!(fresh["pagination"]["totalItemsCount"], 6);
}

#[tokio::test]
async fn test_before_query_scopes_list() {
    let db = setup_seeded_db().await.expect("Failed to setup test database");
    let hooks = Hooks::new().before_query(|_ctx, mut descriptor| async move {
        descriptor.filter = Predicate::all(vec![descriptor.filter, Predicate::eq("active", json!(true))]);
        Ok(descriptor)
    });
    let section = companies_section(&db).action(ActionKind::List, ActionConfig::new().hooks(hooks));
    let app = setup_test_app(section, ModuleOptions::default());

    let body = get(&app, "/api/v1/companies?sort.name=asc").await.json();
    assert_eq!(names(&body), vec!["Acme Corp", "Acme Holdings", "Globex"]);
}

#[tokio::test]
async fn test_validation_hooks_rewrite_and_reject() {
    let db = setup_seeded_db().await.expect("Failed to setup test database");
    let hooks = Hooks::new()
        .before_validate(|_ctx, mut body| async move {
            if let Some(name) = body.get("name").and_then(|v| v.as_str()).map(str::trim) {
                let trimmed = json!(name);
                body.insert("name".to_string(), trimmed);
            }
            Ok(HookFlow::Proceed(body))
        })
        .after_validate(|_ctx, body| async move {
            if body.get("employees").and_then(serde_json::Value::as_i64) == Some(0) {
                return Ok(HookFlow::Reject(vec![ErrorEntry::for_field(
                    "employees",
                    "custom",
                    "A company needs staff",
                )]));
            }
            Ok(HookFlow::Proceed(body))
        });
    let section = companies_section(&db).action(ActionKind::Create, ActionConfig::new().hooks(hooks));
    let app = setup_test_app(section, ModuleOptions::default());

    let created = send_json(
        &app,
        "POST",
        "/api/v1/companies",
        &json!({ "name": "  Hooli  ", "employees": 3, "price": 2.0, "active": true }),
    )
    .await
    .json();
    assert_eq!(created["data"]["name"], "Hooli");

    let rejected = send_json(
        &app,
        "POST",
        "/api/v1/companies",
        &json!({ "name": "Ghost", "employees": 0, "price": 2.0, "active": true }),
    )
    .await
    .json();
    assert_eq!(rejected["errors"][0]["type"], "custom");
}

#[tokio::test]
async fn test_context_state_and_meta_reach_the_envelope() {
    struct Tenant {
        name: &'static str,
    }

    let db = setup_seeded_db().await.expect("Failed to setup test database");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let hooks = Hooks::new()
        .context(|request: CrudRequest| async move {
            let mut extras = Map::new();
            extras.insert("agent".to_string(), json!(request.header("user-agent").unwrap_or("unknown")));
            Ok(extras)
        })
        .computed_meta(|ctx, envelope: Envelope| async move {
            let mut meta = Map::new();
            meta.insert("tenant".to_string(), json!(ctx.state::<Tenant>().map(|t| t.name)));
            meta.insert("agent".to_string(), ctx.extras["agent"].clone());
            meta.insert("count".to_string(), json!(envelope.records().len()));
            Ok(meta)
        })
        .after_action(move |_ctx, envelope| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(envelope) }
        });

    let registry = Registry::builder()
        .state(Tenant { name: "acme" })
        .section(companies_section(&db).defaults(ActionConfig::new().hooks(hooks)))
        .build();
    let service = CrudService::new(registry);

    let request = CrudRequest::new()
        .with_header("user-agent", "integration-test")
        .with_query("perPage", "2");
    let captured = service.call_action("companies", ActionKind::List, request).await;
    assert_eq!(captured.status, 200);
    assert_eq!(
        captured.data["meta"],
        json!({ "tenant": "acme", "agent": "integration-test", "count": 2 })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_before_action_abort_answers_no_content() {
    let db = setup_seeded_db().await.expect("Failed to setup test database");
    let hooks = Hooks::new().before_action(|_ctx, _request| async { Ok(HookFlow::Abort) });
    let section = companies_section(&db).action(ActionKind::Delete, ActionConfig::new().hooks(hooks));
    let app = setup_test_app(section, ModuleOptions::default());

    let response = send_json(&app, "DELETE", "/api/v1/companies/1", &json!({})).await;
    assert_eq!(response.status, 204);
    assert!(response.body.is_empty());

    // Nothing was deleted
    let still_there = get(&app, "/api/v1/companies/1").await.json();
    assert_eq!(still_there["success"], true);
}
