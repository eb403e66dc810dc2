use std::sync::Arc;

use axum::http::StatusCode;
use http_body_util::BodyExt;
use instinct_core::{ActionRegistry, ConfigLister, Instinct, ReflexConfig};
use instinct_server::{build_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_reflex(name: &str, expression: &str) -> Value {
    json!({
        "name": name,
        "rule": {"type": "cel", "params": {"expression": expression}},
        "actions": [
            {"type": "print", "params": {"name": format!("{name}-print"), "message": "matched"}}
        ]
    })
}

/// Build an app preloaded with the given reflex configurations.
async fn app_with(reflexes: Vec<Value>) -> axum::Router {
    let registry = Arc::new(ActionRegistry::standard());
    let instinct = Arc::new(Instinct::new());
    let configs: Vec<ReflexConfig> = reflexes
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap())
        .collect();
    instinct
        .load_reflexes(&ConfigLister::new(configs, Arc::clone(&registry)))
        .await
        .unwrap();
    build_router(AppState::new(instinct, registry))
}

/// Send a GET request via `oneshot` and return (status, parsed JSON body).
async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

/// Send a POST request with a JSON body via `oneshot` and return (status, parsed JSON body).
async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

// ---------------------------------------------------------------------------
// Health and listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_reflex_count() {
    let app = app_with(vec![print_reflex("a", "true"), print_reflex("b", "false")]).await;
    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "reflexes": 2}));
}

#[tokio::test]
async fn lists_loaded_reflexes() {
    let app = app_with(vec![print_reflex("notify", "event.severity == 'high'")]).await;
    let (status, body) = get(app, "/api/reflexes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "notify");
    assert_eq!(body[0]["rule_type"], "cel");
    assert_eq!(body[0]["action_count"], 1);
    assert_eq!(body[0]["actions"][0], json!({"type": "print", "name": "notify-print"}));
}

// ---------------------------------------------------------------------------
// Event ingress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn event_with_no_reflexes_is_accepted() {
    let app = app_with(vec![]).await;
    let (status, _) = post_json(app, "/event", json!({"severity": "high"})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn non_object_event_is_rejected() {
    let app = app_with(vec![]).await;
    let (status, body) = post_json(app, "/event", json!([1, 2, 3])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "event must be a JSON object");
}

#[tokio::test]
async fn verbose_ingress_reports_matches() {
    let app = app_with(vec![
        print_reflex("high", "event.severity == 'high'"),
        print_reflex("low", "event.severity == 'low'"),
        print_reflex("tagged", "'phishing' in event.tags"),
    ])
    .await;
    let (status, body) = post_json(
        app,
        "/api/events",
        json!({"severity": "high", "tags": ["phishing"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evaluated"], 3);
    assert_eq!(body["matched"], json!(["high", "tagged"]));
}

#[tokio::test]
async fn failing_reflex_yields_500_with_count() {
    let broken = json!({
        "name": "broken",
        "rule": {"type": "cel", "params": {"expression": "true"}},
        "actions": [{
            "type": "conditional",
            "params": {
                "name": "divide",
                "rule_config": {"type": "cel", "params": {"expression": "event.count / 0 > 1"}},
                "then_action": {"type": "print", "params": {"name": "unreachable", "message": "no"}}
            }
        }]
    });
    let app = app_with(vec![
        print_reflex("ok", "true"),
        print_reflex("mistyped", "event.count > 'x'"),
        broken,
    ])
    .await;
    let (status, body) = post_json(app, "/event", json!({"count": 4})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("encountered 1 error(s)"));
}

// ---------------------------------------------------------------------------
// Reflex management
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_reflex_then_conflict() {
    let app = app_with(vec![]).await;

    let (status, body) = post_json(app.clone(), "/api/reflexes", print_reflex("new", "true")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"name": "new", "action_count": 1}));

    let (status, _) = post_json(app.clone(), "/api/reflexes", print_reflex("new", "true")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = get(app, "/health").await;
    assert_eq!(body["reflexes"], 1);
}

#[tokio::test]
async fn create_reflex_with_bad_config_is_400() {
    let app = app_with(vec![]).await;
    let config = json!({
        "name": "bad",
        "rule": {"type": "cel", "params": {"expression": "true"}},
        "actions": [{"type": "teleport", "params": {}}]
    });
    let (status, body) = post_json(app, "/api/reflexes", config).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("teleport"));
}

#[tokio::test]
async fn validate_reports_every_problem() {
    let app = app_with(vec![]).await;

    let (status, body) =
        post_json(app.clone(), "/api/reflexes/validate", print_reflex("fine", "true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let config = json!({
        "name": "",
        "rule": {"type": "cel", "params": {"expression": "event.("}},
        "actions": [{"type": "print", "params": {"name": "p"}}]
    });
    let (status, body) = post_json(app, "/api/reflexes/validate", config).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"].as_array().unwrap().len(), 3);
}
