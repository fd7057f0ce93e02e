use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use cadence_core::config::{AppConfig, GatewayConfig};
use cadence_core::event::EventBus;
use cadence_engine::CadenceEngine;
use cadence_gateway::{router, AppState};
use cadence_store::SqliteStore;
use cadence_test_utils::fixtures::{self, OWNER};
use cadence_test_utils::{MockCalendar, MockMailProvider};

fn app(token: Option<&str>) -> (Router, Arc<MockMailProvider>) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store.upsert_account(&fixtures::account()).unwrap();
    let mail = Arc::new(MockMailProvider::new());
    let engine = CadenceEngine::new(
        &AppConfig::default(),
        store,
        mail.clone(),
        Arc::new(MockCalendar::new()),
        None,
        Arc::new(EventBus::new(64)),
    );
    let state = Arc::new(AppState {
        config: GatewayConfig {
            token: token.map(String::from),
            ..Default::default()
        },
        engine,
    });
    (router(state), mail)
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn run_body() -> serde_json::Value {
    serde_json::json!({
        "owner_id": OWNER,
        "cadence_id": "cadence-1",
        "graph": fixtures::linear_graph_json(&[
            ("e1", "Intro", "immediate", 0),
            ("e2", "Following up", "days", 2),
        ]),
        "contact": fixtures::contact(),
    })
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let (app, _) = app(Some("secret"));
    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_token_required_when_configured() {
    let (app, _) = app(Some("secret"));
    let (status, _) = send(&app, get("/api/executions/nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/api/executions/nope")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_run_status_and_cancel() {
    let (app, mail) = app(None);

    let (status, body) = send(&app, post("/api/executions", run_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], 1);
    assert_eq!(body["queued"], 1);
    assert_eq!(mail.sent().len(), 1);
    let id = body["execution_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/api/executions/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["steps"][0]["status"], "sent");
    assert_eq!(body["steps"][1]["status"], "pending");

    let (status, body) = send(
        &app,
        post("/api/cancel", serde_json::json!({ "execution_id": id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], 1);

    let (_, body) = send(&app, get(&format!("/api/executions/{}", id))).await;
    assert_eq!(body["steps"][1]["status"], "cancelled");
    assert!(!body["execution"]["cancelled_at"].is_null());

    // Second cancel is a no-op.
    let (_, body) = send(
        &app,
        post(
            "/api/cancel",
            serde_json::json!({
                "owner_id": OWNER,
                "contact_id": "contact-1",
                "cadence_id": "cadence-1",
            }),
        ),
    )
    .await;
    assert_eq!(body["cancelled"], 0);
}

#[tokio::test]
async fn test_graph_without_start_is_rejected() {
    let (app, mail) = app(None);
    let body = serde_json::json!({
        "owner_id": OWNER,
        "cadence_id": "cadence-1",
        "graph": {
            "nodes": [{
                "id": "e1",
                "type": "email",
                "config": {"subject": "Hi", "template": "Hello"}
            }],
            "connections": []
        }
    });
    let (status, _) = send(&app, post("/api/executions", body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(mail.sent().is_empty());
}

#[tokio::test]
async fn test_cancel_needs_a_target() {
    let (app, _) = app(None);
    let (status, _) = send(&app, post("/api/cancel", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_poll_user_without_replies() {
    let (app, _) = app(None);
    let (status, body) = send(&app, post("/api/users/owner-1/poll", serde_json::json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found"], 0);
    assert_eq!(body["owner_id"], "owner-1");
}
