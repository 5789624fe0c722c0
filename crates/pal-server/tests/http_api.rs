use axum::body::Body;
use axum::http::{Request, StatusCode};
use pal_server::router;
use pal_services::{Services, StartSessionOptions};
use pal_store::Store;
use pal_types::{PalConfig, SessionType};
use serde_json::{json, Value};
use tower::ServiceExt;

fn services() -> Services {
    Services::new(Store::open_in_memory().unwrap(), PalConfig::default())
}

async fn get(services: &Services, uri: &str) -> (StatusCode, Value) {
    let response = router(services.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post_json(services: &Services, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router(services.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn sessions_endpoints() {
    let services = services();
    let mut opts = StartSessionOptions::new(SessionType::Main, "/work/proj", "/work/proj");
    opts.id = Some("S1".to_string());
    opts.title = Some("main loop".to_string());
    services.sessions().start(opts).unwrap();
    services.attention().init("S1", Some(1000)).unwrap();

    let (status, body) = get(&services, "/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], "S1");

    let (status, body) = get(&services, "/sessions/S1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["title"], "main loop");
    assert_eq!(body["attention"]["state"]["token_budget"], 1000);

    let (status, body) = get(&services, "/sessions/S1/events").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["event_type"], "session_start");

    let (status, body) = get(&services, "/sessions/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn port_endpoints_and_progress() {
    let services = services();
    services
        .ports()
        .create("P1", Some("Entity"), None, &[])
        .unwrap();
    services
        .ports()
        .create(
            "P2",
            None,
            None,
            &[pal_services::DependencySpec::on("P1")],
        )
        .unwrap();

    let (status, body) = get(&services, "/ports").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = get(&services, "/ports/P1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["port"]["id"], "P1");
    assert_eq!(body["dependencies"]["outgoing"][0]["port_id"], "P2");

    let (status, body) = get(&services, "/ports/flow").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["edges"][0]["depends_on"], "P1");

    let (status, body) = get(&services, "/ports/progress").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counts"]["pending"], 2);
    assert_eq!(body["percent"], 0.0);

    let (status, body) = get(&services, "/ports?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_argument");
}

#[tokio::test]
async fn emit_hook_publishes() {
    let services = services();
    let mut sub = services
        .bus()
        .subscribe(pal_bus::EventFilter::for_kinds(["worker:spawn"]));

    let (status, body) = post_json(
        &services,
        "/events/emit",
        json!({ "type": "worker:spawn", "port_id": "P1", "data": { "role": "test" } }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["published"], true);

    let event = sub.try_recv().expect("push event forwarded");
    assert_eq!(event.port_id.as_deref(), Some("P1"));

    // persisted event types without a session are rejected
    let (status, _) = post_json(
        &services,
        "/events/emit",
        json!({ "type": "decision", "data": {} }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn escalation_and_attention_endpoints() {
    let services = services();
    let mut opts = StartSessionOptions::new(SessionType::Worker, "/w", "/w");
    opts.id = Some("S1".to_string());
    services.sessions().start(opts).unwrap();
    services.attention().init("S1", Some(1000)).unwrap();
    services.attention().observe("S1", 200, &[], &[]).unwrap();
    services
        .escalations()
        .open(
            Some("S1"),
            None,
            pal_types::EscalationType::User,
            pal_types::Severity::Low,
            "need a decision on the schema",
            None,
            None,
        )
        .unwrap();

    let (status, body) = get(&services, "/escalations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["issue"], "need a decision on the schema");

    let (status, body) = get(&services, "/escalations?status=resolved").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    let (status, body) = get(&services, "/attention/S1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loaded_tokens"], 200);

    let (status, body) = get(&services, "/attention/S1/report").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], "focused");

    let (status, body) = get(&services, "/attention/S1/history").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}
