// tests/monitor_tests.rs

mod common;

use std::time::Duration;

use common::{TestApp, sample_exam, spawn_app, token_for};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_monitor(app: &TestApp, query: &str, token: &str) -> Socket {
    let mut request = format!("{}/api/admin/monitor/ws{}", app.ws_address, query)
        .into_client_request()
        .expect("valid websocket request");
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );

    let (socket, _) = connect_async(request)
        .await
        .expect("Failed to open monitor socket");
    socket
}

/// Next text frame as JSON, failing the test after a short wait.
async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Socket closed")
            .expect("Socket error");

        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("event is JSON");
        }
    }
}

async fn start(client: &reqwest::Client, app: &TestApp, token: &str, exam_id: i64) -> Value {
    let response = client
        .post(app.url("/api/attempts"))
        .bearer_auth(token)
        .json(&json!({ "exam_id": exam_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    response.json().await.unwrap()
}

#[tokio::test]
async fn monitor_routes_require_admin() {
    let app = spawn_app(false).await;
    let client = reqwest::Client::new();

    let anonymous = client
        .get(app.url("/api/admin/monitor/sessions"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);

    let candidate = client
        .get(app.url("/api/admin/monitor/sessions"))
        .bearer_auth(token_for(7, "user"))
        .send()
        .await
        .unwrap();
    assert_eq!(candidate.status().as_u16(), 403);

    let regrade = client
        .post(app.url("/api/admin/attempts/1/grade"))
        .bearer_auth(token_for(7, "user"))
        .send()
        .await
        .unwrap();
    assert_eq!(regrade.status().as_u16(), 403);
}

#[tokio::test]
async fn active_sessions_follow_the_lifecycle() {
    let app = spawn_app(false).await;
    app.catalog.insert(sample_exam(1, Some(60))).await;
    app.catalog.insert(sample_exam(2, None)).await;
    let client = reqwest::Client::new();
    let admin = token_for(1, "admin");

    let first = start(&client, &app, &token_for(7, "user"), 1).await;
    start(&client, &app, &token_for(8, "user"), 2).await;

    let all: Value = client
        .get(app.url("/api/admin/monitor/sessions"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);

    let only_first: Value = client
        .get(app.url("/api/admin/monitor/sessions?exam_id=1"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(only_first.as_array().unwrap().len(), 1);
    assert_eq!(only_first[0]["session_id"], first["session_id"]);
    assert_eq!(only_first[0]["tab_switches"], 0);

    client
        .post(app.url(&format!(
            "/api/sessions/{}/submit",
            first["session_id"].as_str().unwrap()
        )))
        .bearer_auth(token_for(7, "user"))
        .send()
        .await
        .unwrap();

    let remaining: Value = client
        .get(app.url("/api/admin/monitor/sessions"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(remaining.as_array().unwrap().len(), 1);
    assert_eq!(remaining[0]["exam_id"], 2);
}

#[tokio::test]
async fn observers_receive_lifecycle_and_anomaly_events() {
    let app = spawn_app(false).await;
    app.catalog.insert(sample_exam(1, Some(60))).await;
    let client = reqwest::Client::new();
    let candidate = token_for(7, "user");

    let mut socket = connect_monitor(&app, "", &token_for(1, "admin")).await;

    let started = start(&client, &app, &candidate, 1).await;
    let session_id = started["session_id"].clone();

    let event = next_event(&mut socket).await;
    assert_eq!(event["event"], "session_started");
    assert_eq!(event["session_id"], session_id);
    assert_eq!(event["user_id"], 7);
    assert_eq!(event["exam_id"], 1);

    // Submitting seconds into a 60 minute exam is a fast submission.
    let submitted = client
        .post(app.url(&format!(
            "/api/sessions/{}/submit",
            session_id.as_str().unwrap()
        )))
        .bearer_auth(&candidate)
        .send()
        .await
        .unwrap();
    assert_eq!(submitted.status().as_u16(), 200);

    let anomaly = next_event(&mut socket).await;
    assert_eq!(anomaly["event"], "cheating_detected");
    assert_eq!(anomaly["event_type"], "fast_submit");
    assert_eq!(anomaly["session_id"], session_id);

    let ended = next_event(&mut socket).await;
    assert_eq!(ended["event"], "session_ended");
    assert_eq!(ended["session_id"], session_id);

    let audited = app.audit.entries().await;
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].event_type.as_str(), "fast_submit");
}

#[tokio::test]
async fn exam_topic_only_sees_its_exam() {
    let app = spawn_app(false).await;
    app.catalog.insert(sample_exam(1, None)).await;
    app.catalog.insert(sample_exam(2, None)).await;
    let client = reqwest::Client::new();

    let mut socket = connect_monitor(&app, "?exam_id=2", &token_for(1, "admin")).await;

    start(&client, &app, &token_for(7, "user"), 1).await;
    let watched = start(&client, &app, &token_for(8, "user"), 2).await;

    let event = next_event(&mut socket).await;
    assert_eq!(event["event"], "session_started");
    assert_eq!(event["exam_id"], 2);
    assert_eq!(event["session_id"], watched["session_id"]);
}

#[tokio::test]
async fn regrade_of_graded_attempt_conflicts() {
    let app = spawn_app(false).await;
    app.catalog.insert(sample_exam(1, None)).await;
    let client = reqwest::Client::new();
    let candidate = token_for(7, "user");

    let started = start(&client, &app, &candidate, 1).await;
    client
        .post(app.url(&format!(
            "/api/sessions/{}/submit",
            started["session_id"].as_str().unwrap()
        )))
        .bearer_auth(&candidate)
        .send()
        .await
        .unwrap();

    let response = client
        .post(app.url(&format!(
            "/api/admin/attempts/{}/grade",
            started["attempt_id"]
        )))
        .bearer_auth(token_for(1, "admin"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
}
