use axum::body::Body;
use axum::http::{Request, StatusCode};
use collab_server::{router, AppState};
use collaboration::{SyncConfig, SyncEngine, SyncProtocol};
use futures_util::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    engine: Arc<SyncEngine>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(config: SyncConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let engine = Arc::new(SyncEngine::new(config));
        let (tx, rx) = oneshot::channel::<()>();

        let served = engine.clone();
        tokio::spawn(async move {
            collab_server::serve(listener, served, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });

        Self {
            addr,
            engine,
            shutdown: Some(tx),
        }
    }

    async fn connect(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr)).await.unwrap();
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn next_of_type(ws: &mut Client, kind: &str) -> Value {
    loop {
        let msg = next_json(ws).await;
        if msg["type"] == kind {
            return msg;
        }
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

fn insert_paragraph(text: &str) -> Value {
    json!({
        "stepType": "insertNode",
        "path": [],
        "index": 0,
        "node": {"type": "paragraph", "content": [{"type": "text", "text": text}]}
    })
}

async fn request(engine: &Arc<SyncEngine>, req: Request<Body>) -> (StatusCode, Value) {
    let app = router(AppState {
        engine: engine.clone(),
    });
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

async fn get(engine: &Arc<SyncEngine>, uri: &str) -> (StatusCode, Value) {
    request(engine, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post(engine: &Arc<SyncEngine>, uri: &str, body: Value) -> (StatusCode, Value) {
    request(
        engine,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_editors_exchange_steps_over_websocket() {
    let server = TestServer::start(SyncConfig::default()).await;

    let mut a = server.connect().await;
    let init = next_json(&mut a).await;
    assert_eq!(init["type"], "init");
    assert_eq!(init["version"], 0);
    assert_eq!(init["totalParticipants"], 1);
    assert!(init["clientId"].is_string());
    assert_eq!(next_json(&mut a).await["totalParticipants"], 1);

    let mut b = server.connect().await;
    assert_eq!(next_json(&mut b).await["type"], "init");
    assert_eq!(next_of_type(&mut a, "participantUpdate").await["totalParticipants"], 2);

    send_json(
        &mut a,
        json!({"type": "steps", "version": 0, "steps": [{"step": insert_paragraph("hello")}], "clientID": 42}),
    )
    .await;

    let ack = next_of_type(&mut a, "stepAck").await;
    assert_eq!(ack["success"], true);
    assert_eq!(ack["stepsSent"], 1);
    assert_eq!(ack["currentVersion"], 1);

    let steps = next_of_type(&mut b, "steps").await;
    assert_eq!(steps["version"], 1);
    assert_eq!(steps["steps"][0]["clientId"], 42);
    assert_eq!(steps["steps"][0]["step"], insert_paragraph("hello"));

    // b is now stale at version 0
    send_json(
        &mut b,
        json!({"type": "steps", "version": 0, "steps": [{"step": insert_paragraph("late")}]}),
    )
    .await;
    let resync = next_of_type(&mut b, "resync").await;
    assert_eq!(resync["version"], 1);
    assert_eq!(resync["steps"].as_array().unwrap().len(), 1);
    assert_eq!(server.engine.version(), 1);

    send_json(&mut b, json!({"type": "ping"})).await;
    assert_eq!(next_of_type(&mut b, "pong").await, json!({"type": "pong"}));

    a.close(None).await.unwrap();
    assert_eq!(next_of_type(&mut b, "participantUpdate").await["totalParticipants"], 1);
}

#[tokio::test]
async fn test_malformed_frame_gets_error_reply() {
    let server = TestServer::start(SyncConfig::default()).await;
    let mut a = server.connect().await;
    next_of_type(&mut a, "participantUpdate").await;

    a.send(Message::Text("not json".to_string())).await.unwrap();
    let error = next_of_type(&mut a, "error").await;
    assert!(error["message"].as_str().unwrap().contains("malformed"));

    send_json(&mut a, json!({"type": "ping"})).await;
    next_of_type(&mut a, "pong").await;
    assert_eq!(server.engine.participant_count(), 1);
}

#[tokio::test]
async fn test_http_batch_reaches_websocket_clients() {
    let server = TestServer::start(SyncConfig::default()).await;
    let mut a = server.connect().await;
    next_of_type(&mut a, "participantUpdate").await;

    let (status, body) = post(
        &server.engine,
        "/document/steps",
        json!({"version": 0, "steps": [insert_paragraph("api")]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"version": 1}));

    let steps = next_of_type(&mut a, "steps").await;
    assert_eq!(steps["version"], 1);
    assert_eq!(steps["steps"][0]["clientId"], "http");
}

#[tokio::test]
async fn test_http_submission_errors() {
    let engine = Arc::new(SyncEngine::new(SyncConfig::default()));

    let (status, _) = post(
        &engine,
        "/document/steps",
        json!({"version": 0, "steps": [insert_paragraph("first")], "clientID": "script"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(
        &engine,
        "/document/steps",
        json!({"version": 0, "steps": [insert_paragraph("stale")]}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["currentVersion"], 1);

    let (status, body) = post(
        &engine,
        "/document/steps",
        json!({"version": 1, "steps": [
            insert_paragraph("ok"),
            {"stepType": "removeNode", "path": [], "index": 99}
        ]}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("step 1"));
    assert_eq!(engine.version(), 1);
}

#[tokio::test]
async fn test_document_and_steps_endpoints() {
    let engine = Arc::new(SyncEngine::new(SyncConfig {
        initial_version: 5,
        ..SyncConfig::default()
    }));
    post(
        &engine,
        "/document/steps",
        json!({"version": 5, "steps": [insert_paragraph("a"), insert_paragraph("b")]}),
    )
    .await;

    let (status, body) = get(&engine, "/document").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 7);
    assert_eq!(body["totalParticipants"], 0);
    assert_eq!(body["stepHistory"], 2);
    assert!(body.get("steps").is_none());
    assert_eq!(body["doc"]["type"], "doc");

    let (_, body) = get(&engine, "/document?includeSteps=true").await;
    assert_eq!(body["steps"].as_array().unwrap().len(), 2);

    let (status, body) = get(&engine, "/document/steps?version=6").await;
    assert_eq!(status, StatusCode::OK);
    let steps = body["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0]["version"], 7);
    assert_eq!(steps[0]["originId"], "http");
    assert_eq!(body["users"], 0);

    let (status, body) = get(&engine, "/document/steps?version=8").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = get(&engine, "/document/steps?version=4").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_and_clients() {
    let server = TestServer::start(SyncConfig::default()).await;
    let mut a = server.connect().await;
    next_of_type(&mut a, "participantUpdate").await;

    let (status, body) = get(&server.engine, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy", "clients": 1, "version": 0}));

    let (_, body) = get(&server.engine, "/clients").await;
    assert_eq!(body["totalClients"], 1);
    let client = &body["clients"][0];
    assert_eq!(client["version"], 0);
    assert_eq!(client["isActive"], true);
    assert_eq!(client["connectionState"], "open");
    assert!(client["connectionTime"].is_string());
}

#[tokio::test]
async fn test_document_mode_refuses_step_batches() {
    let engine = Arc::new(SyncEngine::new(SyncConfig {
        protocol: SyncProtocol::Document,
        ..SyncConfig::default()
    }));

    let (status, body) = post(
        &engine,
        "/document/steps",
        json!({"version": 0, "steps": [insert_paragraph("x")]}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("document mode"));
    assert_eq!(engine.version(), 0);
}

#[tokio::test]
async fn test_document_mode_over_websocket() {
    let server = TestServer::start(SyncConfig {
        protocol: SyncProtocol::Document,
        ..SyncConfig::default()
    })
    .await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    next_of_type(&mut a, "init").await;
    next_of_type(&mut b, "init").await;

    let unchanged = json!({"type": "doc", "content": [{"type": "paragraph"}]});
    send_json(&mut a, json!({"type": "documentUpdate", "doc": unchanged})).await;
    let ack = next_of_type(&mut a, "documentUpdateAck").await;
    assert_eq!(ack["success"], true);
    assert_eq!(ack["noChanges"], true);

    let edited = json!({"type": "doc", "content": [{"type": "paragraph", "content": [{"type": "text", "text": "hi"}]}]});
    send_json(&mut a, json!({"type": "documentUpdate", "doc": edited})).await;
    let ack = next_of_type(&mut a, "documentUpdateAck").await;
    assert_eq!(ack["version"], 1);

    let update = next_of_type(&mut b, "documentUpdate").await;
    assert_eq!(update["version"], 1);
    assert_eq!(update["doc"], edited);
}

#[tokio::test]
async fn test_bad_step_queries_answer_with_json_errors() {
    let engine = Arc::new(SyncEngine::new(SyncConfig::default()));

    let (status, body) = get(&engine, "/document/steps?version=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid version -1: current version is 0");

    let (status, body) = get(&engine, "/document/steps").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("version"));

    let (status, body) = get(&engine, "/document/steps?version=latest").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = get(&engine, "/document?includeSteps=maybe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unreadable_batches_are_bad_requests_not_apply_failures() {
    let engine = Arc::new(SyncEngine::new(SyncConfig::default()));

    let (status, body) = post(&engine, "/document/steps", json!({"version": -1, "steps": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("invalid version -1"));

    let (status, body) = request(
        &engine,
        Request::builder()
            .method("POST")
            .uri("/document/steps")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = post(
        &engine,
        "/document/steps",
        json!({"version": 0, "steps": [{"stepType": "teleport"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    assert_eq!(engine.version(), 0);
    assert!(engine.log().is_empty());
}

#[tokio::test]
async fn test_api_prefix_serves_the_same_routes() {
    let engine = Arc::new(SyncEngine::new(SyncConfig::default()));

    let (status, body) = post(
        &engine,
        "/api/document/steps",
        json!({"version": 0, "steps": [insert_paragraph("legacy")]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"version": 1}));

    let (status, body) = get(&engine, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy", "clients": 0, "version": 1}));

    let (status, body) = get(&engine, "/api/document").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stepHistory"], 1);

    let (status, body) = get(&engine, "/api/clients").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalClients"], 0);

    let (status, body) = get(&engine, "/api/document/steps?version=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["steps"].as_array().unwrap().len(), 1);
}
