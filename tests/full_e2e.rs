//! End-to-end tests: a real listener, the full router, an HTTP client, and
//! the shutdown coordinator tearing it all down.

use mcp_session_server::handlers;
use mcp_session_server::server::{
    router, AppState, DispatchTable, Reaper, SessionStore, ShutdownCoordinator, ShutdownOutcome,
    ShutdownReason, SESSION_ID_HEADER,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct TestServer {
    base_url: String,
    store: Arc<SessionStore>,
    reaper: Arc<Reaper>,
    coordinator: ShutdownCoordinator,
    server: JoinHandle<std::io::Result<()>>,
}

async fn setup_test_server(session_timeout: Duration) -> TestServer {
    let store = Arc::new(SessionStore::new(16));
    let reaper = Arc::new(Reaper::new(
        Arc::clone(&store),
        Duration::from_millis(50),
        session_timeout,
    ));
    let coordinator =
        ShutdownCoordinator::new(Arc::clone(&store), Arc::clone(&reaper), Duration::from_secs(5));

    let dispatch = handlers::register_all(DispatchTable::new("e2e-server").with_version("1.2.3"));
    let state = AppState::new(Arc::clone(&store), Arc::new(dispatch), "e2e-server", "1.2.3");
    let app = router(state, true);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = coordinator.accept_token();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(accept.cancelled_owned())
            .await
    });
    reaper.start();

    TestServer {
        base_url: format!("http://{}", addr),
        store,
        reaper,
        coordinator,
        server,
    }
}

async fn initialize(client: &reqwest::Client, base_url: &str) -> String {
    let response = client
        .post(format!("{}/mcp", base_url))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "e2e-client", "version": "0.1" }
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let session_id = response
        .headers()
        .get(SESSION_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["serverInfo"]["version"], "1.2.3");
    session_id
}

async fn call(
    client: &reqwest::Client,
    base_url: &str,
    session_id: &str,
    body: Value,
) -> reqwest::Response {
    client
        .post(format!("{}/mcp", base_url))
        .header(SESSION_ID_HEADER, session_id)
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_full_session_lifecycle() {
    let server = setup_test_server(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();
    let session_id = initialize(&client, &server.base_url).await;

    let response = call(
        &client,
        &server.base_url,
        &session_id,
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert_eq!(response.status(), 202);

    let response = call(
        &client,
        &server.base_url,
        &session_id,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "resources/read",
            "params": { "uri": "users://42/profile" }
        }),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let profile: Value =
        serde_json::from_str(body["result"]["contents"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(profile["name"], "User 42");

    let health: Value = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["activeSessions"], 1);

    let response = client
        .delete(format!("{}/mcp", server.base_url))
        .header(SESSION_ID_HEADER, &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(server.store.is_empty());

    let outcome = server
        .coordinator
        .shutdown(ShutdownReason::Signal, Some(server.server))
        .await;
    assert_eq!(outcome, ShutdownOutcome::Clean);
    assert!(!server.reaper.is_running());
}

#[tokio::test]
async fn test_idle_session_is_reaped() {
    let server = setup_test_server(Duration::from_millis(100)).await;
    let client = reqwest::Client::new();
    let session_id = initialize(&client, &server.base_url).await;
    assert!(server.store.has(&session_id));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!server.store.has(&session_id));

    let response = call(
        &client,
        &server.base_url,
        &session_id,
        json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
    )
    .await;
    assert_eq!(response.status(), 400);

    server
        .coordinator
        .shutdown(ShutdownReason::Signal, Some(server.server))
        .await;
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions_and_refuses_new_ones() {
    let server = setup_test_server(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();
    initialize(&client, &server.base_url).await;
    initialize(&client, &server.base_url).await;
    assert_eq!(server.store.count(), 2);

    let outcome = server
        .coordinator
        .shutdown(ShutdownReason::Signal, Some(server.server))
        .await;
    assert_eq!(outcome.exit_code(), 0);
    assert!(server.store.is_empty());
    assert!(server.store.is_draining());

    let refused = client
        .post(format!("{}/mcp", server.base_url))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(refused.is_err(), "listener should be closed after shutdown");
}

#[tokio::test]
async fn test_concurrent_sessions() {
    let server = setup_test_server(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    let mut tasks = Vec::new();
    for i in 0..8u32 {
        let client = client.clone();
        let base_url = server.base_url.clone();
        tasks.push(tokio::spawn(async move {
            let session_id = initialize(&client, &base_url).await;
            let response = call(
                &client,
                &base_url,
                &session_id,
                json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "tools/call",
                    "params": {
                        "name": "calculate-bmi",
                        "arguments": { "weightKg": 60 + i, "heightM": 1.8 }
                    }
                }),
            )
            .await;
            assert_eq!(response.status(), 200);
            let body: Value = response.json().await.unwrap();
            assert!(body["result"]["content"][0]["text"]
                .as_str()
                .unwrap()
                .starts_with("BMI: "));
            session_id
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(server.store.count(), 8);

    server
        .coordinator
        .shutdown(ShutdownReason::Signal, Some(server.server))
        .await;
}
