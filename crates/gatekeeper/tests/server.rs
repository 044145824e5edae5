//! End-to-end tests against a real listener on an ephemeral port.

use gateconf::{GateConfig, Secret};
use gatekeeper::Gatekeeper;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use toolbox::SecretString;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "secret123";

struct Running {
    base: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn stop(self) -> anyhow::Result<()> {
        let _ = self.stop.send(());
        self.task.await?
    }
}

async fn start(config: GateConfig, llm_key: Option<&str>) -> anyhow::Result<Running> {
    let gatekeeper = Gatekeeper::new(config, llm_key.map(SecretString::new))?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(gatekeeper.serve(listener, async move {
        let _ = stopped.await;
    }));

    Ok(Running { base, stop, task })
}

fn config() -> GateConfig {
    let mut config = GateConfig::default();
    config.auth.key = Some(Secret::new(KEY));
    config.server.environment = "test".into();
    config
}

fn rpc(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

async fn post_mcp(base: &str, key: Option<&str>, body: Value) -> anyhow::Result<reqwest::Response> {
    let mut request = reqwest::Client::new()
        .post(format!("{}/mcp", base))
        .header("accept", "application/json")
        .json(&body);
    if let Some(key) = key {
        request = request.header("x-api-key", key);
    }
    Ok(request.send().await?)
}

#[tokio::test]
async fn test_health_needs_no_key() -> anyhow::Result<()> {
    let server = start(config(), None).await?;

    let response = reqwest::get(format!("{}/health", server.base)).await?;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["tools"], 2);
    assert_eq!(body["sessions"]["total"], 0);

    let response = reqwest::Client::new()
        .post(format!("{}/health", server.base))
        .send()
        .await?;
    assert_eq!(response.status(), 401);

    server.stop().await
}

#[tokio::test]
async fn test_missing_or_wrong_key_is_rejected() -> anyhow::Result<()> {
    let server = start(config(), None).await?;

    for key in [None, Some("wrong")] {
        let response = post_mcp(&server.base, key, rpc(1, "tools/list", json!({}))).await?;
        assert_eq!(response.status(), 401);
        let body: Value = response.json().await?;
        assert_eq!(body, json!({ "error": "Unauthorized" }));
    }

    server.stop().await
}

#[tokio::test]
async fn test_unknown_path() -> anyhow::Result<()> {
    let server = start(config(), None).await?;
    let client = reqwest::Client::new();
    let url = format!("{}/nowhere", server.base);

    assert_eq!(client.get(&url).send().await?.status(), 401);
    assert_eq!(client.get(&url).header("x-api-key", KEY).send().await?.status(), 404);

    server.stop().await
}

#[tokio::test]
async fn test_initialize_list_and_call() -> anyhow::Result<()> {
    let server = start(config(), None).await?;

    let response = post_mcp(
        &server.base,
        Some(KEY),
        rpc(
            1,
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "it", "version": "1" }
            }),
        ),
    )
    .await?;
    assert_eq!(response.status(), 200);
    let session = response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("session header");
    let body: Value = response.json().await?;
    assert_eq!(body["result"]["serverInfo"]["name"], "gatekeeper");

    let body: Value = reqwest::Client::new()
        .post(format!("{}/mcp", server.base))
        .header("x-api-key", KEY)
        .header("mcp-session-id", &session)
        .header("accept", "application/json")
        .json(&rpc(2, "tools/list", json!({})))
        .send()
        .await?
        .json()
        .await?;
    let names: Vec<_> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["evaluation_sub_agent", "greeting"]);

    let evaluation = &body["result"]["tools"][0]["inputSchema"]["properties"];
    assert!(evaluation.get("llm_api_key").is_none());
    assert!(evaluation.get("http_client").is_none());

    let body: Value = post_mcp(
        &server.base,
        Some(KEY),
        rpc(
            3,
            "tools/call",
            json!({ "name": "greeting", "arguments": { "person_being_greeted": "World" } }),
        ),
    )
    .await?
    .json()
    .await?;
    assert_eq!(body["result"]["content"][0]["text"], "---- Hello World! ----");

    server.stop().await
}

#[tokio::test]
async fn test_invalid_arguments() -> anyhow::Result<()> {
    let server = start(config(), None).await?;

    let body: Value = post_mcp(
        &server.base,
        Some(KEY),
        rpc(1, "tools/call", json!({ "name": "greeting", "arguments": {} })),
    )
    .await?
    .json()
    .await?;
    assert_eq!(body["error"]["code"], -32602);

    let body: Value = post_mcp(
        &server.base,
        Some(KEY),
        rpc(2, "tools/call", json!({ "name": "nope", "arguments": {} })),
    )
    .await?
    .json()
    .await?;
    assert_eq!(body["error"]["code"], -32601);

    server.stop().await
}

#[tokio::test]
async fn test_missing_llm_key_is_internal_error() -> anyhow::Result<()> {
    let server = start(config(), None).await?;

    let body: Value = post_mcp(
        &server.base,
        Some(KEY),
        rpc(1, "tools/call", json!({ "name": "evaluation_sub_agent", "arguments": { "context": "hi" } })),
    )
    .await?
    .json()
    .await?;
    assert_eq!(body["error"]["code"], -32603);
    assert!(!body.to_string().contains("llm_api_key"));

    server.stop().await
}

#[tokio::test]
async fn test_evaluation_uses_configured_endpoint() -> anyhow::Result<()> {
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "pong" } }],
            "usage": { "total_tokens": 4 }
        })))
        .expect(2)
        .mount(&llm)
        .await;

    let mut config = config();
    config.llm.base_url = llm.uri();
    let server = start(config, Some("sk-test")).await?;

    let body: Value = post_mcp(
        &server.base,
        Some(KEY),
        rpc(
            1,
            "tools/call",
            json!({
                "name": "evaluation_sub_agent",
                "arguments": { "context": "ping", "num_calls": 2 }
            }),
        ),
    )
    .await?
    .json()
    .await?;

    let report = &body["result"]["structuredContent"];
    assert_eq!(report["summary"]["successful_calls"], 2);
    assert_eq!(report["summary"]["total_tokens_used"], 8);
    assert_eq!(report["responses"], json!(["pong", "pong"]));

    server.stop().await
}
