#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use reqwest::{Client, Method};
use tempfile::TempDir;
use tokio::net::TcpListener;

use agent_identity::api::create_router;
use agent_identity::canonical::sign_request;
use agent_identity::config::Config;
use agent_identity::crypto::generate_keypair;
use agent_identity::state::AppState;

/// An agent holding its own key pair
pub struct Agent {
    pub signing_key: SigningKey,
    pub public_key: String,
}

impl Agent {
    pub fn new() -> Self {
        let (signing_key, public_key) = generate_keypair();
        Self {
            signing_key,
            public_key,
        }
    }
}

/// The same public key spelled with a hex payload
pub fn hex_alias(agent: &Agent) -> String {
    format!(
        "{}:ed25519",
        hex::encode(agent.signing_key.verifying_key().as_bytes())
    )
}

/// Test client for API calls
pub struct TestClient {
    pub base_url: String,
    pub client: Client,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: Client::new(),
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .expect("Failed to send request")
    }

    /// Send a request signed by `agent` at the current time
    pub async fn signed(
        &self,
        agent: &Agent,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> reqwest::Response {
        self.signed_at(agent, method, path, body, Utc::now()).await
    }

    /// Send a request signed by `agent` with an explicit timestamp
    pub async fn signed_at(
        &self,
        agent: &Agent,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> reqwest::Response {
        let bytes = body
            .map(|b| serde_json::to_vec(b).expect("Failed to encode body"))
            .unwrap_or_default();
        let headers = sign_request(
            &agent.signing_key,
            &agent.public_key,
            method.as_str(),
            path,
            &timestamp.to_rfc3339(),
            &bytes,
        );

        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-Public-Key", headers.public_key)
            .header("X-Signature", headers.signature)
            .header("X-Timestamp", headers.timestamp);
        if body.is_some() {
            req = req.header("Content-Type", "application/json").body(bytes);
        }
        req.send().await.expect("Failed to send request")
    }

    /// Register `agent` under `mention_name`
    pub async fn register(&self, agent: &Agent, mention_name: &str) -> reqwest::Response {
        let body = serde_json::json!({ "mention_name": mention_name });
        self.signed(agent, Method::POST, "/register", Some(&body)).await
    }
}

/// Start a test server and return a client for it
pub async fn start_test_server(
    customize: impl FnOnce(&mut Config),
) -> (TestClient, Arc<AppState>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let mut config = Config {
        data_dir: temp_dir.path().to_path_buf(),
        host: "127.0.0.1".into(),
        port: 0,
        max_clock_skew: 60,
        replay_cache_enabled: false,
        tier0_daily_limit: 1,
        admin_keys: vec![],
        ..Config::default()
    };
    customize(&mut config);

    let state = AppState::new(config);
    let app = create_router(Arc::clone(&state));

    // Bind to random port
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    // Give server time to start
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (TestClient::new(format!("http://{}", addr)), state, temp_dir)
}

/// Generate a unique test name
pub fn unique_name(prefix: &str) -> String {
    use rand::Rng;
    let suffix: u32 = rand::thread_rng().gen_range(10000..99999);
    format!("{}_{}", prefix, suffix)
}

/// Read the `error.code` field of an error response
pub async fn error_code(resp: reqwest::Response) -> String {
    let body: serde_json::Value = resp.json().await.expect("Error body is not JSON");
    body["error"]["code"]
        .as_str()
        .expect("Missing error.code")
        .to_string()
}
