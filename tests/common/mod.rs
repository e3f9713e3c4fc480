//! Shared test harness: a real server on an ephemeral port plus a thin
//! JSON-over-HTTP client.

use std::sync::Arc;

use serde_json::Value;

use xwalkdriver::config::Config;
use xwalkdriver::server;
use xwalkdriver::session::SessionManager;

pub struct TestServer {
    pub base_url: String,
    client: reqwest::Client,
}

/// Start a server backed by the simulated browser on an ephemeral port
pub async fn start_server() -> TestServer {
    start_server_with(Config::default()).await
}

pub async fn start_server_with(config: Config) -> TestServer {
    let manager = Arc::new(SessionManager::sim(config));
    let app = server::router(manager);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server task");
    });

    TestServer {
        base_url: format!("http://{}", addr),
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    pub async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("json body"))
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("json body"))
    }

    pub async fn delete(&self, path: &str) -> (u16, Value) {
        let response = self
            .client
            .delete(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("request");
        let status = response.status().as_u16();
        (status, response.json().await.expect("json body"))
    }

    /// Create a session and return its id; panics on rejection
    pub async fn new_session(&self, desired: Value) -> String {
        let (http, body) = self
            .post("/session", serde_json::json!({ "desiredCapabilities": desired }))
            .await;
        assert_eq!(http, 200, "session creation failed: {}", body);
        assert_eq!(body["status"], 0);
        body["sessionId"].as_str().expect("sessionId").to_string()
    }

    /// Run a script in the session, asserting success
    pub async fn execute(&self, session: &str, script: &str) -> Value {
        let (http, body) = self
            .post(
                &format!("/session/{}/execute", session),
                serde_json::json!({ "script": script, "args": [] }),
            )
            .await;
        assert_eq!(http, 200, "script failed: {}", body);
        body["value"].clone()
    }

    /// Find one element by locator strategy, returning its handle
    pub async fn find_element(&self, session: &str, using: &str, value: &str) -> String {
        let (http, body) = self
            .post(
                &format!("/session/{}/element", session),
                serde_json::json!({ "using": using, "value": value }),
            )
            .await;
        assert_eq!(http, 200, "find failed: {}", body);
        body["value"]["ELEMENT"].as_str().expect("ELEMENT").to_string()
    }
}
