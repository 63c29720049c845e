/// Outbound HTTP dispatcher
///
/// Performs exactly one attempt per request, bounded by the configured timeout.
/// Transport failures become [`DispatchError`]s; any HTTP response, including
/// non-2xx, becomes a structured output unless the action opted into failing on
/// error statuses.

use crate::runtime::error::DispatchError;
use crate::runtime::request::OutboundRequest;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Anything that can carry an outbound request to its destination
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Execute the request and return the node output
    async fn execute(&self, request: OutboundRequest) -> Result<Value, DispatchError>;
}

/// reqwest-backed dispatcher
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDispatcher {
    /// Create a dispatcher whose calls time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, error: reqwest::Error) -> DispatchError {
        if error.is_timeout() {
            DispatchError::Timeout(self.timeout.as_millis() as u64)
        } else if error.is_connect() {
            DispatchError::Connect(error.to_string())
        } else {
            DispatchError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn execute(&self, request: OutboundRequest) -> Result<Value, DispatchError> {
        tracing::debug!(
            "🌍 HTTP Request: {} {} (headers: {:?})",
            request.method,
            request.url,
            request.header_names()
        );

        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let sends_body = !matches!(request.method, Method::GET | Method::HEAD) && !request.body.is_null();
        if sends_body {
            builder = builder.json(&request.body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
            })
            .collect();
        let text = response.text().await.map_err(|e| self.classify(e))?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        tracing::debug!("📥 HTTP Response: {} from {}", status.as_u16(), request.url);

        if request.fail_on_error_status && !status.is_success() {
            return Err(DispatchError::ErrorStatus(status.as_u16()));
        }

        Ok(json!({
            "status": status.as_u16(),
            "ok": status.is_success(),
            "headers": headers,
            "body": body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::request::build;
    use crate::workflow::{ActionDefinition, ApiConfig};
    use axum::{
        http::{HeaderMap, Method as AxumMethod, StatusCode},
        routing::{any, get},
        Json, Router,
    };
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn echo(method: AxumMethod, headers: HeaderMap, body: String) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        Json(json!({ "method": method.as_str(), "authorization": auth, "received": body }))
    }

    async fn spawn_server() -> SocketAddr {
        let app = Router::new()
            .route("/echo", any(echo))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such thing") }))
            .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "late"
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn request(method: &str, url: String, body: Value, fail_on_error_status: bool) -> OutboundRequest {
        let action = ActionDefinition {
            id: "http".to_string(),
            name: "http".to_string(),
            category: String::new(),
            input_schema: vec![],
            api_config: ApiConfig {
                method: Some(method.to_string()),
                url: Some(url),
                headers: [("Authorization".to_string(), "Bearer t".to_string())].into(),
                body,
                credential: None,
                fail_on_error_status,
            },
            logo: None,
        };
        build(&action, &Map::new(), &Map::new(), &Map::new(), None).unwrap()
    }

    #[tokio::test]
    async fn test_successful_json_response() {
        let addr = spawn_server().await;
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let output = dispatcher
            .execute(request("POST", format!("http://{addr}/echo"), json!({ "msg": "hi" }), false))
            .await
            .unwrap();

        assert_eq!(output["status"], json!(200));
        assert_eq!(output["ok"], json!(true));
        assert_eq!(output["body"]["method"], json!("POST"));
        assert_eq!(output["body"]["authorization"], json!("Bearer t"));
        assert_eq!(output["body"]["received"], json!({ "msg": "hi" }));
    }

    #[tokio::test]
    async fn test_get_sends_no_body() {
        let addr = spawn_server().await;
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let output = dispatcher
            .execute(request("GET", format!("http://{addr}/echo"), json!({ "ignored": true }), false))
            .await
            .unwrap();

        assert_eq!(output["body"]["method"], json!("GET"));
        assert_eq!(output["body"]["received"], Value::Null);
    }

    #[tokio::test]
    async fn test_non_2xx_is_structured_output() {
        let addr = spawn_server().await;
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let output = dispatcher
            .execute(request("GET", format!("http://{addr}/missing"), json!({}), false))
            .await
            .unwrap();

        assert_eq!(output["status"], json!(404));
        assert_eq!(output["ok"], json!(false));
        assert_eq!(output["body"], json!("no such thing"));
    }

    #[tokio::test]
    async fn test_empty_response_body_is_null() {
        let addr = spawn_server().await;
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let output = dispatcher
            .execute(request("GET", format!("http://{addr}/empty"), json!({}), false))
            .await
            .unwrap();

        assert_eq!(output["status"], json!(204));
        assert_eq!(output["body"], Value::Null);
    }

    #[tokio::test]
    async fn test_non_2xx_fails_when_configured() {
        let addr = spawn_server().await;
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let err = dispatcher
            .execute(request("GET", format!("http://{addr}/missing"), json!({}), true))
            .await
            .unwrap_err();

        assert_eq!(err, DispatchError::ErrorStatus(404));
    }

    #[tokio::test]
    async fn test_timeout_is_a_dispatch_error() {
        let addr = spawn_server().await;
        let dispatcher = HttpDispatcher::new(Duration::from_millis(50)).unwrap();

        let err = dispatcher
            .execute(request("GET", format!("http://{addr}/slow"), json!({}), false))
            .await
            .unwrap_err();

        assert_eq!(err, DispatchError::Timeout(50));
    }

    #[tokio::test]
    async fn test_connection_refused_is_a_dispatch_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let dispatcher = HttpDispatcher::new(Duration::from_secs(5)).unwrap();

        let err = dispatcher
            .execute(request("GET", format!("http://{addr}/echo"), json!({}), false))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Connect(_)), "unexpected error: {err:?}");
    }
}
