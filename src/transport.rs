//! HTTP transport.
//!
//! The engine only needs "send this request, give me status and body", so the
//! transport is a trait. [`ReqwestTransport`] talks to the network;
//! `ScriptedTransport` (feature `testing`) replays canned responses and
//! records what was sent.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{CloudqlError, CloudqlResult};

/// Body returned for a 2xx response without content.
pub const EMPTY_SUCCESS_MESSAGE: &str = "The Operation Completed Successfully";

/// A fully resolved request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpRequest {
    /// Upper-case verb.
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a JSON body and its content type.
    pub fn with_json_body(mut self, body: &Value) -> CloudqlResult<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// The body decoded as JSON, if it is JSON.
    pub fn body_json(&self) -> Option<Value> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }
}

/// Sends requests on behalf of the engine.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> CloudqlResult<HttpResponse>;
}

/// Decode a response body, turning error statuses into [`CloudqlError::HttpStatus`].
pub fn process_response(response: &HttpResponse) -> CloudqlResult<Value> {
    let is_empty = response.body.iter().all(u8::is_ascii_whitespace);
    let decoded = if is_empty {
        Ok(serde_json::json!({ "result": EMPTY_SUCCESS_MESSAGE }))
    } else {
        serde_json::from_slice::<Value>(&response.body)
    };

    if response.status >= 400 {
        let body = decoded.unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&response.body).into_owned())
        });
        return Err(CloudqlError::HttpStatus {
            status: response.status,
            body,
        });
    }
    Ok(decoded?)
}

/// Network transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> CloudqlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CloudqlError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> CloudqlResult<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| CloudqlError::Transport(format!("Invalid HTTP method: {}", e)))?;
        tracing::debug!("{} {}", method, request.url);

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CloudqlError::Transport(format!("HTTP request failed: {}", e)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| CloudqlError::Transport(format!("Failed to read response: {}", e)))?;
        tracing::debug!("HTTP {} ({} bytes)", status, body.len());

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedTransport;

/// Canned-response transport for tests, behind the `testing` feature.
#[cfg(any(test, feature = "testing"))]
mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Route {
        method: String,
        url_prefix: String,
        responses: VecDeque<HttpResponse>,
        last: Option<HttpResponse>,
    }

    /// Transport that answers from a script of canned responses.
    ///
    /// Responses queued for a route are served in order; once the queue is empty
    /// the last one is repeated. Every request is recorded.
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<Vec<Route>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a JSON response for requests whose URL starts with `url_prefix`.
        pub fn respond(&self, method: &str, url_prefix: &str, status: u16, body: Value) -> &Self {
            let response = HttpResponse::json(status, &body);
            let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            let method = method.to_ascii_uppercase();
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.url_prefix == url_prefix)
            {
                Some(route) => route.responses.push_back(response),
                None => routes.push(Route {
                    method,
                    url_prefix: url_prefix.to_string(),
                    responses: VecDeque::from([response]),
                    last: None,
                }),
            }
            self
        }

        /// Every request sent so far, oldest first.
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }

        /// Number of recorded requests matching a verb and URL prefix.
        pub fn count(&self, method: &str, url_prefix: &str) -> usize {
            self.requests()
                .iter()
                .filter(|r| r.method.eq_ignore_ascii_case(method) && r.url.starts_with(url_prefix))
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, request: &HttpRequest) -> CloudqlResult<HttpResponse> {
            self.requests
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(request.clone());

            let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            // Longest matching prefix wins.
            let route = routes
                .iter_mut()
                .filter(|r| r.method == request.method && request.url.starts_with(&r.url_prefix))
                .max_by_key(|r| r.url_prefix.len());
            let Some(route) = route else {
                return Err(CloudqlError::Transport(format!(
                    "no scripted response for {} {}",
                    request.method, request.url
                )));
            };
            if let Some(next) = route.responses.pop_front() {
                route.last = Some(next.clone());
                return Ok(next);
            }
            route.last.clone().ok_or_else(|| {
                CloudqlError::Transport(format!("script exhausted for {}", request.url))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_process_response_error_keeps_body() {
        let resp = HttpResponse::json(404, &json!({"error": {"message": "not found"}}));
        match process_response(&resp) {
            Err(CloudqlError::HttpStatus { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body["error"]["message"], "not found");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_process_response_empty_body() {
        let resp = HttpResponse {
            status: 204,
            body: Vec::new(),
        };
        assert_eq!(
            process_response(&resp).unwrap(),
            json!({"result": EMPTY_SUCCESS_MESSAGE})
        );
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let req = HttpRequest::new("post", "https://example.com")
            .with_json_body(&json!({"name": "vpc"}))
            .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.headers["Content-Type"], "application/json");
        assert_eq!(req.body_json().unwrap()["name"], "vpc");
    }

    #[tokio::test]
    async fn test_scripted_transport_repeats_last() {
        let transport = ScriptedTransport::new();
        transport
            .respond("GET", "https://a/ops", 200, json!({"status": "RUNNING"}))
            .respond("GET", "https://a/ops", 200, json!({"status": "DONE"}));
        let req = HttpRequest::get("https://a/ops/1");
        for expected in ["RUNNING", "DONE", "DONE"] {
            let body = process_response(&transport.execute(&req).await.unwrap()).unwrap();
            assert_eq!(body["status"], expected);
        }
        assert_eq!(transport.count("GET", "https://a/ops"), 3);
        assert!(transport
            .execute(&HttpRequest::get("https://b"))
            .await
            .is_err());
    }
}
