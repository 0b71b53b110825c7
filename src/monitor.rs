//! Long-running operation monitoring.
//!
//! Mutating calls whose response type is the provider's operation type can be
//! awaited: the operation resource is re-fetched from its `selfLink` every
//! poll interval until it carries a non-empty `endTime`. There is no cap on
//! the number of polls; each HTTP call is bounded by the transport timeout.

use serde_json::Value;

use crate::error::{CloudqlError, CloudqlResult};
use crate::output::{ExecutorOutput, ResultSet};
use crate::primitive::{ExecContext, HttpRestPrimitive, extract_rows};
use crate::transport::HttpRequest;

const END_TIME: &str = "endTime";
const SELF_LINK: &str = "selfLink";

/// Human-readable name of an operation, from its `kind` and `operationType`.
pub fn operation_descriptor(body: &Value) -> String {
    match (
        body.get("kind").and_then(Value::as_str),
        body.get("operationType").and_then(Value::as_str),
    ) {
        (Some(kind), Some(op)) => format!("{}: {}", kind, op),
        (Some(kind), None) => kind.to_string(),
        _ => "operation".to_string(),
    }
}

fn is_complete(body: &Value) -> bool {
    body.get(END_TIME)
        .is_some_and(|v| !v.is_null() && v.as_str() != Some(""))
}

/// Wraps a mutating call and polls the operation it starts.
#[derive(Debug, Clone)]
pub struct AsyncMonitorPrimitive {
    pub precursor: HttpRestPrimitive,
    /// Suppress progress lines.
    pub no_status: bool,
    /// Return the final operation as a table.
    pub show_results: bool,
}

impl AsyncMonitorPrimitive {
    pub fn new(precursor: HttpRestPrimitive, no_status: bool, show_results: bool) -> Self {
        Self {
            precursor,
            no_status,
            show_results,
        }
    }

    pub async fn execute(&self, ctx: &mut ExecContext) -> CloudqlResult<ExecutorOutput> {
        if ctx.dry_run {
            return Ok(self.precursor.dry_run());
        }
        let mut body = self.precursor.send(ctx).await?;
        let descriptor = operation_descriptor(&body);
        let mut messages = Vec::new();
        let mut elapsed = 0u64;

        while !is_complete(&body) {
            let Some(link) = body.get(SELF_LINK).and_then(Value::as_str) else {
                return Err(CloudqlError::monitor("no 'selfLink' property present"));
            };
            let request = HttpRequest::get(link);

            tokio::time::sleep(ctx.poll_interval).await;
            elapsed += ctx.poll_interval.as_secs();
            if !self.no_status {
                let line = format!("{} in progress, {} seconds elapsed", descriptor, elapsed);
                ctx.report(&line);
                messages.push(line);
            }
            tracing::debug!("Polling {}", request.url);
            body = ctx
                .send(self.precursor.provider.as_ref(), &request)
                .await?;
        }

        if !self.no_status {
            let line = format!("{} complete", descriptor);
            ctx.report(&line);
            messages.push(line);
        }

        let mut output = if self.show_results {
            ExecutorOutput::rows(ResultSet::from_rows(extract_rows(&body, None)))
        } else {
            ExecutorOutput::default()
        };
        output.messages = messages;
        output.body = Some(body);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::discovery::DiscoveryStore;
    use crate::metadata::Method;
    use crate::primitive::ResponseHandling;
    use crate::provider::{GoogleProvider, Provider};
    use crate::request::HttpArmoury;
    use crate::transport::ScriptedTransport;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const OPS: &str = "https://compute.googleapis.com/compute/v1/projects/p/global/operations/op-1";

    fn operation(status: &str, end_time: Option<&str>) -> Value {
        let mut op = json!({
            "kind": "compute#operation",
            "operationType": "insert",
            "status": status,
            "selfLink": OPS,
        });
        if let Some(t) = end_time {
            op["endTime"] = json!(t);
        }
        op
    }

    fn monitor(no_status: bool) -> AsyncMonitorPrimitive {
        let provider: Arc<dyn Provider> = Arc::new(GoogleProvider::new(
            DiscoveryStore::in_memory("google", vec![], vec![]),
            Arc::new(StaticAuthenticator::new("t", "me")),
            false,
        ));
        let precursor = HttpRestPrimitive {
            provider,
            method: Method::default(),
            armoury: HttpArmoury {
                parameters: Default::default(),
                request: HttpRequest::new("POST", "https://compute.googleapis.com/compute/v1/projects/p/global/networks"),
                request_schema: None,
                response_schema: Some("Operation".into()),
            },
            select_items_key: None,
            handling: ResponseHandling::Mutation { show_results: false },
        };
        AsyncMonitorPrimitive::new(precursor, no_status, false)
    }

    fn ctx(transport: Arc<ScriptedTransport>) -> ExecContext {
        let mut ctx = ExecContext::new(transport, "google");
        ctx.poll_interval = Duration::ZERO;
        ctx
    }

    #[test]
    fn test_operation_descriptor() {
        assert_eq!(operation_descriptor(&operation("DONE", None)), "compute#operation: insert");
        assert_eq!(operation_descriptor(&json!({"kind": "k"})), "k");
        assert_eq!(operation_descriptor(&json!({})), "operation");
    }

    #[tokio::test]
    async fn test_polls_until_end_time() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("POST", "https://compute.googleapis.com", 200, operation("RUNNING", None));
        transport
            .respond("GET", OPS, 200, operation("RUNNING", None))
            .respond("GET", OPS, 200, operation("DONE", Some("2021-03-01T00:00:00Z")));

        let out = monitor(false).execute(&mut ctx(transport.clone())).await.unwrap();
        assert_eq!(transport.count("GET", OPS), 2);
        assert_eq!(out.body.unwrap()["status"], "DONE");
        assert_eq!(out.messages.last().unwrap(), "compute#operation: insert complete");
        assert_eq!(out.messages[0], "compute#operation: insert in progress, 0 seconds elapsed");
    }

    #[tokio::test]
    async fn test_already_complete_and_no_status() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("POST", "https://compute.googleapis.com", 200, operation("DONE", Some("t")));
        let out = monitor(true).execute(&mut ctx(transport.clone())).await.unwrap();
        assert_eq!(transport.count("GET", OPS), 0);
        assert!(out.messages.is_empty());
    }

    #[tokio::test]
    async fn test_missing_self_link_aborts() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("POST", "https://compute.googleapis.com", 200, json!({"status": "RUNNING"}));
        let err = monitor(false).execute(&mut ctx(transport)).await.unwrap_err();
        assert_eq!(err.to_string(), "cannot execute monitor: no 'selfLink' property present");
    }

    #[tokio::test]
    async fn test_precursor_failure_is_not_polled() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("POST", "https://compute.googleapis.com", 409, json!({"error": {"code": 409}}));
        let err = monitor(false).execute(&mut ctx(transport.clone())).await.unwrap_err();
        assert!(matches!(err, CloudqlError::HttpStatus { status: 409, .. }));
        assert_eq!(transport.count("GET", OPS), 0);
    }
}
