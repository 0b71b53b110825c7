mod common;

use cloudql::transport::ScriptedTransport;
use common::*;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;

fn networks_url() -> String {
    format!("{}/global/networks", PROJECT_URL)
}

fn operation(operation_type: &str, status: &str, done: bool) -> Value {
    let mut op = json!({
        "kind": "compute#operation",
        "name": "operation-1",
        "operationType": operation_type,
        "status": status,
        "targetLink": format!("{}/global/networks/vpc-1", PROJECT_URL),
        "selfLink": OPERATION_URL,
    });
    if done {
        op["endTime"] = json!("2021-03-01T10:00:00.000-08:00");
    }
    op
}

const INSERT_NETWORK: &str = r#"INSERT /*+ AWAIT */ INTO compute.networks(project, data__name, data__autoCreateSubnetworks, data__routingConfig)
     SELECT 'infraql-demo', 'vpc-1', false, '{"routingMode": "REGIONAL"}';"#;

#[tokio::test]
async fn test_awaited_insert_polls_until_done() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("POST", &networks_url(), 200, operation("insert", "PENDING", false));
    transport
        .respond("GET", OPERATION_URL, 200, operation("insert", "RUNNING", false))
        .respond("GET", OPERATION_URL, 200, operation("insert", "DONE", true));

    let mut session = session(&transport);
    let outputs = session.execute(INSERT_NETWORK).await;
    let output = &outputs[0];
    assert!(output.error.is_none(), "{:?}", output.error);

    assert_eq!(transport.count("POST", &networks_url()), 1);
    assert_eq!(transport.count("GET", OPERATION_URL), 2);
    assert_eq!(
        output.messages,
        vec![
            "compute#operation: insert in progress, 0 seconds elapsed",
            "compute#operation: insert in progress, 0 seconds elapsed",
            "compute#operation: insert complete",
        ]
    );
    assert_eq!(output.body.as_ref().unwrap()["status"], "DONE");

    let post = &transport.requests()[0];
    assert_eq!(
        post.body_json().unwrap(),
        json!({
            "name": "vpc-1",
            "autoCreateSubnetworks": false,
            "routingConfig": {"routingMode": "REGIONAL"}
        })
    );
}

#[tokio::test]
async fn test_awaited_insert_reports_progress_live() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("POST", &networks_url(), 200, operation("insert", "RUNNING", false));
    transport.respond("GET", OPERATION_URL, 200, operation("insert", "DONE", true));

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut session = session(&transport).with_progress(Arc::new(move |line: &str| {
        sink.lock().unwrap().push(line.to_string());
    }));
    session.execute(INSERT_NETWORK).await;
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_insert_without_await_returns_immediately() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("POST", &networks_url(), 200, operation("insert", "RUNNING", false));

    let mut session = session(&transport);
    let outputs = session
        .execute("INSERT INTO compute.networks(project, data__name) SELECT 'infraql-demo', 'vpc-1'")
        .await;
    assert_eq!(outputs[0].messages, vec!["The operation completed successfully"]);
    assert_eq!(transport.count("GET", OPERATION_URL), 0);
}

#[tokio::test]
async fn test_insert_show_results() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("POST", &networks_url(), 200, operation("insert", "RUNNING", false));

    let mut session = session(&transport);
    let outputs = session
        .execute("INSERT /*+ SHOWRESULTS */ INTO compute.networks(project, data__name) SELECT 'infraql-demo', 'vpc-1'")
        .await;
    let result = outputs[0].result.as_ref().unwrap();
    assert_eq!(result.cell(0, "operationType"), "insert");
    assert_eq!(result.cell(0, "status"), "RUNNING");
}

#[tokio::test]
async fn test_insert_validation() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut session = session(&transport);

    let outputs = session
        .execute("INSERT INTO compute.networks(data__name) SELECT 'vpc-1'")
        .await;
    assert_eq!(
        outputs[0].error.as_ref().unwrap().to_string(),
        "Query cannot be executed, missing required parameters: { project }"
    );

    let outputs = session
        .execute("INSERT INTO compute.networks(project, data__bogus) SELECT 'p', 'x'")
        .await;
    assert_eq!(
        outputs[0].error.as_ref().unwrap().to_string(),
        "column = 'data__bogus' is NOT present in either the provider data or the method parameters"
    );

    let outputs = session
        .execute("INSERT INTO compute.networks(project, data__name) VALUES ('p', 'a'), ('p', 'b')")
        .await;
    assert!(outputs[0].is_error());

    let outputs = session
        .execute("INSERT INTO compute.networks(project, data__name) SELECT 'p'")
        .await;
    assert!(outputs[0].is_error());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_awaited_delete_without_status() {
    let transport = Arc::new(ScriptedTransport::new());
    let url = format!("{}/global/networks/vpc-1", PROJECT_URL);
    transport.respond("DELETE", &url, 200, operation("delete", "RUNNING", false));
    transport.respond("GET", OPERATION_URL, 200, operation("delete", "DONE", true));

    let mut session = session(&transport);
    let outputs = session
        .execute("delete /*+ AWAIT NOSTATUS */ from compute.networks WHERE project = 'infraql-demo' and network = 'vpc-1';")
        .await;
    assert!(outputs[0].error.is_none(), "{:?}", outputs[0].error);
    assert!(outputs[0].messages.is_empty());
    assert_eq!(transport.count("DELETE", &url), 1);
    assert_eq!(transport.count("GET", OPERATION_URL), 1);
}

#[tokio::test]
async fn test_delete_validation() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut session = session(&transport);

    let outputs = session
        .execute("DELETE FROM compute.networks WHERE project = 'p' OR network = 'n'")
        .await;
    assert_eq!(
        outputs[0].error.as_ref().unwrap().to_string(),
        "DELETE supports only equality comparisons joined by AND"
    );

    let outputs = session
        .execute("DELETE FROM compute.networks WHERE project = 'p' AND network = 'n' AND colour = 'blue'")
        .await;
    assert_eq!(
        outputs[0].error.as_ref().unwrap().to_string(),
        "DELETE WHERE column = 'colour' is NOT present in data returned from provider"
    );
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_delete_accepts_response_fields() {
    let transport = Arc::new(ScriptedTransport::new());
    let url = format!("{}/global/networks/vpc-1", PROJECT_URL);
    transport.respond("DELETE", &url, 200, operation("delete", "RUNNING", false));

    let mut session = session(&transport);
    let outputs = session
        .execute("DELETE FROM compute.networks WHERE project = 'infraql-demo' AND network = 'vpc-1' AND status = 'DONE'")
        .await;
    assert!(outputs[0].error.is_none(), "{:?}", outputs[0].error);
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, url);
}

#[tokio::test]
async fn test_monitor_aborts_without_self_link() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond("POST", &networks_url(), 200, json!({"kind": "compute#operation", "status": "RUNNING"}));

    let mut session = session(&transport);
    let outputs = session.execute(INSERT_NETWORK).await;
    assert_eq!(
        outputs[0].error.as_ref().unwrap().to_string(),
        "cannot execute monitor: no 'selfLink' property present"
    );
}

#[tokio::test]
async fn test_exec_with_payload() {
    let transport = Arc::new(ScriptedTransport::new());
    let url = format!("{}/zones/us-east1-b/instances/alpha/setLabels", PROJECT_URL);
    transport.respond("POST", &url, 200, operation("setLabels", "RUNNING", false));
    transport.respond("GET", OPERATION_URL, 200, operation("setLabels", "DONE", true));

    let mut session = session(&transport);
    let outputs = session
        .execute(
            r#"EXEC /*+ AWAIT */ google.compute.instances.setLabels @project = 'infraql-demo', @zone = 'us-east1-b', @instance = 'alpha' @@json = '{"labels": {"env": "dev"}, "labelFingerprint": "abc="}';"#,
        )
        .await;
    assert!(outputs[0].error.is_none(), "{:?}", outputs[0].error);
    let post = &transport.requests()[0];
    assert_eq!(post.url, url);
    assert_eq!(
        post.body_json().unwrap(),
        json!({"labels": {"env": "dev"}, "labelFingerprint": "abc="})
    );
    assert_eq!(transport.count("GET", OPERATION_URL), 1);
}

#[tokio::test]
async fn test_exec_payload_validation() {
    let transport = Arc::new(ScriptedTransport::new());
    let mut session = session(&transport);

    let outputs = session
        .execute(
            r#"EXEC compute.instances.setLabels @project = 'p', @zone = 'z', @instance = 'i' @@json = '{"bogus": 1}'"#,
        )
        .await;
    assert_eq!(
        outputs[0].error.as_ref().unwrap().to_string(),
        "schema does not possess payload key 'bogus'"
    );

    let outputs = session
        .execute(r#"EXEC compute.instances.setLabels @project = 'p' @@json = '{"labels": {}}'"#)
        .await;
    assert_eq!(
        outputs[0].error.as_ref().unwrap().to_string(),
        "Query cannot be executed, missing required parameters: { instance, zone }"
    );

    let outputs = session
        .execute(r#"EXEC compute.instances.setLabels @project = 'p', @zone = 'z', @instance = 'i' @@json = '[1, 2]'"#)
        .await;
    assert_eq!(
        outputs[0].error.as_ref().unwrap().to_string(),
        "EXEC payload must be a JSON object"
    );
    assert!(transport.requests().is_empty());
}
