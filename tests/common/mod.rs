#![allow(dead_code)]

use cloudql::auth::StaticAuthenticator;
use cloudql::config::RuntimeConfig;
use cloudql::discovery::{DiscoveryStore, parse_directory, parse_service_document};
use cloudql::provider::{GoogleProvider, Provider};
use cloudql::session::Session;
use cloudql::taxonomy::ProviderMap;
use cloudql::transport::ScriptedTransport;
use std::sync::Arc;
use std::time::Duration;

pub const PROJECT_URL: &str = "https://compute.googleapis.com/compute/v1/projects/infraql-demo";
pub const OPERATION_URL: &str =
    "https://compute.googleapis.com/compute/v1/projects/infraql-demo/global/operations/operation-1";

const DIRECTORY: &str = include_str!("../fixtures/directory.json");
const COMPUTE: &str = include_str!("../fixtures/compute_v1.json");

/// Google provider over the fixture documents.
pub fn google(use_non_preferred_apis: bool) -> Arc<dyn Provider> {
    google_with_compute(use_non_preferred_apis, |_| {})
}

/// Google provider whose compute document is edited before parsing.
pub fn google_with_compute(
    use_non_preferred_apis: bool,
    edit: impl FnOnce(&mut serde_json::Value),
) -> Arc<dyn Provider> {
    let directory = parse_directory(DIRECTORY.as_bytes()).unwrap();
    let entry = directory.iter().find(|s| s.id == "compute__v1").cloned();
    let mut doc: serde_json::Value = serde_json::from_str(COMPUTE).unwrap();
    edit(&mut doc);
    let compute = parse_service_document(doc.to_string().as_bytes(), entry.as_ref()).unwrap();
    let store = DiscoveryStore::in_memory("google", directory, vec![compute]);
    Arc::new(GoogleProvider::new(
        store,
        Arc::new(StaticAuthenticator::new("test-token", "tester@infraql-demo.iam.gserviceaccount.com")),
        use_non_preferred_apis,
    ))
}

pub fn providers() -> ProviderMap {
    ProviderMap::from([("google".to_string(), google(false))])
}

pub fn config() -> RuntimeConfig {
    RuntimeConfig::builder()
        .provider("google")
        .poll_interval(Duration::ZERO)
        .offline(true)
        .build()
}

pub fn session(transport: &Arc<ScriptedTransport>) -> Session {
    session_with(transport, config())
}

pub fn session_with(transport: &Arc<ScriptedTransport>, config: RuntimeConfig) -> Session {
    Session::with_providers(config, transport.clone(), providers())
}
