//! Mesh request fixture shared by the behavioural suites.

use std::sync::Arc;

use meshpool::MeshRequest;

/// Builds a valid request whose generated names start with `prefix`.
pub fn mesh_request(prefix: &str) -> Arc<MeshRequest> {
    let request = MeshRequest::builder()
        .name_prefix(prefix)
        .image_name("agents/azp:latest")
        .image_registry_server("registry.example.com")
        .image_registry_username("robot")
        .image_registry_password("hunter2")
        .resource_group("build-agents")
        .location("eastus")
        .pipelines_url("https://dev.example.com/org")
        .pipelines_token("pat")
        .build()
        .unwrap_or_else(|err| panic!("mesh request fixture should be valid: {err}"));
    Arc::new(request)
}
