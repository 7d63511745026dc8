//! Unit tests for mesh request construction and name generation.

use std::collections::BTreeSet;

use meshpool::{MeshName, MeshRequest, RequestError};
use rstest::rstest;

fn baseline() -> MeshRequest {
    MeshRequest::builder()
        .name_prefix("agents-")
        .image_name("agents/azp:latest")
        .image_registry_server("registry.example.com")
        .image_registry_username("robot")
        .image_registry_password("hunter2")
        .resource_group("build-agents")
        .location("eastus")
        .pipelines_url("https://dev.example.com/org")
        .pipelines_token("pat")
        .build()
        .expect("baseline request should be valid")
}

#[test]
fn validate_rejects_empty_builder() {
    let error = MeshRequest::builder()
        .build()
        .expect_err("validation should fail");
    assert_eq!(error, RequestError::Validation(String::from("name_prefix")));
}

#[rstest]
#[case("image_name", MeshRequest { image_name: String::new(), ..baseline() })]
#[case("image_registry_server", MeshRequest { image_registry_server: String::new(), ..baseline() })]
#[case("image_registry_password", MeshRequest { image_registry_password: String::new(), ..baseline() })]
#[case("resource_group", MeshRequest { resource_group: String::new(), ..baseline() })]
#[case("location", MeshRequest { location: String::new(), ..baseline() })]
#[case("pipelines_url", MeshRequest { pipelines_url: String::new(), ..baseline() })]
#[case("pipelines_token", MeshRequest { pipelines_token: String::new(), ..baseline() })]
fn validate_names_the_missing_field(#[case] field: &str, #[case] request: MeshRequest) {
    assert_eq!(
        request.validate(),
        Err(RequestError::Validation(field.to_owned()))
    );
}

#[test]
fn builder_trims_whitespace() {
    let request = MeshRequest::builder()
        .name_prefix("  agents- ")
        .image_name(" agents/azp:latest")
        .image_registry_server("registry.example.com ")
        .image_registry_username("robot")
        .image_registry_password("hunter2")
        .resource_group("build-agents")
        .location(" eastus ")
        .pipelines_url("https://dev.example.com/org")
        .pipelines_token("pat")
        .build()
        .expect("whitespace is trimmed");

    assert_eq!(request.name_prefix, "agents-");
    assert_eq!(request.location, "eastus");
    assert_eq!(request, baseline());
}

#[rstest]
#[case("agents_")]
#[case("agents/")]
#[case("agénts")]
fn name_prefix_rejects_unsupported_characters(#[case] prefix: &str) {
    let request = MeshRequest {
        name_prefix: prefix.to_owned(),
        ..baseline()
    };
    assert_eq!(
        request.validate(),
        Err(RequestError::InvalidNamePrefix(prefix.to_owned()))
    );
}

#[test]
fn debug_output_redacts_secrets() {
    let rendered = format!("{:?}", baseline());
    assert!(!rendered.contains("hunter2"), "password leaked: {rendered}");
    assert!(!rendered.contains("\"pat\""), "token leaked: {rendered}");
    assert!(rendered.contains("registry.example.com"));
}

#[test]
fn generated_names_are_unique_and_prefixed() {
    let names: BTreeSet<MeshName> = (0..64).map(|_| MeshName::generate("agents-")).collect();

    assert_eq!(names.len(), 64);
    for name in &names {
        let suffix = name
            .as_str()
            .strip_prefix("agents-")
            .expect("prefix is kept");
        assert_eq!(suffix.len(), 32);
        assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
