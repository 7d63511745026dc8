//! Request and response payloads of the Service Fabric Mesh REST API.

use serde::{Deserialize, Serialize};

use crate::provider::MeshRequest;

/// Service hosting the build agent inside every mesh application.
pub const SERVICE_NAME: &str = "AzureAgentResource";
/// Code package running the agent container.
pub const CODE_PACKAGE_NAME: &str = "AzureAgentContainer";

/// Body of `PUT /applications/{name}`.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct ApplicationResource {
    pub location: String,
    pub properties: ApplicationProperties,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct ApplicationProperties {
    pub services: Vec<ServiceResource>,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct ServiceResource {
    pub name: String,
    pub properties: ServiceProperties,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServiceProperties {
    pub os_type: String,
    pub code_packages: Vec<CodePackage>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CodePackage {
    pub name: String,
    pub image: String,
    pub image_registry_credential: RegistryCredential,
    pub environment_variables: Vec<EnvironmentVariable>,
    pub resources: Resources,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct RegistryCredential {
    pub server: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct EnvironmentVariable {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct Resources {
    pub requests: ResourceRequests,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResourceRequests {
    #[serde(rename = "memoryInGB")]
    pub memory_in_gb: f64,
    pub cpu: f64,
}

impl ApplicationResource {
    /// Describes a single-service application running the agent image.
    pub(crate) fn for_request(request: &MeshRequest, agent_name: &str) -> Self {
        let environment_variables = vec![
            EnvironmentVariable {
                name: String::from("AZP_AGENT_NAME"),
                value: agent_name.to_owned(),
            },
            EnvironmentVariable {
                name: String::from("AZP_URL"),
                value: request.pipelines_url.clone(),
            },
            EnvironmentVariable {
                name: String::from("AZP_TOKEN"),
                value: request.pipelines_token.clone(),
            },
        ];
        let code_package = CodePackage {
            name: CODE_PACKAGE_NAME.to_owned(),
            image: request.image_name.clone(),
            image_registry_credential: RegistryCredential {
                server: request.image_registry_server.clone(),
                username: request.image_registry_username.clone(),
                password: request.image_registry_password.clone(),
            },
            environment_variables,
            resources: Resources {
                requests: ResourceRequests {
                    memory_in_gb: 1.0,
                    cpu: 1.0,
                },
            },
        };
        Self {
            location: request.location.clone(),
            properties: ApplicationProperties {
                services: vec![ServiceResource {
                    name: SERVICE_NAME.to_owned(),
                    properties: ServiceProperties {
                        os_type: String::from("linux"),
                        code_packages: vec![code_package],
                    },
                }],
            },
        }
    }
}

/// Response of the application and service GET endpoints.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct StatusResource {
    #[serde(default)]
    pub properties: StatusProperties,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct StatusProperties {
    #[serde(default)]
    pub status: Option<String>,
}

/// Response of the container logs endpoint.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ContainerLogs {
    #[serde(default)]
    pub content: String,
}

/// Error envelope returned by the management API.
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub error: ErrorDetail,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}
