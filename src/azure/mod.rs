//! Service Fabric Mesh implementation of [`MeshProvider`].
//!
//! Talks to the Azure management REST API with a caller-supplied bearer
//! token. Error responses are classified into the provider error taxonomy
//! so pollers can tell transient conditions from fatal ones.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::provider::{MeshName, MeshProvider, MeshRequest, ProviderError, ProviderFuture};

mod types;

pub use types::{CODE_PACKAGE_NAME, SERVICE_NAME};
use types::{ApplicationResource, ContainerLogs, ErrorResponse, StatusResource};

/// Management endpoint of the public Azure cloud.
pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
/// API version of the Service Fabric Mesh resource provider.
pub const API_VERSION: &str = "2018-09-01-preview";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Account settings for [`AzureMeshProvider`].
#[derive(Clone, Eq, PartialEq)]
pub struct AzureSettings {
    /// Subscription that owns the resource group.
    pub subscription_id: String,
    /// Resource group holding every mesh application.
    pub resource_group: String,
    /// Bearer token for the management API.
    pub access_token: String,
}

impl std::fmt::Debug for AzureSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureSettings")
            .field("subscription_id", &self.subscription_id)
            .field("resource_group", &self.resource_group)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Which endpoint a response came from; logs classify `400` differently.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Endpoint {
    Application,
    Service,
    Logs,
}

/// Provider backed by the Service Fabric Mesh management API.
#[derive(Clone, Debug)]
pub struct AzureMeshProvider {
    client: Client,
    settings: AzureSettings,
    endpoint: String,
}

impl AzureMeshProvider {
    /// Creates a provider talking to [`DEFAULT_ENDPOINT`].
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Other`] when the HTTP client cannot be built.
    pub fn new(settings: AzureSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| ProviderError::other(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            client,
            settings,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
        })
    }

    /// Points the provider at another management endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_owned();
        self
    }

    fn application_url(&self, name: &MeshName) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ServiceFabricMesh/applications/{}",
            self.endpoint, self.settings.subscription_id, self.settings.resource_group, name
        )
    }

    fn service_url(&self, name: &MeshName) -> String {
        format!("{}/services/{SERVICE_NAME}", self.application_url(name))
    }

    fn logs_url(&self, name: &MeshName, replica: u32) -> String {
        format!(
            "{}/replicas/{replica}/codePackages/{CODE_PACKAGE_NAME}/logs",
            self.service_url(name)
        )
    }

    fn authorised(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.settings.access_token)
            .query(&[("api-version", API_VERSION)])
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        resource: &str,
        endpoint: Endpoint,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .authorised(builder)
            .send()
            .await
            .map_err(|err| ProviderError::other(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, &body, resource, endpoint))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
        endpoint: Endpoint,
    ) -> Result<T, ProviderError> {
        trace!(url, "GET");
        let response = self.send(self.client.get(url), resource, endpoint).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ProviderError::other(format!("invalid {resource} payload: {err}")))
    }

    async fn status(
        &self,
        url: &str,
        resource: &str,
        endpoint: Endpoint,
    ) -> Result<String, ProviderError> {
        let payload: StatusResource = self.get_json(url, resource, endpoint).await?;
        payload
            .properties
            .status
            .ok_or_else(|| ProviderError::other(format!("{resource} response carries no status")))
    }
}

impl MeshProvider for AzureMeshProvider {
    fn create<'a>(
        &'a self,
        name: &'a MeshName,
        request: &'a MeshRequest,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let agent_name = format!("agent-{}", Uuid::new_v4().simple());
            let body = ApplicationResource::for_request(request, &agent_name);
            debug!(mesh = %name, agent = %agent_name, location = %request.location, "submitting mesh application");
            let builder = self.client.put(self.application_url(name)).json(&body);
            self.send(builder, name.as_str(), Endpoint::Application)
                .await
                .map(drop)
        })
    }

    fn delete<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let builder = self.client.delete(self.application_url(name));
            match self.send(builder, name.as_str(), Endpoint::Application).await {
                Ok(_) => Ok(()),
                Err(ProviderError::NotFound { .. }) => {
                    debug!(mesh = %name, "mesh already gone");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }

    fn application_status<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let url = self.application_url(name);
            self.status(&url, name.as_str(), Endpoint::Application).await
        })
    }

    fn service_status<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let url = self.service_url(name);
            self.status(&url, SERVICE_NAME, Endpoint::Service).await
        })
    }

    fn container_log<'a>(&'a self, name: &'a MeshName, replica: u32) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let url = self.logs_url(name, replica);
            let logs: ContainerLogs = self.get_json(&url, CODE_PACKAGE_NAME, Endpoint::Logs).await?;
            Ok(logs.content)
        })
    }
}

/// Maps an unsuccessful response onto the provider error taxonomy.
fn classify(status: StatusCode, body: &str, resource: &str, endpoint: Endpoint) -> ProviderError {
    let missing = status == StatusCode::NOT_FOUND
        || (endpoint == Endpoint::Logs && status == StatusCode::BAD_REQUEST);
    if missing {
        return ProviderError::NotFound {
            resource: resource.to_owned(),
        };
    }

    let detail = serde_json::from_str::<ErrorResponse>(body)
        .unwrap_or_default()
        .error;
    if matches!(detail.code.as_str(), "NotReady" | "ResourceNotReady") {
        return ProviderError::NotReady {
            resource: resource.to_owned(),
        };
    }

    let message = if detail.message.is_empty() {
        body.trim().to_owned()
    } else {
        format!("{}: {}", detail.code, detail.message)
    };
    ProviderError::other(format!("{resource} request failed with {status}: {message}"))
}
