//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::azure::AzureSettings;
use crate::lifecycle::{DEFAULT_READY_MARKER, LifecycleOptions};
use crate::orchestrator::BatchFailurePolicy;
use crate::provider::MeshRequest;

/// Mesh provisioning configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MESHPOOL",
    discovery(
        app_name = "meshpool",
        env_var = "MESHPOOL_CONFIG_PATH",
        config_file_name = "meshpool.toml",
        dotfile_name = ".meshpool.toml",
        project_file_name = "meshpool.toml"
    )
)]
pub struct MeshConfig {
    /// Azure subscription owning the resource group.
    pub subscription_id: String,
    /// Bearer token for the Azure management API. This value is required.
    pub access_token: String,
    /// Resource group that receives every mesh application.
    pub resource_group: String,
    /// Region for new meshes. Defaults to `eastus`.
    #[ortho_config(default = "eastus".to_owned())]
    pub location: String,
    /// Prefix of generated mesh names.
    #[ortho_config(default = "mesh".to_owned())]
    pub name_prefix: String,
    /// Agent container image reference.
    pub image_name: String,
    /// Registry hosting the agent image.
    pub image_registry_server: String,
    /// Registry username.
    pub image_registry_username: String,
    /// Registry password.
    pub image_registry_password: String,
    /// Job-runner organisation URL handed to the agent.
    pub pipelines_url: String,
    /// Job-runner access token handed to the agent.
    pub pipelines_token: String,
    /// Replica whose container log is watched.
    #[ortho_config(default = 0)]
    pub replica_index: u32,
    /// Delay between two status queries, in milliseconds.
    #[ortho_config(default = 1000)]
    pub poll_interval_ms: u64,
    /// Log line marking the agent as ready.
    #[ortho_config(default = DEFAULT_READY_MARKER.to_owned())]
    pub ready_marker: String,
    /// Whether agent container log lines are echoed through tracing.
    #[ortho_config(default = true)]
    pub output_container_logs: bool,
    /// Whether every fused status change is logged.
    #[ortho_config(default = true)]
    pub output_component_status: bool,
    /// Number of meshes started by `meshpool batch`.
    #[ortho_config(default = 1)]
    pub mesh_count: usize,
    /// Maximum number of meshes provisioning at once.
    #[ortho_config(default = 1)]
    pub parallelism: usize,
    /// `abort` or `continue`; see [`BatchFailurePolicy`].
    #[ortho_config(default = "abort".to_owned())]
    pub batch_failure_policy: String,
}

impl fmt::Debug for MeshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshConfig")
            .field("subscription_id", &self.subscription_id)
            .field("access_token", &"<redacted>")
            .field("resource_group", &self.resource_group)
            .field("location", &self.location)
            .field("name_prefix", &self.name_prefix)
            .field("image_name", &self.image_name)
            .field("image_registry_server", &self.image_registry_server)
            .field("image_registry_username", &self.image_registry_username)
            .field("image_registry_password", &"<redacted>")
            .field("pipelines_url", &self.pipelines_url)
            .field("pipelines_token", &"<redacted>")
            .field("replica_index", &self.replica_index)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("ready_marker", &self.ready_marker)
            .field("output_container_logs", &self.output_container_logs)
            .field("output_component_status", &self.output_component_status)
            .field("mesh_count", &self.mesh_count)
            .field("parallelism", &self.parallelism)
            .field("batch_failure_policy", &self.batch_failure_policy)
            .finish()
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn guidance(&self) -> String {
        format!(
            "set {} or add {} to [meshpool] in meshpool.toml",
            self.env_var, self.toml_key
        )
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 11] = [
    FieldMetadata::new(
        "Azure subscription ID",
        "MESHPOOL_SUBSCRIPTION_ID",
        "subscription_id",
    ),
    FieldMetadata::new(
        "Azure management access token",
        "MESHPOOL_ACCESS_TOKEN",
        "access_token",
    ),
    FieldMetadata::new("resource group", "MESHPOOL_RESOURCE_GROUP", "resource_group"),
    FieldMetadata::new("mesh location", "MESHPOOL_LOCATION", "location"),
    FieldMetadata::new("mesh name prefix", "MESHPOOL_NAME_PREFIX", "name_prefix"),
    FieldMetadata::new("agent image", "MESHPOOL_IMAGE_NAME", "image_name"),
    FieldMetadata::new(
        "image registry server",
        "MESHPOOL_IMAGE_REGISTRY_SERVER",
        "image_registry_server",
    ),
    FieldMetadata::new(
        "image registry username",
        "MESHPOOL_IMAGE_REGISTRY_USERNAME",
        "image_registry_username",
    ),
    FieldMetadata::new(
        "image registry password",
        "MESHPOOL_IMAGE_REGISTRY_PASSWORD",
        "image_registry_password",
    ),
    FieldMetadata::new("pipelines URL", "MESHPOOL_PIPELINES_URL", "pipelines_url"),
    FieldMetadata::new(
        "pipelines token",
        "MESHPOOL_PIPELINES_TOKEN",
        "pipelines_token",
    ),
];

impl MeshConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("meshpool")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds the [`MeshRequest`] shared by every mesh.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_request(&self) -> Result<MeshRequest, ConfigError> {
        self.validate()?;
        MeshRequest::builder()
            .name_prefix(&self.name_prefix)
            .image_name(&self.image_name)
            .image_registry_server(&self.image_registry_server)
            .image_registry_username(&self.image_registry_username)
            .image_registry_password(&self.image_registry_password)
            .resource_group(&self.resource_group)
            .location(&self.location)
            .pipelines_url(&self.pipelines_url)
            .pipelines_token(&self.pipelines_token)
            .build()
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Account settings for the Azure provider.
    #[must_use]
    pub fn azure_settings(&self) -> AzureSettings {
        AzureSettings {
            subscription_id: self.subscription_id.trim().to_owned(),
            resource_group: self.resource_group.trim().to_owned(),
            access_token: self.access_token.trim().to_owned(),
        }
    }

    /// Per-lifecycle options.
    #[must_use]
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            replica_index: self.replica_index,
            ready_marker: self.ready_marker.clone(),
            output_container_logs: self.output_container_logs,
            output_component_status: self.output_component_status,
        }
    }

    /// Parses `batch_failure_policy`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for names other than `abort` and
    /// `continue`.
    pub fn failure_policy(&self) -> Result<BatchFailurePolicy, ConfigError> {
        self.batch_failure_policy.parse().map_err(|err| {
            ConfigError::Invalid(format!(
                "{err}: set MESHPOOL_BATCH_FAILURE_POLICY or add batch_failure_policy to [meshpool] in meshpool.toml"
            ))
        })
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide values via environment variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a numeric setting is out of range or
    /// the failure policy is unknown.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            &self.subscription_id,
            &self.access_token,
            &self.resource_group,
            &self.location,
            &self.name_prefix,
            &self.image_name,
            &self.image_registry_server,
            &self.image_registry_username,
            &self.image_registry_password,
            &self.pipelines_url,
            &self.pipelines_token,
        ];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "missing {}: {}",
                    metadata.description,
                    metadata.guidance()
                )));
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "poll interval must be positive: {}",
                FieldMetadata::new("poll interval", "MESHPOOL_POLL_INTERVAL_MS", "poll_interval_ms")
                    .guidance()
            )));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid(format!(
                "parallelism must be at least 1: {}",
                FieldMetadata::new("parallelism", "MESHPOOL_PARALLELISM", "parallelism").guidance()
            )));
        }
        self.failure_policy().map(drop)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
