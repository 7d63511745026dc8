//! Provider abstraction for provisioning disposable mesh applications.
//!
//! A provider knows how to create and delete a mesh and how to query the
//! three facets the lifecycle watches: the application status, the service
//! status, and the agent container's accumulated log output.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use uuid::Uuid;

/// Parameters required to create a new mesh.
#[derive(Clone, Eq, PartialEq)]
pub struct MeshRequest {
    /// Prefix used when generating mesh names.
    pub name_prefix: String,
    /// Container image reference for the agent (for example `agent:latest`).
    pub image_name: String,
    /// Registry server hosting the image.
    pub image_registry_server: String,
    /// Username for the image registry.
    pub image_registry_username: String,
    /// Password for the image registry.
    pub image_registry_password: String,
    /// Resource group that owns the created meshes.
    pub resource_group: String,
    /// Region used for new meshes.
    pub location: String,
    /// Job-runner endpoint injected into the agent container.
    pub pipelines_url: String,
    /// Job-runner token injected into the agent container.
    pub pipelines_token: String,
}

impl fmt::Debug for MeshRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshRequest")
            .field("name_prefix", &self.name_prefix)
            .field("image_name", &self.image_name)
            .field("image_registry_server", &self.image_registry_server)
            .field("image_registry_username", &self.image_registry_username)
            .field("image_registry_password", &"<redacted>")
            .field("resource_group", &self.resource_group)
            .field("location", &self.location)
            .field("pipelines_url", &self.pipelines_url)
            .field("pipelines_token", &"<redacted>")
            .finish()
    }
}

impl MeshRequest {
    /// Starts a builder for a [`MeshRequest`].
    #[must_use]
    pub fn builder() -> MeshRequestBuilder {
        MeshRequestBuilder::new()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when any field is empty.
    pub fn validate(&self) -> Result<(), RequestError> {
        let fields = [
            ("name_prefix", &self.name_prefix),
            ("image_name", &self.image_name),
            ("image_registry_server", &self.image_registry_server),
            ("image_registry_username", &self.image_registry_username),
            ("image_registry_password", &self.image_registry_password),
            ("resource_group", &self.resource_group),
            ("location", &self.location),
            ("pipelines_url", &self.pipelines_url),
            ("pipelines_token", &self.pipelines_token),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                return Err(RequestError::Validation(field.to_owned()));
            }
        }
        if !self
            .name_prefix
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        {
            return Err(RequestError::InvalidNamePrefix(self.name_prefix.clone()));
        }
        Ok(())
    }
}

/// Builder for [`MeshRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MeshRequestBuilder {
    name_prefix: String,
    image_name: String,
    image_registry_server: String,
    image_registry_username: String,
    image_registry_password: String,
    resource_group: String,
    location: String,
    pipelines_url: String,
    pipelines_token: String,
}

impl MeshRequestBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mesh name prefix.
    #[must_use]
    pub fn name_prefix(mut self, value: impl Into<String>) -> Self {
        self.name_prefix = value.into();
        self
    }

    /// Sets the container image reference.
    #[must_use]
    pub fn image_name(mut self, value: impl Into<String>) -> Self {
        self.image_name = value.into();
        self
    }

    /// Sets the image registry server.
    #[must_use]
    pub fn image_registry_server(mut self, value: impl Into<String>) -> Self {
        self.image_registry_server = value.into();
        self
    }

    /// Sets the image registry username.
    #[must_use]
    pub fn image_registry_username(mut self, value: impl Into<String>) -> Self {
        self.image_registry_username = value.into();
        self
    }

    /// Sets the image registry password.
    #[must_use]
    pub fn image_registry_password(mut self, value: impl Into<String>) -> Self {
        self.image_registry_password = value.into();
        self
    }

    /// Sets the resource group.
    #[must_use]
    pub fn resource_group(mut self, value: impl Into<String>) -> Self {
        self.resource_group = value.into();
        self
    }

    /// Sets the region.
    #[must_use]
    pub fn location(mut self, value: impl Into<String>) -> Self {
        self.location = value.into();
        self
    }

    /// Sets the job-runner endpoint.
    #[must_use]
    pub fn pipelines_url(mut self, value: impl Into<String>) -> Self {
        self.pipelines_url = value.into();
        self
    }

    /// Sets the job-runner token.
    #[must_use]
    pub fn pipelines_token(mut self, value: impl Into<String>) -> Self {
        self.pipelines_token = value.into();
        self
    }

    /// Builds and validates the [`MeshRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when any required field is empty or the name
    /// prefix contains characters the provider rejects.
    pub fn build(self) -> Result<MeshRequest, RequestError> {
        let request = MeshRequest {
            name_prefix: self.name_prefix.trim().to_owned(),
            image_name: self.image_name.trim().to_owned(),
            image_registry_server: self.image_registry_server.trim().to_owned(),
            image_registry_username: self.image_registry_username.trim().to_owned(),
            image_registry_password: self.image_registry_password.trim().to_owned(),
            resource_group: self.resource_group.trim().to_owned(),
            location: self.location.trim().to_owned(),
            pipelines_url: self.pipelines_url.trim().to_owned(),
            pipelines_token: self.pipelines_token.trim().to_owned(),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Unique name of one mesh instance.
///
/// Names are never reused: every call to [`MeshName::generate`] appends a
/// fresh random suffix to the prefix.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MeshName(String);

impl MeshName {
    /// Generates a new name from `prefix` and a random UUID suffix.
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}{}", Uuid::new_v4().simple()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for MeshName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for MeshName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for MeshName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while building a [`MeshRequest`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the name prefix contains characters other than ASCII
    /// alphanumerics and `-`.
    #[error("mesh name prefix '{0}' may only contain ASCII letters, digits and '-'")]
    InvalidNamePrefix(String),
}

/// Errors returned by provider calls.
///
/// `NotFound` and `NotReady` are expected while a mesh is provisioning or
/// being deleted; pollers absorb them. `Other` is fatal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// The requested resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Resource that was looked up.
        resource: String,
    },
    /// The resource exists but the requested facet is not available yet.
    #[error("{resource} not ready")]
    NotReady {
        /// Resource that was looked up.
        resource: String,
    },
    /// Any other provider failure.
    #[error("provider error: {message}")]
    Other {
        /// Message returned by the provider.
        message: String,
    },
}

impl ProviderError {
    /// Convenience constructor for [`ProviderError::Other`].
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Minimal interface implemented by mesh providers.
pub trait MeshProvider: Send + Sync + 'static {
    /// Creates the mesh and returns once the provider accepted the request.
    fn create<'a>(&'a self, name: &'a MeshName, request: &'a MeshRequest)
    -> ProviderFuture<'a, ()>;

    /// Requests deletion of the mesh.
    fn delete<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, ()>;

    /// Returns the raw application status string.
    fn application_status<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, String>;

    /// Returns the raw status string of the agent service.
    fn service_status<'a>(&'a self, name: &'a MeshName) -> ProviderFuture<'a, String>;

    /// Returns the full log content accumulated by the agent container of
    /// the given replica.
    fn container_log<'a>(&'a self, name: &'a MeshName, replica: u32) -> ProviderFuture<'a, String>;
}
