//! The provider boundary.
//!
//! A [`Provider`] performs opaque "apply resource X with these inputs, get
//! these outputs" calls against a cloud API. Everything it returns is either
//! a [`ProviderResponse`] or a classified [`ProviderError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ProviderError;
use crate::graph::ResourceId;
use crate::output::PropertyMap;

use super::schema::{ResourceSchema, SchemaSource};

/// Result of a single provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A request to create a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Logical identity.
    pub id: ResourceId,
    /// Resolved inputs.
    pub inputs: PropertyMap,
    /// Client-generated token, identical across retries of one create.
    pub idempotency_key: String,
}

/// A request to update a resource in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Logical identity.
    pub id: ResourceId,
    /// Provider-assigned id of the existing instance.
    pub provider_id: String,
    /// Full set of resolved inputs.
    pub inputs: PropertyMap,
    /// Names of the inputs that changed.
    pub changed: Vec<String>,
}

/// A request to delete a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Logical identity.
    pub id: ResourceId,
    /// Provider-assigned id of the instance to remove.
    pub provider_id: String,
}

/// What a provider reports about a resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Provider-assigned id.
    pub provider_id: String,
    /// Output properties.
    #[serde(default)]
    pub outputs: PropertyMap,
    /// Output names the provider marks as sensitive.
    #[serde(default)]
    pub secret_outputs: BTreeSet<String>,
}

/// A cloud resource API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the schema of a resource type, or `None` if unsupported.
    fn schema(&self, type_token: &str) -> Option<ResourceSchema>;

    /// Creates a resource.
    async fn create(&self, request: CreateRequest) -> ProviderResult<ProviderResponse>;

    /// Reads the current outputs of an existing resource.
    async fn read(&self, id: ResourceId, provider_id: String) -> ProviderResult<ProviderResponse>;

    /// Updates a resource in place.
    async fn update(&self, request: UpdateRequest) -> ProviderResult<ProviderResponse>;

    /// Deletes a resource.
    async fn delete(&self, request: DeleteRequest) -> ProviderResult<()>;
}

impl SchemaSource for dyn Provider {
    fn schema(&self, type_token: &str) -> Option<ResourceSchema> {
        Provider::schema(self, type_token)
    }
}
