//! HTTP provider gateway client.
//!
//! Speaks a small JSON protocol to a provisioning gateway that fronts the
//! actual cloud APIs. Response statuses are classified into
//! [`ProviderError`] kinds so the adapter can decide whether to retry.

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ProviderError, Result, StackweaveError};
use crate::graph::ResourceId;
use crate::output::PropertyMap;

use super::schema::{ResourceSchema, SchemaRegistry};
use super::traits::{
    CreateRequest, DeleteRequest, Provider, ProviderResponse, ProviderResult, UpdateRequest,
};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Header carrying the client-generated create token.
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Resource collection path on the gateway.
const RESOURCES_PATH: &str = "/v1/resources";

/// JSON-over-HTTP provider.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Gateway base URL without trailing slash.
    endpoint: String,
    /// Optional bearer token.
    token: Option<String>,
    /// Schemas of supported resource types.
    schemas: SchemaRegistry,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    #[serde(rename = "type")]
    type_token: &'a str,
    name: &'a str,
    inputs: &'a PropertyMap,
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    inputs: &'a PropertyMap,
    changed: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl HttpProvider {
    /// Creates a provider for a gateway endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, schemas: SchemaRegistry) -> Result<Self> {
        Self::with_timeout(endpoint, schemas, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a provider with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(endpoint: &str, schemas: SchemaRegistry, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StackweaveError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: None,
            schemas,
        })
    }

    /// Sets the bearer token sent with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self) -> String {
        format!("{}{RESOURCES_PATH}", self.endpoint)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ProviderResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("Gateway responded {status}");
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);

        Err(classify(status, retry_after, message))
    }

    async fn parse(response: Response) -> ProviderResult<ProviderResponse> {
        response
            .json::<ProviderResponse>()
            .await
            .map_err(|e| ProviderError::permanent(format!("Invalid gateway response: {e}")))
    }
}

/// Maps an unsuccessful HTTP status onto a provider error kind.
fn classify(status: StatusCode, retry_after: Option<Duration>, message: String) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Transient {
            message: format!("rate limited: {message}"),
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::authorization(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound {
            provider_id: message,
        },
        s if s.is_server_error() => ProviderError::Transient {
            message: format!("gateway error {}: {message}", s.as_u16()),
            retry_after,
        },
        s => ProviderError::permanent(format!("gateway rejected request ({}): {message}", s.as_u16())),
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn schema(&self, type_token: &str) -> Option<ResourceSchema> {
        self.schemas.get(type_token).cloned()
    }

    async fn create(&self, request: CreateRequest) -> ProviderResult<ProviderResponse> {
        debug!("POST {} for {}", RESOURCES_PATH, request.id);
        let body = CreateBody {
            type_token: request.id.type_token(),
            name: request.id.name(),
            inputs: &request.inputs,
        };
        let response = self
            .send(
                self.client
                    .post(self.url())
                    .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
                    .json(&body),
            )
            .await?;
        Self::parse(response).await
    }

    async fn read(&self, id: ResourceId, provider_id: String) -> ProviderResult<ProviderResponse> {
        debug!("GET {} for {id}", RESOURCES_PATH);
        let response = self
            .send(self.client.get(self.url()).query(&[("id", provider_id.as_str())]))
            .await
            .map_err(|e| match e {
                ProviderError::NotFound { .. } => ProviderError::NotFound {
                    provider_id: provider_id.clone(),
                },
                other => other,
            })?;
        Self::parse(response).await
    }

    async fn update(&self, request: UpdateRequest) -> ProviderResult<ProviderResponse> {
        debug!("PATCH {} for {}", RESOURCES_PATH, request.id);
        let body = UpdateBody {
            inputs: &request.inputs,
            changed: &request.changed,
        };
        let response = self
            .send(
                self.client
                    .patch(self.url())
                    .query(&[("id", request.provider_id.as_str())])
                    .json(&body),
            )
            .await?;
        Self::parse(response).await
    }

    async fn delete(&self, request: DeleteRequest) -> ProviderResult<()> {
        debug!("DELETE {} for {}", RESOURCES_PATH, request.id);
        self.send(
            self.client
                .delete(self.url())
                .query(&[("id", request.provider_id.as_str())]),
        )
        .await
        .map_err(|e| match e {
            ProviderError::NotFound { .. } => ProviderError::NotFound {
                provider_id: request.provider_id.clone(),
            },
            other => other,
        })?;
        Ok(())
    }
}
