//! In-process simulated cloud.
//!
//! [`MemoryProvider`] keeps provisioned resources in memory, fabricates
//! provider ids and outputs, and can be scripted to fail or slow down
//! specific resources. It backs `--simulate` runs and the engine tests.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::error::ProviderError;
use crate::graph::ResourceId;
use crate::output::{PropertyMap, PropertySet};

use super::schema::{ResourceSchema, SchemaRegistry};
use super::traits::{
    CreateRequest, DeleteRequest, Provider, ProviderResponse, ProviderResult, UpdateRequest,
};

/// Computes extra outputs for a resource type from its identity and inputs.
pub type OutputFabricator = Arc<dyn Fn(&ResourceId, &PropertyMap) -> PropertySet + Send + Sync>;

/// Kinds of provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderOperation {
    /// A create call.
    Create,
    /// A read call.
    Read,
    /// An update call.
    Update,
    /// A delete call.
    Delete,
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderCall {
    /// Kind of call.
    pub operation: ProviderOperation,
    /// Logical identity.
    pub id: ResourceId,
    /// Provider id the call targeted, if any.
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredResource {
    id: ResourceId,
    inputs: PropertyMap,
    outputs: PropertySet,
}

#[derive(Debug)]
struct ScriptedFailure {
    error: ProviderError,
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct Cloud {
    resources: BTreeMap<String, StoredResource>,
    idempotency: HashMap<String, String>,
    failures: HashMap<(ResourceId, ProviderOperation), ScriptedFailure>,
    latencies: HashMap<ResourceId, Duration>,
    calls: Vec<ProviderCall>,
    counter: u64,
}

/// Simulated provider.
pub struct MemoryProvider {
    schemas: SchemaRegistry,
    fabricators: HashMap<String, OutputFabricator>,
    latency: Duration,
    cloud: Mutex<Cloud>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("types", &self.schemas.len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryProvider {
    /// Creates an empty simulated cloud supporting the given types.
    #[must_use]
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self {
            schemas,
            fabricators: HashMap::new(),
            latency: Duration::ZERO,
            cloud: Mutex::new(Cloud::default()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Sets the latency of every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Registers extra outputs for a resource type.
    #[must_use]
    pub fn with_outputs<F>(mut self, type_token: impl Into<String>, fabricate: F) -> Self
    where
        F: Fn(&ResourceId, &PropertyMap) -> PropertySet + Send + Sync + 'static,
    {
        self.fabricators.insert(type_token.into(), Arc::new(fabricate));
        self
    }

    fn cloud(&self) -> MutexGuard<'_, Cloud> {
        self.cloud.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call of one kind for a resource fail.
    pub fn fail(&self, id: &ResourceId, operation: ProviderOperation, error: ProviderError) {
        self.cloud().failures.insert(
            (id.clone(), operation),
            ScriptedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Makes the next `times` calls of one kind for a resource fail.
    pub fn fail_times(
        &self,
        id: &ResourceId,
        operation: ProviderOperation,
        error: ProviderError,
        times: u32,
    ) {
        self.cloud().failures.insert(
            (id.clone(), operation),
            ScriptedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Sets the latency of calls for one resource.
    pub fn set_latency(&self, id: &ResourceId, latency: Duration) {
        self.cloud().latencies.insert(id.clone(), latency);
    }

    /// Returns every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.cloud().calls.clone()
    }

    /// Returns the calls made for one resource.
    #[must_use]
    pub fn calls_for(&self, id: &ResourceId) -> Vec<ProviderCall> {
        self.cloud()
            .calls
            .iter()
            .filter(|c| &c.id == id)
            .cloned()
            .collect()
    }

    /// Returns the number of live resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.cloud().resources.len()
    }

    /// Returns true if an instance with this provider id exists.
    #[must_use]
    pub fn contains(&self, provider_id: &str) -> bool {
        self.cloud().resources.contains_key(provider_id)
    }

    /// Returns the inputs a live instance was last given.
    #[must_use]
    pub fn inputs_of(&self, provider_id: &str) -> Option<PropertyMap> {
        self.cloud()
            .resources
            .get(provider_id)
            .map(|r| r.inputs.clone())
    }

    /// Highest number of calls that were in flight at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Records the call, waits out its latency, and applies scripted failures.
    async fn begin(
        &self,
        operation: ProviderOperation,
        id: &ResourceId,
        provider_id: Option<&str>,
    ) -> ProviderResult<InFlight<'_>> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let latency = {
            let mut cloud = self.cloud();
            cloud.calls.push(ProviderCall {
                operation,
                id: id.clone(),
                provider_id: provider_id.map(String::from),
            });
            cloud.latencies.get(id).copied().unwrap_or(self.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut cloud = self.cloud();
        let key = (id.clone(), operation);
        if let Some(script) = cloud.failures.get_mut(&key) {
            let error = script.error.clone();
            match &mut script.remaining {
                None => return Err(error),
                Some(0) => {
                    cloud.failures.remove(&key);
                }
                Some(remaining) => {
                    *remaining -= 1;
                    if *remaining == 0 {
                        cloud.failures.remove(&key);
                    }
                    return Err(error);
                }
            }
        }
        Ok(guard)
    }

    fn fabricate(&self, id: &ResourceId, provider_id: &str, inputs: &PropertyMap) -> PropertySet {
        let mut outputs = PropertySet::from_values(inputs.clone());
        let name = inputs
            .get("name")
            .and_then(Value::as_str)
            .map_or_else(|| id.name().to_string(), String::from);
        outputs.insert("name", Value::String(name), false);
        outputs.insert("id", Value::String(provider_id.to_string()), false);

        if let Some(fabricate) = self.fabricators.get(id.type_token()) {
            let extra = fabricate(id, inputs);
            for (key, value) in extra.values {
                let secret = extra.secret.contains(&key);
                outputs.insert(key, value, secret);
            }
        }
        outputs
    }

    fn respond(provider_id: &str, outputs: &PropertySet) -> ProviderResponse {
        ProviderResponse {
            provider_id: provider_id.to_string(),
            outputs: outputs.values.clone(),
            secret_outputs: outputs.secret.clone(),
        }
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn schema(&self, type_token: &str) -> Option<ResourceSchema> {
        self.schemas.get(type_token).cloned()
    }

    async fn create(&self, request: CreateRequest) -> ProviderResult<ProviderResponse> {
        let _flight = self
            .begin(ProviderOperation::Create, &request.id, None)
            .await?;

        let mut cloud = self.cloud();
        if let Some(existing) = cloud.idempotency.get(&request.idempotency_key)
            && let Some(resource) = cloud.resources.get(existing)
        {
            debug!("Replayed create of {} ({existing})", request.id);
            return Ok(Self::respond(existing, &resource.outputs));
        }

        cloud.counter += 1;
        let kind = request
            .id
            .type_token()
            .rsplit(':')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let provider_id = format!("/stackweave/{kind}/{}-{}", request.id.name(), cloud.counter);
        let outputs = self.fabricate(&request.id, &provider_id, &request.inputs);

        cloud
            .idempotency
            .insert(request.idempotency_key.clone(), provider_id.clone());
        cloud.resources.insert(
            provider_id.clone(),
            StoredResource {
                id: request.id.clone(),
                inputs: request.inputs,
                outputs: outputs.clone(),
            },
        );
        debug!("Simulated create of {} as {provider_id}", request.id);
        Ok(Self::respond(&provider_id, &outputs))
    }

    async fn read(&self, id: ResourceId, provider_id: String) -> ProviderResult<ProviderResponse> {
        let _flight = self
            .begin(ProviderOperation::Read, &id, Some(&provider_id))
            .await?;

        let cloud = self.cloud();
        cloud
            .resources
            .get(&provider_id)
            .map(|r| Self::respond(&provider_id, &r.outputs))
            .ok_or(ProviderError::NotFound { provider_id })
    }

    async fn update(&self, request: UpdateRequest) -> ProviderResult<ProviderResponse> {
        let _flight = self
            .begin(ProviderOperation::Update, &request.id, Some(&request.provider_id))
            .await?;

        let outputs = self.fabricate(&request.id, &request.provider_id, &request.inputs);
        let mut cloud = self.cloud();
        let Some(resource) = cloud.resources.get_mut(&request.provider_id) else {
            return Err(ProviderError::NotFound {
                provider_id: request.provider_id,
            });
        };
        resource.inputs = request.inputs;
        resource.outputs = outputs.clone();
        debug!("Simulated update of {} ({})", resource.id, request.changed.join(", "));
        Ok(Self::respond(&request.provider_id, &outputs))
    }

    async fn delete(&self, request: DeleteRequest) -> ProviderResult<()> {
        let _flight = self
            .begin(ProviderOperation::Delete, &request.id, Some(&request.provider_id))
            .await?;

        let mut cloud = self.cloud();
        match cloud.resources.remove(&request.provider_id) {
            Some(_) => {
                debug!("Simulated delete of {} ({})", request.id, request.provider_id);
                Ok(())
            }
            None => Err(ProviderError::NotFound {
                provider_id: request.provider_id,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id() -> ResourceId {
        ResourceId::new("test:sql:Server", "db")
    }

    fn create(key: &str) -> CreateRequest {
        CreateRequest {
            id: id(),
            inputs: PropertyMap::from([(String::from("sku"), json!("B1"))]),
            idempotency_key: key.to_string(),
        }
    }

    fn provider() -> MemoryProvider {
        MemoryProvider::new(SchemaRegistry::new()).with_outputs("test:sql:Server", |id, _| {
            let mut extra = PropertySet::new();
            extra.insert("fqdn", json!(format!("{}.db.example", id.name())), false);
            extra.insert("key", json!("k3y"), true);
            extra
        })
    }

    #[tokio::test]
    async fn test_create_fabricates_outputs() {
        let cloud = provider();
        let response = cloud.create(create("k1")).await.expect("create");

        assert!(response.provider_id.starts_with("/stackweave/server/db-"));
        assert_eq!(response.outputs["name"], json!("db"));
        assert_eq!(response.outputs["fqdn"], json!("db.db.example"));
        assert_eq!(response.outputs["sku"], json!("B1"));
        assert!(response.secret_outputs.contains("key"));
        assert!(cloud.contains(&response.provider_id));
    }

    #[tokio::test]
    async fn test_replayed_idempotency_key_returns_same_instance() {
        let cloud = provider();
        let first = cloud.create(create("same")).await.expect("first");
        let second = cloud.create(create("same")).await.expect("second");
        assert_eq!(first.provider_id, second.provider_id);
        assert_eq!(cloud.resource_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_run_out() {
        let cloud = provider();
        cloud.fail_times(
            &id(),
            ProviderOperation::Create,
            ProviderError::transient("busy"),
            2,
        );

        assert!(cloud.create(create("a")).await.is_err());
        assert!(cloud.create(create("a")).await.is_err());
        assert!(cloud.create(create("a")).await.is_ok());
        assert_eq!(cloud.calls_for(&id()).len(), 3);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let cloud = provider();
        let err = cloud
            .delete(DeleteRequest {
                id: id(),
                provider_id: String::from("/nope"),
            })
            .await
            .expect_err("missing");
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }
}
