//! Resource operation adapter.
//!
//! The adapter turns a reconciler [`Decision`] into provider calls: it retries
//! transient failures with exponential backoff, reuses one idempotency key
//! across retries of a create, orders the two halves of a replacement, and
//! normalizes responses into output property sets. Each resource is executed
//! at most once per adapter; repeated calls return the cached result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ExecutionFailure, ProviderError};
use crate::graph::{ResourceId, ResourceOptions};
use crate::output::PropertySet;
use crate::reconciler::{Decision, InputHasher, OperationKind};
use crate::state::ResourceState;

use super::schema::ResourceSchema;
use super::traits::{
    CreateRequest, DeleteRequest, Provider, ProviderResponse, ProviderResult, UpdateRequest,
};

/// Default number of attempts per provider call.
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry in milliseconds.
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default cap on the delay between retries in milliseconds.
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Backoff policy for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// or the provider's hint when given, capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let backoff = hint.unwrap_or_else(|| {
            let factor = 2u32.saturating_pow(retry.saturating_sub(1));
            self.base_delay.saturating_mul(factor)
        });
        backoff.min(self.max_delay)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// A resource instance superseded by a create-before-delete replacement,
/// deleted in the cleanup phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredResource {
    /// Logical identity shared with the replacement.
    pub id: ResourceId,
    /// Provider id of the old instance.
    pub provider_id: String,
    /// Whether the old instance is protected.
    pub protect: bool,
}

/// The result of executing one resource operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    /// The operation actually performed.
    pub operation: OperationKind,
    /// Provider id of the live instance.
    pub provider_id: String,
    /// Output properties with their sensitivity.
    pub outputs: PropertySet,
    /// Provider calls made, including retries.
    pub attempts: u32,
    /// Old instance left for the cleanup phase.
    pub retired: Option<RetiredResource>,
}

/// Executes reconciler decisions against a provider.
pub struct ResourceAdapter {
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    refresh: bool,
    completed: Mutex<HashMap<ResourceId, OperationResult>>,
}

impl std::fmt::Debug for ResourceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAdapter")
            .field("retry", &self.retry)
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}

impl ResourceAdapter {
    /// Creates an adapter with the default retry policy.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            refresh: false,
            completed: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Re-reads unchanged resources from the provider instead of trusting
    /// recorded outputs; a resource found missing is recreated.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Returns the provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Returns the schema for a type.
    #[must_use]
    pub fn schema(&self, type_token: &str) -> Option<ResourceSchema> {
        self.provider.schema(type_token)
    }

    /// Executes the operation a decision calls for.
    ///
    /// Calling this again for a resource that already resolved returns the
    /// cached result without touching the provider.
    ///
    /// # Errors
    ///
    /// Returns the node's [`ExecutionFailure`]: permanent and authorization
    /// failures immediately, transient ones once retries are exhausted.
    pub async fn execute(
        &self,
        decision: &Decision,
        inputs: &PropertySet,
        prior: Option<&ResourceState>,
        options: ResourceOptions,
    ) -> Result<OperationResult, ExecutionFailure> {
        let id = &decision.id;
        if let Some(cached) = self.completed.lock().await.get(id) {
            debug!("{id} already resolved in this run, reusing outputs");
            return Ok(cached.clone());
        }

        let schema = self.schema(id.type_token());
        let result = match (decision.operation, prior) {
            (OperationKind::Delete, None) => OperationResult {
                operation: OperationKind::Delete,
                provider_id: String::new(),
                outputs: PropertySet::new(),
                attempts: 0,
                retired: None,
            },
            (OperationKind::Create, _) | (_, None) => self.create(id, inputs, schema.as_ref()).await?,
            (OperationKind::NoOp, Some(prior)) => {
                self.unchanged(id, inputs, prior, schema.as_ref()).await?
            }
            (OperationKind::UpdateInPlace, Some(prior)) => {
                self.update(id, decision, inputs, prior, schema.as_ref())
                    .await?
            }
            (OperationKind::Replace, Some(prior)) => {
                self.replace(id, inputs, prior, schema.as_ref(), options)
                    .await?
            }
            (OperationKind::Delete, Some(prior)) => {
                let attempts = self
                    .delete(id, &prior.provider_id, options.protect || prior.protect)
                    .await?;
                OperationResult {
                    operation: OperationKind::Delete,
                    provider_id: prior.provider_id.clone(),
                    outputs: PropertySet::new(),
                    attempts,
                    retired: None,
                }
            }
        };

        self.completed
            .lock()
            .await
            .insert(id.clone(), result.clone());
        Ok(result)
    }

    /// Deletes a resource instance. A resource that is already gone counts
    /// as deleted.
    ///
    /// # Errors
    ///
    /// Refuses protected resources with a configuration failure; otherwise
    /// fails like any provider call.
    pub async fn delete(
        &self,
        id: &ResourceId,
        provider_id: &str,
        protect: bool,
    ) -> Result<u32, ExecutionFailure> {
        if protect {
            return Err(ExecutionFailure::Configuration {
                message: format!("{id} is protected and cannot be deleted"),
            });
        }

        let request = DeleteRequest {
            id: id.clone(),
            provider_id: provider_id.to_string(),
        };
        let outcome = self
            .with_retries(id, "delete", || self.provider.delete(request.clone()))
            .await;

        match outcome {
            Ok(((), attempts)) => {
                info!("Deleted {id} ({provider_id})");
                Ok(attempts)
            }
            Err((ExecutionFailure::Provider(ProviderError::NotFound { .. }), attempts)) => {
                debug!("{id} ({provider_id}) was already gone");
                Ok(attempts)
            }
            Err((failure, _)) => Err(failure),
        }
    }

    async fn create(
        &self,
        id: &ResourceId,
        inputs: &PropertySet,
        schema: Option<&ResourceSchema>,
    ) -> Result<OperationResult, ExecutionFailure> {
        let request = CreateRequest {
            id: id.clone(),
            inputs: inputs.values.clone(),
            idempotency_key: Uuid::new_v4().to_string(),
        };
        let (response, attempts) = self
            .with_retries(id, "create", || self.provider.create(request.clone()))
            .await
            .map_err(|(failure, _)| failure)?;

        info!("Created {id} ({})", response.provider_id);
        Ok(Self::finish(OperationKind::Create, response, inputs, schema, attempts))
    }

    async fn update(
        &self,
        id: &ResourceId,
        decision: &Decision,
        inputs: &PropertySet,
        prior: &ResourceState,
        schema: Option<&ResourceSchema>,
    ) -> Result<OperationResult, ExecutionFailure> {
        let request = UpdateRequest {
            id: id.clone(),
            provider_id: prior.provider_id.clone(),
            inputs: inputs.values.clone(),
            changed: decision.changed(),
        };
        let (response, attempts) = self
            .with_retries(id, "update", || self.provider.update(request.clone()))
            .await
            .map_err(|(failure, _)| failure)?;

        info!("Updated {id} in place ({})", request.changed.join(", "));
        Ok(Self::finish(OperationKind::UpdateInPlace, response, inputs, schema, attempts))
    }

    async fn replace(
        &self,
        id: &ResourceId,
        inputs: &PropertySet,
        prior: &ResourceState,
        schema: Option<&ResourceSchema>,
        options: ResourceOptions,
    ) -> Result<OperationResult, ExecutionFailure> {
        let protect = options.protect || prior.protect;
        let coexist = schema.is_some_and(|s| s.allows_coexistence) && !options.delete_before_replace;

        if coexist {
            let mut result = self.create(id, inputs, schema).await?;
            debug!("{id}: retiring {} for cleanup", prior.provider_id);
            result.operation = OperationKind::Replace;
            result.retired = Some(RetiredResource {
                id: id.clone(),
                provider_id: prior.provider_id.clone(),
                protect,
            });
            return Ok(result);
        }

        let deleted = self.delete(id, &prior.provider_id, protect).await?;
        match self.create(id, inputs, schema).await {
            Ok(mut result) => {
                result.operation = OperationKind::Replace;
                result.attempts += deleted;
                Ok(result)
            }
            Err(failure) => {
                warn!("{id}: replacement failed after deleting the previous instance");
                Err(ExecutionFailure::ReplaceIncomplete {
                    cause: failure.to_string(),
                })
            }
        }
    }

    async fn unchanged(
        &self,
        id: &ResourceId,
        inputs: &PropertySet,
        prior: &ResourceState,
        schema: Option<&ResourceSchema>,
    ) -> Result<OperationResult, ExecutionFailure> {
        if !self.refresh {
            return Ok(OperationResult {
                operation: OperationKind::NoOp,
                provider_id: prior.provider_id.clone(),
                outputs: InputHasher::new().restore_echoed(prior.output_set(), inputs),
                attempts: 0,
                retired: None,
            });
        }

        let read = self
            .with_retries(id, "read", || {
                self.provider.read(id.clone(), prior.provider_id.clone())
            })
            .await;

        match read {
            Ok((response, attempts)) => Ok(Self::finish(
                OperationKind::NoOp,
                response,
                inputs,
                schema,
                attempts,
            )),
            Err((ExecutionFailure::Provider(ProviderError::NotFound { .. }), _)) => {
                warn!("{id} disappeared outside of stackweave, recreating");
                self.create(id, inputs, schema).await
            }
            Err((failure, _)) => Err(failure),
        }
    }

    /// Builds the output set: provider-marked secrets, schema-declared secret
    /// outputs, and outputs echoing a secret input are all sensitive.
    fn finish(
        operation: OperationKind,
        response: ProviderResponse,
        inputs: &PropertySet,
        schema: Option<&ResourceSchema>,
        attempts: u32,
    ) -> OperationResult {
        let mut outputs = PropertySet::new();
        for (name, value) in response.outputs {
            let secret = response.secret_outputs.contains(&name)
                || schema.is_some_and(|s| s.secret_outputs.contains(&name))
                || inputs.is_secret(&name);
            outputs.insert(name, value, secret);
        }
        if outputs.get("id").is_none() {
            outputs.insert("id", response.provider_id.clone().into(), false);
        }

        OperationResult {
            operation,
            provider_id: response.provider_id,
            outputs,
            attempts,
            retired: None,
        }
    }

    /// Runs a provider call, retrying transient failures. Both outcomes carry
    /// the number of attempts made.
    async fn with_retries<T, F, Fut>(
        &self,
        id: &ResourceId,
        action: &str,
        mut call: F,
    ) -> Result<(T, u32), (ExecutionFailure, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("{action} {id}: attempt {attempt}/{max_attempts}");

            match call().await {
                Ok(value) => return Ok((value, attempt)),
                Err(err) if err.is_retryable() => {
                    if attempt >= max_attempts {
                        warn!("{action} {id}: giving up after {attempt} attempts: {err}");
                        return Err((
                            ExecutionFailure::RetriesExhausted {
                                attempts: attempt,
                                last: err,
                            },
                            attempt,
                        ));
                    }
                    let delay = self.retry.delay(attempt, err.retry_after());
                    warn!("{action} {id}: {err}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err((ExecutionFailure::Provider(err), attempt)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::traits::MockProvider;
    use chrono::Utc;
    use mockall::predicate::eq;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Mutex as StdMutex;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn id() -> ResourceId {
        ResourceId::new("test:db", "db")
    }

    fn decision(operation: OperationKind, changed: &[&str]) -> Decision {
        Decision {
            id: id(),
            operation,
            diffs: changed
                .iter()
                .map(|p| crate::reconciler::PropertyDiff {
                    property: (*p).to_string(),
                    old: None,
                    new: None,
                    secret: false,
                    updatable: true,
                })
                .collect(),
            input_hash: String::from("h"),
            reason: String::new(),
        }
    }

    fn inputs() -> PropertySet {
        let mut set = PropertySet::new();
        set.insert("sku", json!("B1"), false);
        set.insert("password", json!("pw"), true);
        set
    }

    fn prior() -> ResourceState {
        let now = Utc::now();
        ResourceState {
            id: id(),
            provider_id: String::from("/old"),
            inputs: Default::default(),
            secret_inputs: BTreeSet::new(),
            input_hash: String::from("old"),
            outputs: [(String::from("fqdn"), json!("old.example"))].into(),
            secret_outputs: BTreeSet::new(),
            dependencies: vec![],
            protect: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn response(provider_id: &str) -> ProviderResponse {
        ProviderResponse {
            provider_id: provider_id.to_string(),
            outputs: [
                (String::from("fqdn"), json!("db.example")),
                (String::from("password"), json!("pw")),
                (String::from("key"), json!("k")),
            ]
            .into(),
            secret_outputs: BTreeSet::from([String::from("key")]),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay(3, None), Duration::from_millis(350));
        assert_eq!(
            policy.delay(1, Some(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn test_create_marks_secret_outputs() {
        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider
            .expect_create()
            .times(1)
            .returning(|_| Ok(response("/new")));

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let result = adapter
            .execute(&decision(OperationKind::Create, &[]), &inputs(), None, ResourceOptions::default())
            .await
            .expect("create");

        assert_eq!(result.provider_id, "/new");
        assert!(result.outputs.is_secret("key"));
        assert!(result.outputs.is_secret("password"));
        assert!(!result.outputs.is_secret("fqdn"));
        assert_eq!(result.outputs.get("id"), Some(&json!("/new")));
    }

    #[tokio::test]
    async fn test_second_execute_is_a_cached_noop() {
        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider
            .expect_create()
            .times(1)
            .returning(|_| Ok(response("/new")));

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let d = decision(OperationKind::Create, &[]);
        let first = adapter
            .execute(&d, &inputs(), None, ResourceOptions::default())
            .await
            .expect("first");
        let second = adapter
            .execute(&d, &inputs(), None, ResourceOptions::default())
            .await
            .expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_with_same_idempotency_key() {
        let keys = Arc::new(StdMutex::new(Vec::new()));
        let seen = Arc::clone(&keys);

        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider.expect_create().times(3).returning(move |request| {
            let mut keys = seen.lock().expect("lock");
            keys.push(request.idempotency_key);
            if keys.len() < 3 {
                Err(ProviderError::transient("throttled"))
            } else {
                Ok(response("/new"))
            }
        });

        let adapter = ResourceAdapter::new(Arc::new(provider)).with_retry(fast_retry(4));
        let result = adapter
            .execute(&decision(OperationKind::Create, &[]), &inputs(), None, ResourceOptions::default())
            .await
            .expect("eventually succeeds");

        assert_eq!(result.attempts, 3);
        let keys = keys.lock().expect("lock");
        assert!(keys.iter().all(|k| k == &keys[0]));
    }

    #[tokio::test]
    async fn test_transient_failures_escalate_after_max_attempts() {
        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider
            .expect_create()
            .times(2)
            .returning(|_| Err(ProviderError::transient("busy")));

        let adapter = ResourceAdapter::new(Arc::new(provider)).with_retry(fast_retry(2));
        let err = adapter
            .execute(&decision(OperationKind::Create, &[]), &inputs(), None, ResourceOptions::default())
            .await
            .expect_err("exhausted");
        assert!(matches!(err, ExecutionFailure::RetriesExhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider
            .expect_create()
            .times(1)
            .returning(|_| Err(ProviderError::permanent("sku unavailable")));

        let adapter = ResourceAdapter::new(Arc::new(provider)).with_retry(fast_retry(4));
        let err = adapter
            .execute(&decision(OperationKind::Create, &[]), &inputs(), None, ResourceOptions::default())
            .await
            .expect_err("permanent");
        assert_eq!(
            err,
            ExecutionFailure::Provider(ProviderError::permanent("sku unavailable"))
        );
    }

    #[tokio::test]
    async fn test_noop_returns_prior_outputs_without_provider_calls() {
        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider.expect_create().never();
        provider.expect_read().never();

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let result = adapter
            .execute(&decision(OperationKind::NoOp, &[]), &inputs(), Some(&prior()), ResourceOptions::default())
            .await
            .expect("noop");
        assert_eq!(result.outputs.get("fqdn"), Some(&json!("old.example")));
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_noop_restores_echoed_secret_from_current_inputs() {
        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider.expect_read().never();

        let mut recorded = prior();
        recorded
            .outputs
            .insert(String::from("password"), json!(InputHasher::new().digest(&json!("pw"))));
        recorded.secret_outputs.insert(String::from("password"));

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let result = adapter
            .execute(&decision(OperationKind::NoOp, &[]), &inputs(), Some(&recorded), ResourceOptions::default())
            .await
            .expect("noop");
        assert_eq!(result.outputs.get("password"), Some(&json!("pw")));
        assert!(result.outputs.is_secret("password"));
    }

    #[tokio::test]
    async fn test_update_sends_changed_properties() {
        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider
            .expect_update()
            .withf(|r| r.provider_id == "/old" && r.changed == vec![String::from("tags")])
            .times(1)
            .returning(|_| Ok(response("/old")));

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let result = adapter
            .execute(
                &decision(OperationKind::UpdateInPlace, &["tags"]),
                &inputs(),
                Some(&prior()),
                ResourceOptions::default(),
            )
            .await
            .expect("update");
        assert_eq!(result.operation, OperationKind::UpdateInPlace);
    }

    #[tokio::test]
    async fn test_replace_creates_before_delete_when_coexistence_allowed() {
        let mut provider = MockProvider::new();
        provider
            .expect_schema()
            .return_const(Some(ResourceSchema::new("test:db").allows_coexistence(true)));
        provider
            .expect_create()
            .times(1)
            .returning(|_| Ok(response("/new")));
        provider.expect_delete().never();

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let result = adapter
            .execute(&decision(OperationKind::Replace, &["sku"]), &inputs(), Some(&prior()), ResourceOptions::default())
            .await
            .expect("replace");

        assert_eq!(result.provider_id, "/new");
        assert_eq!(
            result.retired,
            Some(RetiredResource {
                id: id(),
                provider_id: String::from("/old"),
                protect: false,
            })
        );
    }

    #[tokio::test]
    async fn test_delete_before_replace_reports_incomplete_replacement() {
        let mut provider = MockProvider::new();
        provider
            .expect_schema()
            .return_const(Some(ResourceSchema::new("test:db").allows_coexistence(true)));
        provider
            .expect_delete()
            .with(eq(DeleteRequest {
                id: id(),
                provider_id: String::from("/old"),
            }))
            .times(1)
            .returning(|_| Ok(()));
        provider
            .expect_create()
            .times(1)
            .returning(|_| Err(ProviderError::permanent("name taken")));

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let options = ResourceOptions {
            delete_before_replace: true,
            ..ResourceOptions::default()
        };
        let err = adapter
            .execute(&decision(OperationKind::Replace, &["sku"]), &inputs(), Some(&prior()), options)
            .await
            .expect_err("incomplete");
        assert!(matches!(err, ExecutionFailure::ReplaceIncomplete { .. }));
    }

    #[tokio::test]
    async fn test_delete_of_missing_resource_succeeds() {
        let mut provider = MockProvider::new();
        provider.expect_delete().times(1).returning(|r| {
            Err(ProviderError::NotFound {
                provider_id: r.provider_id,
            })
        });

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let attempts = adapter.delete(&id(), "/gone", false).await.expect("gone is fine");
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_protected_resource_is_never_deleted() {
        let mut provider = MockProvider::new();
        provider.expect_delete().never();

        let adapter = ResourceAdapter::new(Arc::new(provider));
        let err = adapter.delete(&id(), "/keep", true).await.expect_err("protected");
        assert!(matches!(err, ExecutionFailure::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_refresh_recreates_vanished_resource() {
        let mut provider = MockProvider::new();
        provider.expect_schema().return_const(None::<ResourceSchema>);
        provider.expect_read().times(1).returning(|_, provider_id| {
            Err(ProviderError::NotFound { provider_id })
        });
        provider
            .expect_create()
            .times(1)
            .returning(|_| Ok(response("/recreated")));

        let adapter = ResourceAdapter::new(Arc::new(provider)).with_refresh(true);
        let result = adapter
            .execute(&decision(OperationKind::NoOp, &[]), &inputs(), Some(&prior()), ResourceOptions::default())
            .await
            .expect("recreated");
        assert_eq!(result.operation, OperationKind::Create);
        assert_eq!(result.provider_id, "/recreated");
    }
}
