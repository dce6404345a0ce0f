//! Deployment orchestration.
//!
//! A [`Deployment`] ties a stack program to a state store and a provider:
//! it declares and validates the graph, takes the state lock, loads prior
//! state, runs the engine, records history, saves the new state, and
//! releases the lock whatever happened in between.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{StackConfig, StackValues};
use crate::engine::{Engine, RunOptions, RunOutcome};
use crate::error::Result;
use crate::graph::{DependencyGraph, Stack};
use crate::provider::Provider;
use crate::stacks::StackProgram;
use crate::state::{generate_holder_id, RunHistoryEntry, RunOperation, StackState, StateStore};

/// One stack deployment.
pub struct Deployment<'a, S: StateStore> {
    /// Configuration.
    config: &'a StackConfig,
    /// Resolved config keys.
    values: &'a StackValues,
    /// Program declaring the resources.
    program: &'a dyn StackProgram,
    /// State store.
    store: &'a S,
    /// Provider the engine talks to.
    provider: Arc<dyn Provider>,
    /// Engine options.
    options: RunOptions,
}

impl<'a, S: StateStore> Deployment<'a, S> {
    /// Creates a deployment with engine options taken from the config.
    #[must_use]
    pub fn new(
        config: &'a StackConfig,
        values: &'a StackValues,
        program: &'a dyn StackProgram,
        store: &'a S,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            config,
            values,
            program,
            store,
            provider,
            options: config.engine.run_options(),
        }
    }

    /// Overrides the engine options.
    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the engine options in effect.
    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Declares the program's resources and checks them against the
    /// provider's schemas.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for missing keys, invalid references,
    /// cycles, or schema mismatches.
    pub fn graph(&self) -> Result<DependencyGraph> {
        let mut stack = Stack::new(&self.config.stack.name);
        self.program
            .declare(&mut stack, self.values, &self.config.policy)?;
        let graph = stack.finalize()?;
        graph.validate_schemas(self.provider.as_ref())?;
        debug!(
            "Declared {} resources for program '{}'",
            graph.len(),
            self.program.name()
        );
        Ok(graph)
    }

    /// Converges the provisioned resources on the declared stack.
    ///
    /// # Errors
    ///
    /// Returns configuration errors before anything runs, and state errors
    /// if the lock, load, or save fails. Node failures are reported in the
    /// run report, not as errors.
    pub async fn apply(&self) -> Result<RunOutcome> {
        let graph = self.graph()?;
        info!(
            "Applying {} ({} resources)",
            self.config.qualified_name(),
            graph.len()
        );
        self.run(RunOperation::Apply, graph).await
    }

    /// Deletes every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// Returns state errors if the lock, load, or save fails.
    pub async fn destroy(&self) -> Result<RunOutcome> {
        info!("Destroying {}", self.config.qualified_name());
        let graph = Stack::new(&self.config.stack.name).finalize()?;
        self.run(RunOperation::Destroy, graph).await
    }

    /// Loads the recorded state, or an empty one for a new stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub async fn load_state(&self) -> Result<StackState> {
        Ok(self.store.load().await?.unwrap_or_else(|| {
            StackState::new(&self.config.stack.name, &self.config.stack.environment)
        }))
    }

    async fn run(&self, operation: RunOperation, graph: DependencyGraph) -> Result<RunOutcome> {
        let holder = generate_holder_id();
        let lock = self
            .store
            .acquire_lock(&holder, &operation.to_string())
            .await?;

        let result = self.run_locked(operation, graph).await;

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
        result
    }

    async fn run_locked(&self, operation: RunOperation, graph: DependencyGraph) -> Result<RunOutcome> {
        let prior = self.load_state().await?;
        debug!("Loaded state with {} resources", prior.len());

        let engine = Engine::new(Arc::clone(&self.provider), self.options.clone());
        let mut outcome = engine.run(graph, &prior).await?;

        let changed = outcome.report.changed();
        let entry = if outcome.report.is_success() {
            RunHistoryEntry::new(operation, changed)
        } else {
            error!(
                "{operation} of {} ended {}",
                self.config.qualified_name(),
                outcome.report.status
            );
            RunHistoryEntry::failed(operation, changed, &outcome.report.status.to_string())
        };
        outcome.state.add_history(entry);

        self.store.save(&outcome.state).await?;
        info!(
            "Saved state for {} ({} resources)",
            self.config.qualified_name(),
            outcome.state.len()
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::engine::RunStatus;
    use crate::error::{ConfigError, ProviderError, StackweaveError};
    use crate::graph::ResourceId;
    use crate::provider::{MemoryProvider, ProviderOperation};
    use crate::reconciler::OperationKind;
    use crate::stacks::wordpress::{self, types, Wordpress};
    use crate::state::MemoryStateStore;

    fn config() -> StackConfig {
        ConfigParser::new()
            .parse_yaml("stack:\n  name: wordpress\n", None)
            .expect("config")
    }

    fn provider() -> Arc<MemoryProvider> {
        Arc::new(wordpress::simulated_provider())
    }

    #[tokio::test]
    async fn test_apply_then_reapply_is_noop() {
        let config = config();
        let values = wordpress::sample_values();
        let store = MemoryStateStore::new();
        let provider = provider();
        let deployment = Deployment::new(&config, &values, &Wordpress, &store, provider.clone());

        let first = deployment.apply().await.expect("first apply");
        assert!(first.report.is_success(), "{}", first.report);
        assert_eq!(first.report.count_operation(OperationKind::Create), 9);
        assert_eq!(provider.resource_count(), 9);

        let second = deployment.apply().await.expect("second apply");
        assert_eq!(second.report.count_operation(OperationKind::NoOp), 9);
        assert!(second.report.changed().is_empty());

        let saved = store.load().await.expect("load").expect("saved");
        assert_eq!(saved.len(), 9);
        assert_eq!(saved.history.len(), 2);
        assert!(store.lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_changed_value_updates_in_place() {
        let config = config();
        let store = MemoryStateStore::new();
        let provider = provider();

        let values = wordpress::sample_values();
        Deployment::new(&config, &values, &Wordpress, &store, provider.clone())
            .apply()
            .await
            .expect("apply");

        let values = values.with("origin_hostname", "www.example.org");
        let outcome = Deployment::new(&config, &values, &Wordpress, &store, provider.clone())
            .apply()
            .await
            .expect("reapply");

        let endpoint = ResourceId::new(types::CDN_ENDPOINT, "wp-cdn-endpoint-name");
        let node = outcome.report.node(&endpoint).expect("endpoint report");
        assert_eq!(node.operation, Some(OperationKind::UpdateInPlace));
        assert_eq!(outcome.report.changed(), vec![endpoint.to_string()]);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let config = config();
        let values = wordpress::sample_values();
        let store = MemoryStateStore::new();
        let provider = provider();
        let deployment = Deployment::new(&config, &values, &Wordpress, &store, provider.clone());

        deployment.apply().await.expect("apply");
        let outcome = deployment.destroy().await.expect("destroy");

        assert_eq!(outcome.report.status, RunStatus::Succeeded);
        assert_eq!(outcome.report.cleanup.len(), 9);
        assert!(outcome.state.is_empty());
        assert_eq!(provider.resource_count(), 0);

        let deletes: Vec<ResourceId> = provider
            .calls()
            .into_iter()
            .filter(|c| c.operation == ProviderOperation::Delete)
            .map(|c| c.id)
            .collect();
        let app = ResourceId::new(types::WEB_APP, "wp-app-service-name");
        let group = ResourceId::new(types::RESOURCE_GROUP, "wp-resource-group-name");
        assert_eq!(deletes.last(), Some(&group));
        assert!(deletes.iter().position(|d| *d == app) < deletes.iter().position(|d| *d == group));
    }

    #[tokio::test]
    async fn test_failed_run_records_failure_and_releases_lock() {
        let config = config();
        let values = wordpress::sample_values();
        let store = MemoryStateStore::new();
        let provider = provider();
        provider.fail(
            &ResourceId::new(types::MYSQL_SERVER, "wp-mysql-server-name"),
            ProviderOperation::Create,
            ProviderError::permanent("quota exceeded"),
        );

        let outcome = Deployment::new(&config, &values, &Wordpress, &store, provider.clone())
            .apply()
            .await
            .expect("run completes");

        assert_eq!(outcome.report.status, RunStatus::Failed);
        let saved = store.load().await.expect("load").expect("saved");
        assert!(!saved.history[0].success);
        assert!(store.lock_info().await.expect("lock info").is_none());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_locking() {
        let config = config();
        let values = StackValues::new();
        let store = MemoryStateStore::new();
        let provider = provider();

        let err = Deployment::new(&config, &values, &Wordpress, &store, provider.clone())
            .apply()
            .await
            .expect_err("missing keys");
        assert!(matches!(err, StackweaveError::Config(ConfigError::MissingKey { .. })));
        assert!(store.load().await.expect("load").is_none());
        assert_eq!(provider.calls().len(), 0);
    }

    #[tokio::test]
    async fn test_held_lock_blocks_run() {
        let config = config();
        let values = wordpress::sample_values();
        let store = MemoryStateStore::new();
        store.acquire_lock("someone-else", "apply").await.expect("lock");

        let err = Deployment::new(&config, &values, &Wordpress, &store, provider())
            .apply()
            .await
            .expect_err("locked");
        assert!(err.to_string().contains("someone-else"));
    }
}
