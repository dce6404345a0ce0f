//! End-to-end runs of the bundled wordpress stack against the simulated
//! provider, with state kept on disk.

use std::sync::Arc;

use tokio_test::assert_ok;

use stackweave::config::ConfigParser;
use stackweave::engine::{FailurePolicy, NodeOutcome, RunStatus};
use stackweave::error::ProviderError;
use stackweave::provider::ProviderOperation;
use stackweave::reconciler::DIGEST_PREFIX;
use stackweave::stacks::wordpress::{self, types, Wordpress};
use stackweave::state::{LocalStateStore, StateStore};
use stackweave::{Deployment, OperationKind, ResourceId, StackConfig};

fn config() -> StackConfig {
    assert_ok!(ConfigParser::new().parse_yaml(
        "stack:\n  name: blog\n  environment: test\n  program: wordpress\n",
        None
    ))
}

#[tokio::test]
async fn apply_survives_a_process_restart() {
    let dir = assert_ok!(tempfile::tempdir());
    let config = config();
    let values = wordpress::sample_values();

    let store = LocalStateStore::for_stack(dir.path(), "blog", "test");
    let provider = Arc::new(wordpress::simulated_provider());
    let first = assert_ok!(
        Deployment::new(&config, &values, &Wordpress, &store, provider)
            .apply()
            .await
    );
    assert!(first.report.is_success(), "{}", first.report);
    assert!(store.state_path().exists());

    // A fresh store and provider, as a second invocation of the binary sees them.
    let store = LocalStateStore::for_stack(dir.path(), "blog", "test");
    let provider = Arc::new(wordpress::simulated_provider());
    let second = assert_ok!(
        Deployment::new(&config, &values, &Wordpress, &store, provider.clone())
            .apply()
            .await
    );

    assert_eq!(second.report.count_operation(OperationKind::NoOp), 9);
    assert_eq!(provider.calls().len(), 0);

    let website = assert_ok!(second.report.export("website_url").ok_or("missing export"));
    assert_eq!(
        website.value.as_ref().and_then(|v| v.as_str()),
        Some("https://wp-app-service-name.azurewebsites.net")
    );

    let saved = assert_ok!(store.load().await).expect("state saved");
    assert_eq!(saved.history.len(), 2);

    let mysql = ResourceId::new(types::MYSQL_SERVER, "wp-mysql-server-name");
    let record = saved.get(&mysql).expect("mysql recorded");
    let password = record.inputs["administratorLoginPassword"].as_str();
    assert!(password.is_some_and(|p| p.starts_with(DIGEST_PREFIX)));
    assert!(record.secret_outputs.contains("administratorLoginPassword"));

    let website = assert_ok!(saved.export("website_url").ok_or("export not recorded"));
    assert_eq!(
        website.value.as_ref().and_then(|v| v.as_str()),
        Some("https://wp-app-service-name.azurewebsites.net")
    );
    let connection = assert_ok!(saved.export("connection_string").ok_or("export not recorded"));
    assert!(connection.secret && connection.value.is_none());

    // Neither the echoed outputs nor the exports carry the password.
    let raw = assert_ok!(std::fs::read_to_string(store.state_path()));
    assert!(!raw.contains("wp-admin-password"));
}

#[tokio::test]
async fn continue_on_error_skips_only_dependents() {
    let dir = assert_ok!(tempfile::tempdir());
    let config = config();
    let values = wordpress::sample_values();
    let store = LocalStateStore::for_stack(dir.path(), "blog", "test");

    let mysql = ResourceId::new(types::MYSQL_SERVER, "wp-mysql-server-name");
    let app = ResourceId::new(types::WEB_APP, "wp-app-service-name");
    let storage = ResourceId::new(types::STORAGE_ACCOUNT, "wp-storage-account-name");

    let provider = Arc::new(wordpress::simulated_provider());
    provider.fail(
        &mysql,
        ProviderOperation::Create,
        ProviderError::permanent("server quota reached"),
    );

    let deployment = Deployment::new(&config, &values, &Wordpress, &store, provider.clone());
    let options = deployment
        .options()
        .clone()
        .with_failure_policy(FailurePolicy::Continue);
    let outcome = assert_ok!(deployment.with_options(options).apply().await);
    let report = &outcome.report;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.node(&mysql).map(|n| n.outcome), Some(NodeOutcome::Failed));

    let skipped = report.node(&app).expect("app report");
    assert_eq!(skipped.outcome, NodeOutcome::Skipped);
    assert_eq!(skipped.blocked_by.as_ref(), Some(&mysql));

    assert_eq!(report.node(&storage).map(|n| n.outcome), Some(NodeOutcome::Resolved));
    assert!(outcome.state.get(&storage).is_some());
    assert!(outcome.state.get(&mysql).is_none());

    let connection = report.export("connection_string").expect("export listed");
    assert!(connection.value.is_none());
    assert!(connection.error.is_some());
}

#[tokio::test]
async fn destroy_leaves_an_empty_state_file() {
    let dir = assert_ok!(tempfile::tempdir());
    let config = config();
    let values = wordpress::sample_values();
    let store = LocalStateStore::for_stack(dir.path(), "blog", "test");
    let provider = Arc::new(wordpress::simulated_provider());
    let deployment = Deployment::new(&config, &values, &Wordpress, &store, provider.clone());

    assert_ok!(deployment.apply().await);
    let outcome = assert_ok!(deployment.destroy().await);

    assert!(outcome.report.is_success());
    assert_eq!(outcome.report.count_operation(OperationKind::Delete), 9);
    assert_eq!(provider.resource_count(), 0);

    let saved = assert_ok!(store.load().await).expect("state saved");
    assert!(saved.is_empty());
    assert!(assert_ok!(store.lock_info().await).is_none());
}
