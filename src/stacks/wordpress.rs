//! WordPress on Azure App Service.
//!
//! Declares a resource group, a virtual network, a MySQL server with its
//! transport setting, a CDN profile and endpoint, a storage account, and a
//! Linux App Service plan running the `wordpress` container. The database
//! password is a secret config key; everything derived from it (the
//! connection string, the web app's site config) stays secret.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::config::{PolicyConfig, StackValues};
use crate::error::Result;
use crate::graph::{ResourceDecl, ResourceId, Stack};
use crate::lookup;
use crate::output::{Input, Output, PropertySet};
use crate::provider::{MemoryProvider, ResourceSchema, SchemaRegistry};

use super::StackProgram;

/// Azure resource type tokens used by this program.
pub mod types {
    /// Resource group.
    pub const RESOURCE_GROUP: &str = "azure-native:resources:ResourceGroup";
    /// Virtual network.
    pub const VIRTUAL_NETWORK: &str = "azure-native:network:VirtualNetwork";
    /// MySQL server.
    pub const MYSQL_SERVER: &str = "azure-native:dbformysql:Server";
    /// MySQL server configuration value.
    pub const MYSQL_CONFIGURATION: &str = "azure-native:dbformysql:Configuration";
    /// CDN profile.
    pub const CDN_PROFILE: &str = "azure-native:cdn:Profile";
    /// CDN endpoint.
    pub const CDN_ENDPOINT: &str = "azure-native:cdn:Endpoint";
    /// Storage account.
    pub const STORAGE_ACCOUNT: &str = "azure-native:storage:StorageAccount";
    /// App Service plan.
    pub const APP_SERVICE_PLAN: &str = "azure-native:web:AppServicePlan";
    /// Web app.
    pub const WEB_APP: &str = "azure-native:web:WebApp";
}

/// Config keys the program reads with `require`.
pub const REQUIRED_KEYS: &[&str] = &[
    "resource_group_name",
    "location",
    "vnet_name",
    "address_prefix",
    "mysql_server_name",
    "admin_login",
    "admin_password",
    "db_name",
    "cdn_profile_name",
    "cdn_endpoint_name",
    "origin_hostname",
    "storage_account_name",
    "app_service_plan_name",
    "app_service_name",
];

const CONTAINER_IMAGE: &str = "DOCKER|wordpress:latest";
const WEB_APP_LOCATION: &str = "East US";
const CDN_LOCATION: &str = "Global";

/// The bundled WordPress program.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wordpress;

impl StackProgram for Wordpress {
    fn name(&self) -> &'static str {
        "wordpress"
    }

    fn required_keys(&self) -> &'static [&'static str] {
        REQUIRED_KEYS
    }

    fn declare(&self, stack: &mut Stack, values: &StackValues, policy: &PolicyConfig) -> Result<()> {
        declare(stack, values, policy)
    }

    fn schemas(&self) -> SchemaRegistry {
        schemas()
    }

    fn simulated_provider(&self) -> MemoryProvider {
        simulated_provider()
    }
}

/// Declares the WordPress stack.
///
/// # Errors
///
/// Returns [`ConfigError::MissingKey`](crate::error::ConfigError::MissingKey)
/// for unset keys and declaration errors from the stack.
pub fn declare(stack: &mut Stack, values: &StackValues, policy: &PolicyConfig) -> Result<()> {
    let location = values.require("location")?;

    let resource_group_name = values.require("resource_group_name")?;
    let resource_group = stack.declare(
        ResourceDecl::new(types::RESOURCE_GROUP, resource_group_name)
            .input("resourceGroupName", resource_group_name)
            .input("location", location),
    )?;

    let vnet_name = values.require("vnet_name")?;
    let address_prefix = values.require("address_prefix")?;
    let vnet = stack.declare(
        ResourceDecl::new(types::VIRTUAL_NETWORK, vnet_name)
            .input("virtualNetworkName", vnet_name)
            .input("location", location)
            .input("resourceGroupName", resource_group.name())
            .input("addressSpace", json!({ "addressPrefixes": [address_prefix] })),
    )?;

    let mysql_server_name = values.require("mysql_server_name")?;
    let admin_login = values.require("admin_login")?;
    let admin_password = values.require_secret("admin_password")?;
    let db_name = values.require("db_name")?;
    let mysql_server = stack.declare(
        ResourceDecl::new(types::MYSQL_SERVER, mysql_server_name)
            .input("serverName", mysql_server_name)
            .input("administratorLogin", admin_login)
            .input("administratorLoginPassword", &admin_password)
            .input("location", location)
            .input("resourceGroupName", resource_group.name())
            .input("sku", json!({ "name": "Standard_B1ms", "tier": "GeneralPurpose" })),
    )?;

    let secure_transport = if policy.require_secure_transport { "ON" } else { "OFF" };
    stack.declare(
        ResourceDecl::new(types::MYSQL_CONFIGURATION, "mysqlServerConfiguration")
            .input("resourceGroupName", resource_group.name())
            .input("serverName", mysql_server.name())
            .input("configurationName", "require_secure_transport")
            .input("value", secure_transport),
    )?;

    let connection_string = Output::all(vec![
        mysql_server.name(),
        Output::known(Value::from(admin_login)),
        admin_password.clone(),
        Output::known(Value::from(db_name)),
    ])
    .apply(|args| Value::String(format_connection_string(&args)));

    let cdn_profile_name = values.require("cdn_profile_name")?;
    let cdn_profile = stack.declare(
        ResourceDecl::new(types::CDN_PROFILE, cdn_profile_name)
            .input("profileName", cdn_profile_name)
            .input("location", CDN_LOCATION)
            .input("resourceGroupName", resource_group.name())
            .input("sku", json!({ "name": "Standard_Microsoft" })),
    )?;

    let cdn_endpoint_name = values.require("cdn_endpoint_name")?;
    let origin_hostname = values.require("origin_hostname")?;
    let cdn_endpoint = stack.declare(
        ResourceDecl::new(types::CDN_ENDPOINT, cdn_endpoint_name)
            .input("endpointName", cdn_endpoint_name)
            .input("location", CDN_LOCATION)
            .input("profileName", cdn_profile.name())
            .input("resourceGroupName", resource_group.name())
            .input("isCompressionEnabled", false)
            .input("isHttpAllowed", true)
            .input("isHttpsAllowed", true)
            .input("queryStringCachingBehavior", "IgnoreQueryString")
            .input("contentTypesToCompress", json!([]))
            .input("tags", json!({}))
            .input(
                "origins",
                json!([{
                    "name": "origin1",
                    "hostName": origin_hostname,
                    "httpPort": 80,
                    "httpsPort": 443,
                }]),
            ),
    )?;

    let storage_account_name = values.require("storage_account_name")?;
    let storage_account = stack.declare(
        ResourceDecl::new(types::STORAGE_ACCOUNT, storage_account_name)
            .input("accountName", storage_account_name)
            .input("resourceGroupName", resource_group.name())
            .input("location", location)
            .input("sku", json!({ "name": "Standard_RAGRS" }))
            .input("kind", "StorageV2")
            .input("enableHttpsTrafficOnly", true),
    )?;

    let app_service_plan_name = values.require("app_service_plan_name")?;
    let app_service_plan = stack.declare(
        ResourceDecl::new(types::APP_SERVICE_PLAN, app_service_plan_name)
            .input("name", app_service_plan_name)
            .input("resourceGroupName", resource_group.name())
            .input("location", location)
            .input("kind", "Linux")
            .input(
                "sku",
                json!({
                    "name": "B1",
                    "tier": "Basic",
                    "size": "B1",
                    "family": "B",
                    "capacity": 1,
                }),
            )
            .input("reserved", true),
    )?;

    let mut app_settings = vec![
        app_setting("WEBSITES_ENABLE_APP_SERVICE_STORAGE", "false"),
        app_setting("DB_HOST", mysql_server.output("fullyQualifiedDomainName")),
        app_setting("DB_LOGIN", admin_login),
        app_setting("DB_NAME", db_name),
    ];
    let mut site_config = BTreeMap::from([
        (String::from("alwaysOn"), Input::from(true)),
        (String::from("linuxFxVersion"), Input::from(CONTAINER_IMAGE)),
    ]);
    if policy.inline_secret_app_settings {
        app_settings.push(app_setting("DB_PASSWORD", &admin_password));
    } else {
        site_config.insert(
            String::from("connectionStrings"),
            Input::list([Input::map([
                ("name", Input::from("wordpress")),
                ("connectionString", Input::from(&connection_string)),
                ("type", Input::from("MySql")),
            ])]),
        );
    }
    site_config.insert(String::from("appSettings"), Input::List(app_settings));

    let app_service_name = values.require("app_service_name")?;
    let web_app = stack.declare(
        ResourceDecl::new(types::WEB_APP, app_service_name)
            .input("name", app_service_name)
            .input("resourceGroupName", resource_group.name())
            .input("location", WEB_APP_LOCATION)
            .input("serverFarmId", app_service_plan.resource_id())
            .input("siteConfig", Input::Map(site_config))
            .input("httpsOnly", true),
    )?;

    if let Some(subnet_name) = values.get("subnet_name") {
        let subnet_name = subnet_name.to_string();
        let subnet_id = vnet.output("subnets").try_apply(move |subnets| {
            lookup::property_by_name(&subnets, "subnet", &subnet_name, "id")
        });
        stack.export("subnet_id", subnet_id);
    }

    stack.export("resource_group_name", resource_group.name());
    stack.export("virtual_network_name", vnet.name());
    stack.export("mysql_server_name", mysql_server.name());
    stack.export("cdn_profile_name", cdn_profile.name());
    stack.export("cdn_endpoint_name", cdn_endpoint.name());
    stack.export("storage_account_name", storage_account.name());
    stack.export("app_service_plan_name", app_service_plan.name());
    stack.export("app_service_name", web_app.name());
    stack.export("connection_string", connection_string);
    stack.export(
        "website_url",
        web_app
            .output("defaultHostName")
            .apply(|host| Value::String(format!("https://{}", text(&host)))),
    );
    Ok(())
}

fn app_setting(name: &str, value: impl Into<Input>) -> Input {
    Input::map([("name", Input::from(name)), ("value", value.into())])
}

/// Builds the ADO-style MySQL connection string from server name, login,
/// password and database name, in that order.
fn format_connection_string(args: &[Value]) -> String {
    let field = |i: usize| args.get(i).map(text).unwrap_or_default();
    let (server, login, password, database) = (field(0), field(1), field(2), field(3));
    format!(
        "Server=tcp:{server}.mysql.database.azure.com;Database={database};\
         User ID={login}@{server};Password={password};Encrypt=true;Connection Timeout=30;"
    )
}

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

/// Schemas of every type the program declares.
#[must_use]
pub fn schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(
            ResourceSchema::new(types::RESOURCE_GROUP)
                .required(["resourceGroupName", "location"])
                .updatable(["tags"])
                .properties(Vec::<String>::new()),
        )
        .with(
            ResourceSchema::new(types::VIRTUAL_NETWORK)
                .required(["resourceGroupName", "location", "addressSpace"])
                .updatable(["addressSpace", "subnets", "tags"])
                .properties(["virtualNetworkName"]),
        )
        .with(
            ResourceSchema::new(types::MYSQL_SERVER)
                .required([
                    "resourceGroupName",
                    "location",
                    "administratorLogin",
                    "administratorLoginPassword",
                    "sku",
                ])
                .updatable(["administratorLoginPassword", "sku", "tags"])
                .properties(["serverName", "version"])
                .secret_outputs(["administratorLoginPassword"]),
        )
        .with(
            ResourceSchema::new(types::MYSQL_CONFIGURATION)
                .required(["resourceGroupName", "serverName", "configurationName", "value"])
                .updatable(["value"])
                .properties(["source"]),
        )
        .with(
            ResourceSchema::new(types::CDN_PROFILE)
                .required(["resourceGroupName", "location", "sku"])
                .updatable(["tags"])
                .properties(["profileName"]),
        )
        .with(
            ResourceSchema::new(types::CDN_ENDPOINT)
                .required(["resourceGroupName", "profileName", "location", "origins"])
                .updatable([
                    "origins",
                    "isCompressionEnabled",
                    "isHttpAllowed",
                    "isHttpsAllowed",
                    "queryStringCachingBehavior",
                    "contentTypesToCompress",
                    "tags",
                ])
                .properties(["endpointName"]),
        )
        .with(
            ResourceSchema::new(types::STORAGE_ACCOUNT)
                .required(["resourceGroupName", "location", "sku", "kind"])
                .updatable(["sku", "enableHttpsTrafficOnly", "tags"])
                .properties(["accountName"]),
        )
        .with(
            ResourceSchema::new(types::APP_SERVICE_PLAN)
                .required(["resourceGroupName", "location", "sku"])
                .updatable(["sku", "tags"])
                .properties(["name", "kind", "reserved"]),
        )
        .with(
            ResourceSchema::new(types::WEB_APP)
                .required(["resourceGroupName", "location", "serverFarmId"])
                .updatable(["siteConfig", "httpsOnly", "serverFarmId", "tags"])
                .properties(["name"])
                .allows_coexistence(false),
        )
}

/// A simulated Azure that knows the outputs each type reports.
#[must_use]
pub fn simulated_provider() -> MemoryProvider {
    MemoryProvider::new(schemas())
        .with_outputs(types::MYSQL_SERVER, |id, _| {
            single("fullyQualifiedDomainName", format!("{}.mysql.database.azure.com", id.name()))
        })
        .with_outputs(types::VIRTUAL_NETWORK, |id, inputs| {
            let prefix = inputs
                .get("addressSpace")
                .and_then(|space| space.get("addressPrefixes"))
                .and_then(|prefixes| prefixes.get(0))
                .cloned()
                .unwrap_or(Value::Null);
            let mut outputs = PropertySet::new();
            outputs.insert(
                "subnets",
                json!([{
                    "name": "default",
                    "id": format!("{}/subnets/default", arm_path(id, "Microsoft.Network/virtualNetworks")),
                    "addressPrefix": prefix,
                }]),
                false,
            );
            outputs
        })
        .with_outputs(types::CDN_ENDPOINT, |id, _| {
            single("hostName", format!("{}.azureedge.net", id.name()))
        })
        .with_outputs(types::STORAGE_ACCOUNT, |id, _| {
            let mut outputs = PropertySet::new();
            outputs.insert(
                "primaryEndpoints",
                json!({ "blob": format!("https://{}.blob.core.windows.net/", id.name()) }),
                false,
            );
            outputs
        })
        .with_outputs(types::WEB_APP, |id, _| {
            single("defaultHostName", format!("{}.azurewebsites.net", id.name()))
        })
}

fn single(name: &str, value: String) -> PropertySet {
    let mut outputs = PropertySet::new();
    outputs.insert(name, Value::String(value), false);
    outputs
}

fn arm_path(id: &ResourceId, provider_type: &str) -> String {
    format!(
        "/subscriptions/00000000-0000-0000-0000-000000000000/providers/{provider_type}/{}",
        id.name()
    )
}

/// Values that satisfy every required key, for examples and tests.
///
/// Each key maps to `wp-<key>` with underscores turned into hyphens, except
/// `location` and `address_prefix` which need real-looking values.
#[must_use]
pub fn sample_values() -> StackValues {
    let mut sample = StackValues::new();
    for key in REQUIRED_KEYS {
        let value = format!("wp-{}", key.replace('_', "-"));
        if *key == "admin_password" {
            sample.set_secret(key, value);
        } else {
            sample.set(key, value);
        }
    }
    sample.set("address_prefix", "10.0.0.0/16");
    sample.set("location", "westeurope");
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, NodeOutcome, RunOptions, RunStatus};
    use crate::state::StackState;
    use std::sync::Arc;

    fn graph(values: &StackValues, policy: &PolicyConfig) -> crate::graph::DependencyGraph {
        let mut stack = Stack::new("wordpress");
        declare(&mut stack, values, policy).expect("declare");
        stack.finalize().expect("finalize")
    }

    #[test]
    fn test_declares_every_resource_with_expected_edges() {
        let graph = graph(&sample_values(), &PolicyConfig::default());
        assert_eq!(graph.len(), 9);

        let rg = ResourceId::new(types::RESOURCE_GROUP, "wp-resource-group-name");
        let server = ResourceId::new(types::MYSQL_SERVER, "wp-mysql-server-name");
        let config = ResourceId::new(types::MYSQL_CONFIGURATION, "mysqlServerConfiguration");
        let plan = ResourceId::new(types::APP_SERVICE_PLAN, "wp-app-service-plan-name");
        let app = ResourceId::new(types::WEB_APP, "wp-app-service-name");

        let edges = graph.edges();
        assert!(edges.contains(&(rg.clone(), server.clone())));
        assert!(edges.contains(&(server.clone(), config)));
        assert!(edges.contains(&(plan, app.clone())));
        assert!(edges.contains(&(server, app)));
    }

    #[test]
    fn test_declarations_match_schemas() {
        let graph = graph(&sample_values(), &PolicyConfig::default());
        graph.validate_schemas(&schemas()).expect("schemas");
    }

    #[test]
    fn test_missing_key_is_reported_before_declaring() {
        let mut stack = Stack::new("wordpress");
        let err = declare(&mut stack, &StackValues::new(), &PolicyConfig::default())
            .expect_err("missing location");
        assert!(err.to_string().contains("location"));
    }

    #[test]
    fn test_connection_string_format() {
        let args = [json!("db"), json!("admin"), json!("pw"), json!("wordpress")];
        assert_eq!(
            format_connection_string(&args),
            "Server=tcp:db.mysql.database.azure.com;Database=wordpress;User ID=admin@db;\
             Password=pw;Encrypt=true;Connection Timeout=30;"
        );
    }

    #[tokio::test]
    async fn test_simulated_apply_keeps_password_secret() {
        let values = sample_values().with("subnet_name", "default");
        let graph = graph(&values, &PolicyConfig::default());
        let engine = Engine::new(Arc::new(simulated_provider()), RunOptions::default());

        let outcome = engine
            .run(graph, &StackState::new("wordpress", "dev"))
            .await
            .expect("run");
        let report = outcome.report;
        assert!(report.is_success(), "{report}");

        let connection = report.export("connection_string").expect("export");
        assert!(connection.secret);
        let value = connection.value.as_ref().and_then(Value::as_str).expect("value");
        assert!(value.contains("Password=wp-admin-password"));

        let subnet = report.export("subnet_id").expect("subnet export");
        assert!(subnet.error.is_none());
        assert!(!subnet.secret);

        let url = report.export("website_url").expect("url");
        assert_eq!(
            url.value,
            Some(json!("https://wp-app-service-name.azurewebsites.net"))
        );

        let app = ResourceId::new(types::WEB_APP, "wp-app-service-name");
        let record = outcome.state.get(&app).expect("web app recorded");
        assert!(record.secret_inputs.contains("siteConfig"));
    }

    #[tokio::test]
    async fn test_transport_policy_drives_configuration_value() {
        let provider = Arc::new(simulated_provider());
        let policy = PolicyConfig {
            require_secure_transport: false,
            ..PolicyConfig::default()
        };
        let engine = Engine::new(provider.clone(), RunOptions::default());
        let outcome = engine
            .run(graph(&sample_values(), &policy), &StackState::new("wordpress", "dev"))
            .await
            .expect("run");

        let config = ResourceId::new(types::MYSQL_CONFIGURATION, "mysqlServerConfiguration");
        let record = outcome.state.get(&config).expect("recorded");
        let inputs = provider.inputs_of(&record.provider_id).expect("inputs");
        assert_eq!(inputs["value"], json!("OFF"));
    }

    #[tokio::test]
    async fn test_unknown_subnet_fails_the_export_and_the_run() {
        let values = sample_values().with("subnet_name", "backend");
        let engine = Engine::new(Arc::new(simulated_provider()), RunOptions::default());
        let outcome = engine
            .run(graph(&values, &PolicyConfig::default()), &StackState::new("wordpress", "dev"))
            .await
            .expect("run");

        let subnet = outcome.report.export("subnet_id").expect("export");
        assert!(subnet.error.as_deref().is_some_and(|e| e.contains("backend")));
        assert!(outcome.report.export("resource_group_name").is_some_and(|e| e.error.is_none()));

        // Every resource resolved, but a missing export still fails the run.
        assert_eq!(outcome.report.count(NodeOutcome::Failed), 0);
        assert_eq!(outcome.report.status, RunStatus::Failed);
        assert!(!outcome.report.is_success());
        assert!(outcome.state.export("subnet_id").is_some_and(|e| e.error.is_some()));
    }
}
