//! Stackweave CLI entrypoint.
//!
//! This is the main entrypoint for the stackweave command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stackweave::cli::{Cli, Commands, OutputFormatter, StateCommands};
use stackweave::config::{find_config_file, ConfigParser, ConfigValidator, StackConfig, StackValues};
use stackweave::deployment::Deployment;
use stackweave::engine::{ExecutionPlan, FailurePolicy, RunOutcome};
use stackweave::error::{ConfigError, Result, StackweaveError};
use stackweave::provider::{HttpProvider, Provider};
use stackweave::stacks::{self, StackProgram};
use stackweave::state::{LocalStateStore, MemoryStateStore, StackState, StateStore, STATE_DIR};

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns false when a run did not succeed.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Graph => cmd_graph(config_path, &formatter),
        Commands::Apply {
            yes,
            simulate,
            continue_on_error,
            max_parallel,
            unmask,
        } => {
            let overrides = ApplyOverrides {
                continue_on_error,
                max_parallel,
            };
            cmd_apply(config_path, yes, simulate, overrides, unmask, &formatter).await
        }
        Commands::Destroy { yes, simulate } => {
            cmd_destroy(config_path, yes, simulate, &formatter).await
        }
        Commands::Outputs { resources, unmask } => {
            cmd_outputs(config_path, resources, unmask, &formatter).await
        }
        Commands::State { command } => match command {
            StateCommands::Show => cmd_state_show(config_path, &formatter).await,
            StateCommands::Unlock { lock_id, force } => {
                cmd_state_unlock(config_path, lock_id.as_deref(), force).await
            }
        },
    }
}

/// Command-line overrides of the engine options.
struct ApplyOverrides {
    continue_on_error: bool,
    max_parallel: Option<usize>,
}

/// Everything a command needs from the configuration file.
struct Loaded {
    config: StackConfig,
    values: StackValues,
    program: &'static dyn StackProgram,
    store: Box<dyn StateStore>,
}

/// Validate command implementation.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config_file = resolve_config_path(config_path)?;
    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let program = find_program(&config)?;
    let result = ConfigValidator::new()
        .require_keys(program.required_keys().iter().copied())
        .validate(&config)?;

    let values = StackValues::from_config(&config)?;
    let provider: Arc<dyn Provider> = Arc::new(program.simulated_provider());
    let store = MemoryStateStore::new();
    let graph = Deployment::new(&config, &values, program, &store, provider).graph()?;

    eprintln!(
        "{}",
        formatter.format_validation(&config, &result, graph.len(), show_warnings)
    );
    Ok(true)
}

/// Graph command implementation.
fn cmd_graph(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<bool> {
    let loaded = load(config_path)?;
    let provider: Arc<dyn Provider> = Arc::new(loaded.program.simulated_provider());
    let deployment = Deployment::new(
        &loaded.config,
        &loaded.values,
        loaded.program,
        &loaded.store,
        provider,
    );

    let graph = deployment.graph()?;
    let plan = ExecutionPlan::from_graph(&graph);
    eprintln!("{}", formatter.format_plan(&plan, &graph));
    Ok(true)
}

/// Apply command implementation.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    yes: bool,
    simulate: bool,
    overrides: ApplyOverrides,
    unmask: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let loaded = load(config_path)?;
    let provider = provider_for(&loaded, simulate)?;
    let deployment = Deployment::new(
        &loaded.config,
        &loaded.values,
        loaded.program,
        &loaded.store,
        provider,
    );

    let mut options = deployment.options().clone();
    if overrides.continue_on_error {
        options = options.with_failure_policy(FailurePolicy::Continue);
    }
    if let Some(max_parallel) = overrides.max_parallel {
        options = options.with_max_parallel(max_parallel);
    }
    let deployment = deployment.with_options(options);

    // Declare before prompting so config errors surface first.
    let graph = deployment.graph()?;
    let plan = ExecutionPlan::from_graph(&graph);
    eprintln!("{}", formatter.format_plan(&plan, &graph));

    if !yes {
        eprint!("Do you want to apply this stack? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(true);
        }
    }

    let outcome = deployment.apply().await?;
    Ok(report(&outcome, unmask, formatter))
}

/// Destroy command implementation.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    yes: bool,
    simulate: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let loaded = load(config_path)?;
    let provider = provider_for(&loaded, simulate)?;
    let deployment = Deployment::new(
        &loaded.config,
        &loaded.values,
        loaded.program,
        &loaded.store,
        provider,
    );

    let state = deployment.load_state().await?;
    if state.is_drained() {
        eprintln!("No resources to destroy.");
        return Ok(true);
    }

    eprintln!("The following resources will be destroyed:");
    for resource in state.resources.values() {
        eprintln!("  - {} ({})", resource.id, resource.provider_id);
    }
    for retired in &state.retired {
        eprintln!("  - {} ({}, replaced)", retired.id, retired.provider_id);
    }

    if !yes {
        eprint!("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "destroy" {
            eprintln!("Destruction cancelled.");
            return Ok(true);
        }
    }

    let outcome = deployment.destroy().await?;
    Ok(report(&outcome, false, formatter))
}

/// Outputs command implementation.
async fn cmd_outputs(
    config_path: Option<&PathBuf>,
    resources: bool,
    unmask: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let loaded = load(config_path)?;
    let state = loaded.store.load().await?.unwrap_or_else(|| {
        StackState::new(&loaded.config.stack.name, &loaded.config.stack.environment)
    });
    if resources {
        eprintln!("{}", formatter.format_resource_outputs(&state, unmask));
    } else {
        eprintln!("{}", formatter.format_exports(&state));
    }
    Ok(true)
}

/// State show command implementation.
async fn cmd_state_show(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<bool> {
    let loaded = load(config_path)?;
    let Some(state) = loaded.store.load().await? else {
        eprintln!("No state recorded for {}.", loaded.config.qualified_name());
        return Ok(true);
    };
    let lock = loaded.store.lock_info().await?;
    eprintln!("{}", formatter.format_state(&state, lock.as_ref()));
    Ok(true)
}

/// State unlock command implementation.
async fn cmd_state_unlock(
    config_path: Option<&PathBuf>,
    lock_id: Option<&str>,
    force: bool,
) -> Result<bool> {
    let loaded = load(config_path)?;

    if force {
        match loaded.store.force_unlock().await? {
            Some(lock) => eprintln!("Removed lock held by {} since {}.", lock.holder, lock.acquired_at),
            None => eprintln!("State is not locked."),
        }
        return Ok(true);
    }

    let Some(lock_id) = lock_id else {
        return Err(ConfigError::validation_general("Pass --lock-id, or --force to remove any lock").into());
    };

    match loaded.store.lock_info().await? {
        Some(lock) if lock.lock_id == lock_id => {
            loaded.store.release_lock(lock_id).await?;
            eprintln!("Lock {lock_id} released.");
        }
        Some(lock) => eprintln!("Lock ID does not match the current lock: {lock}"),
        None => eprintln!("State is not locked."),
    }
    Ok(true)
}

/// Prints a run report and returns whether the run succeeded.
fn report(outcome: &RunOutcome, unmask: bool, formatter: &OutputFormatter) -> bool {
    eprintln!("{}", formatter.format_report(&outcome.report, unmask));
    outcome.report.is_success()
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn parser_for(config_file: &Path) -> ConfigParser {
    ConfigParser::new().with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")))
}

fn find_program(config: &StackConfig) -> Result<&'static dyn StackProgram> {
    stacks::find(&config.stack.program).ok_or_else(|| {
        StackweaveError::Config(ConfigError::NotFound {
            what: String::from("stack program"),
            name: config.stack.program.clone(),
        })
    })
}

/// Loads and validates configuration, resolves config keys, and opens the
/// state store.
fn load(config_path: Option<&PathBuf>) -> Result<Loaded> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = parser_for(&config_file);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    let program = find_program(&config)?;
    ConfigValidator::new()
        .require_keys(program.required_keys().iter().copied())
        .validate(&config)?;

    let values = StackValues::from_config(&config)?;

    let base_dir = config_file.parent().unwrap_or_else(|| Path::new("."));
    let state_dir = config
        .state
        .path
        .as_ref()
        .map_or_else(|| base_dir.join(STATE_DIR), |path| base_dir.join(path));
    let store = LocalStateStore::for_stack(state_dir, &config.stack.name, &config.stack.environment);
    debug!("State file: {}", store.state_path().display());

    Ok(Loaded {
        config,
        values,
        program,
        store: Box::new(store),
    })
}

/// Picks the provider: the simulated one, or the configured gateway.
fn provider_for(loaded: &Loaded, simulate: bool) -> Result<Arc<dyn Provider>> {
    if simulate {
        info!("Using the simulated provider; nothing leaves this process");
        return Ok(Arc::new(loaded.program.simulated_provider()));
    }

    let endpoint = loaded.config.provider.endpoint.as_deref().ok_or_else(|| {
        ConfigError::validation(
            "No provider endpoint configured; set provider.endpoint or pass --simulate",
            "provider.endpoint",
        )
    })?;

    let mut provider = HttpProvider::with_timeout(
        endpoint,
        loaded.program.schemas(),
        loaded.config.provider.timeout_secs,
    )?;
    if let Some(token) = ConfigParser::provider_token() {
        provider = provider.with_token(token);
    }
    Ok(Arc::new(provider))
}
