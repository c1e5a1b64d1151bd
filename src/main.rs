//! Halyard CLI entrypoint.
//!
//! This is the main entrypoint for the halyard command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use halyard::cli::{Cli, Commands, OutputFormatter, StateCommands};
use halyard::config::{
    collect_variable_overrides, find_config_file, ConfigParser, ConfigValidator, DeployConfig,
    ProviderKind, StateBackend,
};
use halyard::error::{ConfigError, HalyardError, Result};
use halyard::executor::CancellationHandle;
use halyard::graph::{GraphBuilder, ResourceId};
use halyard::provider::{HttpProvider, MemoryProvider, Provider, SchemaCatalog};
use halyard::reconciler::Reconciler;
use halyard::state::{LocalStateStore, S3StateStore, StateStore, STATE_DIR};

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code of `drift` when drift was found.
const EXIT_DRIFT: u8 = 2;

/// File name of the simulated cloud snapshot.
const CLOUD_SNAPSHOT: &str = "cloud.json";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { ref path, force } => cmd_init(path, force),
        Commands::Validate { warnings } => cmd_validate(&cli, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(&cli, detailed, &formatter).await,
        Commands::Apply { yes } => cmd_apply(&cli, yes, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(&cli, yes, &formatter).await,
        Commands::Output { ref name } => cmd_output(&cli, name.as_deref(), &formatter).await,
        Commands::Drift => cmd_drift(&cli, &formatter).await,
        Commands::State { ref command } => cmd_state(&cli, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<ExitCode> {
    info!("Initializing new Halyard project in: {}", path.display());

    let config_path = path.join("halyard.deploy.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(ExitCode::FAILURE);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/halyard.deploy.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    // Write/update .gitignore
    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.contains(STATE_DIR);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Halyard")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit halyard.deploy.yaml to describe your resources");
    eprintln!("  2. Run 'halyard validate' to check your configuration");
    eprintln!("  3. Run 'halyard plan' to see what will change");
    eprintln!("  4. Run 'halyard apply' to provision");

    Ok(ExitCode::SUCCESS)
}

/// Validate configuration and the resource graph.
fn cmd_validate(cli: &Cli, show_warnings: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (config, config_file) = load_config(cli.config.as_deref())?;
    info!("Validating configuration: {}", config_file.display());

    let result = ConfigValidator::new().check(&config);
    if !result.is_valid() {
        println!("{}", formatter.format_validation(&result, 0, show_warnings));
        return Ok(ExitCode::FAILURE);
    }

    let overrides = collect_variable_overrides(&config, &cli.vars)?;
    let graph = GraphBuilder::new(&SchemaCatalog::builtin()).build(&config, &overrides)?;
    debug!(
        "Dependency order: {}",
        graph
            .topological_order()
            .map(|r| r.id.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    println!("{}", formatter.format_validation(&result, graph.len(), show_warnings));
    Ok(ExitCode::SUCCESS)
}

/// Show the plan.
async fn cmd_plan(cli: &Cli, detailed: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let reconciler = build_reconciler(cli).await?;
    let plan = reconciler.plan().await?;
    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(ExitCode::SUCCESS)
}

/// Apply the plan.
async fn cmd_apply(cli: &Cli, auto_approve: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let cancel = CancellationHandle::new();
    let reconciler = build_reconciler(cli)
        .await?
        .with_cancellation(cancel.clone());

    let plan = reconciler.plan().await?;
    if plan.is_empty() {
        eprintln!("No changes to apply.");
    } else {
        eprintln!("{}", formatter.format_plan(&plan, false));
        if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    watch_ctrl_c(cancel);
    let outcome = reconciler.apply().await?;
    println!("{}", formatter.format_apply(&outcome));

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Destroy every recorded resource.
async fn cmd_destroy(cli: &Cli, auto_approve: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let cancel = CancellationHandle::new();
    let reconciler = build_reconciler(cli)
        .await?
        .with_cancellation(cancel.clone());

    let state = reconciler.load_state().await?;
    if state.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    eprintln!("The following resources will be destroyed:");
    for (id, record) in &state.resources {
        eprintln!("  - {id} ({})", record.provider_id().unwrap_or("-"));
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    watch_ctrl_c(cancel);
    let outcome = reconciler.destroy().await?;
    println!("{}", formatter.format_apply(&outcome));

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Show recorded outputs.
async fn cmd_output(cli: &Cli, name: Option<&str>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let reconciler = build_reconciler(cli).await?;
    let outputs = reconciler.outputs().await?;

    match name {
        Some(name) => {
            let output = outputs.get(name).ok_or_else(|| {
                HalyardError::Config(ConfigError::invalid(
                    format!("Output '{name}' is not recorded"),
                    "outputs",
                ))
            })?;
            print!("{}", formatter.format_output_value(output));
        }
        None => print!("{}", formatter.format_outputs(&outputs)),
    }
    Ok(ExitCode::SUCCESS)
}

/// Check for drift.
async fn cmd_drift(cli: &Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    let reconciler = build_reconciler(cli).await?;
    let report = reconciler.check_drift().await?;
    println!("{}", formatter.format_drift(&report));

    Ok(if report.has_drift() {
        ExitCode::from(EXIT_DRIFT)
    } else {
        ExitCode::SUCCESS
    })
}

/// State management commands.
async fn cmd_state(
    cli: &Cli,
    command: &StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, config_file) = load_config(cli.config.as_deref())?;
    let store = create_state_store(&config, &config_file).await?;

    match command {
        StateCommands::Show => match store.load().await? {
            Some(state) => println!("{}", formatter.format_state(&state)),
            None => eprintln!("No state found."),
        },
        StateCommands::List => match store.load().await? {
            Some(state) => print!("{}", formatter.format_resources(&state)),
            None => eprintln!("No state found."),
        },
        StateCommands::Rm { address } => {
            let id = ResourceId::parse(address).map_err(|message| {
                HalyardError::Config(ConfigError::invalid(message, "address"))
            })?;
            let provider = create_provider(&config, &config_file).await?;
            let reconciler = Reconciler::new(config, provider, store);
            reconciler.forget(&id).await?;
            eprintln!(
                "{}",
                formatter.success(&format!(
                    "Removed {id} from state. The provider-side resource was left in place."
                ))
            );
        }
        StateCommands::Lock { holder } => {
            let lock = store
                .acquire_lock(holder.as_deref().unwrap_or(""), "manual")
                .await?;
            println!("{}", formatter.format_lock(&lock));
        }
        StateCommands::Unlock { lock_id, force } => {
            if *force {
                if let Some(lock) = store.get_lock_info().await? {
                    warn!("Force-unlocking state held by {}", lock.holder);
                    store.release_lock(&lock.lock_id).await?;
                    eprintln!("{}", formatter.success("State forcefully unlocked."));
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(id).await?;
                eprintln!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("{}", formatter.warning("Please provide --lock-id or use --force"));
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads `.env` and the configuration with environment overrides.
fn load_config(config_path: Option<&Path>) -> Result<(DeployConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(&config_file));
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    Ok((config, config_file))
}

/// Loads and validates the configuration, then wires provider and state.
async fn build_reconciler(cli: &Cli) -> Result<Reconciler> {
    let (config, config_file) = load_config(cli.config.as_deref())?;
    ConfigValidator::new().validate(&config)?;

    let overrides = collect_variable_overrides(&config, &cli.vars)?;
    let store = create_state_store(&config, &config_file).await?;
    let provider = create_provider(&config, &config_file).await?;

    debug!(
        "Using {} provider with {} state",
        provider.name(),
        store.backend_type()
    );
    Ok(Reconciler::new(config, provider, store).with_overrides(overrides))
}

/// Creates the state store the configuration asks for.
async fn create_state_store(
    config: &DeployConfig,
    config_file: &Path,
) -> Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            Arc::new(LocalStateStore::with_base_dir(local_state_dir(config, config_file)))
        }
        StateBackend::S3 => {
            let bucket = config.state.bucket.as_deref().ok_or_else(|| {
                HalyardError::Config(ConfigError::invalid(
                    "S3 bucket not configured",
                    "state.bucket",
                ))
            })?;
            Arc::new(
                S3StateStore::new(
                    bucket,
                    config.state.prefix.as_deref(),
                    config.state.region.as_deref(),
                )
                .await,
            )
        }
    };
    Ok(store)
}

/// Creates the provider the configuration asks for.
///
/// The simulated cloud is kept beside local state so separate runs share it.
async fn create_provider(config: &DeployConfig, config_file: &Path) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match config.provider.kind {
        ProviderKind::Memory => {
            let mut provider = MemoryProvider::new();
            if let Some(region) = &config.provider.region {
                provider = provider.with_region(region.clone());
            }
            let dir = match config.state.backend {
                StateBackend::Local => local_state_dir(config, config_file),
                StateBackend::S3 => config_dir(config_file).join(STATE_DIR),
            };
            Arc::new(provider.with_snapshot(dir.join(CLOUD_SNAPSHOT)).await?)
        }
        ProviderKind::Http => {
            let endpoint = config.provider.endpoint.as_deref().ok_or_else(|| {
                HalyardError::Config(ConfigError::invalid(
                    "Provider endpoint not configured",
                    "provider.endpoint",
                ))
            })?;
            Arc::new(
                HttpProvider::new(endpoint, config.provider.timeout_secs)?
                    .with_region(config.provider.region.clone()),
            )
        }
    };
    Ok(provider)
}

/// Directory of the local state backend.
fn local_state_dir(config: &DeployConfig, config_file: &Path) -> PathBuf {
    config.state.path.as_ref().map_or_else(
        || config_dir(config_file).join(STATE_DIR),
        |path| config_dir(config_file).join(path),
    )
}

/// Directory holding the configuration file.
fn config_dir(config_file: &Path) -> &Path {
    config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Stops scheduling new actions on Ctrl-C. In-flight actions finish.
fn watch_ctrl_c(cancel: CancellationHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, waiting for in-flight actions to finish");
            cancel.cancel();
        }
    });
}
