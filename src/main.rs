//! Converge CLI entry point.
//!
//! Loads the engine configuration and desired-state document, then plans,
//! applies, refreshes, or destroys remote resources.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use halldyll_converge::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use halldyll_converge::client::{HttpClient, SharedClient};
use halldyll_converge::config::{
    find_config_file, ConfigParser, ConfigValidator, ConvergeConfig, DesiredDocument,
    ENV_ENDPOINT,
};
use halldyll_converge::error::{ConfigError, ConvergeError, Result};
use halldyll_converge::reconciler::{ApplyOptions, ReconcileReport, Reconciler};
use halldyll_converge::state::{
    holder_id, HistoryEntry, HistoryOperation, LocalStateStore, StateStore,
};

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            eprintln!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Installs the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

/// Runs the selected command.
///
/// Returns `Ok(false)` when the command completed but some resource failed.
async fn run(cli: Cli) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let context = Context::load(cli.config.as_ref(), cli.desired.as_ref())?;

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(&context, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(&context, detailed, &formatter).await,
        Commands::Apply {
            yes,
            allow_replace,
            parallelism,
        } => cmd_apply(&context, yes, allow_replace, parallelism, &formatter).await,
        Commands::Refresh => cmd_refresh(&context, &formatter).await,
        Commands::Destroy { yes, names } => cmd_destroy(&context, yes, &names, &formatter).await,
        Commands::State { command } => cmd_state(&context, command, &formatter).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Validate configuration and desired document.
fn cmd_validate(context: &Context, warnings: bool, formatter: &OutputFormatter) -> Result<bool> {
    let validator = ConfigValidator::new();
    let mut result = validator.validate(&context.config)?;
    let document = context.desired()?;
    result
        .warnings
        .extend(validator.validate_document(&context.config, &document)?.warnings);

    println!(
        "{}",
        formatter.format_validation(
            &result,
            context.config.resource_types.len(),
            document.resources.len(),
            warnings,
        )
    );
    Ok(true)
}

/// Show what apply would change.
async fn cmd_plan(context: &Context, detailed: bool, formatter: &OutputFormatter) -> Result<bool> {
    let document = context.validated_desired()?;
    let reconciler = context.reconciler(CancellationToken::new())?;

    let plan = reconciler.plan(&document).await?;
    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(true)
}

/// Converge remote resources to the desired document.
async fn cmd_apply(
    context: &Context,
    auto_approve: bool,
    allow_replace: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let document = context.validated_desired()?;
    let cancel = cancel_on_ctrl_c();
    let mut reconciler = context.reconciler(cancel)?;
    if let Some(n) = parallelism {
        reconciler = reconciler.with_parallelism(n);
    }

    let plan = reconciler.plan(&document).await?;
    if !plan.has_changes() {
        println!("{}", formatter.format_plan(&plan, false));
        return Ok(true);
    }

    if !auto_approve {
        eprintln!("{}", formatter.format_plan(&plan, false));
        if !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(true);
        }
    }

    let report = reconciler.apply(&document, ApplyOptions { allow_replace }).await?;
    Ok(print_report(&report, formatter))
}

/// Re-read recorded resources into local state.
async fn cmd_refresh(context: &Context, formatter: &OutputFormatter) -> Result<bool> {
    let reconciler = context.reconciler(cancel_on_ctrl_c())?;
    let report = reconciler.refresh().await?;
    Ok(print_report(&report, formatter))
}

/// Delete recorded resources.
async fn cmd_destroy(
    context: &Context,
    auto_approve: bool,
    names: &[String],
    formatter: &OutputFormatter,
) -> Result<bool> {
    let reconciler = context.reconciler(cancel_on_ctrl_c())?;

    let plan = reconciler.destroy_plan(names).await?;
    if !plan.has_changes() {
        println!("{}", formatter.success("No resources to destroy."));
        return Ok(true);
    }

    if !auto_approve {
        eprintln!("The following resources will be deleted:");
        for action in plan.changes() {
            let id = action.id.as_ref().map_or("-", |id| id.as_str());
            eprintln!("  - {} ({id})", action.name);
        }
        if !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destruction cancelled.");
            return Ok(true);
        }
    }

    let report = reconciler.destroy(names).await?;
    Ok(print_report(&report, formatter))
}

/// State management commands.
async fn cmd_state(context: &Context, command: StateCommands, formatter: &OutputFormatter) -> Result<bool> {
    let store = context.store();

    match command {
        StateCommands::Show => {
            if let Some(state) = store.load().await? {
                println!("{}", formatter.format_state(&state));
            } else {
                println!("{}", formatter.warning("No state found."));
            }
            println!("{}", formatter.format_lock(store.lock_info().await?.as_ref()));
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(holder_id);
            let lock = store.acquire_lock(&holder, "manual").await?;
            println!("{}", formatter.success(&format!("State locked: {}", lock.lock_id)));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match store.force_unlock().await? {
                    Some(lock) => {
                        warn!("Removed lock {} held by {}", lock.lock_id, lock.holder);
                        println!("{}", formatter.success("State forcefully unlocked."));
                    }
                    None => println!("{}", formatter.warning("State was not locked.")),
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                println!("{}", formatter.success("State unlocked."));
            } else {
                println!("{}", formatter.warning("Please provide --lock-id or use --force"));
                return Ok(false);
            }
        }
        StateCommands::Rm { name } => {
            let lock = store.acquire_lock(&holder_id(), "state rm").await?;
            let result = forget(&store, &name).await;
            store.release_lock(&lock.lock_id).await?;
            result?;
            println!(
                "{}",
                formatter.success(&format!("Removed '{name}' from state; the remote resource was left untouched."))
            );
        }
    }

    Ok(true)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Configuration resolved for one invocation.
struct Context {
    /// Engine configuration.
    config: ConvergeConfig,
    /// Directory of the configuration file.
    base_dir: PathBuf,
    /// Explicit desired-state document, if given.
    desired_path: Option<PathBuf>,
    /// Parser used for the desired-state document.
    parser: ConfigParser,
}

impl Context {
    /// Resolves, loads, and validates the engine configuration.
    fn load(config_path: Option<&PathBuf>, desired_path: Option<&PathBuf>) -> Result<Self> {
        let config_file = resolve_config_path(config_path)?;
        debug!("Loading configuration from: {}", config_file.display());

        let base_dir = config_file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let parser = ConfigParser::new().with_base_path(&base_dir);
        parser.load_dotenv()?;

        let config = parser.load_with_env(&config_file)?;
        let result = ConfigValidator::new().validate(&config)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }

        Ok(Self {
            config,
            base_dir,
            desired_path: desired_path.cloned(),
            parser,
        })
    }

    /// Loads the desired-state document, falling back to inline resources.
    fn desired(&self) -> Result<DesiredDocument> {
        self.desired_path.as_ref().map_or_else(
            || {
                Ok(DesiredDocument {
                    resources: self.config.resources.clone(),
                })
            },
            |path| self.parser.load_desired(path),
        )
    }

    /// Loads the desired-state document and checks it against the types.
    fn validated_desired(&self) -> Result<DesiredDocument> {
        let document = self.desired()?;
        let result = ConfigValidator::new().validate_document(&self.config, &document)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }
        Ok(document)
    }

    /// Opens the local state store.
    ///
    /// A relative state path is resolved against the configuration directory.
    fn store(&self) -> LocalStateStore {
        let path = self.config.state_path();
        let path = if path.is_absolute() { path } else { self.base_dir.join(path) };
        LocalStateStore::new(path)
    }

    /// Builds the control-plane client.
    fn client(&self) -> Result<SharedClient> {
        let endpoint = self.config.client.endpoint.as_deref().ok_or_else(|| {
            ConfigError::validation(
                format!("No control-plane endpoint configured (set client.endpoint or {ENV_ENDPOINT})"),
                "client.endpoint",
            )
        })?;

        let mut builder = HttpClient::builder(endpoint)
            .timeout(Duration::from_secs(self.config.client.request_timeout_secs))
            .rate_limit(self.config.client.requests_per_second, self.config.client.burst);
        if let Some(token) = ConfigParser::api_token() {
            builder = builder.api_token(token);
        } else {
            debug!("No API token set, sending unauthenticated requests");
        }

        Ok(Arc::new(builder.build()?))
    }

    /// Builds a reconciler bound to `cancel`.
    fn reconciler(&self, cancel: CancellationToken) -> Result<Reconciler<LocalStateStore>> {
        Ok(Reconciler::from_config(&self.config, self.client()?, self.store())?.with_cancellation(cancel))
    }
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Returns a token cancelled on the first Ctrl-C.
///
/// In-flight operations finish their current step; remaining work is aborted.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight operations");
            child.cancel();
        }
    });
    token
}

/// Prompts on stderr and compares the answer with `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Prints a report and returns whether it succeeded.
fn print_report(report: &ReconcileReport, formatter: &OutputFormatter) -> bool {
    println!("{}", formatter.format_report(report));
    if report.success() {
        info!("{} finished", report.command);
    } else {
        error!("{} finished with failures", report.command);
    }
    report.success()
}

/// Drops a record from state without touching the remote resource.
async fn forget(store: &LocalStateStore, name: &str) -> Result<()> {
    let mut state = store.load_or_default().await?;
    let record = state.remove(name).ok_or_else(|| {
        ConvergeError::from(ConfigError::validation(format!("'{name}' is not in state"), "name"))
    })?;
    state.add_history(HistoryEntry::new(HistoryOperation::Purge, name, Some(record.id)));
    store.save(&state).await
}
