//! Fleetwright CLI entrypoint.
//!
//! This is the main entrypoint for the fleetwright command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use fleetwright::cli::{Cli, Commands, OutputFormatter};
use fleetwright::error::{PlanReadError, Result};
use fleetwright::executor::{
    EngineConfig, ExecutionOptions, FleetExecutor, OutputFormat, TaskCatalog, TaskResult,
    parse_extra_vars,
};
use fleetwright::journal::JournalStore;
use fleetwright::plan::{FilePlanner, Plan, PlanParser, PlanValidator, Planner, Role};
use fleetwright::ssh::Ssh2Connector;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

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

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system; `RUST_LOG` takes precedence.
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
async fn run(cli: Cli) -> Result<()> {
    let verbose = cli.verbose;
    let plan_file = cli.plan_file;

    match cli.command {
        Commands::Step {
            task,
            generated_assets_dir,
            restart_services,
            output,
            extra_vars,
        } => {
            // Bad extra vars are rejected before the plan is even read.
            let extra_vars = parse_extra_vars(&extra_vars)?;
            let opts = ExecutionOptions::new()
                .with_generated_assets_dir(generated_assets_dir)
                .with_restart_services(restart_services)
                .with_output_format(output)
                .with_verbose(verbose)
                .with_extra_vars(extra_vars);
            cmd_step(&plan_file, &task, &opts).await
        }
        Commands::Tasks => {
            cmd_tasks();
            Ok(())
        }
        Commands::Validate => cmd_validate(&plan_file),
        Commands::Exec {
            role,
            output,
            command,
        } => cmd_exec(&plan_file, role, &command, output).await,
        Commands::Copy {
            role,
            local,
            remote,
        } => cmd_copy(&plan_file, role, &local, &remote).await,
        Commands::Runs {
            generated_assets_dir,
            limit,
        } => cmd_runs(&generated_assets_dir, limit).await,
    }
}

/// Run one step against the plan.
async fn cmd_step(plan_file: &Path, task: &str, opts: &ExecutionOptions) -> Result<()> {
    let plan = load_plan(plan_file)?;
    let executor = create_executor()?;

    let result = executor.run_task(task, &plan, opts).await?;

    let journal = JournalStore::new(&opts.generated_assets_dir);
    if let Err(e) = journal.record(&result).await {
        warn!("Run journal not updated: {e}");
    }

    report(&result, opts.output_format)
}

/// List the task catalog.
fn cmd_tasks() {
    let formatter = OutputFormatter::new(OutputFormat::Simple);
    eprintln!("{}", formatter.format_tasks(&TaskCatalog::builtin()));
}

/// Validate the plan file and print every finding.
fn cmd_validate(plan_file: &Path) -> Result<()> {
    info!("Validating plan: {}", plan_file.display());

    let (spec, _content) = PlanParser::new().load_file(plan_file)?;
    let validation = PlanValidator::new().check(&spec);

    let plan = if validation.is_valid() {
        Some(FilePlanner::new(plan_file).read()?)
    } else {
        None
    };

    let formatter = OutputFormatter::new(OutputFormat::Simple);
    eprintln!("{}", formatter.format_validation(plan.as_ref(), &validation));

    match validation.errors.first() {
        Some(first) => Err(PlanReadError::InvalidPlan {
            violated_invariant: first.message.clone(),
            field: Some(first.field.clone()),
        }
        .into()),
        None => Ok(()),
    }
}

/// Run an ad-hoc command on every node holding `role`.
async fn cmd_exec(plan_file: &Path, role: Role, command: &[String], output: OutputFormat) -> Result<()> {
    let plan = load_plan(plan_file)?;
    let executor = create_executor()?;

    let nodes = plan.nodes_with_role(role);
    let commands = vec![command.join(" ")];
    let timeout = executor.config().command_timeout;

    let result = executor.run_commands_on(&nodes, &commands, timeout).await?;
    report(&result, output)
}

/// Copy a local file to every node holding `role`.
async fn cmd_copy(plan_file: &Path, role: Role, local: &Path, remote: &str) -> Result<()> {
    let plan = load_plan(plan_file)?;
    let executor = create_executor()?;

    let nodes = plan.nodes_with_role(role);
    let timeout = executor.config().file_timeout;

    let result = executor.copy_file_to(&nodes, local, remote, timeout).await?;
    report(&result, OutputFormat::Simple)
}

/// List recorded runs.
async fn cmd_runs(generated_assets_dir: &Path, limit: usize) -> Result<()> {
    let store = JournalStore::new(generated_assets_dir);
    let entries = store.list().await?;
    let shown = &entries[..entries.len().min(limit)];

    let formatter = OutputFormatter::new(OutputFormat::Simple);
    eprintln!("{}", formatter.format_runs(shown));
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads `.env` next to the plan file, then reads and validates the plan.
fn load_plan(plan_file: &Path) -> Result<Plan> {
    let base_dir = plan_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    EngineConfig::load_dotenv(&base_dir)?;

    debug!("Reading plan from: {}", plan_file.display());
    Ok(FilePlanner::new(plan_file).read()?)
}

/// Creates an SSH-backed executor whose cancel token fires on Ctrl-C.
fn create_executor() -> Result<FleetExecutor> {
    let config = EngineConfig::from_env()?;
    let executor = FleetExecutor::new(Arc::new(Ssh2Connector::new())).with_config(config);

    let cancel = executor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: no new node will be started, waiting for running nodes");
            cancel.cancel();
        }
    });

    Ok(executor)
}

/// Prints a task result and turns node failures into an error.
fn report(result: &TaskResult, format: OutputFormat) -> Result<()> {
    let formatter = OutputFormatter::new(format);
    eprintln!("{}", formatter.format_result(result));
    result.clone().into_result()?;
    Ok(())
}
