//! BimFlow CLI Entry Point
//!
//! Loads workflow definitions from YAML, runs one of them on the engine and
//! reports the outcome.
//!
//! # Usage
//!
//! ```bash
//! # Run the first workflow in a file
//! bimflow workflows.yaml
//!
//! # Pick a workflow and pass input context
//! bimflow workflows.yaml --workflow bim_export_workflow --context '{"model_id": "m-42"}'
//!
//! # Keep history in a state directory
//! bimflow workflows.yaml --state-dir .bimflow
//!
//! # List the definitions without running anything
//! bimflow workflows.yaml --templates --list
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};

use bimflow::config::{EngineConfig, DEFAULT_STATE_DIR};
use bimflow::execution::record::{ExecutionStatus, StepExecution, WorkflowExecution};
use bimflow::handlers::{builtin_registry, ShellHandler};
use bimflow::service::WorkflowService;
use bimflow::workflow::load_definitions;
use bimflow::{Context, StepType, APP_NAME, VERSION};

/// Default definitions file used when none is specified.
const DEFAULT_DEFINITIONS: &str = "workflows.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    definitions_path: Option<String>,
    workflow_id: Option<String>,
    context: Option<String>,
    workers: Option<usize>,
    state_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    templates: bool,
    shell: bool,
    list: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Durable Workflow Automation Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: bimflow [OPTIONS] <DEFINITIONS_YAML>");
    println!();
    println!("Arguments:");
    println!("  <DEFINITIONS_YAML>  Workflow definitions (single or `workflows:` list)");
    println!();
    println!("Options:");
    println!("  --workflow ID       Workflow to execute (default: first in file)");
    println!("  --context JSON      Input context as a JSON object");
    println!("  --workers N         Worker pool size");
    println!("  --state-dir DIR     Persist state as JSON files under DIR");
    println!("  --persist           Persist state under {}", DEFAULT_STATE_DIR.display());
    println!("  --config FILE       Engine configuration YAML");
    println!("  --templates         Register the built-in BIM templates");
    println!("  --shell             Run FILE_OPERATION steps as bash commands");
    println!("  --list              List registered workflows and exit");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  bimflow workflows.yaml");
    println!("  bimflow workflows.yaml --workflow bim_export_workflow --workers 4");
    println!("  bimflow workflows.yaml --state-dir .bimflow --context '{{\"model_id\": \"m-42\"}}'");
}

/// Returns the value following a flag.
fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a String, String> {
    *i += 1;
    args.get(*i)
        .ok_or_else(|| format!("{} requires an argument", flag))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => config.verbose = true,
            "--templates" => config.templates = true,
            "--shell" => config.shell = true,
            "--list" => config.list = true,
            "--persist" => {
                config.state_dir.get_or_insert_with(|| DEFAULT_STATE_DIR.clone());
            }
            "--workflow" => {
                config.workflow_id = Some(flag_value(args, &mut i, arg)?.clone());
            }
            "--context" => {
                config.context = Some(flag_value(args, &mut i, arg)?.clone());
            }
            "--workers" => {
                let value = flag_value(args, &mut i, arg)?;
                config.workers = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid workers value: {}", value))?,
                );
            }
            "--state-dir" => {
                config.state_dir = Some(PathBuf::from(flag_value(args, &mut i, arg)?));
            }
            "--config" => {
                config.config_path = Some(PathBuf::from(flag_value(args, &mut i, arg)?));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.definitions_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.definitions_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Builds the engine configuration: file values first, then CLI flags.
fn engine_config(config: &Config) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut engine_config = match &config.config_path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    if let Some(workers) = config.workers {
        engine_config = engine_config.with_workers(workers);
    }
    if let Some(dir) = &config.state_dir {
        engine_config = engine_config.with_state_dir(dir.clone());
    }
    if config.templates {
        engine_config = engine_config.with_templates(true);
    }

    engine_config.validate()?;
    Ok(engine_config)
}

fn parse_context(raw: Option<&str>) -> Result<Context, String> {
    let Some(raw) = raw else {
        return Ok(Context::new());
    };

    match serde_json::from_str(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err("--context must be a JSON object".to_string()),
        Err(e) => Err(format!("Invalid --context JSON: {}", e)),
    }
}

/// Status label padded to a fixed width before coloring.
fn colored_status(status: ExecutionStatus) -> colored::ColoredString {
    let label = format!("{:<10}", status.as_str());
    match status {
        ExecutionStatus::Completed => label.as_str().green(),
        ExecutionStatus::Failed => label.as_str().red(),
        ExecutionStatus::Cancelled => label.as_str().yellow(),
        _ => label.as_str().normal(),
    }
}

fn print_workflows(service: &WorkflowService) {
    println!("{}", "Registered workflows:".bold());
    for summary in service.list_workflows() {
        println!(
            "  {:<28} {:<16} {} steps, timeout {}s, max retries {}",
            summary.workflow_id,
            summary.workflow_type.as_str(),
            summary.steps_count,
            summary.timeout,
            summary.max_retries
        );
        if !summary.description.is_empty() {
            println!("  {:<28} {}", "", summary.description.dimmed());
        }
    }
    println!();
}

fn print_summary(execution: &WorkflowExecution, steps: &[StepExecution]) {
    println!();
    println!("{}", "Execution summary".bold());
    println!("  Execution: {}", execution.execution_id);
    println!("  Workflow:  {}", execution.workflow_id);
    println!("  Status:    {}", colored_status(execution.status));
    if execution.retry_count() > 0 {
        println!("  Attempt:   {} (workflow retry)", execution.retry_count() + 1);
    }
    if let Some(duration) = execution.duration_secs() {
        println!("  Duration:  {:.2}s", duration);
    }
    if let Some(error) = &execution.error {
        println!("  Error:     {}", error.red());
    }

    if steps.is_empty() {
        return;
    }

    println!();
    println!("  {:<28} {:<10} {:>9} {:>8}", "STEP", "STATUS", "DURATION", "RETRIES");
    for step in steps {
        println!(
            "  {:<28} {} {:>8.2}s {:>8}",
            step.step_id,
            colored_status(step.status),
            step.duration,
            step.retry_count
        );
        if let Some(error) = &step.error {
            println!("  {:<28} {}", "", error.dimmed());
        }
    }
}

/// Main application entry point.
async fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let engine_config = engine_config(&config)?;
    let context = parse_context(config.context.as_deref())?;

    let definitions_path = config
        .definitions_path
        .clone()
        .unwrap_or_else(|| DEFAULT_DEFINITIONS.to_string());

    let definitions = if config.templates && config.definitions_path.is_none() {
        Vec::new()
    } else {
        load_definitions(&definitions_path).map_err(|e| {
            error!("Failed to load definitions: {}", e);
            format!("Could not load definitions from '{}': {}", definitions_path, e)
        })?
    };

    let mut registry = builtin_registry();
    if config.shell {
        info!("FILE_OPERATION steps run as shell commands");
        registry.register(StepType::FileOperation, Arc::new(ShellHandler::default()));
    }

    let service = WorkflowService::from_config(engine_config, registry).await?;

    let mut first_id = None;
    for definition in definitions {
        let id = service.create_workflow(definition).await?;
        first_id.get_or_insert(id);
    }

    if config.list {
        print_workflows(&service);
        service.shutdown().await;
        return Ok(ExitCode::SUCCESS);
    }

    let workflow_id = match config.workflow_id.clone().or(first_id) {
        Some(id) => id,
        None => {
            service.shutdown().await;
            return Err("No workflow to execute; pass --workflow ID".into());
        }
    };

    let execution_id = service.execute_workflow(&workflow_id, context).await?;
    info!("Started execution {}", execution_id);

    let execution = service.wait_for_outcome(&execution_id).await?;
    let steps = service.list_step_executions(&execution.execution_id).await?;
    print_summary(&execution, &steps);

    let metrics = service.get_metrics();
    info!(
        "Executions: {} completed, {} failed, {} retries scheduled",
        metrics.executions_completed, metrics.executions_failed, metrics.workflow_retries
    );

    service.shutdown().await;

    if execution.status == ExecutionStatus::Completed {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("Workflow '{}' finished as {}", workflow_id, execution.status);
        Ok(ExitCode::FAILURE)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
