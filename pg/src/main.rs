//! projgen - generate a project from a one-line idea
//!
//! CLI entry point.

use std::fs;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use projgen::cli::{Cli, Command, OutputFormat, get_log_path};
use projgen::config::Config;
use projgen::console;
use projgen::generator::{FilePlan, Generator, ProjectWriter, project_dir};
use projgen::llm::create_client;
use projgen::scheduler::RequestScheduler;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(provider = %config.llm.provider, model = %config.llm.model, "projgen loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Generate {
            idea,
            output,
            overwrite,
            yes,
        }) => {
            let mut config = config;
            if let Some(dir) = output {
                config.output.dir = dir;
            }
            config.output.overwrite |= overwrite;
            cmd_generate(&config, idea, yes).await
        }
        Some(Command::Plan { idea, format }) => cmd_plan(&config, idea, format).await,
        Some(Command::Config) => cmd_config(&config),
        None => cmd_generate(&config, None, false).await,
    }
}

/// Build the scheduler every model call goes through
fn start_scheduler(config: &Config) -> Result<RequestScheduler> {
    config.validate()?;
    let client = create_client(&config.llm).context("Failed to create LLM client")?;
    RequestScheduler::spawn(client, config.scheduler.clone())
}

fn resolve_idea(idea: Option<String>) -> Result<Option<String>> {
    match idea.map(|i| i.trim().to_string()).filter(|i| !i.is_empty()) {
        Some(idea) => Ok(Some(idea)),
        None => console::prompt_idea(),
    }
}

/// Plan, confirm and write a project
async fn cmd_generate(config: &Config, idea: Option<String>, yes: bool) -> Result<()> {
    debug!(?idea, yes, "cmd_generate: called");
    let Some(idea) = resolve_idea(idea)? else {
        println!("Cancelled.");
        return Ok(());
    };

    let scheduler = start_scheduler(config)?;
    let reporter = console::spawn_progress_reporter(scheduler.subscribe());
    let generator = Generator::new(scheduler.clone(), config.llm.max_tokens);

    println!("{}", "Planning file structure...".bright_blue());
    let plan = generator.plan(&idea).await.context("Planning failed")?;
    console::print_plan(&plan);

    let root = project_dir(&config.output.dir, &plan, &idea);
    if !yes && !console::confirm(&format!("Generate {} files into {}?", plan.len(), root.display()))? {
        println!("Cancelled.");
        scheduler.shutdown().await;
        return Ok(());
    }

    let writer = ProjectWriter::new(&root, config.output.overwrite);
    let report = generator.generate(&idea, &plan, &writer, console::print_event).await;

    scheduler.shutdown().await;
    reporter.abort();
    console::print_report(&report);

    if !report.is_complete() {
        return Err(eyre::eyre!(
            "{} of {} files failed; see {}",
            report.failed.len(),
            plan.len(),
            get_log_path().display()
        ));
    }
    Ok(())
}

/// Print the plan only
async fn cmd_plan(config: &Config, idea: Option<String>, format: OutputFormat) -> Result<()> {
    debug!(?idea, ?format, "cmd_plan: called");
    let Some(idea) = resolve_idea(idea)? else {
        println!("Cancelled.");
        return Ok(());
    };

    let scheduler = start_scheduler(config)?;
    let generator = Generator::new(scheduler.clone(), config.llm.max_tokens);
    let plan: FilePlan = generator.plan(&idea).await.context("Planning failed")?;
    scheduler.shutdown().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Text => console::print_plan(&plan),
    }
    Ok(())
}

/// Print the effective configuration as YAML
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", config.to_yaml()?);
    Ok(())
}
