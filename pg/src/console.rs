//! Terminal interaction: prompting for the idea, showing the plan, progress

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::generator::{FilePlan, GenerationEvent, GenerationReport};
use crate::scheduler::{QueueState, SchedulerPhase};

/// Ask for a project idea until a non-empty line is entered
///
/// Returns `None` on Ctrl+C or Ctrl+D.
pub fn prompt_idea() -> Result<Option<String>> {
    let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;
    println!("{}", "Describe the project you want to generate.".bright_cyan());

    loop {
        match rl.readline(&format!("{} ", "idea>".bright_green())) {
            Ok(line) => {
                let idea = line.trim();
                if idea.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(idea);
                return Ok(Some(idea.to_string()));
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                debug!("prompt_idea: cancelled");
                return Ok(None);
            }
            Err(err) => return Err(eyre::eyre!("Readline error: {}", err)),
        }
    }
}

/// Yes/no question, defaulting to yes on an empty answer
pub fn confirm(question: &str) -> Result<bool> {
    let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;
    match rl.readline(&format!("{} [Y/n] ", question)) {
        Ok(answer) => Ok(parse_yes_no(&answer)),
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(false),
        Err(err) => Err(eyre::eyre!("Readline error: {}", err)),
    }
}

fn parse_yes_no(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

pub fn print_plan(plan: &FilePlan) {
    let name = plan.project_name.as_deref().unwrap_or("(unnamed)");
    println!();
    println!("{} {} ({} files)", "Plan:".bold(), name.bright_white(), plan.len());
    for file in &plan.files {
        if file.description.is_empty() {
            println!("  {}", file.path.cyan());
        } else {
            println!("  {}  {}", file.path.cyan(), file.description.dimmed());
        }
    }
    println!();
}

/// Print one generation event
pub fn print_event(event: &GenerationEvent) {
    match event {
        GenerationEvent::Queued { total } => {
            println!("{} {} file requests queued", "->".bright_blue(), total);
        }
        GenerationEvent::FileWritten { path } => {
            println!("  {} {}", "✓".green(), path);
        }
        GenerationEvent::FileFailed { path, error } => {
            println!("  {} {}: {}", "✗".red(), path, error.red());
        }
    }
}

pub fn print_report(report: &GenerationReport) {
    println!();
    println!(
        "{} {} written, {} failed -> {}",
        "Done:".bold(),
        report.written.len().to_string().green(),
        report.failed.len().to_string().red(),
        report.root.display()
    );
    if report.usage.total() > 0 {
        println!(
            "Tokens: {} in / {} out",
            report.usage.input_tokens, report.usage.output_tokens
        );
    }
}

/// Human-readable line for a scheduler wait, if the state is one worth showing
pub fn describe_wait(state: &QueueState) -> Option<String> {
    let wait = state.sleeping_for?;
    match state.phase {
        SchedulerPhase::Throttled => Some(format!(
            "Rate limit window full, waiting {:.1}s ({} queued)",
            wait.as_secs_f64(),
            state.queued
        )),
        SchedulerPhase::CoolingDown => Some(format!(
            "API rate limited, retrying in {:.1}s",
            wait.as_secs_f64()
        )),
        _ => None,
    }
}

/// Print throttle and retry waits as they happen
pub fn spawn_progress_reporter(mut rx: watch::Receiver<QueueState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let line = describe_wait(&rx.borrow_and_update());
            if let Some(line) = line {
                println!("  {} {}", "…".yellow(), line.yellow());
            }
        }
    })
}
