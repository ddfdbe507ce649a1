//! Project generation
//!
//! Plans a file structure with one model call, then requests every file at once
//! through the scheduler and writes each one as its response arrives.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::{LlmError, TokenUsage};
use crate::scheduler::RequestScheduler;

mod plan;
mod prompts;
mod writer;

pub use plan::{FilePlan, PlanError, PlannedFile};
pub use prompts::{file_request, plan_request};
pub use writer::{ProjectWriter, WriteError, slugify};

/// Errors that stop generation before any file is written
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Model returned no text")]
    EmptyResponse,
}

/// Progress notifications while files are generated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    Queued { total: usize },
    FileWritten { path: String },
    FileFailed { path: String, error: String },
}

/// A planned file that could not be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of a generation run
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub root: PathBuf,
    pub written: Vec<String>,
    pub failed: Vec<FileFailure>,
    pub usage: TokenUsage,
}

impl GenerationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Directory a plan's files go into, beneath `base`
pub fn project_dir(base: &Path, plan: &FilePlan, idea: &str) -> PathBuf {
    let name = plan.project_name.as_deref().unwrap_or(idea);
    base.join(slugify(name))
}

/// Drives the plan and file requests through a shared scheduler
pub struct Generator {
    scheduler: RequestScheduler,
    max_tokens: u32,
}

impl Generator {
    pub fn new(scheduler: RequestScheduler, max_tokens: u32) -> Self {
        debug!(max_tokens, "Generator::new: called");
        Self { scheduler, max_tokens }
    }

    /// Ask the model for a file plan
    pub async fn plan(&self, idea: &str) -> Result<FilePlan, GenerateError> {
        debug!(%idea, "plan: called");
        let response = self.scheduler.submit(plan_request(idea, self.max_tokens)).await?;
        let text = response.content.ok_or(GenerateError::EmptyResponse)?;
        let plan = FilePlan::parse(&text)?;
        info!(files = plan.len(), project = ?plan.project_name, "Plan received");
        Ok(plan)
    }

    /// Generate and write every file in `plan`
    ///
    /// All requests are submitted up front in plan order; the scheduler decides
    /// when each one goes out. A failed file is recorded and does not stop the
    /// others.
    pub async fn generate<F>(
        &self,
        idea: &str,
        plan: &FilePlan,
        writer: &ProjectWriter,
        mut on_event: F,
    ) -> GenerationReport
    where
        F: FnMut(&GenerationEvent),
    {
        debug!(files = plan.len(), root = %writer.root().display(), "generate: called");

        let mut in_flight: FuturesUnordered<_> = plan
            .files
            .iter()
            .map(|file| {
                let handle = self.scheduler.submit(file_request(idea, plan, file, self.max_tokens));
                async move { (file, handle.await) }
            })
            .collect();
        on_event(&GenerationEvent::Queued { total: plan.len() });

        let mut report = GenerationReport {
            root: writer.root().to_path_buf(),
            ..Default::default()
        };

        while let Some((file, result)) = in_flight.next().await {
            let outcome = match result {
                Ok(response) => {
                    report.usage += response.usage;
                    match response.content {
                        Some(content) => writer.write(&file.path, &content).map_err(|e| e.to_string()),
                        None => Err(GenerateError::EmptyResponse.to_string()),
                    }
                }
                Err(e) => Err(e.to_string()),
            };

            let event = match outcome {
                Ok(_) => {
                    debug!(path = %file.path, "generate: file written");
                    report.written.push(file.path.clone());
                    GenerationEvent::FileWritten {
                        path: file.path.clone(),
                    }
                }
                Err(error) => {
                    warn!(path = %file.path, %error, "generate: file failed");
                    report.failed.push(FileFailure {
                        path: file.path.clone(),
                        error: error.clone(),
                    });
                    GenerationEvent::FileFailed {
                        path: file.path.clone(),
                        error,
                    }
                }
            };
            on_event(&event);
        }

        info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "Generation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::{MockLlmClient, MockOutcome};
    use crate::scheduler::SchedulerConfig;
    use std::sync::Arc;
    use tempfile::tempdir;

    const PLAN_JSON: &str = r#"{"project_name": "Dice Roller", "files": [
        {"path": "Cargo.toml", "description": "manifest"},
        {"path": "src/main.rs", "description": "cli"},
        {"path": "README.md", "description": "docs"}
    ]}"#;

    fn scheduler(client: Arc<MockLlmClient>) -> RequestScheduler {
        RequestScheduler::spawn(client, SchedulerConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_parses_model_output() {
        let client = Arc::new(MockLlmClient::new(vec![MockOutcome::Reply(format!(
            "Here you go:\n```json\n{}\n```",
            PLAN_JSON
        ))]));
        let generator = Generator::new(scheduler(client.clone()), 1000);

        let plan = generator.plan("roll dice").await.unwrap();
        assert_eq!(plan.project_name.as_deref(), Some("Dice Roller"));
        assert_eq!(plan.len(), 3);
        assert_eq!(client.prompts(), vec!["Project idea: roll dice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_surfaces_parse_errors() {
        let client = Arc::new(MockLlmClient::new(vec![MockOutcome::Reply("I cannot help".to_string())]));
        let generator = Generator::new(scheduler(client), 1000);

        let err = generator.plan("anything").await.unwrap_err();
        assert!(matches!(err, GenerateError::Plan(PlanError::NoJson)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_writes_files_in_plan_order() {
        let temp = tempdir().unwrap();
        let client = Arc::new(MockLlmClient::echo());
        let generator = Generator::new(scheduler(client.clone()), 1000);
        let plan = FilePlan::parse(PLAN_JSON).unwrap();
        let root = project_dir(temp.path(), &plan, "roll dice");
        let writer = ProjectWriter::new(&root, false);

        let mut events = Vec::new();
        let report = generator
            .generate("roll dice", &plan, &writer, |e| events.push(e.clone()))
            .await;

        assert!(report.is_complete());
        assert_eq!(report.root, temp.path().join("dice-roller"));
        assert_eq!(report.written, vec!["Cargo.toml", "src/main.rs", "README.md"]);
        assert_eq!(events[0], GenerationEvent::Queued { total: 3 });
        assert_eq!(events.len(), 4);

        // The echo client returns the prompt, so each file holds its own request
        let main_rs = std::fs::read_to_string(root.join("src/main.rs")).unwrap();
        assert!(main_rs.contains("Write the file: src/main.rs"));

        let prompts = client.prompts();
        assert!(prompts[0].contains("Write the file: Cargo.toml"));
        assert!(prompts[2].contains("Write the file: README.md"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_records_failures_and_continues() {
        let temp = tempdir().unwrap();
        let client = Arc::new(MockLlmClient::new(vec![
            MockOutcome::Reply("[package]".to_string()),
            MockOutcome::Fail("content policy".to_string()),
            MockOutcome::RateLimited,
            MockOutcome::Reply("# Dice".to_string()),
        ]));
        let generator = Generator::new(scheduler(client.clone()), 1000);
        let plan = FilePlan::parse(PLAN_JSON).unwrap();
        let writer = ProjectWriter::new(temp.path(), false);

        let report = generator.generate("roll dice", &plan, &writer, |_| {}).await;

        assert_eq!(report.written, vec!["Cargo.toml", "README.md"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "src/main.rs");
        assert!(report.failed[0].error.contains("content policy"));
        assert_eq!(client.call_count(), 4);
        assert_eq!(std::fs::read_to_string(temp.path().join("README.md")).unwrap(), "# Dice");
    }
}
