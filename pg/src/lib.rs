//! projgen - generate a project from a one-line idea
//!
//! projgen asks a language model for a file plan, then for the contents of
//! every planned file, and writes the results to disk. All model calls go
//! through one [`RequestScheduler`], which keeps the call rate inside the
//! provider's limits and absorbs 429 responses by retrying them.
//!
//! # Modules
//!
//! - [`scheduler`] - Rate-limited, retrying request queue
//! - [`llm`] - LLM client trait and Anthropic/OpenAI implementations
//! - [`generator`] - Plan parsing, file generation and writing
//! - [`config`] - Configuration types and loading
//! - [`console`] - Interactive prompts and progress output
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod console;
pub mod generator;
pub mod llm;
pub mod scheduler;

// Re-export commonly used types
pub use config::{Config, LlmConfig, OutputConfig};
pub use generator::{FilePlan, GenerateError, GenerationEvent, GenerationReport, Generator, ProjectWriter};
pub use llm::{
    AnthropicClient, CompletionRequest, CompletionResponse, LlmClient, LlmError, OpenAIClient, create_client,
};
pub use scheduler::{QueueState, RequestScheduler, ResponseHandle, SchedulerConfig, SchedulerPhase};
