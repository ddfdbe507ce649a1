//! Requests sent to the model

use crate::llm::CompletionRequest;

use super::plan::{FilePlan, PlannedFile};

const PLAN_SYSTEM_PROMPT: &str = "You plan the file structure of software projects. \
Reply with JSON only, shaped as \
{\"project_name\": \"short-name\", \"files\": [{\"path\": \"relative/path\", \"description\": \"what the file contains\"}]}. \
Use relative paths. List every file needed for a working first version.";

const FILE_SYSTEM_PROMPT: &str = "You write the complete contents of one file in a software project. \
Reply with the file contents only.";

/// Ask for a file plan for `idea`
pub fn plan_request(idea: &str, max_tokens: u32) -> CompletionRequest {
    CompletionRequest::single(PLAN_SYSTEM_PROMPT, format!("Project idea: {}", idea.trim()), max_tokens)
}

/// Ask for the contents of one planned file
pub fn file_request(idea: &str, plan: &FilePlan, file: &PlannedFile, max_tokens: u32) -> CompletionRequest {
    let mut user = format!(
        "Project idea: {}\n\nAll files in the project:\n{}\n\nWrite the file: {}",
        idea.trim(),
        plan.path_list(),
        file.path
    );
    if !file.description.is_empty() {
        user.push_str(&format!("\nIt should contain: {}", file.description));
    }
    CompletionRequest::single(FILE_SYSTEM_PROMPT, user, max_tokens)
}
