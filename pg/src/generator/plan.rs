//! File plan parsing
//!
//! The planning call asks the model for JSON, but models wrap it in prose or
//! code fences and leave trailing commas. `FilePlan::parse` digs the JSON out,
//! repairs what it safely can, and validates every path.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from turning model output into a plan
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("No JSON object or array found in model output")]
    NoJson,

    #[error("Plan JSON could not be parsed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Plan lists no files")]
    Empty,

    #[error("Unsafe file path in plan: '{0}'")]
    UnsafePath(String),
}

/// One file the model intends to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    #[serde(default, alias = "purpose", alias = "summary")]
    pub description: String,
}

/// The model's file structure for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePlan {
    #[serde(default, alias = "name", alias = "project")]
    pub project_name: Option<String>,
    pub files: Vec<PlannedFile>,
}

/// Files may be listed as objects or bare path strings
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFile {
    Path(String),
    Entry(PlannedFile),
}

impl From<RawFile> for PlannedFile {
    fn from(raw: RawFile) -> Self {
        match raw {
            RawFile::Path(path) => PlannedFile {
                path,
                description: String::new(),
            },
            RawFile::Entry(entry) => entry,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPlan {
    Object {
        #[serde(default, alias = "name", alias = "project")]
        project_name: Option<String>,
        #[serde(alias = "structure")]
        files: Vec<RawFile>,
    },
    List(Vec<RawFile>),
}

impl FilePlan {
    /// Parse and validate a plan from raw model output
    pub fn parse(text: &str) -> Result<Self, PlanError> {
        debug!(len = text.len(), "FilePlan::parse: called");
        let candidate = extract_json(text).ok_or(PlanError::NoJson)?;

        let raw: RawPlan = match serde_json::from_str(candidate) {
            Ok(raw) => raw,
            Err(first) => {
                debug!(error = %first, "FilePlan::parse: direct parse failed, repairing");
                serde_json::from_str(&strip_trailing_commas(candidate))?
            }
        };

        let (project_name, files) = match raw {
            RawPlan::Object { project_name, files } => (project_name, files),
            RawPlan::List(files) => (None, files),
        };

        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(files.len());
        for file in files.into_iter().map(PlannedFile::from) {
            let path = normalize_path(&file.path)?;
            if seen.insert(path.clone()) {
                planned.push(PlannedFile {
                    path,
                    description: file.description.trim().to_string(),
                });
            } else {
                debug!(%path, "FilePlan::parse: dropping duplicate path");
            }
        }

        if planned.is_empty() {
            return Err(PlanError::Empty);
        }

        Ok(Self {
            project_name: project_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            files: planned,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths as a newline-separated list, for prompts and display
    pub fn path_list(&self) -> String {
        self.files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>().join("\n")
    }
}

/// Locate the JSON payload inside model output
///
/// Prefers the body of the first code fence, then takes the span from the
/// first opening bracket to the last matching closing one.
fn extract_json(text: &str) -> Option<&str> {
    let body = fenced_body(text).unwrap_or(text);

    let start = body.find(['{', '['])?;
    let close = if body[start..].starts_with('{') { '}' } else { ']' };
    let end = body.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&body[start..=end])
}

fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_ticks = &text[open + 3..];
    // Skip the info string (e.g. "json") on the fence line
    let body_start = after_ticks.find('\n')? + 1;
    let body = &after_ticks[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Remove commas that directly precede a closing bracket, outside strings
fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Clean a planned path and refuse anything that could leave the project root
fn normalize_path(raw: &str) -> Result<String, PlanError> {
    let mut path = raw.trim().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }

    let unsafe_path = path.is_empty()
        || path.starts_with('/')
        || path.ends_with('/')
        || path.contains(':')
        || path.split('/').any(|part| part.is_empty() || part == "." || part == "..");

    if unsafe_path {
        return Err(PlanError::UnsafePath(raw.to_string()));
    }
    Ok(path)
}
