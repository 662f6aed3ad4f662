use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::stage::StageKind;

/// Upper bound on how much of an upstream response body is kept in an error.
pub const MAX_BODY_PREFIX: usize = 200;

/// Structured error types for the asset pipeline.
///
/// Every variant is local to one stage. The orchestrator wraps whatever a stage
/// returned in [`PipelineError::StageFailed`] so callers can tell which step broke
/// without parsing messages.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Input error: {operation} failed for {path:?}")]
    Input {
        path: PathBuf,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error(
        "Upstream error: {operation} failed{}: {body}",
        .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
    )]
    Upstream {
        operation: String,
        status: Option<u16>,
        body: String,
    },

    #[error("Empty result: {operation} produced no {expected}")]
    EmptyResult { operation: String, expected: String },

    #[error(
        "Decode error: {operation} failed{}",
        .debug_path.as_ref().map(|p| format!(" (raw data saved to {})", p.display())).unwrap_or_default()
    )]
    Decode {
        operation: String,
        debug_path: Option<PathBuf>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Timeout: {operation} exceeded {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// A stage error tagged with the step that produced it.
    ///
    /// # Why a wrapper instead of a stage field on every variant
    ///
    /// Stages run standalone from the CLI as well as inside the pipeline, and only
    /// the orchestrator knows the step number. Wrapping at that boundary keeps the
    /// stage errors unaware of their position while the original error stays
    /// reachable through `source` or [`PipelineError::root_stage_error`].
    #[error("Pipeline failed at step {index} ({stage})")]
    StageFailed {
        index: usize,
        stage: StageKind,
        #[source]
        source: Box<PipelineError>,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Builds an upstream error keeping only a bounded prefix of the body.
    pub fn upstream(operation: impl Into<String>, status: Option<u16>, body: &[u8]) -> Self {
        Self::Upstream {
            operation: operation.into(),
            status,
            body: body_prefix(body),
        }
    }

    pub fn empty_result(operation: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::EmptyResult {
            operation: operation.into(),
            expected: expected.into(),
        }
    }

    /// The error a stage produced, looking through the orchestrator wrapper.
    pub fn root_stage_error(&self) -> &PipelineError {
        match self {
            Self::StageFailed { source, .. } => source.root_stage_error(),
            other => other,
        }
    }

    /// Step number (1-based) of the stage that failed, if this came from the orchestrator.
    pub const fn failed_stage_index(&self) -> Option<usize> {
        match self {
            Self::StageFailed { index, .. } => Some(*index),
            _ => None,
        }
    }
}

fn body_prefix(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    match text.char_indices().nth(MAX_BODY_PREFIX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
