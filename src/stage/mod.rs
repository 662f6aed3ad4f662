mod convert;
mod generate;

pub use convert::ConversionStage;
pub use generate::GenerateStage;

use std::fmt;
use std::path::Path;

use crate::artifact::{Artifact, ArtifactRole};
use crate::errors::{PipelineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Generate,
    RemoveBackground,
    Vectorize,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [Self::Generate, Self::RemoveBackground, Self::Vectorize];

    /// 1-based position in the pipeline.
    pub const fn index(self) -> usize {
        match self {
            Self::Generate => 1,
            Self::RemoveBackground => 2,
            Self::Vectorize => 3,
        }
    }

    pub const fn output_role(self) -> ArtifactRole {
        match self {
            Self::Generate => ArtifactRole::Generated,
            Self::RemoveBackground => ArtifactRole::BackgroundRemoved,
            Self::Vectorize => ArtifactRole::Vectorized,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generate => "Gemini Generate",
            Self::RemoveBackground => "Recraft Remove BG",
            Self::Vectorize => "Recraft Vectorize",
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub enum StageInput<'a> {
    Prompt {
        prompt: &'a str,
        reference: Option<&'a Path>,
    },
    Artifact(&'a Artifact),
}

impl<'a> StageInput<'a> {
    pub fn source_artifact(&self, stage: StageKind) -> Result<&'a Artifact> {
        match *self {
            Self::Artifact(artifact) => Ok(artifact),
            Self::Prompt { .. } => Err(PipelineError::Validation {
                field: format!("{stage} input"),
                reason: "requires an image artifact, got a prompt".to_string(),
            }),
        }
    }

    pub fn prompt(&self, stage: StageKind) -> Result<(&'a str, Option<&'a Path>)> {
        match *self {
            Self::Prompt { prompt, reference } => Ok((prompt, reference)),
            Self::Artifact(_) => Err(PipelineError::Validation {
                field: format!("{stage} input"),
                reason: "requires a prompt, got an artifact".to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StageOutput {
    pub artifact: Artifact,
    /// Informational text returned by the service. Never an error signal.
    pub notes: Vec<String>,
}

impl StageOutput {
    pub const fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            notes: Vec::new(),
        }
    }

    pub fn with_notes(mut self, notes: Vec<String>) -> Self {
        self.notes = notes;
        self
    }
}
