use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::errors::{PipelineError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    Generated,
    BackgroundRemoved,
    Vectorized,
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generated => "generated",
            Self::BackgroundRemoved => "background-removed",
            Self::Vectorized => "vectorized",
        })
    }
}

/// A file written by exactly one stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub role: ArtifactRole,
    pub size_bytes: u64,
}

impl Artifact {
    /// Checks the file itself: it must exist and be non-empty.
    pub fn verify(path: &Path, role: ArtifactRole) -> Result<Self> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) | Err(_) => {
                return Err(PipelineError::empty_result(
                    format!("{role} artifact check for {}", path.display()),
                    "output file (not created)",
                ))
            }
        };

        if metadata.len() == 0 {
            return Err(PipelineError::empty_result(
                format!("{role} artifact check for {}", path.display()),
                "output bytes (file is empty)",
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            role,
            size_bytes: metadata.len(),
        })
    }

    /// Wraps a user-supplied file as an artifact. Missing or empty files are input errors.
    pub fn from_input(path: &Path, role: ArtifactRole) -> Result<Self> {
        let input_error = |source: Box<dyn std::error::Error + Send + Sync>| PipelineError::Input {
            path: path.to_path_buf(),
            operation: "read input file".to_string(),
            source,
        };
        let metadata = fs::metadata(path).map_err(|e| input_error(Box::new(e)))?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(input_error("input must be a non-empty file".into()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            role,
            size_bytes: metadata.len(),
        })
    }

    pub fn size_kb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0
    }
}

/// Creates the parent directory of `path` if needed. Returns whether it was created.
pub fn ensure_parent_dir(path: &Path) -> Result<bool> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(false);
    };
    if parent.is_dir() {
        return Ok(false);
    }

    fs::create_dir_all(parent).map_err(|e| PipelineError::FileSystem {
        path: parent.to_path_buf(),
        operation: "create output directory".to_string(),
        source: e,
    })?;
    info!("Created output directory: {}", parent.display());
    Ok(true)
}

/// Writes `bytes` to `path` through a temporary file in the same directory,
/// so the final path either holds the full payload or does not exist.
pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<u64> {
    ensure_parent_dir(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let fs_error = |operation: &str, source: std::io::Error| PipelineError::FileSystem {
        path: path.to_path_buf(),
        operation: operation.to_string(),
        source,
    };

    let mut file = NamedTempFile::new_in(dir).map_err(|e| fs_error("create temporary file", e))?;
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|e| fs_error("write artifact", e))?;
    file.persist(path)
        .map_err(|e| fs_error("persist artifact", e.error))?;

    Ok(bytes.len() as u64)
}

/// `<output>.debug.bin`, next to the artifact that failed to decode.
pub fn debug_sidecar_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".debug.bin");
    PathBuf::from(name)
}

pub fn write_debug_sidecar(output: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let path = debug_sidecar_path(output);
    write_artifact(&path, bytes)?;
    Ok(path)
}
