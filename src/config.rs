use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{PipelineError, Result};
use crate::recraft::ConversionEndpoint;

pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const RECRAFT_API_KEY_VAR: &str = "RECRAFT_API_KEY";

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_RECRAFT_API_BASE: &str = "https://external.api.recraft.ai/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_PIPELINE_PROMPT: &str =
    "A simple cute robot icon, minimal style, solid background";

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub service: ServiceSettings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Generate an image from a text prompt
    Generate {
        #[arg(short, long)]
        prompt: String,

        #[arg(short, long)]
        output: PathBuf,

        /// Reference image used for style or content guidance
        #[arg(short, long)]
        reference: Option<PathBuf>,
    },

    /// Remove the background from an image, or vectorize it
    Process {
        #[arg(short, long, value_enum)]
        action: Action,

        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run generate, remove-bg and vectorize back to back
    Pipeline {
        #[arg(short, long, default_value = DEFAULT_PIPELINE_PROMPT)]
        prompt: String,

        /// Final vector file
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        reference: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    RemoveBg,
    Vectorize,
}

impl Action {
    pub const fn endpoint(self) -> ConversionEndpoint {
        match self {
            Self::RemoveBg => ConversionEndpoint::RemoveBackground,
            Self::Vectorize => ConversionEndpoint::Vectorize,
        }
    }
}

/// Non-secret service settings. Credentials live in [`Credentials`].
#[derive(Args, Clone, Debug)]
pub struct ServiceSettings {
    #[arg(long, global = true, env = "GEMINI_API_BASE", default_value = DEFAULT_GEMINI_API_BASE)]
    pub gemini_api_base: String,

    #[arg(long, global = true, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    #[arg(long, global = true, env = "RECRAFT_API_BASE", default_value = DEFAULT_RECRAFT_API_BASE)]
    pub recraft_api_base: String,

    /// Upper bound for every outbound HTTP call
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            recraft_api_base: DEFAULT_RECRAFT_API_BASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ServiceSettings {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bearer token for one external service.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(<redacted, {} chars>)", self.0.len())
    }
}

/// Credentials for both services, read once at startup.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    gemini: Option<ApiKey>,
    recraft: Option<ApiKey>,
}

impl Credentials {
    /// Empty values are treated as unset.
    pub fn new(gemini: Option<String>, recraft: Option<String>) -> Self {
        let key = |value: Option<String>| value.filter(|v| !v.trim().is_empty()).map(ApiKey);
        Self {
            gemini: key(gemini),
            recraft: key(recraft),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var(GEMINI_API_KEY_VAR).ok(),
            std::env::var(RECRAFT_API_KEY_VAR).ok(),
        )
    }

    pub fn gemini(&self) -> Result<&ApiKey> {
        self.gemini.as_ref().ok_or_else(|| missing_key(GEMINI_API_KEY_VAR))
    }

    pub fn recraft(&self) -> Result<&ApiKey> {
        self.recraft.as_ref().ok_or_else(|| missing_key(RECRAFT_API_KEY_VAR))
    }
}

fn missing_key(var: &str) -> PipelineError {
    PipelineError::Configuration {
        message: format!(
            "{var} environment variable not set. Set it with:\n  Unix: export {var}='your-api-key'\n  PowerShell: $env:{var} = 'your-api-key'"
        ),
    }
}
