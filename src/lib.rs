pub mod artifact;
pub mod config;
pub mod errors;
pub mod gemini;
pub mod pipeline;
pub mod recraft;
pub mod stage;
pub mod traits;
pub mod transport;

pub mod mocks;

pub use artifact::{Artifact, ArtifactRole};
pub use config::{ApiKey, Config, Credentials, ServiceSettings};
pub use errors::{PipelineError, Result};
pub use pipeline::{execute_verified, AssetPipeline, PipelineOutcome, PipelineReport, PipelineRequest};
pub use stage::{ConversionStage, GenerateStage, StageInput, StageKind, StageOutput};
pub use traits::*;
pub use transport::ReqwestTransport;
