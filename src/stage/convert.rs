use std::path::Path;

use tracing::info;

use crate::artifact::{ensure_parent_dir, Artifact};
use crate::errors::Result;
use crate::recraft::{ConversionEndpoint, RecraftClient};
use crate::stage::{StageInput, StageKind, StageOutput};
use crate::traits::Stage;

/// Background removal or vectorization: upload the input artifact, fetch the result.
pub struct ConversionStage {
    client: RecraftClient,
    endpoint: ConversionEndpoint,
}

impl ConversionStage {
    pub const fn new(client: RecraftClient, endpoint: ConversionEndpoint) -> Self {
        Self { client, endpoint }
    }

    pub const fn remove_background(client: RecraftClient) -> Self {
        Self::new(client, ConversionEndpoint::RemoveBackground)
    }

    pub const fn vectorize(client: RecraftClient) -> Self {
        Self::new(client, ConversionEndpoint::Vectorize)
    }
}

impl Stage for ConversionStage {
    fn kind(&self) -> StageKind {
        match self.endpoint {
            ConversionEndpoint::RemoveBackground => StageKind::RemoveBackground,
            ConversionEndpoint::Vectorize => StageKind::Vectorize,
        }
    }

    fn execute(&self, input: &StageInput<'_>, output: &Path) -> Result<StageOutput> {
        let kind = self.kind();
        let source = input.source_artifact(kind)?;
        ensure_parent_dir(output)?;

        match self.endpoint {
            ConversionEndpoint::RemoveBackground => {
                info!("Removing background from: {}", source.path.display());
            }
            ConversionEndpoint::Vectorize => info!("Vectorizing: {}", source.path.display()),
        }

        self.client
            .submit_and_fetch(self.endpoint, &source.path, output)?;
        let artifact = Artifact::verify(output, kind.output_role())?;

        match self.endpoint {
            ConversionEndpoint::RemoveBackground => {
                info!("Background removed, saved to: {}", output.display());
            }
            ConversionEndpoint::Vectorize => info!("Vectorized, saved to: {}", output.display()),
        }
        Ok(StageOutput::new(artifact))
    }
}
