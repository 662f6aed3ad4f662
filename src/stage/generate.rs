use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use tracing::{info, warn};

use crate::artifact::{ensure_parent_dir, write_artifact, write_debug_sidecar, Artifact};
use crate::errors::{PipelineError, Result};
use crate::gemini::{InlinePayload, ReferenceImage, ResponsePart};
use crate::stage::{StageInput, StageKind, StageOutput};
use crate::traits::{ImageGenerator, Stage};

/// Prompt (plus optional reference image) to a raster image on disk.
pub struct GenerateStage<G: ImageGenerator> {
    generator: G,
}

impl<G: ImageGenerator> GenerateStage<G> {
    pub const fn new(generator: G) -> Self {
        Self { generator }
    }
}

impl<G: ImageGenerator> Stage for GenerateStage<G> {
    fn kind(&self) -> StageKind {
        StageKind::Generate
    }

    fn execute(&self, input: &StageInput<'_>, output: &Path) -> Result<StageOutput> {
        let (prompt, reference_path) = input.prompt(self.kind())?;
        if prompt.trim().is_empty() {
            return Err(PipelineError::Validation {
                field: "prompt".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let reference = reference_path.map(ReferenceImage::load).transpose()?;
        if let Some(reference) = &reference {
            info!("Using reference image: {}", reference.path.display());
        }
        ensure_parent_dir(output)?;

        let parts = self.generator.generate(prompt, reference.as_ref())?;

        let mut notes = Vec::new();
        let mut images = Vec::new();
        for part in parts {
            match part {
                ResponsePart::Text(text) => {
                    info!("Model response: {text}");
                    notes.push(text);
                }
                ResponsePart::InlineImage { data, mime_type } => images.push((data, mime_type)),
            }
        }

        let mut images = images.into_iter();
        let Some((payload, mime_type)) = images.next() else {
            return Err(PipelineError::empty_result(
                "gemini generateContent",
                "image (no image was produced in the response)",
            ));
        };
        let extra = images.count();
        if extra > 0 {
            warn!(extra, "response contained more than one image; using the first");
        }

        let encoded = match decode_and_encode(&payload, mime_type.as_deref(), output) {
            Ok(encoded) => encoded,
            Err(source) => {
                let debug_path = write_debug_sidecar(output, payload.as_received())?;
                warn!("Raw data saved to {} for debugging", debug_path.display());
                return Err(PipelineError::Decode {
                    operation: "process generated image data".to_string(),
                    debug_path: Some(debug_path),
                    source,
                });
            }
        };

        write_artifact(output, &encoded)?;
        let artifact = Artifact::verify(output, self.kind().output_role())?;
        info!("Image saved to: {}", output.display());

        Ok(StageOutput::new(artifact).with_notes(notes))
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Raw bytes of the image container, dispatching on how the payload arrived.
fn payload_bytes(payload: &InlinePayload) -> std::result::Result<Vec<u8>, BoxError> {
    match payload {
        InlinePayload::Base64(text) => Ok(STANDARD.decode(text.trim())?),
        InlinePayload::Raw(bytes) => {
            if image::guess_format(bytes).is_ok() {
                return Ok(bytes.clone());
            }
            // raw payloads occasionally carry base64 text
            match std::str::from_utf8(bytes).map(|s| STANDARD.decode(s.trim())) {
                Ok(Ok(decoded)) => Ok(decoded),
                _ => Ok(bytes.clone()),
            }
        }
    }
}

fn decode_and_encode(
    payload: &InlinePayload,
    mime_type: Option<&str>,
    output: &Path,
) -> std::result::Result<Vec<u8>, BoxError> {
    let bytes = payload_bytes(payload)?;
    let source_format = image::guess_format(&bytes)
        .ok()
        .or_else(|| mime_type.and_then(ImageFormat::from_mime_type));
    let image = match source_format {
        Some(format) => image::load_from_memory_with_format(&bytes, format)?,
        None => image::load_from_memory(&bytes)?,
    };

    let format = output_format(output, source_format);
    let image = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        image
    };

    let mut encoded = Cursor::new(Vec::new());
    image.write_to(&mut encoded, format)?;
    Ok(encoded.into_inner())
}

/// Format implied by the output extension, else the source format, else PNG.
fn output_format(output: &Path, source_format: Option<ImageFormat>) -> ImageFormat {
    ImageFormat::from_path(output)
        .ok()
        .filter(|f| f.writing_enabled())
        .or(source_format.filter(|f| f.writing_enabled()))
        .unwrap_or(ImageFormat::Png)
}
