//! Client for the Gemini `generateContent` endpoint.
//!
//! Only the parts of the wire format the generate stage needs are modelled:
//! the prompt, an optional inline reference image, the requested response
//! modalities, and the text / inline-data parts of the first candidate.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ApiKey, ServiceSettings};
use crate::errors::{PipelineError, Result};
use crate::traits::{HttpTransport, ImageGenerator};
use crate::transport::{HttpRequest, RequestBody};

pub const RESPONSE_MODALITIES: [&str; 2] = ["TEXT", "IMAGE"];

/// Payload of an inline image part, tagged by how it arrived.
///
/// The `generateContent` JSON always carries base64, so [`parse_response`] only
/// produces `Base64`. `Raw` is for [`ImageGenerator`] implementations that hand
/// back binary bytes directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InlinePayload {
    Base64(String),
    Raw(Vec<u8>),
}

impl InlinePayload {
    /// Bytes as received, before any decoding. Used for the debug sidecar.
    pub fn as_received(&self) -> &[u8] {
        match self {
            Self::Base64(text) => text.as_bytes(),
            Self::Raw(bytes) => bytes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    InlineImage {
        data: InlinePayload,
        mime_type: Option<String>,
    },
}

/// A local image sent along with the prompt as conditioning content.
#[derive(Clone, Debug)]
pub struct ReferenceImage {
    pub path: PathBuf,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ReferenceImage {
    /// Reads the file and checks that it decodes as an image.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| PipelineError::Input {
            path: path.to_path_buf(),
            operation: "read reference image".to_string(),
            source: Box::new(e),
        })?;

        let format = image::guess_format(&bytes).map_err(|e| PipelineError::Input {
            path: path.to_path_buf(),
            operation: "detect reference image format".to_string(),
            source: Box::new(e),
        })?;
        image::load_from_memory_with_format(&bytes, format).map_err(|e| PipelineError::Input {
            path: path.to_path_buf(),
            operation: "decode reference image".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            mime_type: format.to_mime_type().to_string(),
            bytes,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart {
    Text(String),
    InlineData(Blob),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    #[serde(alias = "mime_type", default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<Blob>,
}

pub struct GeminiClient {
    transport: Arc<dyn HttpTransport>,
    api_key: ApiKey,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, api_key: ApiKey, settings: &ServiceSettings) -> Self {
        Self {
            transport,
            api_key,
            base_url: settings.gemini_api_base.trim_end_matches('/').to_string(),
            model: settings.gemini_model.clone(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(prompt: &str, reference: Option<&ReferenceImage>) -> Result<serde_json::Value> {
        let mut parts = vec![RequestPart::Text(prompt.to_string())];
        if let Some(reference) = reference {
            parts.push(RequestPart::InlineData(Blob {
                mime_type: Some(reference.mime_type.clone()),
                data: STANDARD.encode(&reference.bytes),
            }));
        }

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                response_modalities: RESPONSE_MODALITIES.to_vec(),
            },
        };
        serde_json::to_value(&request).map_err(|e| PipelineError::Validation {
            field: "generateContent request".to_string(),
            reason: e.to_string(),
        })
    }
}

/// Flattens the first candidate into tagged parts, in response order.
pub fn parse_response(body: &[u8]) -> Result<Vec<ResponsePart>> {
    let response: GenerateContentResponse = serde_json::from_slice(body).map_err(|e| {
        PipelineError::upstream(
            format!("gemini generateContent (unexpected response format: {e})"),
            Some(200),
            body,
        )
    })?;

    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default();

    Ok(parts
        .into_iter()
        .filter_map(|part| match (part.text, part.inline_data) {
            (_, Some(blob)) => Some(ResponsePart::InlineImage {
                data: InlinePayload::Base64(blob.data),
                mime_type: blob.mime_type,
            }),
            (Some(text), None) => Some(ResponsePart::Text(text)),
            (None, None) => None,
        })
        .collect())
}

impl ImageGenerator for GeminiClient {
    fn generate(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<Vec<ResponsePart>> {
        let operation = "gemini generateContent";
        let request = HttpRequest::post(
            operation,
            self.endpoint(),
            RequestBody::Json(Self::request_body(prompt, reference)?),
        )
        .header("x-goog-api-key", self.api_key.expose());

        info!("Generating image...");
        let response = self.transport.send(request)?;
        if !response.is_ok() {
            return Err(PipelineError::upstream(
                operation,
                Some(response.status),
                &response.body,
            ));
        }

        let parts = parse_response(&response.body)?;
        debug!(parts = parts.len(), model = %self.model, "generateContent returned");
        Ok(parts)
    }
}
