//! Client for the Recraft image endpoints.
//!
//! Background removal and vectorization share one exchange: upload the file as
//! multipart form data, read a temporary URL from the JSON reply, then download
//! the processed file from that URL.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;
use serde::Deserialize;
use tracing::debug;

use crate::artifact::write_artifact;
use crate::config::{ApiKey, ServiceSettings};
use crate::errors::{PipelineError, Result};
use crate::traits::HttpTransport;
use crate::transport::{HttpRequest, RequestBody};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionEndpoint {
    RemoveBackground,
    Vectorize,
}

impl ConversionEndpoint {
    pub const fn path(self) -> &'static str {
        match self {
            Self::RemoveBackground => "images/removeBackground",
            Self::Vectorize => "images/vectorize",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::RemoveBackground => "removeBackground",
            Self::Vectorize => "vectorize",
        }
    }
}

impl fmt::Display for ConversionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    image: Option<ImageRef>,
}

#[derive(Deserialize)]
struct ImageRef {
    url: Option<String>,
}

pub struct RecraftClient {
    transport: Arc<dyn HttpTransport>,
    api_key: ApiKey,
    base_url: String,
}

impl RecraftClient {
    pub fn new(transport: Arc<dyn HttpTransport>, api_key: ApiKey, settings: &ServiceSettings) -> Self {
        Self {
            transport,
            api_key,
            base_url: settings.recraft_api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint_url(&self, endpoint: ConversionEndpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    /// Uploads `input` to `endpoint` and stores the processed file at `output`.
    ///
    /// Returns the number of bytes written. Nothing is written unless both the
    /// upload and the download succeed.
    pub fn submit_and_fetch(
        &self,
        endpoint: ConversionEndpoint,
        input: &Path,
        output: &Path,
    ) -> Result<u64> {
        let bytes = read_source(input)?;
        let upload_operation = format!("{endpoint} upload");
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".to_string());

        let request = HttpRequest::post(
            upload_operation.as_str(),
            self.endpoint_url(endpoint),
            RequestBody::Multipart {
                field: "file".to_string(),
                file_name,
                mime_type: mime_type_for_path(input).to_string(),
                bytes,
            },
        )
        .header("Authorization", format!("Bearer {}", self.api_key.expose()));

        let response = self.transport.send(request)?;
        if !response.is_ok() {
            return Err(PipelineError::upstream(
                upload_operation,
                Some(response.status),
                &response.body,
            ));
        }

        let url = download_url(&upload_operation, &response.body)?;
        debug!(%endpoint, "upload accepted, fetching result");

        let download_operation = format!("{endpoint} download");
        let response = self
            .transport
            .send(HttpRequest::get(download_operation.as_str(), url))?;
        if !response.is_ok() {
            return Err(PipelineError::upstream(
                download_operation,
                Some(response.status),
                &response.body,
            ));
        }
        if response.body.is_empty() {
            return Err(PipelineError::empty_result(download_operation, "file bytes"));
        }

        write_artifact(output, &response.body)
    }
}

fn read_source(input: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(input).map_err(|e| PipelineError::Input {
        path: input.to_path_buf(),
        operation: "read source image".to_string(),
        source: Box::new(e),
    })?;
    if bytes.is_empty() {
        return Err(PipelineError::Input {
            path: input.to_path_buf(),
            operation: "read source image".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "source image is empty",
            )),
        });
    }
    Ok(bytes)
}

fn download_url(operation: &str, body: &[u8]) -> Result<String> {
    let parsed: UploadResponse = serde_json::from_slice(body).map_err(|e| {
        PipelineError::upstream(
            format!("{operation} (unexpected response format: {e})"),
            Some(200),
            body,
        )
    })?;

    parsed
        .image
        .and_then(|image| image.url)
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| PipelineError::empty_result(operation, "image URL"))
}

/// Content type for an upload, guessed from the file extension.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png")
}
