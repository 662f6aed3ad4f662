use std::fmt;
use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::traits::HttpTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart {
        field: String,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
}

/// One outbound call. `operation` names the call in errors and logs.
#[derive(Clone)]
pub struct HttpRequest {
    pub operation: String,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(operation: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post(operation: impl Into<String>, url: impl Into<String>, body: RequestBody) -> Self {
        Self {
            operation: operation.into(),
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// Header values carry credentials, so only names are printed.
impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(n, _)| n.as_str()).collect();
        let body = match &self.body {
            RequestBody::Empty => "empty".to_string(),
            RequestBody::Json(_) => "json".to_string(),
            RequestBody::Multipart { file_name, bytes, .. } => {
                format!("multipart({file_name}, {} bytes)", bytes.len())
            }
        };
        f.debug_struct("HttpRequest")
            .field("operation", &self.operation)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &header_names)
            .field("body", &body)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Blocking reqwest transport with a hard per-call timeout.
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, timeout })
    }

    fn classify(&self, operation: &str, err: reqwest::Error) -> PipelineError {
        if err.is_timeout() {
            PipelineError::Timeout {
                operation: operation.to_string(),
                timeout: self.timeout,
            }
        } else {
            PipelineError::upstream(operation, None, err.to_string().as_bytes())
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            operation,
            method,
            url,
            headers,
            body,
        } = request;
        debug!(%operation, ?method, %url, "sending request");

        let mut builder = match method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart {
                field,
                file_name,
                mime_type,
                bytes,
            } => {
                let part = multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&mime_type)
                    .map_err(|e| self.classify(&operation, e))?;
                builder.multipart(multipart::Form::new().part(field, part))
            }
        };

        let response = builder.send().map_err(|e| self.classify(&operation, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| self.classify(&operation, e))?
            .to_vec();
        debug!(%operation, status, bytes = body.len(), "received response");

        Ok(HttpResponse { status, body })
    }
}
