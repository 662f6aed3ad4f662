use std::collections::VecDeque;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::artifact::{write_artifact, Artifact};
use crate::errors::{PipelineError, Result};
use crate::gemini::{ReferenceImage, ResponsePart};
use crate::stage::{StageInput, StageKind, StageOutput};
use crate::traits::{HttpTransport, ImageGenerator, Stage};
use crate::transport::{HttpRequest, HttpResponse};

/// テスト用のモックHTTPトランスポート
///
/// 登録順にレスポンスを返し、受け取ったリクエストを記録する
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(self, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.responses
            .lock()
            .push_back(Ok(HttpResponse::new(status, body)));
        self
    }

    pub fn with_json(self, status: u16, body: serde_json::Value) -> Self {
        self.with_bytes(status, body.to_string())
    }

    pub fn with_error(self, error: PipelineError) -> Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl HttpTransport for MockTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        let operation = request.operation.clone();
        self.requests.lock().push(request);
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(PipelineError::upstream(
                operation,
                None,
                format!("no canned response for {url}").as_bytes(),
            ))
        })
    }
}

/// テスト用のモック画像生成サービス
///
/// クローンは呼び出し記録を共有する
#[derive(Clone, Default)]
pub struct MockImageGenerator {
    parts: Vec<ResponsePart>,
    calls: Arc<Mutex<Vec<Option<PathBuf>>>>,
}

impl MockImageGenerator {
    pub fn new(parts: Vec<ResponsePart>) -> Self {
        Self {
            parts,
            calls: Arc::default(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_reference(&self) -> Option<PathBuf> {
        self.calls.lock().last().cloned().flatten()
    }
}

impl ImageGenerator for MockImageGenerator {
    fn generate(
        &self,
        _prompt: &str,
        reference: Option<&ReferenceImage>,
    ) -> Result<Vec<ResponsePart>> {
        self.calls.lock().push(reference.map(|r| r.path.clone()));
        Ok(self.parts.clone())
    }
}

#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// 指定バイト列を出力に書き込んで成功
    Write(Vec<u8>),
    /// 何も書かずに成功を返す（検証で弾かれるべきケース）
    SucceedWithoutWriting,
    Fail(String),
}

/// テスト用のモックステージ
#[derive(Clone)]
pub struct MockStage {
    kind: StageKind,
    behavior: MockBehavior,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockStage {
    pub fn new(kind: StageKind, behavior: MockBehavior) -> Self {
        Self {
            kind,
            behavior,
            calls: Arc::default(),
        }
    }

    pub fn writing(kind: StageKind, bytes: &[u8]) -> Self {
        Self::new(kind, MockBehavior::Write(bytes.to_vec()))
    }

    pub fn failing(kind: StageKind, message: &str) -> Self {
        Self::new(kind, MockBehavior::Fail(message.to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Output paths this stage was asked to write, in call order.
    pub fn outputs(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }
}

impl Stage for MockStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn execute(&self, _input: &StageInput<'_>, output: &Path) -> Result<StageOutput> {
        self.calls.lock().push(output.to_path_buf());
        let role = self.kind.output_role();
        match &self.behavior {
            MockBehavior::Write(bytes) => {
                write_artifact(output, bytes)?;
                Ok(StageOutput::new(Artifact::verify(output, role)?)
                    .with_notes(vec![format!("{} done", self.kind)]))
            }
            MockBehavior::SucceedWithoutWriting => Ok(StageOutput::new(Artifact {
                path: output.to_path_buf(),
                role,
                size_bytes: 1,
            })),
            MockBehavior::Fail(message) => Err(PipelineError::upstream(
                format!("mock {}", self.kind),
                Some(500),
                message.as_bytes(),
            )),
        }
    }
}

/// 単色のPNG画像を生成するテスト用ヘルパー
pub fn sample_png(width: u32, height: u32) -> image::ImageResult<Vec<u8>> {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        Rgba([200, 40, 90, 255]),
    ));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// `sample_png` をファイルに書き出す
pub fn write_sample_png(path: &Path, width: u32, height: u32) -> Result<()> {
    let bytes = sample_png(width, height).map_err(|e| PipelineError::Decode {
        operation: "encode sample image".to_string(),
        debug_path: None,
        source: Box::new(e),
    })?;
    fs::write(path, bytes).map_err(|e| PipelineError::FileSystem {
        path: path.to_path_buf(),
        operation: "write sample image".to_string(),
        source: e,
    })
}
