use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;
use tempfile::TempDir;

use asset_pipeline::mocks::{sample_png, write_sample_png, MockTransport};
use asset_pipeline::transport::{Method, RequestBody};
use asset_pipeline::{
    execute_verified, AssetPipeline, Credentials, HttpTransport, PipelineError, PipelineRequest,
    ServiceSettings, StageInput, StageKind,
};

const SVG: &[u8] = b"<svg xmlns=\"http://www.w3.org/2000/svg\"><rect/></svg>";

fn credentials() -> Credentials {
    Credentials::new(Some("gemini-key".to_string()), Some("recraft-key".to_string()))
}

fn gemini_reply(text: Option<&str>, image: Option<&[u8]>) -> serde_json::Value {
    let mut parts = Vec::new();
    if let Some(text) = text {
        parts.push(json!({ "text": text }));
    }
    if let Some(image) = image {
        parts.push(json!({
            "inlineData": { "mimeType": "image/png", "data": STANDARD.encode(image) }
        }));
    }
    json!({ "candidates": [{ "content": { "role": "model", "parts": parts } }] })
}

fn recraft_reply(url: &str) -> serde_json::Value {
    json!({ "image": { "url": url } })
}

fn full_chain() -> MockTransport {
    MockTransport::new()
        .with_json(200, gemini_reply(Some("Here is your robot"), Some(&sample_png(16, 16).unwrap())))
        .with_json(200, recraft_reply("https://cdn.example.com/no-bg.png"))
        .with_bytes(200, sample_png(16, 16).unwrap())
        .with_json(200, recraft_reply("https://cdn.example.com/vector.svg"))
        .with_bytes(200, SVG)
}

fn run(transport: &Arc<MockTransport>, request: &PipelineRequest) -> asset_pipeline::PipelineOutcome {
    let shared: Arc<dyn HttpTransport> = transport.clone();
    AssetPipeline::from_settings(&ServiceSettings::default(), &credentials(), shared)?.run(request)
}

fn generate_only(transport: &Arc<MockTransport>, prompt: &str, output: &Path) -> asset_pipeline::Result<()> {
    let shared: Arc<dyn HttpTransport> = transport.clone();
    let client = asset_pipeline::gemini::GeminiClient::new(
        shared,
        asset_pipeline::ApiKey::new("gemini-key"),
        &ServiceSettings::default(),
    );
    let stage = asset_pipeline::GenerateStage::new(client);
    execute_verified(&stage, &StageInput::Prompt { prompt, reference: None }, output).map(|_| ())
}

#[test]
fn test_full_pipeline_writes_svg_and_reports_every_step() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("out").join("robot.svg");
    let transport = Arc::new(full_chain());

    let report = run(&transport, &PipelineRequest::new("A simple cute robot icon", &output)).unwrap();

    assert_eq!(fs::read(&output).unwrap(), SVG);
    assert_eq!(report.final_artifact.path, output);
    assert_eq!(report.stages.len(), 3);
    let kinds: Vec<_> = report.stages.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, StageKind::ALL.to_vec());
    assert_eq!(
        report.stage(StageKind::Generate).unwrap().notes,
        vec!["Here is your robot".to_string()]
    );

    let requests = transport.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests[0].url.ends_with(":generateContent"));
    assert_eq!(requests[0].header_value("x-goog-api-key"), Some("gemini-key"));
    assert!(requests[1].url.ends_with("images/removeBackground"));
    assert_eq!(requests[1].header_value("Authorization"), Some("Bearer recraft-key"));
    assert_eq!(requests[2].method, Method::Get);
    assert_eq!(requests[2].url, "https://cdn.example.com/no-bg.png");
    assert!(requests[3].url.ends_with("images/vectorize"));
    assert_eq!(requests[4].url, "https://cdn.example.com/vector.svg");
}

#[test]
fn test_vectorize_uploads_background_removed_bytes() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("robot.svg");
    let no_bg = sample_png(9, 9).unwrap();
    let transport = Arc::new(
        MockTransport::new()
            .with_json(200, gemini_reply(None, Some(&sample_png(16, 16).unwrap())))
            .with_json(200, recraft_reply("https://cdn.example.com/no-bg.png"))
            .with_bytes(200, no_bg.clone())
            .with_json(200, recraft_reply("https://cdn.example.com/vector.svg"))
            .with_bytes(200, SVG),
    );

    run(&transport, &PipelineRequest::new("icon", &output)).unwrap();

    match &transport.requests()[3].body {
        RequestBody::Multipart { field, bytes, .. } => {
            assert_eq!(field, "file");
            assert_eq!(bytes, &no_bg);
        }
        _ => panic!("expected multipart upload"),
    }
}

#[test]
fn test_generate_writes_decodable_image() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("cat.png");
    let transport = Arc::new(
        MockTransport::new()
            .with_json(200, gemini_reply(Some("A cat floating"), Some(&sample_png(12, 8).unwrap()))),
    );

    generate_only(&transport, "A cat in space", &output).unwrap();

    let image = image::open(&output).unwrap();
    assert_eq!((image.width(), image.height()), (12, 8));
}

#[test]
fn test_text_only_reply_leaves_no_file() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("cat.png");
    let transport = Arc::new(
        MockTransport::new().with_json(200, gemini_reply(Some("I cannot draw that"), None)),
    );

    let err = generate_only(&transport, "A cat in space", &output).unwrap_err();

    assert!(matches!(err, PipelineError::EmptyResult { .. }));
    assert!(!output.exists());
}

#[test]
fn test_failed_download_names_stage_two() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("robot.svg");
    let transport = Arc::new(
        MockTransport::new()
            .with_json(200, gemini_reply(None, Some(&sample_png(16, 16).unwrap())))
            .with_json(200, recraft_reply("https://cdn.example.com/no-bg.png"))
            .with_bytes(404, "not found"),
    );

    let err = run(&transport, &PipelineRequest::new("icon", &output)).unwrap_err();

    assert_eq!(err.failed_stage_index(), Some(2));
    assert!(err.to_string().contains("Recraft Remove BG"));
    match err.root_stage_error() {
        PipelineError::Upstream { operation, status, .. } => {
            assert!(operation.contains("download"));
            assert_eq!(*status, Some(404));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!output.exists());
    assert_eq!(transport.request_count(), 3);
}

#[test]
fn test_missing_credential_fails_before_any_request() {
    let temp_dir = TempDir::new().unwrap();
    let transport = Arc::new(full_chain());
    let shared: Arc<dyn HttpTransport> = transport.clone();

    let result = AssetPipeline::from_settings(
        &ServiceSettings::default(),
        &Credentials::new(Some("gemini-key".to_string()), None),
        shared,
    );

    match result {
        Err(PipelineError::Configuration { message }) => assert!(message.contains("RECRAFT_API_KEY")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("pipeline built without a Recraft key"),
    }
    assert_eq!(transport.request_count(), 0);
    assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_timeout_in_vectorize_is_reported_as_stage_three() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("robot.svg");
    let transport = Arc::new(
        MockTransport::new()
            .with_json(200, gemini_reply(None, Some(&sample_png(16, 16).unwrap())))
            .with_json(200, recraft_reply("https://cdn.example.com/no-bg.png"))
            .with_bytes(200, sample_png(16, 16).unwrap())
            .with_error(PipelineError::Timeout {
                operation: "vectorize upload".to_string(),
                timeout: Duration::from_secs(120),
            }),
    );

    let err = run(&transport, &PipelineRequest::new("icon", &output)).unwrap_err();

    assert_eq!(err.failed_stage_index(), Some(3));
    assert!(matches!(err.root_stage_error(), PipelineError::Timeout { .. }));
    assert!(!output.exists());
}

#[test]
fn test_reference_image_is_sent_inline() {
    let temp_dir = TempDir::new().unwrap();
    let reference = temp_dir.path().join("reference.png");
    write_sample_png(&reference, 4, 4).unwrap();
    let output = temp_dir.path().join("robot.svg");
    let transport = Arc::new(full_chain());

    run(
        &transport,
        &PipelineRequest::new("same style", &output).with_reference(&reference),
    )
    .unwrap();

    match &transport.requests()[0].body {
        RequestBody::Json(body) => {
            let parts = body["contents"][0]["parts"].as_array().unwrap();
            assert_eq!(parts.len(), 2);
            assert_eq!(parts[0]["text"], "same style");
            assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        }
        _ => panic!("expected JSON body"),
    }
}
