use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::artifact::Artifact;
use crate::config::{Credentials, ServiceSettings};
use crate::errors::{PipelineError, Result};
use crate::gemini::GeminiClient;
use crate::recraft::RecraftClient;
use crate::stage::{ConversionStage, GenerateStage, StageInput, StageKind, StageOutput};
use crate::traits::{HttpTransport, Stage};

const GENERATED_FILE: &str = "generated.png";
const BACKGROUND_REMOVED_FILE: &str = "background-removed.png";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineRequest {
    pub prompt: String,
    pub reference: Option<PathBuf>,
    pub output: PathBuf,
}

impl PipelineRequest {
    pub fn new(prompt: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            reference: None,
            output: output.into(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<PathBuf>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct StageReport {
    pub kind: StageKind,
    /// Intermediate paths point into the run directory and are gone once `run` returns.
    pub artifact: Artifact,
    pub notes: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Clone, Debug)]
pub struct PipelineReport {
    pub final_artifact: Artifact,
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn stage(&self, kind: StageKind) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.kind == kind)
    }
}

pub type PipelineOutcome = Result<PipelineReport>;

/// Runs `stage` and then checks its output on disk.
///
/// The stage's own report is not trusted: the file at `output` must exist and
/// be non-empty before anything downstream may use it.
pub fn execute_verified(
    stage: &dyn Stage,
    input: &StageInput<'_>,
    output: &Path,
) -> Result<StageOutput> {
    let result = stage.execute(input, output)?;
    let artifact = Artifact::verify(output, stage.kind().output_role())?;
    Ok(StageOutput {
        artifact,
        notes: result.notes,
    })
}

/// Generate → remove background → vectorize, strictly in sequence.
pub struct AssetPipeline {
    generate: Box<dyn Stage>,
    remove_background: Box<dyn Stage>,
    vectorize: Box<dyn Stage>,
    progress: ProgressBar,
}

impl AssetPipeline {
    pub fn new(
        generate: Box<dyn Stage>,
        remove_background: Box<dyn Stage>,
        vectorize: Box<dyn Stage>,
    ) -> Self {
        Self {
            generate,
            remove_background,
            vectorize,
            progress: ProgressBar::hidden(),
        }
    }

    /// Builds the real stages. Fails before any network I/O if a credential is missing.
    pub fn from_settings(
        settings: &ServiceSettings,
        credentials: &Credentials,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let gemini_key = credentials.gemini()?;
        let recraft_key = credentials.recraft()?;
        debug!(
            gemini_key_len = gemini_key.len(),
            recraft_key_len = recraft_key.len(),
            "credentials present"
        );

        let gemini = GeminiClient::new(Arc::clone(&transport), gemini_key.clone(), settings);
        let background =
            RecraftClient::new(Arc::clone(&transport), recraft_key.clone(), settings);
        let vector = RecraftClient::new(transport, recraft_key.clone(), settings);

        Ok(Self::new(
            Box::new(GenerateStage::new(gemini)),
            Box::new(ConversionStage::remove_background(background)),
            Box::new(ConversionStage::vectorize(vector)),
        ))
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        progress.set_length(StageKind::ALL.len() as u64);
        self.progress = progress;
        self
    }

    pub fn run(&self, request: &PipelineRequest) -> PipelineOutcome {
        let run_dir = TempDir::new().map_err(|e| PipelineError::FileSystem {
            path: std::env::temp_dir(),
            operation: "create run directory".to_string(),
            source: e,
        })?;
        debug!(run_dir = %run_dir.path().display(), "pipeline run started");

        let outcome = self.run_in(run_dir.path(), request);
        match &outcome {
            Ok(_) => self.progress.finish_with_message("pipeline complete"),
            Err(_) => self.progress.abandon_with_message("pipeline failed"),
        }
        outcome
    }

    fn run_in(&self, run_dir: &Path, request: &PipelineRequest) -> PipelineOutcome {
        let mut stages = Vec::with_capacity(StageKind::ALL.len());

        let generated = self.step(
            self.generate.as_ref(),
            &StageInput::Prompt {
                prompt: &request.prompt,
                reference: request.reference.as_deref(),
            },
            &run_dir.join(GENERATED_FILE),
            &mut stages,
        )?;

        let background_removed = self.step(
            self.remove_background.as_ref(),
            &StageInput::Artifact(&generated),
            &run_dir.join(BACKGROUND_REMOVED_FILE),
            &mut stages,
        )?;

        let vectorized = self.step(
            self.vectorize.as_ref(),
            &StageInput::Artifact(&background_removed),
            &request.output,
            &mut stages,
        )?;

        Ok(PipelineReport {
            final_artifact: vectorized,
            stages,
        })
    }

    fn step(
        &self,
        stage: &dyn Stage,
        input: &StageInput<'_>,
        output: &Path,
        reports: &mut Vec<StageReport>,
    ) -> Result<Artifact> {
        let kind = stage.kind();
        let index = reports.len() + 1;
        self.progress.set_message(format!("Step {index}: {kind}"));
        info!("Running: Step {index}: {kind}...");

        let started = Instant::now();
        let result = execute_verified(stage, input, output).map_err(|source| {
            PipelineError::StageFailed {
                index,
                stage: kind,
                source: Box::new(source),
            }
        })?;
        let elapsed = started.elapsed();

        info!(
            "Step {index}: {kind} done, output: {:.0} KB",
            result.artifact.size_kb()
        );
        self.progress.inc(1);

        let artifact = result.artifact.clone();
        reports.push(StageReport {
            kind,
            artifact: result.artifact,
            notes: result.notes,
            elapsed,
        });
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockBehavior, MockStage, MockTransport};
    use std::fs;

    fn pipeline(generate: &MockStage, remove: &MockStage, vectorize: &MockStage) -> AssetPipeline {
        AssetPipeline::new(
            Box::new(generate.clone()),
            Box::new(remove.clone()),
            Box::new(vectorize.clone()),
        )
    }

    #[test]
    fn test_successful_run_reports_every_stage() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("robot.svg");
        let generate = MockStage::writing(StageKind::Generate, &[1; 4096]);
        let remove = MockStage::writing(StageKind::RemoveBackground, &[2; 2048]);
        let vectorize = MockStage::writing(StageKind::Vectorize, b"<svg/>");

        let report = pipeline(&generate, &remove, &vectorize)
            .run(&PipelineRequest::new("A simple cute robot icon", &output))?;

        assert_eq!(report.final_artifact.path, output);
        assert_eq!(report.final_artifact.size_bytes, 6);
        let kinds: Vec<StageKind> = report.stages.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());
        assert_eq!(
            report.stage(StageKind::Generate).map(|s| s.artifact.size_bytes),
            Some(4096)
        );
        assert_eq!(
            report.stage(StageKind::RemoveBackground).map(|s| s.notes.clone()),
            Some(vec!["Recraft Remove BG done".to_string()])
        );
        assert_eq!(fs::read(&output).unwrap(), b"<svg/>");
        Ok(())
    }

    #[test]
    fn test_outputs_chain_into_next_inputs() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("robot.svg");
        let generate = MockStage::writing(StageKind::Generate, b"png");
        let remove = MockStage::writing(StageKind::RemoveBackground, b"png");
        let vectorize = MockStage::writing(StageKind::Vectorize, b"svg");

        pipeline(&generate, &remove, &vectorize).run(&PipelineRequest::new("robot", &output))?;

        let generated = &generate.outputs()[0];
        let removed = &remove.outputs()[0];
        assert!(generated.ends_with(GENERATED_FILE));
        assert!(removed.ends_with(BACKGROUND_REMOVED_FILE));
        assert_eq!(generated.parent(), removed.parent());
        assert_eq!(vectorize.outputs(), vec![output]);
        Ok(())
    }

    #[test]
    fn test_stage_one_failure_stops_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let generate = MockStage::failing(StageKind::Generate, "quota exceeded");
        let remove = MockStage::writing(StageKind::RemoveBackground, b"png");
        let vectorize = MockStage::writing(StageKind::Vectorize, b"svg");

        let err = pipeline(&generate, &remove, &vectorize)
            .run(&PipelineRequest::new("robot", temp_dir.path().join("robot.svg")))
            .unwrap_err();

        assert_eq!(err.failed_stage_index(), Some(1));
        assert!(matches!(
            err.root_stage_error(),
            PipelineError::Upstream { .. }
        ));
        assert_eq!(remove.call_count(), 0);
        assert_eq!(vectorize.call_count(), 0);
    }

    #[test]
    fn test_stage_two_failure_stops_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("robot.svg");
        let generate = MockStage::writing(StageKind::Generate, b"png");
        let remove = MockStage::failing(StageKind::RemoveBackground, "bad upload");
        let vectorize = MockStage::writing(StageKind::Vectorize, b"svg");

        let err = pipeline(&generate, &remove, &vectorize)
            .run(&PipelineRequest::new("robot", &output))
            .unwrap_err();

        assert_eq!(err.failed_stage_index(), Some(2));
        assert_eq!(generate.call_count(), 1);
        assert_eq!(vectorize.call_count(), 0);
        assert!(!output.exists());
    }

    #[test]
    fn test_reported_success_without_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let generate = MockStage::new(StageKind::Generate, MockBehavior::SucceedWithoutWriting);
        let remove = MockStage::writing(StageKind::RemoveBackground, b"png");
        let vectorize = MockStage::writing(StageKind::Vectorize, b"svg");

        let err = pipeline(&generate, &remove, &vectorize)
            .run(&PipelineRequest::new("robot", temp_dir.path().join("robot.svg")))
            .unwrap_err();

        assert_eq!(err.failed_stage_index(), Some(1));
        assert!(matches!(
            err.root_stage_error(),
            PipelineError::EmptyResult { .. }
        ));
        assert_eq!(remove.call_count(), 0);
    }

    #[test]
    fn test_empty_artifact_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let generate = MockStage::writing(StageKind::Generate, b"png");
        let remove = MockStage::writing(StageKind::RemoveBackground, b"");
        let vectorize = MockStage::writing(StageKind::Vectorize, b"svg");

        let err = pipeline(&generate, &remove, &vectorize)
            .run(&PipelineRequest::new("robot", temp_dir.path().join("robot.svg")))
            .unwrap_err();

        assert_eq!(err.failed_stage_index(), Some(2));
        assert_eq!(vectorize.call_count(), 0);
    }

    #[test]
    fn test_run_directory_is_removed_on_every_exit() {
        let temp_dir = TempDir::new().unwrap();

        let generate = MockStage::writing(StageKind::Generate, b"png");
        let remove = MockStage::writing(StageKind::RemoveBackground, b"png");
        let vectorize = MockStage::writing(StageKind::Vectorize, b"svg");
        pipeline(&generate, &remove, &vectorize)
            .run(&PipelineRequest::new("robot", temp_dir.path().join("ok.svg")))
            .unwrap();
        let run_dir = generate.outputs()[0].parent().unwrap().to_path_buf();
        assert!(!run_dir.exists());

        let generate = MockStage::writing(StageKind::Generate, b"png");
        let remove = MockStage::failing(StageKind::RemoveBackground, "boom");
        let _ = pipeline(&generate, &remove, &vectorize)
            .run(&PipelineRequest::new("robot", temp_dir.path().join("fail.svg")));
        let run_dir = generate.outputs()[0].parent().unwrap().to_path_buf();
        assert!(!run_dir.exists());
    }

    #[test]
    fn test_missing_credentials_fail_before_network() {
        let transport = Arc::new(MockTransport::new());
        let settings = ServiceSettings::default();

        for credentials in [
            Credentials::new(None, Some("recraft-key".to_string())),
            Credentials::new(Some("gemini-key".to_string()), None),
        ] {
            let shared: Arc<dyn HttpTransport> = transport.clone();
            let result = AssetPipeline::from_settings(&settings, &credentials, shared);
            assert!(matches!(result, Err(PipelineError::Configuration { .. })));
        }
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_progress_advances_per_stage() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let progress = ProgressBar::hidden();
        let generate = MockStage::writing(StageKind::Generate, b"png");
        let remove = MockStage::writing(StageKind::RemoveBackground, b"png");
        let vectorize = MockStage::writing(StageKind::Vectorize, b"svg");

        pipeline(&generate, &remove, &vectorize)
            .with_progress(progress.clone())
            .run(&PipelineRequest::new("robot", temp_dir.path().join("robot.svg")))?;

        assert_eq!(progress.position(), 3);
        assert_eq!(progress.length(), Some(3));
        Ok(())
    }
}
