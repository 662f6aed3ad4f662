use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing_subscriber::EnvFilter;

use asset_pipeline::config::{Action, Command};
use asset_pipeline::gemini::GeminiClient;
use asset_pipeline::recraft::RecraftClient;
use asset_pipeline::{
    execute_verified, Artifact, ArtifactRole, AssetPipeline, Config, ConversionStage,
    Credentials, GenerateStage, HttpTransport, PipelineRequest, ReqwestTransport,
    ServiceSettings, Stage, StageInput, StageOutput,
};

/// stderr writer that clears the progress bar around each log line.
struct ProgressAwareWriter(ProgressBar);

impl Write for ProgressAwareWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn main() -> Result<()> {
    // 描画先は pipeline 実行時にのみ有効化する
    let progress = ProgressBar::with_draw_target(Some(3), ProgressDrawTarget::hidden());
    let log_progress = progress.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(move || ProgressAwareWriter(log_progress.clone()))
        .init();

    let config = Config::parse();
    let credentials = Credentials::from_env();
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config.service.timeout())?);

    match config.command {
        Command::Generate {
            prompt,
            output,
            reference,
        } => generate(&config.service, &credentials, transport, &prompt, &output, reference.as_deref()),
        Command::Process {
            action,
            input,
            output,
        } => process(&config.service, &credentials, transport, action, &input, &output),
        Command::Pipeline {
            prompt,
            output,
            reference,
        } => {
            let mut request = PipelineRequest::new(prompt, output);
            if let Some(reference) = reference {
                request = request.with_reference(reference);
            }
            pipeline(&config.service, &credentials, transport, &request, progress)
        }
    }
}

fn generate(
    settings: &ServiceSettings,
    credentials: &Credentials,
    transport: Arc<dyn HttpTransport>,
    prompt: &str,
    output: &Path,
    reference: Option<&Path>,
) -> Result<()> {
    let client = GeminiClient::new(transport, credentials.gemini()?.clone(), settings);
    let stage = GenerateStage::new(client);
    let result = execute_verified(&stage, &StageInput::Prompt { prompt, reference }, output)?;

    print_notes(&result);
    println!("Image saved to: {}", result.artifact.path.display());
    Ok(())
}

fn process(
    settings: &ServiceSettings,
    credentials: &Credentials,
    transport: Arc<dyn HttpTransport>,
    action: Action,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let client = RecraftClient::new(transport, credentials.recraft()?.clone(), settings);
    let stage = ConversionStage::new(client, action.endpoint());

    let role = match action {
        Action::RemoveBg => ArtifactRole::Generated,
        Action::Vectorize => ArtifactRole::BackgroundRemoved,
    };
    let source = Artifact::from_input(input, role)
        .with_context(|| format!("Input image is not usable: {}", input.display()))?;
    let result = execute_verified(&stage, &StageInput::Artifact(&source), output)?;

    println!("{} saved to: {}", stage.kind(), result.artifact.path.display());
    Ok(())
}

fn pipeline(
    settings: &ServiceSettings,
    credentials: &Credentials,
    transport: Arc<dyn HttpTransport>,
    request: &PipelineRequest,
    progress: ProgressBar,
) -> Result<()> {
    let pipeline = AssetPipeline::from_settings(settings, credentials, transport)?;

    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("#>-"),
    );
    progress.set_draw_target(ProgressDrawTarget::stderr());
    progress.enable_steady_tick(Duration::from_millis(120));
    let pipeline = pipeline.with_progress(progress);
    let report = pipeline.run(request)?;

    for stage in &report.stages {
        println!(
            "Step {}: {} ({:.0} KB, {:.1}s)",
            stage.kind.index(),
            stage.kind,
            stage.artifact.size_kb(),
            stage.elapsed.as_secs_f64()
        );
        for note in &stage.notes {
            println!("  Model response: {note}");
        }
    }
    println!(
        "Pipeline: Gemini -> Recraft BG -> Recraft SVG, saved to: {}",
        report.final_artifact.path.display()
    );
    Ok(())
}

fn print_notes(result: &StageOutput) {
    for note in &result.notes {
        println!("Model response: {note}");
    }
}
