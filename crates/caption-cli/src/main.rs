//! Caption - command-line front-end for the caption orchestration core
//!
//! The `caption` command wires the core to a file image source and the
//! built-in placeholder backend, for local smoke runs.
//!
//! ## Commands
//!
//! - `run`: caption an image with one prompt, or several tried in order
//! - `inspect`: print image information
//! - `health`: initialize the system and print its health report

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, Level};

use caption_core::fakes::{ScriptedModel, StaticLoader};
use caption_core::metrics::METRICS;
use caption_core::{
    CaptionConfig, Coordinator, DevicePreference, EnvDeviceProbe, FileImageSource, ImageRef,
    ImageSource, ResizePreprocessor,
};

#[derive(Parser)]
#[command(name = "caption")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Image captioning orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Model identifier
    #[arg(long, global = true, env = "CAPTION_MODEL_ID")]
    model: Option<String>,

    /// Device preference: auto, cpu or cuda
    #[arg(long, global = true, env = "CAPTION_DEVICE")]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Caption an image
    Run {
        /// Path to the image file
        image: PathBuf,

        /// Prompt to condition the caption on
        #[arg(short, long, conflicts_with = "prompts")]
        prompt: Option<String>,

        /// Prompts to try in order until one succeeds (repeatable)
        #[arg(long = "prompts", num_args = 1..)]
        prompts: Vec<String>,

        /// Maximum number of generated tokens
        #[arg(short, long)]
        max_tokens: Option<u32>,

        /// Abort inference after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print dimensions, color type and format of an image
    Inspect {
        /// Path to the image file
        image: PathBuf,
    },

    /// Initialize the system and print its health report
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    caption_core::init_tracing(cli.json, level);

    let config = load_config(cli.model.as_deref(), cli.device.as_deref())?;

    match cli.command {
        Commands::Run {
            image,
            prompt,
            prompts,
            max_tokens,
            timeout_ms,
        } => {
            let config = match timeout_ms {
                Some(ms) => config.with_inference_timeout(Duration::from_millis(ms)),
                None => config,
            };
            cmd_run(&config, &image, prompt, &prompts, max_tokens).await
        }
        Commands::Inspect { image } => cmd_inspect(&config, &image),
        Commands::Health => cmd_health(&config).await,
    }
}

fn load_config(model: Option<&str>, device: Option<&str>) -> Result<CaptionConfig> {
    let mut config = CaptionConfig::from_env().context("Invalid CAPTION_* environment")?;
    if let Some(model) = model {
        config = config.with_model_id(model);
    }
    if let Some(device) = device {
        let preference: DevicePreference = device.parse()?;
        config = config.with_device(preference);
    }
    config.validate()?;
    Ok(config)
}

fn build_coordinator(config: &CaptionConfig) -> Coordinator {
    Coordinator::from_parts(
        config,
        Arc::new(StaticLoader::new(ScriptedModel::describing_dimensions())),
        Arc::new(EnvDeviceProbe),
        Arc::new(ResizePreprocessor::new(config.max_dimension)),
    )
}

/// Caption an image and print the record as JSON.
async fn cmd_run(
    config: &CaptionConfig,
    path: &Path,
    prompt: Option<String>,
    prompts: &[String],
    max_tokens: Option<u32>,
) -> Result<()> {
    let source = FileImageSource::new(config.max_upload_bytes);
    let image = source
        .load(&ImageRef::Path(path.to_path_buf()))
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let coordinator = build_coordinator(config);
    coordinator
        .try_initialize()
        .await
        .context("System initialization failed")?;

    let max_tokens = max_tokens.unwrap_or(config.default_max_tokens);
    let record = if prompts.is_empty() {
        let prompt = prompt.unwrap_or_else(|| config.default_prompt.clone());
        coordinator.run_workflow(image, &prompt, max_tokens).await
    } else {
        coordinator
            .run_workflow_multi_prompt(image, prompts, max_tokens)
            .await
    };

    println!("{}", serde_json::to_string_pretty(&record)?);
    coordinator.cleanup().await;
    METRICS.flush();

    if !record.success {
        anyhow::bail!(
            "Analysis failed: {}",
            record.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    info!(record_id = %record.id, "caption generated");
    Ok(())
}

/// Print image information.
fn cmd_inspect(config: &CaptionConfig, path: &Path) -> Result<()> {
    let source = FileImageSource::new(config.max_upload_bytes);
    let image = source
        .load(&ImageRef::Path(path.to_path_buf()))
        .with_context(|| format!("Failed to load {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&image.info())?);
    Ok(())
}

/// Initialize, then print health and status.
async fn cmd_health(config: &CaptionConfig) -> Result<()> {
    let coordinator = build_coordinator(config);
    let initialized = coordinator.initialize().await;

    let report = coordinator.health_check();
    let status = coordinator.get_status();
    let output = json!({
        "initialized": initialized,
        "health": report,
        "status": status,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    coordinator.cleanup().await;
    METRICS.flush();
    if !report.is_healthy() {
        anyhow::bail!("System unhealthy: {}", report.issues.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_cli_parses_multi_prompt_run() {
        let cli = Cli::parse_from([
            "caption",
            "run",
            "photo.png",
            "--prompts",
            "a photography of",
            "a picture of",
            "--max-tokens",
            "20",
        ]);
        match cli.command {
            Commands::Run {
                image,
                prompts,
                max_tokens,
                ..
            } => {
                assert_eq!(image, PathBuf::from("photo.png"));
                assert_eq!(prompts, vec!["a photography of", "a picture of"]);
                assert_eq!(max_tokens, Some(20));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_load_config_rejects_unknown_device() {
        assert!(load_config(None, Some("tpu")).is_err());
        let config = load_config(Some("local/blip"), Some("cpu")).unwrap();
        assert_eq!(config.model_id, "local/blip");
        assert_eq!(config.device, DevicePreference::Cpu);
    }

    #[tokio::test]
    async fn test_placeholder_backend_is_healthy() {
        let coordinator = build_coordinator(&CaptionConfig::default());
        assert!(coordinator.initialize().await);
        assert!(coordinator.health_check().is_healthy());
    }

    #[traced_test]
    #[tokio::test]
    async fn test_health_command_flushes_metrics() {
        cmd_health(&CaptionConfig::default()).await.unwrap();
        assert!(logs_contain("metric=\"flush\""));
        assert!(logs_contain("model_loads="));
    }
}
