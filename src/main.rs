//! meeting-summarizer - summarize meeting transcripts and pull out action
//! items and decisions with a local or hosted LLM.
//!
//! # Usage
//!
//! ```bash
//! meeting-summarizer summarize transcript.txt --target-length 200
//! meeting-summarizer extract actions transcript.txt
//! meeting-summarizer --config config.json process transcript.txt
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use meeting_summarizer::config::AppConfig;
use meeting_summarizer::jobs::JobRegistry;
use meeting_summarizer::summary::schemas::ExtractionKind;
use meeting_summarizer::summary::{
    LlmClient, MeetingService, PipelineError, PipelineOptions, StructuredExtractor, Summarizer,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Exit status for a job the user cancelled
const EXIT_CANCELLED: u8 = 130;

/// How often a pending Ctrl-C retries until the job is registered
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "meeting-summarizer", version, about)]
struct Cli {
    /// JSON config file (defaults are used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a summary of a transcript file
    Summarize {
        file: PathBuf,

        /// Upper bound on summary length per chunk
        #[arg(long)]
        target_length: Option<usize>,

        /// Lower bound on summary length per chunk
        #[arg(long)]
        min_length: Option<usize>,
    },
    /// Print action items or decisions as JSON
    Extract {
        /// "actions" or "decisions"
        kind: ExtractionKind,
        file: PathBuf,
    },
    /// Run the whole pipeline and print the report as JSON. Ctrl-C cancels.
    Process {
        file: PathBuf,

        /// Treat FILE as audio and transcribe it first
        #[arg(long)]
        audio: bool,

        /// Skip action item and decision extraction
        #[arg(long)]
        no_extract: bool,

        #[arg(long)]
        target_length: Option<usize>,

        #[arg(long)]
        min_length: Option<usize>,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<PipelineError>() {
            Some(pipeline_error) if pipeline_error.is_cancelled() => {
                warn!("{}", pipeline_error);
                ExitCode::from(EXIT_CANCELLED)
            }
            _ => {
                error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn read_transcript(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read transcript {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load config")?;

    let client = Arc::new(LlmClient::from_config(&config)?);
    client
        .verify()
        .await
        .context("LLM backend is not available")?;

    let summarizer = Summarizer::new(client.clone(), config.estimator(), config.max_chunk_cost)
        .with_default_target_length(config.target_length);
    let extractor = StructuredExtractor::new(client.clone())?;

    match cli.command {
        Command::Summarize {
            file,
            target_length,
            min_length,
        } => {
            let text = read_transcript(&file).await?;
            let summary = summarizer
                .summarize(
                    &text,
                    target_length,
                    min_length.unwrap_or(config.min_length),
                )
                .await;
            println!("{}", summary);
        }
        Command::Extract { kind, file } => {
            let text = read_transcript(&file).await?;
            let items = extractor.extract(kind, &text).await;
            print_json(&items)?;
        }
        Command::Process {
            file,
            audio,
            no_extract,
            target_length,
            min_length,
        } => {
            let registry = Arc::new(JobRegistry::new());
            let service = MeetingService::new(registry.clone(), summarizer, extractor);
            let options = PipelineOptions {
                summarize: true,
                extract: !no_extract,
                target_length,
                min_length: min_length.unwrap_or(config.min_length),
            };

            let job_id = Uuid::new_v4().to_string();
            let cancel_watch = spawn_cancel_on_ctrl_c(registry, job_id.clone());
            info!("Processing {} as job {}", file.display(), job_id);

            let report = if audio {
                let bytes = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("failed to read audio {}", file.display()))?;
                let file_name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                service
                    .process_upload(&job_id, &file_name, &bytes, &options)
                    .await
            } else {
                let text = read_transcript(&file).await?;
                service.process_transcript(&job_id, &text, &options).await
            };
            cancel_watch.abort();

            print_json(&report?)?;
        }
    }

    Ok(())
}

/// First Ctrl-C cancels the job at its next checkpoint; a second one exits.
fn spawn_cancel_on_ctrl_c(registry: Arc<JobRegistry>, job_id: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Ctrl-C received, cancelling job {} (press again to abort)", job_id);

        // The job may not be registered yet, so keep retrying the cancel
        tokio::select! {
            _ = registry.cancel_when_registered(&job_id, CANCEL_POLL) => {}
            second = tokio::signal::ctrl_c() => {
                if second.is_ok() {
                    std::process::exit(i32::from(EXIT_CANCELLED));
                }
                return;
            }
        }

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
    })
}
