use crate::jobs::{Cancelled, DuplicateJob, JobGuard, JobRegistry};
use crate::summary::backend::{BackendError, Transcriber};
use crate::summary::extraction::StructuredExtractor;
use crate::summary::processor::{Summarizer, DEFAULT_MIN_LENGTH};
use crate::summary::schemas::{ExtractedItem, ExtractionKind};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    DuplicateJob(#[from] DuplicateJob),
    #[error("Transcription failed: {0}")]
    Transcription(#[source] BackendError),
    #[error("No transcriber is configured for audio input")]
    NoTranscriber,
    #[error("Failed to buffer upload: {0}")]
    Upload(#[from] std::io::Error),
}

impl PipelineError {
    /// Cancellation is a user action, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled(_))
    }
}

/// Which stages a job runs and with what length bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub summarize: bool,
    pub extract: bool,
    pub target_length: Option<usize>,
    pub min_length: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            summarize: true,
            extract: true,
            target_length: None,
            min_length: DEFAULT_MIN_LENGTH,
        }
    }
}

/// Everything a finished job produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeetingReport {
    pub transcript: String,
    pub summary: String,
    pub action_items: Vec<ExtractedItem>,
    pub decisions: Vec<ExtractedItem>,
}

/// Meeting pipeline: transcribe -> summarize -> extract.
///
/// Every stage is bracketed by cancellation checkpoints. Backend handles are
/// created once by the caller and shared; the service owns no model state.
pub struct MeetingService {
    registry: Arc<JobRegistry>,
    summarizer: Summarizer,
    extractor: StructuredExtractor,
    transcriber: Option<Arc<dyn Transcriber>>,
    upload_dir: Option<PathBuf>,
}

impl MeetingService {
    pub fn new(registry: Arc<JobRegistry>, summarizer: Summarizer, extractor: StructuredExtractor) -> Self {
        Self {
            registry,
            summarizer,
            extractor,
            transcriber: None,
            upload_dir: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Directory for buffered uploads; the system temp dir when unset
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }

    pub fn extractor(&self) -> &StructuredExtractor {
        &self.extractor
    }

    /// Marks `job_id` cancelled; returns false for unknown ids
    pub fn cancel(&self, job_id: &str) -> bool {
        self.registry.cancel(job_id)
    }

    /// Runs the full pipeline over an uploaded audio file.
    ///
    /// The upload is written to a temporary file that is removed on every exit
    /// path, and the job is unregistered the same way.
    pub async fn process_upload(
        &self,
        job_id: &str,
        file_name: &str,
        bytes: &[u8],
        options: &PipelineOptions,
    ) -> Result<MeetingReport, PipelineError> {
        let job = self.registry.start(job_id)?;
        let start = Instant::now();
        info!(
            "🚀 Starting job {} for upload '{}' ({} bytes)",
            job_id,
            file_name,
            bytes.len()
        );

        let transcriber = self.transcriber.as_ref().ok_or(PipelineError::NoTranscriber)?;
        let upload = self.buffer_upload(file_name, bytes)?;

        job.checkpoint("transcription")?;
        let transcript = transcriber
            .transcribe(upload.path())
            .await
            .map_err(|e| {
                error!("❌ Transcription failed for job {}: {}", job_id, e);
                PipelineError::Transcription(e)
            })?;
        job.checkpoint("post-transcription")?;
        // The audio is no longer needed once transcribed
        drop(upload);

        let report = self.run_stages(&job, transcript, options).await;
        Self::log_outcome(job_id, start, &report);
        report
    }

    /// Runs summarization and extraction over an existing transcript
    pub async fn process_transcript(
        &self,
        job_id: &str,
        text: &str,
        options: &PipelineOptions,
    ) -> Result<MeetingReport, PipelineError> {
        let job = self.registry.start(job_id)?;
        let start = Instant::now();
        info!("🚀 Starting job {} ({} chars of transcript)", job_id, text.len());

        let report = self.run_stages(&job, text.to_string(), options).await;
        Self::log_outcome(job_id, start, &report);
        report
    }

    async fn run_stages(
        &self,
        job: &JobGuard,
        transcript: String,
        options: &PipelineOptions,
    ) -> Result<MeetingReport, PipelineError> {
        if transcript.trim().is_empty() {
            warn!("⚠️ Job {} has an empty transcript", job.job_id());
        }

        let mut report = MeetingReport {
            transcript,
            ..Default::default()
        };

        job.checkpoint("summarization")?;
        if options.summarize {
            report.summary = self
                .summarizer
                .summarize_job(
                    &report.transcript,
                    options.target_length,
                    options.min_length,
                    job,
                )
                .await?;
            job.checkpoint("action item extraction")?;
        }

        if options.extract {
            report.action_items = self
                .extractor
                .extract(ExtractionKind::ActionItems, &report.transcript)
                .await;
            job.checkpoint("decision extraction")?;
            report.decisions = self
                .extractor
                .extract(ExtractionKind::Decisions, &report.transcript)
                .await;
            job.checkpoint("completion")?;
        }

        Ok(report)
    }

    fn buffer_upload(&self, file_name: &str, bytes: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
        let suffix = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        let mut builder = tempfile::Builder::new();
        builder.prefix("upload-").suffix(&suffix);
        let mut file = match &self.upload_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;
        Ok(file)
    }

    fn log_outcome(job_id: &str, start: Instant, report: &Result<MeetingReport, PipelineError>) {
        let elapsed = start.elapsed().as_secs_f64();
        match report {
            Ok(_) => info!("✅ Job {} completed in {:.2}s", job_id, elapsed),
            Err(PipelineError::Cancelled(c)) => {
                info!("🛑 Job {} cancelled before {} after {:.2}s", job_id, c.stage, elapsed)
            }
            Err(e) => error!("❌ Job {} failed after {:.2}s: {}", job_id, elapsed, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::backend::{Condenser, Generator};
    use crate::summary::tokens::LengthEstimator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingCondenser {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Condenser for CountingCondenser {
        async fn condense(&self, _: &str, _: usize, _: usize) -> Result<String, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("part {}", n))
        }
    }

    #[derive(Default)]
    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for CountingGenerator {
        async fn generate(&self, _: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"[{"title": "Follow up"}]"#.to_string())
        }
    }

    /// Records the path it was given and whether the file existed at the time
    #[derive(Default)]
    struct FileCheckingTranscriber {
        seen: Mutex<Option<(PathBuf, bool)>>,
        fail: bool,
    }

    #[async_trait]
    impl Transcriber for FileCheckingTranscriber {
        async fn transcribe(&self, audio_path: &Path) -> Result<String, BackendError> {
            *self.seen.lock().unwrap() = Some((audio_path.to_path_buf(), audio_path.exists()));
            if self.fail {
                return Err(BackendError::RequestFailed("decoder crashed".to_string()));
            }
            Ok("We will ship on Friday. Alex owns the release notes.".to_string())
        }
    }

    /// Cancels its job from inside the first backend call
    struct CancellingCondenser {
        registry: Arc<JobRegistry>,
        job_id: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Condenser for CancellingCondenser {
        async fn condense(&self, _: &str, _: usize, _: usize) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.registry.cancel(&self.job_id);
            Ok("partial".to_string())
        }
    }

    fn service_with(
        registry: Arc<JobRegistry>,
        condenser: Arc<dyn Condenser>,
        generator: Arc<dyn Generator>,
        max_chunk_cost: usize,
    ) -> MeetingService {
        let summarizer = Summarizer::new(condenser, LengthEstimator::word_count(), max_chunk_cost);
        let extractor = StructuredExtractor::new(generator).unwrap();
        MeetingService::new(registry, summarizer, extractor)
    }

    #[tokio::test]
    async fn test_process_transcript_runs_all_stages() {
        let registry = Arc::new(JobRegistry::new());
        let condenser = Arc::new(CountingCondenser::default());
        let generator = Arc::new(CountingGenerator::default());
        let service = service_with(registry.clone(), condenser.clone(), generator.clone(), 1024);

        let report = service
            .process_transcript("job-1", "Alice will send the notes.", &PipelineOptions::default())
            .await
            .unwrap();

        assert_eq!(report.summary, "part 1");
        assert_eq!(report.action_items[0].title(), Some("Follow up"));
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(condenser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_options_skip_stages() {
        let registry = Arc::new(JobRegistry::new());
        let condenser = Arc::new(CountingCondenser::default());
        let generator = Arc::new(CountingGenerator::default());
        let service = service_with(registry, condenser.clone(), generator.clone(), 1024);
        let options = PipelineOptions {
            extract: false,
            ..Default::default()
        };

        let report = service
            .process_transcript("job-2", "Short meeting.", &options)
            .await
            .unwrap();

        assert!(report.action_items.is_empty());
        assert!(report.decisions.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_summary_stops_before_next_call() {
        let registry = Arc::new(JobRegistry::new());
        let condenser = Arc::new(CancellingCondenser {
            registry: registry.clone(),
            job_id: "job-3".to_string(),
            calls: AtomicUsize::new(0),
        });
        let generator = Arc::new(CountingGenerator::default());
        // Budget of 2 words gives one chunk per sentence
        let service = service_with(registry.clone(), condenser.clone(), generator.clone(), 2);

        let err = service
            .process_transcript("job-3", "One two. Three four. Five six.", &PipelineOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(condenser.calls.load(Ordering::SeqCst), 1);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_upload_is_buffered_and_removed() {
        let registry = Arc::new(JobRegistry::new());
        let transcriber = Arc::new(FileCheckingTranscriber::default());
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            registry.clone(),
            Arc::new(CountingCondenser::default()),
            Arc::new(CountingGenerator::default()),
            1024,
        )
        .with_transcriber(transcriber.clone())
        .with_upload_dir(dir.path());

        let report = service
            .process_upload("job-4", "standup.wav", b"RIFF....", &PipelineOptions::default())
            .await
            .unwrap();

        assert!(report.transcript.starts_with("We will ship"));
        let (path, existed) = transcriber.seen.lock().unwrap().clone().unwrap();
        assert!(existed);
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));
        assert!(!path.exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_transcription_failure_cleans_up() {
        let registry = Arc::new(JobRegistry::new());
        let transcriber = Arc::new(FileCheckingTranscriber {
            fail: true,
            ..Default::default()
        });
        let service = service_with(
            registry.clone(),
            Arc::new(CountingCondenser::default()),
            Arc::new(CountingGenerator::default()),
            1024,
        )
        .with_transcriber(transcriber.clone());

        let err = service
            .process_upload("job-5", "call.mp3", b"ID3", &PipelineOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transcription(_)));
        assert!(!err.is_cancelled());
        let (path, _) = transcriber.seen.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_transcriber() {
        let registry = Arc::new(JobRegistry::new());
        let service = service_with(
            registry.clone(),
            Arc::new(CountingCondenser::default()),
            Arc::new(CountingGenerator::default()),
            1024,
        );

        let err = service
            .process_upload("job-6", "a.wav", b"", &PipelineOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::NoTranscriber));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_same_job_id_cannot_run_twice() {
        let registry = Arc::new(JobRegistry::new());
        let service = service_with(
            registry.clone(),
            Arc::new(CountingCondenser::default()),
            Arc::new(CountingGenerator::default()),
            1024,
        );
        let running = registry.start("job-7").unwrap();

        let err = service
            .process_transcript("job-7", "Another run.", &PipelineOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::DuplicateJob(_)));
        assert!(!err.is_cancelled());
        // The rejected run must not unregister the running one
        assert!(service.cancel("job-7"));
        assert!(running.is_cancelled());
    }
}
