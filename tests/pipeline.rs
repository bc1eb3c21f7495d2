use async_trait::async_trait;
use meeting_summarizer::jobs::JobRegistry;
use meeting_summarizer::summary::chunker::chunk_text;
use meeting_summarizer::summary::extraction::is_sentinel;
use meeting_summarizer::summary::processor::placeholder_for_chunk;
use meeting_summarizer::summary::schemas::ExtractionKind;
use meeting_summarizer::summary::{
    BackendError, Condenser, Generator, LengthEstimator, MeetingService, PipelineError,
    PipelineOptions, StructuredExtractor, Summarizer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 625 sentences of 8 words each: 5000 words
fn long_transcript() -> String {
    (0..625)
        .map(|i| format!("Speaker {} said the plan needs more review.", i % 7))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Default)]
struct MockCondenser {
    calls: AtomicUsize,
}

#[async_trait]
impl Condenser for MockCondenser {
    async fn condense(&self, _text: &str, _max: usize, _min: usize) -> Result<String, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("Summary of part {}.", n))
    }
}

#[derive(Default)]
struct FailingCondenser {
    calls: AtomicUsize,
}

#[async_trait]
impl Condenser for FailingCondenser {
    async fn condense(&self, _text: &str, _max: usize, _min: usize) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::RequestFailed("out of memory".to_string()))
    }
}

/// Slow condenser so a cancel can land between chunks
#[derive(Default)]
struct SlowCondenser {
    calls: AtomicUsize,
}

#[async_trait]
impl Condenser for SlowCondenser {
    async fn condense(&self, _text: &str, _max: usize, _min: usize) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("ok".to_string())
    }
}

struct CannedGenerator(&'static str);

#[async_trait]
impl Generator for CannedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, BackendError> {
        Ok(self.0.to_string())
    }
}

#[test]
fn long_transcript_chunks_stay_within_budget() {
    let estimator = LengthEstimator::word_count();
    let text = long_transcript();

    let chunks = chunk_text(&text, 1024, &estimator);

    assert_eq!(chunks.len(), 5);
    for chunk in &chunks {
        assert!(estimator.estimate(chunk.text()) <= 1024);
    }
    let rejoined = chunks
        .iter()
        .map(|c| c.text())
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(rejoined, text);
}

#[tokio::test]
async fn long_transcript_makes_one_call_per_chunk() {
    let condenser = Arc::new(MockCondenser::default());
    let summarizer = Summarizer::new(condenser.clone(), LengthEstimator::word_count(), 1024);

    let summary = summarizer.summarize(&long_transcript(), None, 30).await;

    assert_eq!(condenser.calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        summary,
        "Summary of part 1. Summary of part 2. Summary of part 3. Summary of part 4. Summary of part 5."
    );
}

#[tokio::test]
async fn failing_backend_degrades_to_placeholders() {
    let condenser = Arc::new(FailingCondenser::default());
    // Budget large enough that the joined placeholders skip the second pass
    let summarizer = Summarizer::new(condenser.clone(), LengthEstimator::word_count(), 1024);

    let summary = summarizer.summarize(&long_transcript(), None, 30).await;

    let expected = (1..=5)
        .map(placeholder_for_chunk)
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(summary, expected);
    assert_eq!(condenser.calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn unparseable_extraction_returns_sentinel() {
    let extractor =
        StructuredExtractor::new(Arc::new(CannedGenerator("I could not find anything useful."))).unwrap();

    let items = extractor.extract_action_items("Quick sync, nothing to report.").await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title(), Some("No action items found"));
    assert!(is_sentinel(&items, extractor.schema(ExtractionKind::ActionItems)));
}

#[tokio::test]
async fn cancel_from_another_task_stops_the_job() {
    let registry = Arc::new(JobRegistry::new());
    let condenser = Arc::new(SlowCondenser::default());
    let summarizer = Summarizer::new(condenser.clone(), LengthEstimator::word_count(), 8);
    let extractor = StructuredExtractor::new(Arc::new(CannedGenerator("[]"))).unwrap();
    let service = Arc::new(MeetingService::new(registry.clone(), summarizer, extractor));

    let job = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .process_transcript("meeting-7", &long_transcript(), &PipelineOptions::default())
                .await
        })
    };

    // Wait until the job is registered and has started condensing
    while condenser.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(service.cancel("meeting-7"));

    let result = job.await.unwrap();

    match result {
        Err(PipelineError::Cancelled(cancelled)) => assert_eq!(cancelled.job_id, "meeting-7"),
        other => panic!("expected cancellation, got {:?}", other.map(|r| r.summary)),
    }
    // 625 one-sentence chunks; only a handful ran before the cancel
    assert!(condenser.calls.load(Ordering::SeqCst) < 625);
    assert!(registry.is_empty());
    assert!(!service.cancel("meeting-7"));
}

/// Cancels one fixed job id from inside every backend call
struct CancelsJob {
    registry: Arc<JobRegistry>,
    target: &'static str,
}

#[async_trait]
impl Condenser for CancelsJob {
    async fn condense(&self, _text: &str, _max: usize, _min: usize) -> Result<String, BackendError> {
        self.registry.cancel(self.target);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok("ok".to_string())
    }
}

#[tokio::test]
async fn cancelling_one_job_leaves_the_other_running() {
    let registry = Arc::new(JobRegistry::new());
    let condenser = Arc::new(CancelsJob {
        registry: registry.clone(),
        target: "doomed",
    });
    let summarizer = Summarizer::new(condenser, LengthEstimator::word_count(), 8);
    let extractor = StructuredExtractor::new(Arc::new(CannedGenerator("[]"))).unwrap();
    let service = MeetingService::new(registry.clone(), summarizer, extractor);
    let options = PipelineOptions {
        extract: false,
        ..Default::default()
    };
    // Two 6-word sentences, one chunk each
    let text = "First point is settled for now. Second point needs more data today.";

    let (doomed, kept) = futures::future::join(
        service.process_transcript("doomed", text, &options),
        service.process_transcript("kept", text, &options),
    )
    .await;

    assert!(doomed.unwrap_err().is_cancelled());
    assert_eq!(kept.unwrap().summary, "ok ok");
    assert!(registry.is_empty());
}

#[tokio::test]
async fn cancel_unknown_job_is_rejected() {
    let registry = Arc::new(JobRegistry::new());
    assert!(!registry.cancel("no-such-job"));
}
