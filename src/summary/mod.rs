pub mod backend;
pub mod chunker;
pub mod extraction;
pub mod llm_client;
pub mod processor;
pub mod schemas;
pub mod service;
pub mod tokens;

pub use backend::{BackendError, Condenser, Generator, Transcriber};
pub use extraction::StructuredExtractor;
pub use llm_client::LlmClient;
pub use processor::Summarizer;
pub use service::{MeetingReport, MeetingService, PipelineError, PipelineOptions};
pub use tokens::LengthEstimator;
