//! Meeting transcript summarization and structured extraction.
//!
//! Long transcripts are split into sentence-aligned chunks that fit a model's
//! input budget, condensed chunk by chunk and joined. Action items and
//! decisions are extracted into flat records with a two-tier parse. Every job
//! can be cancelled cooperatively through [`jobs::JobRegistry`].

pub mod config;
pub mod jobs;
pub mod summary;
