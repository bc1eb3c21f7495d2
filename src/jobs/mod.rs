pub mod registry;

pub use registry::{Cancelled, DuplicateJob, JobGuard, JobRegistry};
