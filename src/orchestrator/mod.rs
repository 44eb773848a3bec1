//! Application-level orchestration utilities.
//!
//! This module owns the job lifecycle (submit, observe, reconcile, halt) and post-job
//! processing such as outcome building and exports. The CLI calls into this module to keep
//! responsibilities separated.

mod controller;
mod post_process;
mod reconciler;

pub(crate) use controller::{run_job_controller, TrackedJob};
pub(crate) use post_process::process_job_completion;
pub use reconciler::PresentationState;
