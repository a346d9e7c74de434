//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::InsightConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its states and as the report is
//! delivered. The CLI uses this to drive its progress bar; a web front end
//! could forward the same events over a channel.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf_insight::{PipelineProgressCallback, PipelineState};
//! use std::sync::{Arc, Mutex};
//!
//! struct Recorder {
//!     seen: Mutex<Vec<PipelineState>>,
//! }
//!
//! impl PipelineProgressCallback for Recorder {
//!     fn on_stage_start(&self, state: PipelineState) {
//!         self.seen.lock().unwrap().push(state);
//!     }
//! }
//!
//! let cb = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
//! cb.on_stage_start(PipelineState::ExtractingText);
//! assert_eq!(cb.seen.lock().unwrap().len(), 1);
//! ```

use crate::output::PipelineState;
use std::sync::Arc;

/// Called by the pipeline and session as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`.
pub trait PipelineProgressCallback: Send + Sync {
    /// A working stage is about to start.
    fn on_stage_start(&self, state: PipelineState) {
        let _ = state;
    }

    /// A working stage finished successfully.
    ///
    /// # Arguments
    /// * `state`: the stage that finished
    /// * `output_len`: byte length of what the stage produced
    fn on_stage_complete(&self, state: PipelineState, output_len: usize) {
        let _ = (state, output_len);
    }

    /// The pipeline entered [`PipelineState::Failed`] while in `state`.
    fn on_failed(&self, state: PipelineState, error: &str) {
        let _ = (state, error);
    }

    /// The pipeline reached [`PipelineState::Done`].
    fn on_done(&self, total_ms: u64) {
        let _ = total_ms;
    }

    /// The report email is about to be sent.
    fn on_delivery_start(&self, recipient: &str) {
        let _ = recipient;
    }

    /// The delivery attempt finished; `error` is `None` on success.
    fn on_delivery_complete(&self, error: Option<&str>) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::InsightConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
