//! Burns hand-skeleton overlays onto recorded session videos.
//!
//! ```no_run
//! use hl_core::LabelingConfig;
//! use hl_labeler::{DefaultBackend, VideoLabelingOrchestrator};
//! use std::path::Path;
//!
//! let mut labeler = VideoLabelingOrchestrator::new(DefaultBackend, LabelingConfig::default());
//! let output = labeler.process_video(Path::new("session"), |p| println!("{:.0}%", p * 100.0))?;
//! # Ok::<(), hl_core::LabelError>(())
//! ```

pub mod backend;
pub mod orchestrator;
pub mod session;

pub use backend::{DefaultBackend, LabelingBackend};
pub use orchestrator::{LabelingOutcome, LoopStats, RunState, VideoLabelingOrchestrator};
pub use session::SessionInputs;

/// Whether labeling can run with the default backend on this device.
pub fn is_supported() -> bool {
    VideoLabelingOrchestrator::new(DefaultBackend, hl_core::LabelingConfig::default()).is_supported()
}
