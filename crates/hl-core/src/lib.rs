pub mod config;
pub mod error;
pub mod geometry;
pub mod keypoints;
pub mod progress;
pub mod sync;
pub mod types;

pub use config::{Codec, LabelingConfig, OverlayStyle};
pub use error::{KeypointParseWarning, LabelError, Result};
pub use geometry::{FitGeometry, landmark_to_viewport, rotate_normalized};
pub use keypoints::{KeypointLogReader, KeypointLogReport};
pub use progress::{CancellationToken, ProgressReporter};
pub use sync::KeypointMatcher;
pub use types::*;
