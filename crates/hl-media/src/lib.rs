//! Source video access: metadata probing and on-demand frame extraction.

pub mod memory;
pub mod rotate;
pub mod selector;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use hl_core::{LabelError, Rotation, VideoFrame, VideoMetadata};
use std::path::Path;
use thiserror::Error;

pub use memory::MemoryVideo;
pub use rotate::rotate_frame;
pub use selector::ClosestFrameSelector;

pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to open {0}")]
    Open(String),

    #[error("No video stream")]
    NoVideoStream,

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("No decodable frames")]
    NoFrames,

    #[error("Media backend unavailable: {0}")]
    Unsupported(String),
}

impl From<MediaError> for LabelError {
    fn from(e: MediaError) -> Self {
        LabelError::MediaUnreadable(e.to_string())
    }
}

/// Reads container metadata for a source video.
pub trait VideoProbe {
    fn probe(&self, path: &Path, target_fps: u32) -> Result<VideoMetadata>;
}

/// Decodes frames on demand.
///
/// Requests are expected at non-decreasing presentation times; each returns
/// the decoded frame closest to the request, already rotated upright.
pub trait FrameSource {
    fn extract_frame(&mut self, presentation_time_us: i64) -> Result<VideoFrame>;
}

/// Probe backed by the compiled-in media backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProbe;

impl VideoProbe for DefaultProbe {
    fn probe(&self, path: &Path, target_fps: u32) -> Result<VideoMetadata> {
        #[cfg(feature = "ffmpeg")]
        {
            ffmpeg::probe(path, target_fps)
        }

        #[cfg(not(feature = "ffmpeg"))]
        {
            let _ = target_fps;
            Err(MediaError::Unsupported(format!(
                "cannot probe {}: ffmpeg feature not enabled",
                path.display()
            )))
        }
    }
}

/// Opens the compiled-in decoder for `path`, rotating frames by `rotation`.
pub fn open_frame_source(path: &Path, rotation: Rotation) -> Result<Box<dyn FrameSource>> {
    #[cfg(feature = "ffmpeg")]
    {
        Ok(Box::new(ffmpeg::FfmpegFrameSource::open(path, rotation)?))
    }

    #[cfg(not(feature = "ffmpeg"))]
    {
        let _ = rotation;
        Err(MediaError::Unsupported(format!(
            "cannot decode {}: ffmpeg feature not enabled",
            path.display()
        )))
    }
}

pub fn is_available() -> bool {
    cfg!(feature = "ffmpeg")
}
