use crate::rotate::rotate_frame;
use crate::selector::ClosestFrameSelector;
use crate::{FrameSource, Result};
use hl_core::{Rotation, VideoFrame, VideoMetadata};

/// Decoded frames held in memory, stored unrotated like a container would
/// store them. Used by headless runs and tests.
#[derive(Debug, Clone)]
pub struct MemoryVideo {
    frames: Vec<VideoFrame>,
    width: u32,
    height: u32,
    duration_ms: i64,
    rotation: Rotation,
    cursor: usize,
    selector: ClosestFrameSelector,
}

impl MemoryVideo {
    /// Frames must share dimensions and be in presentation order.
    pub fn new(frames: Vec<VideoFrame>, duration_ms: i64, rotation: Rotation) -> Self {
        let (width, height) = frames.first().map_or((0, 0), |f| (f.width, f.height));
        Self {
            frames,
            width,
            height,
            duration_ms,
            rotation,
            cursor: 0,
            selector: ClosestFrameSelector::new(),
        }
    }

    /// Solid frames at `source_fps` whose red channel counts up per frame
    /// and whose green channel encodes the frame index / 256.
    pub fn synthetic(width: u32, height: u32, duration_ms: i64, source_fps: u32, rotation: Rotation) -> Self {
        let count = (duration_ms * source_fps as i64 + 999) / 1000;
        let frames = (0..count)
            .map(|i| {
                let pts_us = i * 1_000_000 / source_fps as i64;
                VideoFrame::filled(width, height, [(i % 256) as u8, (i / 256) as u8, 96, 255], pts_us)
            })
            .collect();
        Self::new(frames, duration_ms, rotation)
    }

    pub fn metadata(&self, target_fps: u32) -> VideoMetadata {
        VideoMetadata::new(self.width, self.height, self.duration_ms, self.rotation, target_fps)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemoryVideo {
    fn extract_frame(&mut self, presentation_time_us: i64) -> Result<VideoFrame> {
        let frames = &self.frames;
        let cursor = &mut self.cursor;
        let frame = self.selector.select(presentation_time_us, || {
            let frame = frames.get(*cursor).cloned();
            *cursor += 1;
            Ok(frame)
        })?;
        Ok(rotate_frame(&frame, self.rotation))
    }
}
