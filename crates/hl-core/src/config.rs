use crate::error::{LabelError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    pub session: SessionConfig,
    pub output: OutputConfig,
    pub sync: SyncConfig,
    pub encoder: EncoderTuning,
    pub overlay: OverlayStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub video_file: String,
    pub left_hand_file: String,
    pub right_hand_file: String,
    pub output_suffix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub codec: Codec,
    pub keyframe_interval_secs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    H265,
    VP9,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tolerance_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderTuning {
    /// Upper bound on a single output poll, not on the whole drain.
    pub drain_timeout_ms: u64,
}

/// Sizes in output pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub line_width: f32,
    pub point_radius: f32,
    pub ring_width: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            video_file: "video.mp4".into(),
            left_hand_file: "keypoints_left.csv".into(),
            right_hand_file: "keypoints_right.csv".into(),
            output_suffix: "_labeled".into(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            bitrate_kbps: 6000,
            codec: Codec::H264,
            keyframe_interval_secs: 1,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { tolerance_ms: 50 }
    }
}

impl Default for EncoderTuning {
    fn default() -> Self {
        Self { drain_timeout_ms: 10 }
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            line_width: 4.0,
            point_radius: 6.0,
            ring_width: 2.0,
        }
    }
}

impl LabelingConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;

        let config: LabelingConfig = toml::from_str(&contents)
            .map_err(|e| LabelError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| LabelError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.output.fps == 0 || self.output.fps > 240 {
            return Err(LabelError::Config("Invalid FPS (must be 1-240)".into()));
        }

        if self.output.bitrate_kbps < 100 || self.output.bitrate_kbps > 100_000 {
            return Err(LabelError::Config("Invalid bitrate (must be 100-100000 kbps)".into()));
        }

        if self.output.keyframe_interval_secs == 0 {
            return Err(LabelError::Config("Keyframe interval must be at least 1 second".into()));
        }

        if !(0..=1000).contains(&self.sync.tolerance_ms) {
            return Err(LabelError::Config("Invalid sync tolerance (must be 0-1000 ms)".into()));
        }

        if !(1..=1000).contains(&self.encoder.drain_timeout_ms) {
            return Err(LabelError::Config("Invalid drain timeout (must be 1-1000 ms)".into()));
        }

        if self.overlay.line_width <= 0.0 || self.overlay.point_radius <= 0.0 || self.overlay.ring_width < 0.0 {
            return Err(LabelError::Config("Overlay sizes must be positive".into()));
        }

        if self.session.output_suffix.is_empty() {
            return Err(LabelError::Config("Output suffix must not be empty".into()));
        }

        Ok(())
    }

    /// Microseconds between two output frames, truncated.
    pub fn frame_interval_us(&self) -> i64 {
        1_000_000 / self.output.fps as i64
    }
}
