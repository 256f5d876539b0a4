use bytes::Bytes;
use hl_core::{LabelError, ProducerSurface};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod annexb;
pub mod muxer;
pub mod openh264_encoder;
pub mod sink;

pub use muxer::{ContainerMuxer, Mp4Muxer};
pub use sink::{EncodeMuxSink, SinkState};

pub type Result<T> = std::result::Result<T, EncoderError>;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Unsupported codec: {0:?}")]
    UnsupportedCodec(VideoCodec),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Muxer error: {0}")]
    Muxer(String),

    #[error("Muxer consistency violated: {0}")]
    Consistency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EncoderError> for LabelError {
    fn from(e: EncoderError) -> Self {
        match e {
            EncoderError::InitFailed(msg) | EncoderError::InvalidConfig(msg) => {
                LabelError::EncoderConfiguration(msg)
            }
            EncoderError::UnsupportedCodec(codec) => {
                LabelError::EncoderConfiguration(format!("unsupported codec {codec}"))
            }
            EncoderError::EncodingFailed(msg) => LabelError::Encoding(msg),
            EncoderError::Muxer(msg) => LabelError::Muxing(msg),
            EncoderError::Consistency(msg) => LabelError::MuxerConsistency(msg),
            EncoderError::Io(e) => LabelError::Io(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    H265,
    VP9,
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::H265 => write!(f, "H.265"),
            VideoCodec::VP9 => write!(f, "VP9"),
        }
    }
}

impl From<hl_core::Codec> for VideoCodec {
    fn from(codec: hl_core::Codec) -> Self {
        match codec {
            hl_core::Codec::H264 => VideoCodec::H264,
            hl_core::Codec::H265 => VideoCodec::H265,
            hl_core::Codec::VP9 => VideoCodec::VP9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub codec: VideoCodec,
    /// Seconds between forced keyframes.
    pub keyframe_interval_secs: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate_kbps: 6000,
            codec: VideoCodec::H264,
            keyframe_interval_secs: 1,
        }
    }
}

impl EncoderConfig {
    pub fn from_labeling(config: &hl_core::LabelingConfig, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fps: config.output.fps,
            bitrate_kbps: config.output.bitrate_kbps,
            codec: config.output.codec.into(),
            keyframe_interval_secs: config.output.keyframe_interval_secs,
        }
    }

    pub fn bitrate_bps(&self) -> u32 {
        self.bitrate_kbps.saturating_mul(1000)
    }

    /// Keyframe interval in frames, never zero.
    pub fn keyframe_interval_frames(&self) -> u64 {
        (self.fps as u64 * self.keyframe_interval_secs as u64).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::InvalidConfig(format!(
                "invalid dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(EncoderError::InvalidConfig("fps must be positive".into()));
        }
        if self.bitrate_kbps == 0 {
            return Err(EncoderError::InvalidConfig("bitrate must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub keyframe: bool,
    /// Codec configuration data (SPS/PPS), never written as a sample.
    pub config: bool,
    pub end_of_stream: bool,
}

#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Bytes,
    pub presentation_time_us: i64,
    pub flags: SampleFlags,
}

impl EncodedSample {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self {
            data: Bytes::new(),
            presentation_time_us,
            flags: SampleFlags {
                end_of_stream: true,
                ..Default::default()
            },
        }
    }
}

/// Output format announced once by the encoder before its first sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormat {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Annex B codec-specific data (SPS + PPS for H.264).
    pub csd: Bytes,
}

#[derive(Debug, Clone)]
pub enum EncoderOutput {
    TryAgainLater,
    FormatChanged(TrackFormat),
    Buffer(EncodedSample),
}

/// Encoder fed through a producer surface rather than explicit frames.
///
/// Lifecycle: `configure` → `create_input_surface` → `start` → (frames are
/// queued on the surface) → `signal_end_of_input_stream` → `dequeue_output`
/// until an end-of-stream buffer → `release`.
pub trait SurfaceEncoder: Send {
    fn name(&self) -> &'static str;
    fn configure(&mut self, config: &EncoderConfig) -> Result<()>;
    fn create_input_surface(&mut self) -> Result<ProducerSurface>;
    fn start(&mut self) -> Result<()>;
    fn signal_end_of_input_stream(&mut self) -> Result<()>;
    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput>;
    fn release(&mut self);
}

/// Factory to create the encoder for a codec
pub struct EncoderFactory;

impl EncoderFactory {
    pub fn create(config: &EncoderConfig) -> Result<Box<dyn SurfaceEncoder>> {
        tracing::info!("Creating encoder: {} {}x{}", config.codec, config.width, config.height);

        match config.codec {
            VideoCodec::H264 => {
                if !openh264_encoder::OpenH264Encoder::is_available() {
                    return Err(EncoderError::InitFailed("OpenH264 feature not enabled".into()));
                }
                Ok(Box::new(openh264_encoder::OpenH264Encoder::new()))
            }
            codec => Err(EncoderError::UnsupportedCodec(codec)),
        }
    }

    pub fn list_available_encoders() -> Vec<String> {
        let mut encoders = Vec::new();
        if openh264_encoder::OpenH264Encoder::is_available() {
            encoders.push("OpenH264 (H.264)".to_string());
        }
        encoders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_interval_frames() {
        let config = EncoderConfig {
            fps: 30,
            keyframe_interval_secs: 2,
            ..Default::default()
        };
        assert_eq!(config.keyframe_interval_frames(), 60);

        let config = EncoderConfig {
            keyframe_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.keyframe_interval_frames(), 1);
    }

    #[test]
    fn test_bitrate_bps() {
        let config = EncoderConfig {
            bitrate_kbps: 6000,
            ..Default::default()
        };
        assert_eq!(config.bitrate_bps(), 6_000_000);

        let config = EncoderConfig {
            bitrate_kbps: u32::MAX,
            ..Default::default()
        };
        assert_eq!(config.bitrate_bps(), u32::MAX);
    }

    #[test]
    fn test_unsupported_codecs_are_configuration_errors() {
        for codec in [VideoCodec::H265, VideoCodec::VP9] {
            let config = EncoderConfig {
                codec,
                ..Default::default()
            };
            let err = EncoderFactory::create(&config).err().unwrap();
            let label: LabelError = err.into();
            assert!(label.is_device_unsupported());
        }
    }

    #[test]
    fn test_error_mapping() {
        let label: LabelError = EncoderError::Consistency("x".into()).into();
        assert!(matches!(label, LabelError::MuxerConsistency(_)));
        let label: LabelError = EncoderError::Muxer("x".into()).into();
        assert!(matches!(label, LabelError::Muxing(_)));
    }

    #[test]
    fn test_config_from_labeling() {
        let labeling = hl_core::LabelingConfig::default();
        let config = EncoderConfig::from_labeling(&labeling, 480, 640);
        assert_eq!((config.width, config.height), (480, 640));
        assert_eq!(config.fps, labeling.output.fps);
        assert_eq!(config.codec, VideoCodec::H264);
        config.validate().unwrap();
    }
}
