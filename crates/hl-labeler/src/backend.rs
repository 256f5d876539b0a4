use hl_core::{Result, VideoMetadata};
use hl_encoder::{ContainerMuxer, EncoderConfig, EncoderFactory, Mp4Muxer, SurfaceEncoder};
use hl_media::{DefaultProbe, FrameSource, VideoProbe};
use hl_render::GraphicsBackend;
use std::path::Path;

/// Source of the per-run resources. A run asks for each resource once and
/// owns what it gets until it releases it.
pub trait LabelingBackend {
    fn probe(&self, video: &Path, target_fps: u32) -> Result<VideoMetadata>;
    fn graphics(&self) -> Result<Box<dyn GraphicsBackend>>;
    fn open_frames(&self, video: &Path, metadata: &VideoMetadata) -> Result<Box<dyn FrameSource>>;
    fn encoder(&self, config: &EncoderConfig) -> Result<Box<dyn SurfaceEncoder>>;
    /// Creates the output container at `output`.
    fn muxer(&self, output: &Path) -> Result<Box<dyn ContainerMuxer>>;
}

/// FFmpeg decoding (when built with `ffmpeg`), wgpu rendering (when built
/// with `wgpu`), OpenH264 encoding and MP4 muxing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackend;

impl LabelingBackend for DefaultBackend {
    fn probe(&self, video: &Path, target_fps: u32) -> Result<VideoMetadata> {
        Ok(DefaultProbe.probe(video, target_fps)?)
    }

    #[cfg(feature = "wgpu")]
    fn graphics(&self) -> Result<Box<dyn GraphicsBackend>> {
        Ok(Box::new(hl_render::WgpuBackend::new()))
    }

    #[cfg(not(feature = "wgpu"))]
    fn graphics(&self) -> Result<Box<dyn GraphicsBackend>> {
        Err(hl_core::LabelError::GraphicsUnavailable("built without the wgpu feature".into()))
    }

    fn open_frames(&self, video: &Path, metadata: &VideoMetadata) -> Result<Box<dyn FrameSource>> {
        Ok(hl_media::open_frame_source(video, metadata.rotation)?)
    }

    fn encoder(&self, config: &EncoderConfig) -> Result<Box<dyn SurfaceEncoder>> {
        Ok(EncoderFactory::create(config)?)
    }

    fn muxer(&self, output: &Path) -> Result<Box<dyn ContainerMuxer>> {
        Ok(Box::new(Mp4Muxer::create(output)?))
    }
}
