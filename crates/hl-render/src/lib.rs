pub mod context;
pub mod overlay;
pub mod skeleton;
#[cfg(any(test, feature = "software"))]
pub mod software;
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

use hl_core::{LabelError, ProducerSurface, VideoFrame};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

pub use context::RenderContext;
pub use overlay::OverlayRenderer;
#[cfg(any(test, feature = "software"))]
pub use software::SoftwareBackend;
#[cfg(feature = "wgpu")]
pub use wgpu_backend::WgpuBackend;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("No compatible config: {0}")]
    NoConfig(String),

    #[error("Context already released")]
    Released,

    #[error("No surface is current on this thread")]
    NothingCurrent,

    #[error("Unknown surface {0:?}")]
    UnknownSurface(SurfaceId),

    #[error("Unknown program {0:?}")]
    UnknownProgram(ProgramId),

    #[error("Unknown texture {0:?}")]
    UnknownTexture(TextureId),

    #[error("Surface creation failed: {0}")]
    SurfaceFailed(String),

    #[error("Producer surface disconnected")]
    ProducerDisconnected,
}

impl From<RenderError> for LabelError {
    fn from(e: RenderError) -> Self {
        LabelError::GraphicsUnavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Backend-specific object namespace (textures, programs) handed from one
/// context to another. Backends downcast it to their own store type.
pub type ShareGroup = Arc<dyn Any + Send + Sync>;

/// What the context config must be able to render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRequest {
    pub red_bits: u8,
    pub green_bits: u8,
    pub blue_bits: u8,
    pub alpha_bits: u8,
    /// Usable with an encoder producer surface.
    pub recordable: bool,
    pub pbuffer: bool,
    pub window: bool,
}

impl Default for ConfigRequest {
    fn default() -> Self {
        Self {
            red_bits: 8,
            green_bits: 8,
            blue_bits: 8,
            alpha_bits: 8,
            recordable: true,
            pbuffer: true,
            window: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Full textured quad sampling the frame texture.
    TexturedQuad,
    /// Flat-color anti-aliased line segments.
    FlatLine,
    /// Flat-color round points with an anti-aliased circular mask.
    RoundPoint,
}

/// Geometry submitted to a compiled program.
#[derive(Debug, Clone, Copy)]
pub enum DrawCommand<'a> {
    TexturedQuad {
        texture: TextureId,
        /// `(x, y, w, h)` in target pixels.
        rect: (f32, f32, f32, f32),
    },
    Lines {
        segments: &'a [((f32, f32), (f32, f32))],
        width: f32,
        color: [f32; 4],
    },
    Points {
        centers: &'a [(f32, f32)],
        radius: f32,
        color: [f32; 4],
    },
}

/// Lowest layer of the render stack: a driver owning contexts, surfaces,
/// programs and textures. Drawing calls name their target surface
/// explicitly; [`RenderContext`] decides which surface is current.
pub trait GraphicsBackend: Send {
    fn name(&self) -> &'static str;

    fn choose_config(&mut self, request: &ConfigRequest) -> Result<()>;
    fn create_context(&mut self, share: Option<ShareGroup>) -> Result<()>;
    fn destroy_context(&mut self);

    fn create_window_surface(&mut self, producer: ProducerSurface) -> Result<SurfaceId>;
    fn create_pbuffer_surface(&mut self, width: u32, height: u32) -> Result<SurfaceId>;
    fn destroy_surface(&mut self, surface: SurfaceId);
    fn surface_size(&self, surface: SurfaceId) -> Result<(u32, u32)>;
    fn swap_buffers(&mut self, surface: SurfaceId) -> Result<()>;
    fn set_presentation_time(&mut self, surface: SurfaceId, nanos: i64) -> Result<()>;

    fn compile_program(&mut self, kind: ProgramKind) -> Result<ProgramId>;
    fn delete_program(&mut self, program: ProgramId);
    fn create_texture(&mut self) -> Result<TextureId>;
    fn upload_texture(&mut self, texture: TextureId, frame: &VideoFrame) -> Result<()>;
    fn delete_texture(&mut self, texture: TextureId);

    fn clear(&mut self, target: SurfaceId, color: [f32; 4]) -> Result<()>;
    fn draw(&mut self, target: SurfaceId, program: ProgramId, command: DrawCommand<'_>) -> Result<()>;
    fn read_pixels(&self, target: SurfaceId) -> Result<Vec<u8>>;

    /// Object namespace other contexts may share, once a context exists.
    fn share_group(&self) -> Option<ShareGroup> {
        None
    }
}
