use crate::{
    ConfigRequest, DrawCommand, GraphicsBackend, ProgramId, ProgramKind, RenderError, Result,
    SurfaceId, TextureId,
};
use hl_core::{ProducerSurface, VideoFrame};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `(context id, surface)` current on this thread.
    static CURRENT: Cell<Option<(u64, SurfaceId)>> = const { Cell::new(None) };
}

/// Rendering context plus the surfaces created from it.
///
/// At most one surface is current per thread across all contexts; making a
/// surface current on one context implicitly un-binds whatever another
/// context had current. Dropping the context releases it.
pub struct RenderContext {
    id: u64,
    backend: Option<Box<dyn GraphicsBackend>>,
    surfaces: Vec<SurfaceId>,
}

impl RenderContext {
    /// Picks a config usable for both offscreen and encoder surfaces and
    /// creates the context, optionally sharing objects with `share`.
    pub fn acquire(mut backend: Box<dyn GraphicsBackend>, share: Option<&RenderContext>) -> Result<Self> {
        let request = ConfigRequest::default();
        backend.choose_config(&request)?;

        let share_group = match share {
            Some(ctx) => Some(
                ctx.backend()?
                    .share_group()
                    .ok_or_else(|| RenderError::ContextUnavailable("share context exposes no share group".into()))?,
            ),
            None => None,
        };

        backend.create_context(share_group)?;

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        info!("Acquired {} render context #{}", backend.name(), id);

        Ok(Self {
            id,
            backend: Some(backend),
            surfaces: Vec::new(),
        })
    }

    /// Acquires and immediately releases a context with a tiny offscreen
    /// surface. Used to decide whether labeling can run at all.
    pub fn probe(backend: Box<dyn GraphicsBackend>) -> Result<()> {
        let mut ctx = Self::acquire(backend, None)?;
        let probe = ctx.create_offscreen_surface(1, 1);
        ctx.release();
        probe.map(|_| ())
    }

    fn backend(&self) -> Result<&dyn GraphicsBackend> {
        self.backend.as_deref().ok_or(RenderError::Released)
    }

    fn backend_mut(&mut self) -> Result<&mut (dyn GraphicsBackend + 'static)> {
        self.backend.as_deref_mut().ok_or(RenderError::Released)
    }

    pub fn is_released(&self) -> bool {
        self.backend.is_none()
    }

    pub fn create_window_surface(&mut self, producer: ProducerSurface) -> Result<SurfaceId> {
        let surface = self.backend_mut()?.create_window_surface(producer)?;
        self.surfaces.push(surface);
        debug!("Context #{}: window surface {:?}", self.id, surface);
        Ok(surface)
    }

    pub fn create_offscreen_surface(&mut self, width: u32, height: u32) -> Result<SurfaceId> {
        let surface = self.backend_mut()?.create_pbuffer_surface(width, height)?;
        self.surfaces.push(surface);
        debug!("Context #{}: offscreen surface {:?} {}x{}", self.id, surface, width, height);
        Ok(surface)
    }

    pub fn destroy_surface(&mut self, surface: SurfaceId) -> Result<()> {
        let pos = self
            .surfaces
            .iter()
            .position(|s| *s == surface)
            .ok_or(RenderError::UnknownSurface(surface))?;
        if self.current_surface() == Some(surface) {
            self.make_nothing_current();
        }
        self.surfaces.remove(pos);
        self.backend_mut()?.destroy_surface(surface);
        Ok(())
    }

    pub fn make_current(&mut self, surface: SurfaceId) -> Result<()> {
        self.backend()?;
        if !self.surfaces.contains(&surface) {
            return Err(RenderError::UnknownSurface(surface));
        }
        CURRENT.with(|c| c.set(Some((self.id, surface))));
        Ok(())
    }

    pub fn make_nothing_current(&mut self) {
        CURRENT.with(|c| {
            if matches!(c.get(), Some((id, _)) if id == self.id) {
                c.set(None);
            }
        });
    }

    /// Surface of this context current on the calling thread.
    pub fn current_surface(&self) -> Option<SurfaceId> {
        CURRENT.with(|c| match c.get() {
            Some((id, surface)) if id == self.id => Some(surface),
            _ => None,
        })
    }

    fn target(&self) -> Result<SurfaceId> {
        self.current_surface().ok_or(RenderError::NothingCurrent)
    }

    pub fn surface_size(&self, surface: SurfaceId) -> Result<(u32, u32)> {
        self.backend()?.surface_size(surface)
    }

    /// Size of the current surface, which is the viewport for drawing.
    pub fn viewport(&self) -> Result<(u32, u32)> {
        let target = self.target()?;
        self.surface_size(target)
    }

    pub fn swap_buffers(&mut self, surface: SurfaceId) -> Result<()> {
        self.backend_mut()?.swap_buffers(surface)
    }

    pub fn set_presentation_time(&mut self, surface: SurfaceId, nanos: i64) -> Result<()> {
        self.backend_mut()?.set_presentation_time(surface, nanos)
    }

    pub fn compile_program(&mut self, kind: ProgramKind) -> Result<ProgramId> {
        self.backend_mut()?.compile_program(kind)
    }

    pub fn delete_program(&mut self, program: ProgramId) {
        if let Some(backend) = self.backend.as_deref_mut() {
            backend.delete_program(program);
        }
    }

    pub fn create_texture(&mut self) -> Result<TextureId> {
        self.backend_mut()?.create_texture()
    }

    pub fn upload_texture(&mut self, texture: TextureId, frame: &VideoFrame) -> Result<()> {
        self.backend_mut()?.upload_texture(texture, frame)
    }

    pub fn delete_texture(&mut self, texture: TextureId) {
        if let Some(backend) = self.backend.as_deref_mut() {
            backend.delete_texture(texture);
        }
    }

    pub fn clear(&mut self, color: [f32; 4]) -> Result<()> {
        let target = self.target()?;
        self.backend_mut()?.clear(target, color)
    }

    pub fn draw(&mut self, program: ProgramId, command: DrawCommand<'_>) -> Result<()> {
        let target = self.target()?;
        self.backend_mut()?.draw(target, program, command)
    }

    /// RGBA8 contents of the current surface's back buffer.
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        let target = self.target()?;
        self.backend()?.read_pixels(target)
    }

    /// Destroys every surface and the context. Safe to call repeatedly.
    pub fn release(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };

        self.make_nothing_current();
        for surface in self.surfaces.drain(..) {
            backend.destroy_surface(surface);
        }
        backend.destroy_context();
        info!("Released {} render context #{}", backend.name(), self.id);
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!("Render context #{} dropped without release", self.id);
            self.release();
        }
    }
}
