//! CPU rasterizer implementing [`GraphicsBackend`], built for tests and the
//! `software` feature. Production runs render through the wgpu backend.
//!
//! Deterministic and headless: surfaces are RGBA8 buffers, programs are the
//! three fixed pipelines in [`ProgramKind`], and textures live in a store that
//! contexts can share.

use crate::{
    ConfigRequest, DrawCommand, GraphicsBackend, ProgramId, ProgramKind, RenderError, Result,
    ShareGroup, SurfaceId, TextureId,
};
use hl_core::{ProducerSurface, SurfaceFrame, VideoFrame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct TextureStore {
    next_id: u64,
    textures: HashMap<TextureId, Option<VideoFrame>>,
}

struct SoftSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    producer: Option<ProducerSurface>,
    presentation_time_ns: i64,
}

pub struct SoftwareBackend {
    available: bool,
    config_chosen: bool,
    context_live: bool,
    surfaces: HashMap<SurfaceId, SoftSurface>,
    programs: HashMap<ProgramId, ProgramKind>,
    next_program: u64,
    textures: Arc<Mutex<TextureStore>>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            available: true,
            config_chosen: false,
            context_live: false,
            surfaces: HashMap::new(),
            programs: HashMap::new(),
            next_program: 1,
            textures: Arc::new(Mutex::new(TextureStore::default())),
        }
    }

    /// A backend whose context creation always fails, standing in for a
    /// device without a usable driver.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    fn ensure_context(&self) -> Result<()> {
        if self.context_live {
            Ok(())
        } else {
            Err(RenderError::ContextUnavailable("no software context".into()))
        }
    }

    fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut SoftSurface> {
        self.surfaces.get_mut(&id).ok_or(RenderError::UnknownSurface(id))
    }

    fn texture_frame(&self, id: TextureId) -> Result<Option<VideoFrame>> {
        let store = self
            .textures
            .lock()
            .map_err(|_| RenderError::ContextUnavailable("texture store poisoned".into()))?;
        store.textures.get(&id).cloned().ok_or(RenderError::UnknownTexture(id))
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn choose_config(&mut self, request: &ConfigRequest) -> Result<()> {
        if !self.available {
            return Err(RenderError::NoConfig("software rasterizer disabled".into()));
        }
        if request.red_bits > 8 || request.green_bits > 8 || request.blue_bits > 8 || request.alpha_bits > 8 {
            return Err(RenderError::NoConfig(format!(
                "unsupported color depth {}/{}/{}/{}",
                request.red_bits, request.green_bits, request.blue_bits, request.alpha_bits
            )));
        }
        self.config_chosen = true;
        Ok(())
    }

    fn create_context(&mut self, share: Option<ShareGroup>) -> Result<()> {
        if !self.config_chosen {
            return Err(RenderError::ContextUnavailable("no config chosen".into()));
        }
        if let Some(share) = share {
            self.textures = share
                .downcast::<Mutex<TextureStore>>()
                .map_err(|_| RenderError::ContextUnavailable("incompatible share context".into()))?;
        }
        self.context_live = true;
        info!("Software render context created");
        Ok(())
    }

    fn destroy_context(&mut self) {
        self.surfaces.clear();
        self.programs.clear();
        self.context_live = false;
    }

    fn create_window_surface(&mut self, producer: ProducerSurface) -> Result<SurfaceId> {
        self.ensure_context()?;
        if producer.width == 0 || producer.height == 0 {
            return Err(RenderError::SurfaceFailed("zero-sized producer surface".into()));
        }
        let id = SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed));
        self.surfaces.insert(
            id,
            SoftSurface {
                width: producer.width,
                height: producer.height,
                pixels: vec![0; (producer.width * producer.height * 4) as usize],
                producer: Some(producer),
                presentation_time_ns: 0,
            },
        );
        Ok(id)
    }

    fn create_pbuffer_surface(&mut self, width: u32, height: u32) -> Result<SurfaceId> {
        self.ensure_context()?;
        if width == 0 || height == 0 {
            return Err(RenderError::SurfaceFailed(format!("invalid pbuffer size {width}x{height}")));
        }
        let id = SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed));
        self.surfaces.insert(
            id,
            SoftSurface {
                width,
                height,
                pixels: vec![0; (width * height * 4) as usize],
                producer: None,
                presentation_time_ns: 0,
            },
        );
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        self.surfaces.remove(&surface);
    }

    fn surface_size(&self, surface: SurfaceId) -> Result<(u32, u32)> {
        self.surfaces
            .get(&surface)
            .map(|s| (s.width, s.height))
            .ok_or(RenderError::UnknownSurface(surface))
    }

    fn swap_buffers(&mut self, surface: SurfaceId) -> Result<()> {
        let s = self.surface_mut(surface)?;
        if let Some(producer) = &s.producer {
            let frame = SurfaceFrame {
                data: s.pixels.clone(),
                width: s.width,
                height: s.height,
                presentation_time_ns: s.presentation_time_ns,
            };
            if !producer.queue(frame) {
                return Err(RenderError::ProducerDisconnected);
            }
        }
        Ok(())
    }

    fn set_presentation_time(&mut self, surface: SurfaceId, nanos: i64) -> Result<()> {
        self.surface_mut(surface)?.presentation_time_ns = nanos;
        Ok(())
    }

    fn compile_program(&mut self, kind: ProgramKind) -> Result<ProgramId> {
        self.ensure_context()?;
        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.programs.insert(id, kind);
        debug!("Compiled {:?} as {:?}", kind, id);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_texture(&mut self) -> Result<TextureId> {
        self.ensure_context()?;
        let mut store = self
            .textures
            .lock()
            .map_err(|_| RenderError::ContextUnavailable("texture store poisoned".into()))?;
        store.next_id += 1;
        let id = TextureId(store.next_id);
        store.textures.insert(id, None);
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, frame: &VideoFrame) -> Result<()> {
        let mut store = self
            .textures
            .lock()
            .map_err(|_| RenderError::ContextUnavailable("texture store poisoned".into()))?;
        let slot = store.textures.get_mut(&texture).ok_or(RenderError::UnknownTexture(texture))?;
        *slot = Some(frame.clone());
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Ok(mut store) = self.textures.lock() {
            store.textures.remove(&texture);
        }
    }

    fn clear(&mut self, target: SurfaceId, color: [f32; 4]) -> Result<()> {
        let rgba = to_rgba8(color);
        let s = self.surface_mut(target)?;
        for px in s.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Ok(())
    }

    fn draw(&mut self, target: SurfaceId, program: ProgramId, command: DrawCommand<'_>) -> Result<()> {
        let kind = *self.programs.get(&program).ok_or(RenderError::UnknownProgram(program))?;

        match (kind, command) {
            (ProgramKind::TexturedQuad, DrawCommand::TexturedQuad { texture, rect }) => {
                let frame = self.texture_frame(texture)?;
                let s = self.surface_mut(target)?;
                if let Some(frame) = frame {
                    blit_textured_quad(s, &frame, rect);
                }
            }
            (ProgramKind::FlatLine, DrawCommand::Lines { segments, width, color }) => {
                let s = self.surface_mut(target)?;
                for &(a, b) in segments {
                    draw_line(s, a, b, width / 2.0, color);
                }
            }
            (ProgramKind::RoundPoint, DrawCommand::Points { centers, radius, color }) => {
                let s = self.surface_mut(target)?;
                for &c in centers {
                    draw_disc(s, c, radius, color);
                }
            }
            (kind, _) => {
                return Err(RenderError::ContextUnavailable(format!(
                    "draw command does not match {kind:?} program"
                )));
            }
        }
        Ok(())
    }

    fn read_pixels(&self, target: SurfaceId) -> Result<Vec<u8>> {
        self.surfaces
            .get(&target)
            .map(|s| s.pixels.clone())
            .ok_or(RenderError::UnknownSurface(target))
    }

    fn share_group(&self) -> Option<ShareGroup> {
        if self.context_live {
            Some(self.textures.clone())
        } else {
            None
        }
    }
}

fn to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Blends `color` over the pixel with `coverage` in `[0, 1]`.
fn blend(s: &mut SoftSurface, x: i64, y: i64, color: [f32; 4], coverage: f32) {
    if x < 0 || y < 0 || x >= s.width as i64 || y >= s.height as i64 {
        return;
    }
    let alpha = (color[3] * coverage).clamp(0.0, 1.0);
    if alpha <= 0.0 {
        return;
    }
    let idx = ((y as u32 * s.width + x as u32) * 4) as usize;
    for c in 0..3 {
        let dst = s.pixels[idx + c] as f32 / 255.0;
        let out = color[c] * alpha + dst * (1.0 - alpha);
        s.pixels[idx + c] = (out.clamp(0.0, 1.0) * 255.0).round() as u8;
    }
    let dst_a = s.pixels[idx + 3] as f32 / 255.0;
    s.pixels[idx + 3] = ((alpha + dst_a * (1.0 - alpha)).clamp(0.0, 1.0) * 255.0).round() as u8;
}

/// Nearest-neighbour sampling of `frame` into the pixel rectangle `rect`.
fn blit_textured_quad(s: &mut SoftSurface, frame: &VideoFrame, rect: (f32, f32, f32, f32)) {
    let (rx, ry, rw, rh) = rect;
    if rw <= 0.0 || rh <= 0.0 || frame.width == 0 || frame.height == 0 {
        return;
    }

    let x0 = rx.max(0.0).floor() as u32;
    let y0 = ry.max(0.0).floor() as u32;
    let x1 = ((rx + rw).ceil() as u32).min(s.width);
    let y1 = ((ry + rh).ceil() as u32).min(s.height);

    for y in y0..y1 {
        let cy = y as f32 + 0.5;
        if cy < ry || cy >= ry + rh {
            continue;
        }
        let v = (cy - ry) / rh;
        let ty = ((v * frame.height as f32) as u32).min(frame.height - 1);

        for x in x0..x1 {
            let cx = x as f32 + 0.5;
            if cx < rx || cx >= rx + rw {
                continue;
            }
            let u = (cx - rx) / rw;
            let tx = ((u * frame.width as f32) as u32).min(frame.width - 1);

            let src = ((ty * frame.width + tx) * 4) as usize;
            let dst = ((y * s.width + x) * 4) as usize;
            s.pixels[dst..dst + 4].copy_from_slice(&frame.data[src..src + 4]);
        }
    }
}

fn distance_to_segment(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt()
}

/// Round-capped line of half width `half`, one-pixel anti-aliased edge.
fn draw_line(s: &mut SoftSurface, a: (f32, f32), b: (f32, f32), half: f32, color: [f32; 4]) {
    let pad = half + 1.0;
    let min_x = (a.0.min(b.0) - pad).floor() as i64;
    let max_x = (a.0.max(b.0) + pad).ceil() as i64;
    let min_y = (a.1.min(b.1) - pad).floor() as i64;
    let max_y = (a.1.max(b.1) + pad).ceil() as i64;

    for y in min_y.max(0)..=max_y.min(s.height as i64 - 1) {
        for x in min_x.max(0)..=max_x.min(s.width as i64 - 1) {
            let d = distance_to_segment((x as f32 + 0.5, y as f32 + 0.5), a, b);
            let coverage = (half + 0.5 - d).clamp(0.0, 1.0);
            blend(s, x, y, color, coverage);
        }
    }
}

/// Filled circle with a one-pixel anti-aliased rim.
fn draw_disc(s: &mut SoftSurface, c: (f32, f32), radius: f32, color: [f32; 4]) {
    let pad = radius + 1.0;
    let min_x = (c.0 - pad).floor() as i64;
    let max_x = (c.0 + pad).ceil() as i64;
    let min_y = (c.1 - pad).floor() as i64;
    let max_y = (c.1 + pad).ceil() as i64;

    for y in min_y.max(0)..=max_y.min(s.height as i64 - 1) {
        for x in min_x.max(0)..=max_x.min(s.width as i64 - 1) {
            let d = ((x as f32 + 0.5 - c.0).powi(2) + (y as f32 + 0.5 - c.1).powi(2)).sqrt();
            let coverage = (radius + 0.5 - d).clamp(0.0, 1.0);
            blend(s, x, y, color, coverage);
        }
    }
}
