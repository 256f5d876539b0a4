//! wgpu implementation of [`GraphicsBackend`].
//!
//! Surfaces are offscreen RGBA8 render targets. Swapping a window surface
//! reads its target back and queues the pixels to the encoder's producer
//! surface. Contexts created from one another share the device, and with it
//! the uploaded textures.

use crate::{
    ConfigRequest, DrawCommand, GraphicsBackend, ProgramId, ProgramKind, RenderError, Result,
    ShareGroup, SurfaceId, TextureId,
};
use bytemuck::{Pod, Zeroable};
use hl_core::{ProducerSurface, SurfaceFrame, VideoFrame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};
use wgpu::util::DeviceExt;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

const QUAD_SHADER: &str = r#"
@group(0) @binding(0) var frame_texture: texture_2d<f32>;
@group(0) @binding(1) var frame_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(frame_texture, frame_sampler, in.uv);
}
"#;

// Coverage is computed per fragment from the distance to the segment (or
// centre), matching a one-pixel anti-aliased edge.
const SHAPE_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) @interpolate(flat) start: vec2<f32>,
    @location(1) @interpolate(flat) end: vec2<f32>,
    @location(2) @interpolate(flat) color: vec4<f32>,
    @location(3) @interpolate(flat) extent: f32,
}

@vertex
fn vs_main(
    @location(0) position: vec2<f32>,
    @location(1) start: vec2<f32>,
    @location(2) end: vec2<f32>,
    @location(3) color: vec4<f32>,
    @location(4) extent: f32,
) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(position, 0.0, 1.0);
    out.start = start;
    out.end = end;
    out.color = color;
    out.extent = extent;
    return out;
}

fn distance_to_segment(p: vec2<f32>, a: vec2<f32>, b: vec2<f32>) -> f32 {
    let ab = b - a;
    let len_sq = dot(ab, ab);
    var t = 0.0;
    if (len_sq > 0.0) {
        t = clamp(dot(p - a, ab) / len_sq, 0.0, 1.0);
    }
    return distance(p, a + t * ab);
}

fn shade(color: vec4<f32>, extent: f32, d: f32) -> vec4<f32> {
    let coverage = clamp(extent + 0.5 - d, 0.0, 1.0);
    if (coverage <= 0.0) {
        discard;
    }
    return vec4<f32>(color.rgb, color.a * coverage);
}

@fragment
fn fs_line(in: VertexOutput) -> @location(0) vec4<f32> {
    return shade(in.color, in.extent, distance_to_segment(in.position.xy, in.start, in.end));
}

@fragment
fn fs_point(in: VertexOutput) -> @location(0) vec4<f32> {
    return shade(in.color, in.extent, distance(in.position.xy, in.start));
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

impl QuadVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Corner of a shape's bounding box. `start`/`end` are target pixels;
/// `extent` is the half line width or the point radius.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct ShapeVertex {
    position: [f32; 2],
    start: [f32; 2],
    end: [f32; 2],
    color: [f32; 4],
    extent: f32,
}

impl ShapeVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x2,
        1 => Float32x2,
        2 => Float32x2,
        3 => Float32x4,
        4 => Float32,
    ];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Target pixel to clip space, y pointing up.
fn to_clip(p: (f32, f32), size: (u32, u32)) -> [f32; 2] {
    [p.0 / size.0 as f32 * 2.0 - 1.0, 1.0 - p.1 / size.1 as f32 * 2.0]
}

/// Two triangles covering the pixel box `min..max`, in `TriangleList` order.
fn box_corners(min: (f32, f32), max: (f32, f32)) -> [(f32, f32); 6] {
    [
        (min.0, min.1),
        (min.0, max.1),
        (max.0, min.1),
        (max.0, min.1),
        (min.0, max.1),
        (max.0, max.1),
    ]
}

fn quad_vertices(rect: (f32, f32, f32, f32), size: (u32, u32)) -> [QuadVertex; 6] {
    let (x, y, w, h) = rect;
    box_corners((x, y), (x + w, y + h)).map(|(px, py)| QuadVertex {
        position: to_clip((px, py), size),
        uv: [(px - x) / w, (py - y) / h],
    })
}

fn shape_vertices(
    start: (f32, f32),
    end: (f32, f32),
    extent: f32,
    color: [f32; 4],
    size: (u32, u32),
) -> [ShapeVertex; 6] {
    let pad = extent + 1.0;
    let min = (start.0.min(end.0) - pad, start.1.min(end.1) - pad);
    let max = (start.0.max(end.0) + pad, start.1.max(end.1) + pad);
    box_corners(min, max).map(|corner| ShapeVertex {
        position: to_clip(corner, size),
        start: [start.0, start.1],
        end: [end.0, end.1],
        color,
        extent,
    })
}

fn padded_bytes_per_row(width: u32) -> u32 {
    (width * 4).div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Device, queue and texture namespace of one context and every context
/// created from it.
struct SharedDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: Mutex<TextureStore>,
}

#[derive(Default)]
struct TextureStore {
    next_id: u64,
    textures: HashMap<TextureId, Option<UploadedTexture>>,
}

struct UploadedTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct GpuSurface {
    width: u32,
    height: u32,
    target: wgpu::Texture,
    view: wgpu::TextureView,
    producer: Option<ProducerSurface>,
    presentation_time_ns: i64,
}

struct Program {
    kind: ProgramKind,
    pipeline: wgpu::RenderPipeline,
    /// Frame texture and sampler bindings, textured quads only.
    bind_layout: Option<wgpu::BindGroupLayout>,
}

struct DrawCall<'a> {
    pipeline: &'a wgpu::RenderPipeline,
    bind_group: Option<&'a wgpu::BindGroup>,
    vertices: &'a wgpu::Buffer,
    count: u32,
}

pub struct WgpuBackend {
    adapter: Option<wgpu::Adapter>,
    shared: Option<Arc<SharedDevice>>,
    surfaces: HashMap<SurfaceId, GpuSurface>,
    programs: HashMap<ProgramId, Program>,
    next_program: u64,
    sampler: Option<wgpu::Sampler>,
}

impl WgpuBackend {
    /// No GPU work happens until [`GraphicsBackend::choose_config`] asks
    /// for an adapter.
    pub fn new() -> Self {
        Self {
            adapter: None,
            shared: None,
            surfaces: HashMap::new(),
            programs: HashMap::new(),
            next_program: 1,
            sampler: None,
        }
    }

    fn shared(&self) -> Result<&Arc<SharedDevice>> {
        self.shared
            .as_ref()
            .ok_or_else(|| RenderError::ContextUnavailable("no wgpu device".into()))
    }

    /// Runs `f` inside a validation error scope so wgpu errors surface as
    /// [`RenderError`] instead of the uncaptured-error handler.
    fn scoped<T>(device: &wgpu::Device, what: &str, f: impl FnOnce() -> T) -> Result<T> {
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(device.pop_error_scope());
        let memory = pollster::block_on(device.pop_error_scope());
        match validation.or(memory) {
            Some(e) => Err(RenderError::SurfaceFailed(format!("{what}: {e}"))),
            None => Ok(value),
        }
    }

    fn create_target(&mut self, width: u32, height: u32, producer: Option<ProducerSurface>) -> Result<SurfaceId> {
        let shared = self.shared()?.clone();
        if width == 0 || height == 0 {
            return Err(RenderError::SurfaceFailed(format!("invalid surface size {width}x{height}")));
        }
        let max = shared.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(RenderError::SurfaceFailed(format!(
                "surface {width}x{height} exceeds device limit {max}"
            )));
        }

        let target = Self::scoped(&shared.device, "render target", || {
            shared.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("Labeler render target"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        })?;
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let id = SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed));
        self.surfaces.insert(
            id,
            GpuSurface {
                width,
                height,
                target,
                view,
                producer,
                presentation_time_ns: 0,
            },
        );
        debug!("Created {}x{} render target {:?}", width, height, id);
        Ok(id)
    }

    fn surface(&self, id: SurfaceId) -> Result<&GpuSurface> {
        self.surfaces.get(&id).ok_or(RenderError::UnknownSurface(id))
    }

    /// Records one render pass into `target` and submits it.
    fn render(&self, target: SurfaceId, load: wgpu::LoadOp<wgpu::Color>, call: Option<DrawCall<'_>>) -> Result<()> {
        let shared = self.shared()?;
        let surface = self.surface(target)?;

        let mut encoder = shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Labeler render encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Labeler render pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(call) = call {
                pass.set_pipeline(call.pipeline);
                if let Some(bind_group) = call.bind_group {
                    pass.set_bind_group(0, bind_group, &[]);
                }
                pass.set_vertex_buffer(0, call.vertices.slice(..));
                pass.draw(0..call.count, 0..1);
            }
        }
        shared.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn build_pipeline(&self, kind: ProgramKind) -> Result<Program> {
        let device = &self.shared()?.device;

        let (source, fragment_entry) = match kind {
            ProgramKind::TexturedQuad => (QUAD_SHADER, "fs_main"),
            ProgramKind::FlatLine => (SHAPE_SHADER, "fs_line"),
            ProgramKind::RoundPoint => (SHAPE_SHADER, "fs_point"),
        };

        Self::scoped(device, "pipeline", || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Labeler shader"),
                source: wgpu::ShaderSource::Wgsl(std::borrow::Cow::Borrowed(source)),
            });

            let bind_layout = (kind == ProgramKind::TexturedQuad).then(|| {
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Frame texture layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ],
                })
            });
            let bind_layouts: Vec<&wgpu::BindGroupLayout> = bind_layout.iter().collect();
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Labeler pipeline layout"),
                bind_group_layouts: &bind_layouts,
                push_constant_ranges: &[],
            });

            let (vertex_layout, blend) = match kind {
                ProgramKind::TexturedQuad => (QuadVertex::layout(), None),
                ProgramKind::FlatLine | ProgramKind::RoundPoint => {
                    (ShapeVertex::layout(), Some(wgpu::BlendState::ALPHA_BLENDING))
                }
            };

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Labeler pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[vertex_layout],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fragment_entry),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
                cache: None,
            });

            Program {
                kind,
                pipeline,
                bind_layout,
            }
        })
    }
}

impl Default for WgpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn choose_config(&mut self, request: &ConfigRequest) -> Result<()> {
        if request.red_bits > 8 || request.green_bits > 8 || request.blue_bits > 8 || request.alpha_bits > 8 {
            return Err(RenderError::NoConfig(format!(
                "unsupported color depth {}/{}/{}/{}",
                request.red_bits, request.green_bits, request.blue_bits, request.alpha_bits
            )));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::from_env_or_default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RenderError::NoConfig(format!("no GPU adapter: {e}")))?;

        let features = adapter.get_texture_format_features(TARGET_FORMAT);
        if !features.allowed_usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            return Err(RenderError::NoConfig(format!("adapter cannot render to {TARGET_FORMAT:?}")));
        }

        let info = adapter.get_info();
        info!("GPU: using adapter '{}' (backend: {:?})", info.name, info.backend);
        self.adapter = Some(adapter);
        Ok(())
    }

    fn create_context(&mut self, share: Option<ShareGroup>) -> Result<()> {
        if let Some(share) = share {
            let shared = share
                .downcast::<SharedDevice>()
                .map_err(|_| RenderError::ContextUnavailable("incompatible share context".into()))?;
            self.shared = Some(shared);
            debug!("wgpu context created on shared device");
            return Ok(());
        }

        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| RenderError::ContextUnavailable("no config chosen".into()))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Labeler render device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::default(),
            trace: Default::default(),
        }))
        .map_err(|e| RenderError::ContextUnavailable(format!("failed to create device: {e}")))?;

        device.on_uncaptured_error(Box::new(|e: wgpu::Error| error!("Uncaptured wgpu error: {}", e)));

        self.shared = Some(Arc::new(SharedDevice {
            device,
            queue,
            textures: Mutex::new(TextureStore::default()),
        }));
        info!("wgpu render context created");
        Ok(())
    }

    fn destroy_context(&mut self) {
        for (_, surface) in self.surfaces.drain() {
            surface.target.destroy();
        }
        self.programs.clear();
        self.sampler = None;
        self.shared = None;
    }

    fn create_window_surface(&mut self, producer: ProducerSurface) -> Result<SurfaceId> {
        let (width, height) = (producer.width, producer.height);
        self.create_target(width, height, Some(producer))
    }

    fn create_pbuffer_surface(&mut self, width: u32, height: u32) -> Result<SurfaceId> {
        self.create_target(width, height, None)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        if let Some(surface) = self.surfaces.remove(&surface) {
            surface.target.destroy();
        }
    }

    fn surface_size(&self, surface: SurfaceId) -> Result<(u32, u32)> {
        self.surface(surface).map(|s| (s.width, s.height))
    }

    fn swap_buffers(&mut self, surface: SurfaceId) -> Result<()> {
        let s = self.surface(surface)?;
        let Some(producer) = &s.producer else {
            return Ok(());
        };
        let frame = SurfaceFrame {
            data: self.read_pixels(surface)?,
            width: s.width,
            height: s.height,
            presentation_time_ns: s.presentation_time_ns,
        };
        if !producer.queue(frame) {
            return Err(RenderError::ProducerDisconnected);
        }
        Ok(())
    }

    fn set_presentation_time(&mut self, surface: SurfaceId, nanos: i64) -> Result<()> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(RenderError::UnknownSurface(surface))?
            .presentation_time_ns = nanos;
        Ok(())
    }

    fn compile_program(&mut self, kind: ProgramKind) -> Result<ProgramId> {
        let program = self.build_pipeline(kind)?;
        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.programs.insert(id, program);
        debug!("Compiled {:?} as {:?}", kind, id);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn create_texture(&mut self) -> Result<TextureId> {
        let shared = self.shared()?;
        let mut store = shared
            .textures
            .lock()
            .map_err(|_| RenderError::ContextUnavailable("texture store poisoned".into()))?;
        store.next_id += 1;
        let id = TextureId(store.next_id);
        store.textures.insert(id, None);
        Ok(id)
    }

    fn upload_texture(&mut self, texture: TextureId, frame: &VideoFrame) -> Result<()> {
        let shared = self.shared()?.clone();
        if frame.data.len() != frame.width as usize * frame.height as usize * 4 {
            return Err(RenderError::SurfaceFailed(format!(
                "frame holds {} bytes, not RGBA {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }
        let size = wgpu::Extent3d {
            width: frame.width,
            height: frame.height,
            depth_or_array_layers: 1,
        };

        let mut store = shared
            .textures
            .lock()
            .map_err(|_| RenderError::ContextUnavailable("texture store poisoned".into()))?;
        let slot = store.textures.get_mut(&texture).ok_or(RenderError::UnknownTexture(texture))?;

        let reusable = slot
            .as_ref()
            .is_some_and(|t| t.width == frame.width && t.height == frame.height);
        if !reusable {
            let created = Self::scoped(&shared.device, "frame texture", || {
                shared.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("Labeler frame texture"),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: TARGET_FORMAT,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            })?;
            let view = created.create_view(&wgpu::TextureViewDescriptor::default());
            *slot = Some(UploadedTexture {
                texture: created,
                view,
                width: frame.width,
                height: frame.height,
            });
        }

        let Some(uploaded) = slot.as_ref() else {
            return Err(RenderError::UnknownTexture(texture));
        };
        shared.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &uploaded.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            size,
        );
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) {
        let Some(shared) = &self.shared else {
            return;
        };
        if let Ok(mut store) = shared.textures.lock() {
            if let Some(Some(uploaded)) = store.textures.remove(&texture) {
                uploaded.texture.destroy();
            }
        }
    }

    fn clear(&mut self, target: SurfaceId, color: [f32; 4]) -> Result<()> {
        let [r, g, b, a] = color.map(|c| c.clamp(0.0, 1.0) as f64);
        self.render(target, wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }), None)
    }

    fn draw(&mut self, target: SurfaceId, program: ProgramId, command: DrawCommand<'_>) -> Result<()> {
        let shared = self.shared()?.clone();
        let size = self.surface_size(target)?;
        let kind = self
            .programs
            .get(&program)
            .ok_or(RenderError::UnknownProgram(program))?
            .kind;

        match (kind, command) {
            (ProgramKind::TexturedQuad, DrawCommand::TexturedQuad { texture, rect }) => {
                if rect.2 <= 0.0 || rect.3 <= 0.0 {
                    return Ok(());
                }
                if self.sampler.is_none() {
                    self.sampler = Some(shared.device.create_sampler(&wgpu::SamplerDescriptor {
                        label: Some("Frame sampler"),
                        address_mode_u: wgpu::AddressMode::ClampToEdge,
                        address_mode_v: wgpu::AddressMode::ClampToEdge,
                        mag_filter: wgpu::FilterMode::Nearest,
                        min_filter: wgpu::FilterMode::Nearest,
                        ..Default::default()
                    }));
                }
                let (Some(sampler), Some(program)) = (&self.sampler, self.programs.get(&program)) else {
                    return Err(RenderError::UnknownProgram(program));
                };
                let layout = program
                    .bind_layout
                    .as_ref()
                    .ok_or_else(|| RenderError::ContextUnavailable("quad program has no texture layout".into()))?;

                let bind_group = {
                    let store = shared
                        .textures
                        .lock()
                        .map_err(|_| RenderError::ContextUnavailable("texture store poisoned".into()))?;
                    let Some(uploaded) = store.textures.get(&texture).ok_or(RenderError::UnknownTexture(texture))?
                    else {
                        // nothing uploaded yet
                        return Ok(());
                    };
                    shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Frame texture bind group"),
                        layout,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::TextureView(&uploaded.view),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: wgpu::BindingResource::Sampler(sampler),
                            },
                        ],
                    })
                };

                let vertices = quad_vertices(rect, size);
                let buffer = shared.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Quad vertices"),
                    contents: bytemuck::cast_slice(&vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                self.render(
                    target,
                    wgpu::LoadOp::Load,
                    Some(DrawCall {
                        pipeline: &program.pipeline,
                        bind_group: Some(&bind_group),
                        vertices: &buffer,
                        count: vertices.len() as u32,
                    }),
                )
            }
            (ProgramKind::FlatLine, DrawCommand::Lines { segments, width, color }) => {
                let vertices: Vec<ShapeVertex> = segments
                    .iter()
                    .flat_map(|&(a, b)| shape_vertices(a, b, width / 2.0, color, size))
                    .collect();
                self.draw_shapes(&shared, target, program, &vertices)
            }
            (ProgramKind::RoundPoint, DrawCommand::Points { centers, radius, color }) => {
                let vertices: Vec<ShapeVertex> = centers
                    .iter()
                    .flat_map(|&c| shape_vertices(c, c, radius, color, size))
                    .collect();
                self.draw_shapes(&shared, target, program, &vertices)
            }
            (kind, _) => Err(RenderError::ContextUnavailable(format!(
                "draw command does not match {kind:?} program"
            ))),
        }
    }

    fn read_pixels(&self, target: SurfaceId) -> Result<Vec<u8>> {
        let shared = self.shared()?;
        let surface = self.surface(target)?;
        let (width, height) = (surface.width, surface.height);
        let unpadded = (width * 4) as usize;
        let padded = padded_bytes_per_row(width);

        let buffer = shared.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback buffer"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &surface.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        shared.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        shared
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| RenderError::ContextUnavailable(format!("device poll failed: {e}")))?;
        rx.recv()
            .map_err(|_| RenderError::ContextUnavailable("readback callback dropped".into()))?
            .map_err(|e| RenderError::ContextUnavailable(format!("readback failed: {e}")))?;

        let mut pixels = Vec::with_capacity(unpadded * height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded]);
            }
        }
        buffer.unmap();
        Ok(pixels)
    }

    fn share_group(&self) -> Option<ShareGroup> {
        self.shared.clone().map(|shared| shared as ShareGroup)
    }
}

impl WgpuBackend {
    fn draw_shapes(
        &self,
        shared: &SharedDevice,
        target: SurfaceId,
        program: ProgramId,
        vertices: &[ShapeVertex],
    ) -> Result<()> {
        if vertices.is_empty() {
            return Ok(());
        }
        let program = self.programs.get(&program).ok_or(RenderError::UnknownProgram(program))?;
        let buffer = shared.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Shape vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        self.render(
            target,
            wgpu::LoadOp::Load,
            Some(DrawCall {
                pipeline: &program.pipeline,
                bind_group: None,
                vertices: &buffer,
                count: vertices.len() as u32,
            }),
        )
    }
}
