use crate::context::RenderContext;
use crate::skeleton::{HAND_CONNECTIONS, POINT_RING_COLOR, hand_color};
use crate::{DrawCommand, ProgramId, ProgramKind, RenderError, Result, TextureId};
use hl_core::{FitGeometry, HandLandmarks, Handedness, OverlayStyle, Rotation, VideoFrame, landmark_to_viewport};
use tracing::{debug, info};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

struct Programs {
    quad: ProgramId,
    line: ProgramId,
    point: ProgramId,
}

/// Composites one video frame with hand skeletons into the current surface.
pub struct OverlayRenderer {
    style: OverlayStyle,
    viewport: (u32, u32),
    programs: Option<Programs>,
    texture: Option<TextureId>,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self {
            style,
            viewport: (0, 0),
            programs: None,
            texture: None,
        }
    }

    /// Compiles the three programs and allocates the frame texture.
    pub fn initialize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<()> {
        let programs = Programs {
            quad: ctx.compile_program(ProgramKind::TexturedQuad)?,
            line: ctx.compile_program(ProgramKind::FlatLine)?,
            point: ctx.compile_program(ProgramKind::RoundPoint)?,
        };
        self.texture = Some(ctx.create_texture()?);
        self.programs = Some(programs);
        self.viewport = (width, height);

        info!("Overlay renderer initialized at {}x{}", width, height);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.programs.is_some()
    }

    /// Draws `frame` and every hand in `hands`. `source_width`/`source_height`
    /// are the stored (pre-rotation) video dimensions. Returns the number of
    /// hands drawn.
    #[allow(clippy::too_many_arguments)]
    pub fn render_frame(
        &mut self,
        ctx: &mut RenderContext,
        frame: &VideoFrame,
        hands: &[HandLandmarks],
        hand_labels: &[Handedness],
        source_width: u32,
        source_height: u32,
        rotation: Rotation,
    ) -> Result<usize> {
        let programs = self
            .programs
            .as_ref()
            .ok_or_else(|| RenderError::ContextUnavailable("overlay renderer not initialized".into()))?;
        let texture = self
            .texture
            .ok_or_else(|| RenderError::ContextUnavailable("overlay texture missing".into()))?;

        let (vw, vh) = self.viewport;
        let fit = FitGeometry::for_rotated_source(source_width, source_height, rotation, vw, vh);

        ctx.clear(CLEAR_COLOR)?;

        ctx.upload_texture(texture, frame)?;
        ctx.draw(
            programs.quad,
            DrawCommand::TexturedQuad {
                texture,
                rect: fit.video_rect(),
            },
        )?;

        let ring_radius = self.style.point_radius + self.style.ring_width;
        for (i, hand) in hands.iter().enumerate() {
            let color = hand_color(hand_labels.get(i).copied());
            let points: Vec<(f32, f32)> = hand
                .iter()
                .map(|lm| landmark_to_viewport(lm, rotation, &fit))
                .collect();
            let segments: Vec<((f32, f32), (f32, f32))> = HAND_CONNECTIONS
                .iter()
                .map(|&(a, b)| (points[a], points[b]))
                .collect();

            ctx.draw(
                programs.line,
                DrawCommand::Lines {
                    segments: &segments,
                    width: self.style.line_width,
                    color,
                },
            )?;
            ctx.draw(
                programs.point,
                DrawCommand::Points {
                    centers: &points,
                    radius: ring_radius,
                    color: POINT_RING_COLOR,
                },
            )?;
            ctx.draw(
                programs.point,
                DrawCommand::Points {
                    centers: &points,
                    radius: self.style.point_radius,
                    color,
                },
            )?;
        }

        debug!("Rendered frame pts={}us with {} hand(s)", frame.pts_us, hands.len());
        Ok(hands.len())
    }

    /// Frees programs and texture. A no-op once the context is released.
    pub fn release(&mut self, ctx: &mut RenderContext) {
        if let Some(programs) = self.programs.take() {
            ctx.delete_program(programs.quad);
            ctx.delete_program(programs.line);
            ctx.delete_program(programs.point);
        }
        if let Some(texture) = self.texture.take() {
            ctx.delete_texture(texture);
        }
    }
}
