//! Landmark coordinate transform shared by every overlay render path.
//!
//! A normalized landmark is first rotated the same way the frame extractor
//! rotates pixel data, then mapped through an aspect-fit of the (rotated)
//! video rectangle into the viewport.

use crate::types::{Landmark, Rotation};

/// Rotates a normalized point to match upright pixel data.
pub fn rotate_normalized(x: f32, y: f32, rotation: Rotation) -> (f32, f32) {
    match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (1.0 - y, x),
        Rotation::Deg180 => (1.0 - x, 1.0 - y),
        Rotation::Deg270 => (y, 1.0 - x),
    }
}

/// Scale and offset placing a video rectangle inside a viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitGeometry {
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl FitGeometry {
    /// Aspect-fit ("contain") of a `video_w`×`video_h` picture into the
    /// viewport. The picture is centered on the axis it does not fill.
    pub fn aspect_fit(video_w: u32, video_h: u32, viewport_w: u32, viewport_h: u32) -> Self {
        let vw = viewport_w as f32;
        let vh = viewport_h as f32;
        if video_w == 0 || video_h == 0 || viewport_w == 0 || viewport_h == 0 {
            return Self {
                scale_x: vw,
                scale_y: vh,
                offset_x: 0.0,
                offset_y: 0.0,
            };
        }

        let video_aspect = video_w as f32 / video_h as f32;
        let viewport_aspect = vw / vh;

        if video_aspect > viewport_aspect {
            let scaled_h = vw / video_aspect;
            Self {
                scale_x: vw,
                scale_y: scaled_h,
                offset_x: 0.0,
                offset_y: (vh - scaled_h) / 2.0,
            }
        } else {
            let scaled_w = vh * video_aspect;
            Self {
                scale_x: scaled_w,
                scale_y: vh,
                offset_x: (vw - scaled_w) / 2.0,
                offset_y: 0.0,
            }
        }
    }

    /// Fit for a source of `source_w`×`source_h` stored with `rotation`,
    /// using the dimensions as seen after rotation.
    pub fn for_rotated_source(
        source_w: u32,
        source_h: u32,
        rotation: Rotation,
        viewport_w: u32,
        viewport_h: u32,
    ) -> Self {
        let (w, h) = if rotation.swaps_dimensions() {
            (source_h, source_w)
        } else {
            (source_w, source_h)
        };
        Self::aspect_fit(w, h, viewport_w, viewport_h)
    }

    /// Pixel rectangle `(x, y, w, h)` the video occupies.
    pub fn video_rect(&self) -> (f32, f32, f32, f32) {
        (self.offset_x, self.offset_y, self.scale_x, self.scale_y)
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale_x + self.offset_x, y * self.scale_y + self.offset_y)
    }
}

/// Viewport pixel position of a landmark.
pub fn landmark_to_viewport(landmark: &Landmark, rotation: Rotation, fit: &FitGeometry) -> (f32, f32) {
    let (x, y) = rotate_normalized(landmark.x, landmark.y, rotation);
    fit.apply(x, y)
}
