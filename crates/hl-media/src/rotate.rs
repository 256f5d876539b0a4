use hl_core::{Rotation, VideoFrame};

/// Rotates RGBA pixel data clockwise by `rotation`, matching
/// [`hl_core::rotate_normalized`] for landmark coordinates.
pub fn rotate_frame(frame: &VideoFrame, rotation: Rotation) -> VideoFrame {
    if rotation == Rotation::Deg0 {
        return frame.clone();
    }

    let (w, h) = (frame.width as usize, frame.height as usize);
    let (out_w, out_h) = if rotation.swaps_dimensions() { (h, w) } else { (w, h) };
    let mut data = vec![0u8; frame.data.len()];

    for y in 0..h {
        for x in 0..w {
            let (dx, dy) = match rotation {
                Rotation::Deg90 => (h - 1 - y, x),
                Rotation::Deg180 => (w - 1 - x, h - 1 - y),
                Rotation::Deg270 => (y, w - 1 - x),
                Rotation::Deg0 => (x, y),
            };
            let src = (y * w + x) * 4;
            let dst = (dy * out_w + dx) * 4;
            data[dst..dst + 4].copy_from_slice(&frame.data[src..src + 4]);
        }
    }

    VideoFrame::new(data, out_w as u32, out_h as u32, frame.pts_us)
}

/// Clockwise display rotation stored in a container display matrix: nine
/// native-endian `i32`, the first two columns in 16.16 fixed point.
/// Angles snap to the nearest quarter turn. Returns `None` for a short or
/// degenerate matrix.
pub fn rotation_from_display_matrix(matrix: &[u8]) -> Option<Rotation> {
    if matrix.len() < 9 * 4 {
        return None;
    }
    let m: Vec<f64> = matrix
        .chunks_exact(4)
        .take(9)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f64 / 65536.0)
        .collect();

    let scale_x = m[0].hypot(m[3]);
    let scale_y = m[1].hypot(m[4]);
    if scale_x == 0.0 || scale_y == 0.0 {
        return None;
    }
    let degrees = (m[1] / scale_y).atan2(m[0] / scale_x).to_degrees();
    Some(Rotation::from_degrees(degrees.round() as i64))
}
