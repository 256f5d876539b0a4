//! Hand skeleton topology and colors.

use hl_core::Handedness;

/// Landmark index pairs: one wrist-to-base segment plus three segments
/// along each finger, then the knuckle line across the palm.
pub const HAND_CONNECTIONS: [(usize, usize); 23] = [
    // thumb
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    // index
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    // middle
    (0, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    // ring
    (0, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    // pinky
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
    // palm
    (5, 9),
    (9, 13),
    (13, 17),
];

pub const LEFT_HAND_COLOR: [f32; 4] = [0.13, 0.59, 0.95, 1.0];
pub const RIGHT_HAND_COLOR: [f32; 4] = [1.0, 0.34, 0.13, 1.0];
pub const UNKNOWN_HAND_COLOR: [f32; 4] = [0.30, 0.69, 0.31, 1.0];
pub const POINT_RING_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

pub fn hand_color(label: Option<Handedness>) -> [f32; 4] {
    match label {
        Some(Handedness::Left) => LEFT_HAND_COLOR,
        Some(Handedness::Right) => RIGHT_HAND_COLOR,
        Some(Handedness::Unknown) | None => UNKNOWN_HAND_COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_core::LANDMARK_COUNT;
    use std::collections::HashSet;

    #[test]
    fn test_topology_covers_every_landmark() {
        let touched: HashSet<usize> = HAND_CONNECTIONS.iter().flat_map(|&(a, b)| [a, b]).collect();
        assert_eq!(touched.len(), LANDMARK_COUNT);
        assert!(HAND_CONNECTIONS.iter().all(|&(a, b)| a < b && b < LANDMARK_COUNT));
    }

    #[test]
    fn test_colors_by_handedness() {
        assert_eq!(hand_color(Some(Handedness::Left)), LEFT_HAND_COLOR);
        assert_eq!(hand_color(Some(Handedness::Right)), RIGHT_HAND_COLOR);
        assert_eq!(hand_color(None), UNKNOWN_HAND_COLOR);
        assert_ne!(LEFT_HAND_COLOR, RIGHT_HAND_COLOR);
    }
}
