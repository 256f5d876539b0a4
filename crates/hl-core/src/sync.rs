//! Keypoint-to-frame synchronization.

use crate::types::{KeypointFrame, KeypointLog};

/// Finds the keypoint frame nearest to an output presentation time, both
/// measured relative to the start of their own streams.
pub struct KeypointMatcher<'a> {
    log: &'a KeypointLog,
    /// Relative times in microseconds, parallel to `log.frames`.
    relative_us: Vec<i64>,
    tolerance_us: i64,
}

impl<'a> KeypointMatcher<'a> {
    pub fn new(log: &'a KeypointLog, tolerance_ms: i64) -> Self {
        let relative_us = log
            .frames
            .iter()
            .map(|f| log.relative_ms(f).saturating_mul(1000))
            .collect();
        Self {
            log,
            relative_us,
            tolerance_us: tolerance_ms.saturating_mul(1000),
        }
    }

    /// Nearest frame within tolerance (inclusive). Of two equally distant
    /// candidates the earlier one wins.
    pub fn find(&self, presentation_time_us: i64) -> Option<&'a KeypointFrame> {
        let idx = self.nearest_index(presentation_time_us)?;
        let delta = self.relative_us[idx].abs_diff(presentation_time_us);
        if delta <= self.tolerance_us.unsigned_abs() {
            Some(&self.log.frames[idx])
        } else {
            None
        }
    }

    fn nearest_index(&self, t: i64) -> Option<usize> {
        if self.relative_us.is_empty() {
            return None;
        }

        let upper = self.relative_us.partition_point(|&rel| rel < t);
        if upper == 0 {
            return Some(0);
        }
        if upper == self.relative_us.len() {
            return Some(upper - 1);
        }

        let before = t.saturating_sub(self.relative_us[upper - 1]);
        let after = self.relative_us[upper].saturating_sub(t);
        if before <= after { Some(upper - 1) } else { Some(upper) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Handedness, Landmark, LANDMARK_COUNT};

    fn log(timestamps: &[i64]) -> KeypointLog {
        KeypointLog::new(
            timestamps
                .iter()
                .enumerate()
                .map(|(i, &ts)| KeypointFrame {
                    timestamp_ms: ts,
                    frame_number: i as i64,
                    hands: vec![[Landmark::default(); LANDMARK_COUNT]],
                    hand_labels: vec![Handedness::Right],
                })
                .collect(),
        )
    }

    #[test]
    fn test_match_uses_relative_time() {
        let log = log(&[10_000, 10_033, 10_066]);
        let matcher = KeypointMatcher::new(&log, 50);

        assert_eq!(matcher.find(0).unwrap().timestamp_ms, 10_000);
        assert_eq!(matcher.find(33_333).unwrap().timestamp_ms, 10_033);
        assert_eq!(matcher.find(60_000).unwrap().timestamp_ms, 10_066);
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        let log = log(&[0]);
        let matcher = KeypointMatcher::new(&log, 50);

        assert!(matcher.find(50_000).is_some());
        assert!(matcher.find(50_001).is_none());
        assert!(matcher.find(-50_000).is_some());
    }

    #[test]
    fn test_gap_renders_without_overlay() {
        let log = log(&[0, 500]);
        let matcher = KeypointMatcher::new(&log, 50);

        assert!(matcher.find(250_000).is_none());
        assert_eq!(matcher.find(460_000).unwrap().timestamp_ms, 500);
    }

    #[test]
    fn test_tie_prefers_earlier_frame() {
        let log = log(&[0, 40]);
        let matcher = KeypointMatcher::new(&log, 50);
        assert_eq!(matcher.find(20_000).unwrap().timestamp_ms, 0);
    }

    #[test]
    fn test_far_timestamps_saturate() {
        let log = log(&[0, 9_300_000_000_000_000]);
        let matcher = KeypointMatcher::new(&log, 50);

        assert_eq!(matcher.find(0).unwrap().timestamp_ms, 0);
        assert!(matcher.find(i64::MAX).is_some());
        assert!(matcher.find(1_000_000).is_none());
    }

    #[test]
    fn test_empty_log_never_matches() {
        let log = KeypointLog::default();
        let matcher = KeypointMatcher::new(&log, 50);
        assert!(matcher.find(0).is_none());
    }
}
