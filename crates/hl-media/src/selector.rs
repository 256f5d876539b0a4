use crate::{MediaError, Result};
use hl_core::VideoFrame;

/// Closest-match frame selection over a sequentially decoded stream.
///
/// Keeps the two decoded frames bracketing the last request so that a
/// run of fixed-rate requests can duplicate or skip source frames without
/// seeking.
#[derive(Debug, Clone, Default)]
pub struct ClosestFrameSelector {
    prev: Option<VideoFrame>,
    next: Option<VideoFrame>,
    exhausted: bool,
}

impl ClosestFrameSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the frame nearest `target_us`, pulling frames from
    /// `decode_next` until one at or past the target is buffered. Ties go
    /// to the earlier frame; past the end the last frame is returned.
    pub fn select<F>(&mut self, target_us: i64, mut decode_next: F) -> Result<VideoFrame>
    where
        F: FnMut() -> Result<Option<VideoFrame>>,
    {
        while !self.exhausted && self.next.as_ref().is_none_or(|n| n.pts_us < target_us) {
            match decode_next()? {
                Some(frame) => {
                    if let Some(next) = self.next.take() {
                        self.prev = Some(next);
                    }
                    self.next = Some(frame);
                }
                None => self.exhausted = true,
            }
        }

        let chosen = match (&self.prev, &self.next) {
            (Some(prev), Some(next)) => {
                if (target_us - prev.pts_us).abs() <= (next.pts_us - target_us).abs() {
                    prev
                } else {
                    next
                }
            }
            (None, Some(next)) => next,
            (Some(prev), None) => prev,
            (None, None) => return Err(MediaError::NoFrames),
        };
        Ok(chosen.clone())
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decoder over frames at the given timestamps, counting pulls.
    fn decoder(pts: &[i64]) -> (Vec<VideoFrame>, usize) {
        let frames = pts
            .iter()
            .map(|&p| VideoFrame::filled(1, 1, [p as u8, 0, 0, 255], p))
            .collect();
        (frames, 0)
    }

    fn select(selector: &mut ClosestFrameSelector, state: &mut (Vec<VideoFrame>, usize), t: i64) -> i64 {
        selector
            .select(t, || {
                let frame = state.0.get(state.1).cloned();
                state.1 += 1;
                Ok(frame)
            })
            .unwrap()
            .pts_us
    }

    #[test]
    fn test_closest_not_preceding() {
        let mut state = decoder(&[0, 40, 80]);
        let mut selector = ClosestFrameSelector::new();
        assert_eq!(select(&mut selector, &mut state, 0), 0);
        assert_eq!(select(&mut selector, &mut state, 30), 40);
        assert_eq!(select(&mut selector, &mut state, 50), 40);
        assert_eq!(select(&mut selector, &mut state, 70), 80);
    }

    #[test]
    fn test_tie_goes_to_earlier_frame() {
        let mut state = decoder(&[0, 40]);
        let mut selector = ClosestFrameSelector::new();
        assert_eq!(select(&mut selector, &mut state, 20), 0);
    }

    #[test]
    fn test_duplicates_when_source_is_slower() {
        let mut state = decoder(&[0, 100]);
        let mut selector = ClosestFrameSelector::new();
        let picks: Vec<i64> = [0, 33, 66, 99].iter().map(|&t| select(&mut selector, &mut state, t)).collect();
        assert_eq!(picks, vec![0, 0, 100, 100]);
    }

    #[test]
    fn test_past_end_returns_last_frame() {
        let mut state = decoder(&[0, 40]);
        let mut selector = ClosestFrameSelector::new();
        assert_eq!(select(&mut selector, &mut state, 500), 40);
        assert!(selector.is_exhausted());
        assert_eq!(select(&mut selector, &mut state, 600), 40);
    }

    #[test]
    fn test_empty_stream() {
        let mut selector = ClosestFrameSelector::new();
        let result = selector.select(0, || Ok(None));
        assert!(matches!(result, Err(MediaError::NoFrames)));
    }

    #[test]
    fn test_decoder_errors_propagate() {
        let mut selector = ClosestFrameSelector::new();
        let result = selector.select(0, || Err(MediaError::Decode("corrupt".into())));
        assert!(matches!(result, Err(MediaError::Decode(_))));
    }
}
