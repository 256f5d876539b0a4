use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Share of overall progress reached after the keypoint log is parsed.
pub const PROGRESS_KEYPOINTS: f32 = 0.05;
/// Share reached after the source video is probed; streaming starts here.
pub const PROGRESS_PROBED: f32 = 0.10;
/// Share reached when the last frame has been streamed.
pub const PROGRESS_STREAMED: f32 = 0.95;

/// Wraps the caller's progress callback and keeps the reported value inside
/// `[0, 1]` and non-decreasing for the whole run.
pub struct ProgressReporter<'a> {
    callback: Box<dyn FnMut(f32) + Send + 'a>,
    last: f32,
    reported: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: impl FnMut(f32) + Send + 'a) -> Self {
        Self {
            callback: Box::new(callback),
            last: 0.0,
            reported: false,
        }
    }

    /// Forwards `fraction` only when it advances past the last reported
    /// value. Non-finite values are dropped.
    pub fn report(&mut self, fraction: f32) {
        if !fraction.is_finite() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if self.reported && fraction <= self.last {
            return;
        }
        self.last = fraction;
        self.reported = true;
        (self.callback)(fraction);
    }

    /// Streaming progress: `done / estimated` remapped into the
    /// 10%–95% band.
    pub fn report_frames(&mut self, done: i64, estimated: i64) {
        let ratio = if estimated > 0 {
            (done as f32 / estimated as f32).min(1.0)
        } else {
            1.0
        };
        self.report(PROGRESS_PROBED + (PROGRESS_STREAMED - PROGRESS_PROBED) * ratio);
    }

    pub fn last(&self) -> f32 {
        self.last
    }
}

/// Cooperative cancellation flag, checked once per streamed frame.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let seen = Mutex::new(Vec::new());
        {
            let mut reporter = ProgressReporter::new(|p| seen.lock().unwrap().push(p));
            reporter.report(0.05);
            reporter.report(0.02);
            reporter.report(0.5);
            reporter.report(f32::NAN);
            reporter.report(1.5);
        }
        assert_eq!(*seen.lock().unwrap(), vec![0.05, 0.5, 1.0]);
    }

    #[test]
    fn test_repeated_values_fire_once() {
        let seen = Mutex::new(Vec::new());
        {
            let mut reporter = ProgressReporter::new(|p| seen.lock().unwrap().push(p));
            reporter.report(0.0);
            reporter.report(0.0);
            reporter.report(f32::INFINITY);
            reporter.report(0.95);
            reporter.report(0.95);
            reporter.report(1.0);
            reporter.report(1.0);
        }
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.95, 1.0]);
    }

    #[test]
    fn test_frame_progress_band() {
        let seen = Mutex::new(Vec::new());
        {
            let mut reporter = ProgressReporter::new(|p| seen.lock().unwrap().push(p));
            reporter.report_frames(0, 60);
            reporter.report_frames(30, 60);
            reporter.report_frames(61, 60);
        }
        let seen = seen.lock().unwrap();
        assert!((seen[0] - 0.10).abs() < 1e-6);
        assert!((seen[1] - 0.525).abs() < 1e-6);
        assert!((seen[2] - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
