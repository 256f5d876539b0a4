use hl_labeler::LabelingOutcome;
use std::time::Duration;
use tracing::info;

/// Throughput figures for one finished run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub frames_rendered: i64,
    pub frames_with_overlay: i64,
    pub samples_written: u64,
    pub bytes_written: u64,
    pub skipped_keypoint_rows: usize,
    pub fps: u32,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn from_outcome(outcome: &LabelingOutcome, fps: u32) -> Self {
        Self {
            frames_rendered: outcome.stats.frames_rendered,
            frames_with_overlay: outcome.stats.frames_with_overlay,
            samples_written: outcome.sink.samples_written,
            bytes_written: outcome.sink.bytes_written,
            skipped_keypoint_rows: outcome.skipped_keypoint_rows,
            fps,
            elapsed: outcome.elapsed,
        }
    }

    /// Length of the produced video in seconds.
    pub fn video_secs(&self) -> f64 {
        if self.fps == 0 {
            return 0.0;
        }
        self.frames_rendered as f64 / self.fps as f64
    }

    /// Frames rendered per second of wall-clock time.
    pub fn render_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_rendered as f64 / secs
        } else {
            0.0
        }
    }

    pub fn average_bitrate_kbps(&self) -> f64 {
        let secs = self.video_secs();
        if secs > 0.0 {
            (self.bytes_written * 8) as f64 / secs / 1000.0
        } else {
            0.0
        }
    }

    pub fn overlay_coverage(&self) -> f64 {
        if self.frames_rendered > 0 {
            self.frames_with_overlay as f64 / self.frames_rendered as f64
        } else {
            0.0
        }
    }

    pub fn log(&self) {
        info!(
            "Rendered {} frames ({:.1}s of video) in {:.1}s, {:.1} fps",
            self.frames_rendered,
            self.video_secs(),
            self.elapsed.as_secs_f64(),
            self.render_fps()
        );
        info!(
            "Overlay on {:.0}% of frames, {} keypoint rows skipped",
            self.overlay_coverage() * 100.0,
            self.skipped_keypoint_rows
        );
        info!(
            "Wrote {} samples, {} bytes, {:.0} kbps average",
            self.samples_written,
            self.bytes_written,
            self.average_bitrate_kbps()
        );
    }
}
