//! Pipeline driver for one labeling run.
//!
//! A run walks `Idle → Validating → Initializing → Streaming → Finalizing`
//! and ends in `Completed` or `Failed`. Both terminal states go through the
//! same resource release; a failed run additionally deletes its partial
//! output.

use crate::backend::LabelingBackend;
use crate::session::{self, SessionInputs};
use hl_core::keypoints::{LEFT_TABLE, RIGHT_TABLE};
use hl_core::progress::{PROGRESS_KEYPOINTS, PROGRESS_PROBED};
use hl_core::{
    CancellationToken, KeypointLogReader, KeypointMatcher, LabelError, LabelingConfig, ProgressReporter, Result,
};
use hl_encoder::sink::SinkStats;
use hl_encoder::{EncodeMuxSink, EncoderConfig};
use hl_media::FrameSource;
use hl_render::{OverlayRenderer, RenderContext, RenderError};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Initializing,
    Streaming,
    Finalizing,
    Completed,
    Failed,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Initializing)
                | (Initializing, Streaming)
                | (Streaming, Finalizing)
                | (Finalizing, Completed)
                | (Validating | Initializing | Streaming | Finalizing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// Number of output frames for a source of `duration_ms` at `fps`:
/// `⌈duration_ms · fps / 1000⌉`.
pub fn output_frame_count(duration_ms: i64, fps: u32) -> i64 {
    if duration_ms <= 0 || fps == 0 {
        return 0;
    }
    (duration_ms * fps as i64 + 999) / 1000
}

/// Presentation time of output frame `index`, without accumulated
/// rounding.
pub fn frame_pts_us(index: i64, fps: u32) -> i64 {
    index * 1_000_000 / fps.max(1) as i64
}

/// Per-run counters threaded through the streaming loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_rendered: i64,
    pub frames_with_overlay: i64,
    pub hands_drawn: i64,
    pub last_pts_us: Option<i64>,
}

impl LoopStats {
    fn record(&mut self, pts_us: i64, matched: bool, hands: usize) {
        self.frames_rendered += 1;
        if matched {
            self.frames_with_overlay += 1;
        }
        self.hands_drawn += hands as i64;
        self.last_pts_us = Some(pts_us);
    }
}

#[derive(Debug, Clone)]
pub struct LabelingOutcome {
    pub output: PathBuf,
    pub stats: LoopStats,
    pub sink: SinkStats,
    pub skipped_keypoint_rows: usize,
    pub elapsed: Duration,
}

/// Everything a run may hold, released in one place whatever the outcome.
#[derive(Default)]
struct RunResources {
    frames: Option<Box<dyn FrameSource>>,
    sink: Option<EncodeMuxSink>,
    renderer: Option<OverlayRenderer>,
    context: Option<RenderContext>,
    /// Output file once the muxer has created it.
    output: Option<PathBuf>,
}

impl RunResources {
    fn release(&mut self) {
        self.frames = None;

        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.finalize() {
                warn!("Sink finalize during cleanup failed: {}", e);
            }
        }

        if let Some(mut context) = self.context.take() {
            if let Some(mut renderer) = self.renderer.take() {
                renderer.release(&mut context);
            }
            context.make_nothing_current();
            context.release();
        }
        self.renderer = None;
    }

    fn delete_partial_output(&mut self) {
        let Some(path) = self.output.take() else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => info!("Deleted partial output {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete partial output {}: {}", path.display(), e),
        }
    }
}

pub struct VideoLabelingOrchestrator<B: LabelingBackend> {
    backend: B,
    config: LabelingConfig,
    cancel: CancellationToken,
    last_state: RunState,
}

impl<B: LabelingBackend> VideoLabelingOrchestrator<B> {
    pub fn new(backend: B, config: LabelingConfig) -> Self {
        Self {
            backend,
            config,
            cancel: CancellationToken::new(),
            last_state: RunState::Idle,
        }
    }

    /// Token checked once per streamed frame. Cancelling takes the failure
    /// path and the run returns [`LabelError::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &LabelingConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Terminal state of the most recent run, `Idle` before any run.
    pub fn last_state(&self) -> RunState {
        self.last_state
    }

    /// Whether a rendering context can be acquired on this device.
    pub fn is_supported(&self) -> bool {
        let supported = self
            .backend
            .graphics()
            .and_then(|graphics| Ok(RenderContext::probe(graphics)?))
            .inspect_err(|e| warn!("Labeling not supported: {}", e))
            .is_ok();
        debug!("Labeling support probe: {}", supported);
        supported
    }

    /// Labels the session in `session_dir` and returns the output path.
    pub fn process_video(&mut self, session_dir: &Path, on_progress: impl FnMut(f32) + Send) -> Result<PathBuf> {
        self.run(session_dir, on_progress).map(|outcome| outcome.output)
    }

    /// Like [`process_video`](Self::process_video) but also returns the run
    /// counters.
    pub fn run(&mut self, session_dir: &Path, on_progress: impl FnMut(f32) + Send) -> Result<LabelingOutcome> {
        let started = Instant::now();
        let mut progress = ProgressReporter::new(on_progress);
        let mut resources = RunResources::default();
        let mut state = RunState::Idle;

        info!("Labeling session {}", session_dir.display());
        let result = self.execute(session_dir, &mut progress, &mut resources, &mut state);
        resources.release();

        match result {
            Ok(mut outcome) => {
                transition(&mut state, RunState::Completed)?;
                self.last_state = state;
                progress.report(1.0);
                outcome.elapsed = started.elapsed();
                info!(
                    "Labeling completed: {} frames ({} with overlay) in {:.1}s -> {}",
                    outcome.stats.frames_rendered,
                    outcome.stats.frames_with_overlay,
                    outcome.elapsed.as_secs_f32(),
                    outcome.output.display()
                );
                Ok(outcome)
            }
            Err(e) => {
                resources.delete_partial_output();
                if !state.is_terminal() {
                    state = RunState::Failed;
                }
                self.last_state = state;
                error!("Labeling failed ({}): {}", e.kind(), e);
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        session_dir: &Path,
        progress: &mut ProgressReporter<'_>,
        res: &mut RunResources,
        state: &mut RunState,
    ) -> Result<LabelingOutcome> {
        transition(state, RunState::Validating)?;

        let inputs = SessionInputs::locate(session_dir, &self.config.session);
        inputs.validate()?;
        let output = session::output_path(&inputs.video, &self.config.session.output_suffix);

        let report = KeypointLogReader::read_files(&inputs.left_keypoints, &inputs.right_keypoints)?;
        if !report.warnings.is_empty() {
            warn!(
                "Skipped {} malformed keypoint rows ({} left, {} right)",
                report.warnings.len(),
                report.skipped_rows(LEFT_TABLE),
                report.skipped_rows(RIGHT_TABLE)
            );
        }
        progress.report(PROGRESS_KEYPOINTS);

        let fps = self.config.output.fps;
        let metadata = self.backend.probe(&inputs.video, fps)?;
        let total = output_frame_count(metadata.duration_ms, fps);
        if total == 0 {
            return Err(LabelError::MediaUnreadable(format!(
                "{} yields no frames at {} fps (duration {} ms)",
                inputs.video.display(),
                fps,
                metadata.duration_ms
            )));
        }
        progress.report(PROGRESS_PROBED);

        transition(state, RunState::Initializing)?;

        let (out_w, out_h) = metadata.upright_dimensions();
        info!(
            "Output {}x{} @ {} fps from {}x{} rotated {}°",
            out_w,
            out_h,
            fps,
            metadata.width,
            metadata.height,
            metadata.rotation.degrees()
        );

        // rendering context, offscreen surface, renderer
        let context = res
            .context
            .insert(RenderContext::acquire(self.backend.graphics()?, None)?);
        let offscreen = context.create_offscreen_surface(out_w, out_h)?;
        context.make_current(offscreen)?;
        let renderer = res.renderer.insert(OverlayRenderer::new(self.config.overlay.clone()));
        renderer.initialize(context, out_w, out_h)?;

        // encoder and muxer bound to a window surface
        let encoder_config = EncoderConfig::from_labeling(&self.config, out_w, out_h);
        let mut encoder = self.backend.encoder(&encoder_config)?;
        res.output = Some(output.clone());
        let muxer = match self.backend.muxer(&output) {
            Ok(muxer) => muxer,
            Err(e) => {
                encoder.release();
                return Err(e);
            }
        };
        let drain_timeout = Duration::from_millis(self.config.encoder.drain_timeout_ms);
        let (sink, producer) = EncodeMuxSink::configure(encoder, muxer, &encoder_config, drain_timeout)?;
        let sink = res.sink.insert(sink);
        sink.start()?;
        let window = context.create_window_surface(producer)?;

        let frames = res.frames.insert(self.backend.open_frames(&inputs.video, &metadata)?);

        transition(state, RunState::Streaming)?;

        let matcher = KeypointMatcher::new(&report.log, self.config.sync.tolerance_ms);
        let log_interval = fps.max(1) as i64;
        let mut stats = LoopStats::default();
        debug!("Streaming {} frames", total);

        for index in 0..total {
            if self.cancel.is_cancelled() {
                info!("Labeling cancelled after {} frames", stats.frames_rendered);
                return Err(LabelError::Cancelled);
            }

            let pts_us = frame_pts_us(index, fps);
            let frame = frames.extract_frame(pts_us)?;
            let keypoints = matcher.find(pts_us);
            let (hands, labels) = match keypoints {
                Some(k) => (&k.hands[..], &k.hand_labels[..]),
                None => (&[][..], &[][..]),
            };

            context.make_current(window)?;
            let drawn = renderer.render_frame(
                context,
                &frame,
                hands,
                labels,
                metadata.width,
                metadata.height,
                metadata.rotation,
            )?;
            context.set_presentation_time(window, pts_us * 1000)?;
            context.swap_buffers(window).map_err(|e| match e {
                RenderError::ProducerDisconnected => LabelError::Encoding("encoder input surface closed".into()),
                e => e.into(),
            })?;
            sink.drain()?;

            stats.record(pts_us, keypoints.is_some(), drawn);
            progress.report_frames(stats.frames_rendered, metadata.estimated_frame_count);

            if stats.frames_rendered % log_interval == 0 {
                debug!(
                    "Rendered {}/{} frames ({} with overlay)",
                    stats.frames_rendered, total, stats.frames_with_overlay
                );
            }
        }

        transition(state, RunState::Finalizing)?;
        let sink_stats = sink.finish()?;
        if sink_stats.samples_written == 0 {
            return Err(LabelError::Encoding(format!(
                "encoder produced no samples for {} rendered frames",
                stats.frames_rendered
            )));
        }

        Ok(LabelingOutcome {
            output,
            stats,
            sink: sink_stats,
            skipped_keypoint_rows: report.warnings.len(),
            elapsed: Duration::ZERO,
        })
    }
}

fn transition(state: &mut RunState, next: RunState) -> Result<()> {
    if !state.can_transition_to(next) {
        return Err(LabelError::InvalidTransition {
            from: format!("{:?}", state),
            to: format!("{:?}", next),
        });
    }
    debug!("Run {:?} -> {:?}", state, next);
    *state = next;
    Ok(())
}
