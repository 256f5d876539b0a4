use anyhow::{Context, Result};
use hl_core::LabelingConfig;
use hl_labeler::{DefaultBackend, LabelingOutcome, VideoLabelingOrchestrator};
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::info;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Fails when this build cannot decode video, before any session work starts.
pub fn ensure_media_backend() -> Result<()> {
    if hl_media::is_available() {
        Ok(())
    } else {
        anyhow::bail!("this build has no video decoder; rebuild with `--features ffmpeg`")
    }
}

/// One labeling run driven from the async runtime. The pipeline itself is
/// blocking and runs on the blocking pool; this side reports progress and
/// turns Ctrl+C into cooperative cancellation.
pub struct LabelingJob {
    session: PathBuf,
    config: LabelingConfig,
}

impl LabelingJob {
    pub fn new(session: PathBuf, config: LabelingConfig) -> Self {
        Self { session, config }
    }

    pub async fn run(self) -> Result<LabelingOutcome> {
        let mut labeler = VideoLabelingOrchestrator::new(DefaultBackend, self.config);
        let cancel = labeler.cancellation_token();
        let (progress_tx, mut progress_rx) = watch::channel(0.0f32);
        let session = self.session;

        info!("Labeling {}", session.display());
        let mut worker = tokio::task::spawn_blocking(move || {
            labeler.run(&session, move |p| {
                let _ = progress_tx.send(p);
            })
        });

        let mut ticker = interval(PROGRESS_LOG_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut cancelled = false;

        loop {
            tokio::select! {
                joined = &mut worker => {
                    let outcome = joined.context("Labeling worker stopped unexpectedly")??;
                    return Ok(outcome);
                }
                _ = &mut ctrl_c, if !cancelled => {
                    info!("Received Ctrl+C, cancelling...");
                    cancel.cancel();
                    cancelled = true;
                }
                _ = ticker.tick() => {
                    let progress = *progress_rx.borrow_and_update();
                    info!("Progress: {:.0}%", progress * 100.0);
                }
            }
        }
    }
}
