//! Encoder-to-muxer drain loop and its lifecycle state machine.
//!
//! `Configured → Started → EosSignaled → Finalized`, with `Finalized`
//! reachable from every state so error paths share the normal teardown.

use crate::muxer::ContainerMuxer;
use crate::{EncodedSample, EncoderConfig, EncoderError, EncoderOutput, Result, SurfaceEncoder};
use hl_core::ProducerSurface;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consecutive empty polls tolerated after end of stream was requested.
const MAX_IDLE_POLLS_AFTER_EOS: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Configured,
    Started,
    EosSignaled,
    Finalized,
}

impl SinkState {
    pub fn can_transition_to(self, next: SinkState) -> bool {
        use SinkState::*;
        matches!(
            (self, next),
            (Configured, Started) | (Started, EosSignaled) | (Configured | Started | EosSignaled, Finalized)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub samples_written: u64,
    pub bytes_written: u64,
    pub last_pts_us: Option<i64>,
}

pub struct EncodeMuxSink {
    encoder: Box<dyn SurfaceEncoder>,
    muxer: Box<dyn ContainerMuxer>,
    state: SinkState,
    track: Option<usize>,
    muxer_started: bool,
    eos_reached: bool,
    drain_timeout: Duration,
    stats: SinkStats,
}

impl EncodeMuxSink {
    /// Configures the encoder and creates its producer surface. Both
    /// resources are released if configuration fails.
    pub fn configure(
        mut encoder: Box<dyn SurfaceEncoder>,
        mut muxer: Box<dyn ContainerMuxer>,
        config: &EncoderConfig,
        drain_timeout: Duration,
    ) -> Result<(Self, ProducerSurface)> {
        let surface = match encoder
            .configure(config)
            .and_then(|_| encoder.create_input_surface())
        {
            Ok(surface) => surface,
            Err(e) => {
                encoder.release();
                muxer.release();
                return Err(e);
            }
        };

        info!(
            "Encoder {} configured: {} {}x{} @ {} fps, {} kbps, keyframe every {} frames",
            encoder.name(),
            config.codec,
            config.width,
            config.height,
            config.fps,
            config.bitrate_kbps,
            config.keyframe_interval_frames()
        );

        let sink = Self {
            encoder,
            muxer,
            state: SinkState::Configured,
            track: None,
            muxer_started: false,
            eos_reached: false,
            drain_timeout,
            stats: SinkStats::default(),
        };
        Ok((sink, surface))
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    pub fn track(&self) -> Option<usize> {
        self.track
    }

    fn transition(&mut self, next: SinkState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EncoderError::Consistency(format!(
                "illegal sink transition {:?} -> {:?}",
                self.state, next
            )));
        }
        debug!("Sink {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(SinkState::Started)?;
        self.encoder.start()
    }

    pub fn signal_end_of_stream(&mut self) -> Result<()> {
        self.transition(SinkState::EosSignaled)?;
        self.encoder.signal_end_of_input_stream()
    }

    /// Moves available encoder output into the muxer. Returns `true` once
    /// the end-of-stream buffer has been seen. Before end of stream was
    /// requested this returns as soon as the encoder has nothing ready;
    /// afterwards it keeps polling.
    pub fn drain(&mut self) -> Result<bool> {
        match self.state {
            SinkState::Started | SinkState::EosSignaled => {}
            state => {
                return Err(EncoderError::Consistency(format!("drain in state {state:?}")));
            }
        }
        if self.eos_reached {
            return Ok(true);
        }

        let eos_requested = self.state == SinkState::EosSignaled;
        let mut idle_polls = 0;

        loop {
            match self.encoder.dequeue_output(self.drain_timeout)? {
                EncoderOutput::TryAgainLater => {
                    if !eos_requested {
                        return Ok(false);
                    }
                    idle_polls += 1;
                    if idle_polls >= MAX_IDLE_POLLS_AFTER_EOS {
                        return Err(EncoderError::EncodingFailed(
                            "encoder never produced end of stream".into(),
                        ));
                    }
                }
                EncoderOutput::FormatChanged(format) => {
                    if self.muxer_started {
                        info!("Encoder output format changed after muxer start, ignoring");
                        continue;
                    }
                    let track = self.muxer.add_track(&format)?;
                    self.muxer.start()?;
                    self.track = Some(track);
                    self.muxer_started = true;
                    info!("Muxer track {} registered: {}x{}", track, format.width, format.height);
                }
                EncoderOutput::Buffer(sample) => {
                    idle_polls = 0;
                    let end_of_stream = sample.flags.end_of_stream;
                    self.write(sample)?;
                    if end_of_stream {
                        self.eos_reached = true;
                        debug!("Drained end of stream after {} samples", self.stats.samples_written);
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Writes one buffer and drops it, handing the memory back.
    fn write(&mut self, sample: EncodedSample) -> Result<()> {
        if sample.flags.config {
            debug!("Skipping codec config buffer ({} bytes)", sample.size());
            return Ok(());
        }
        if sample.data.is_empty() {
            return Ok(());
        }

        let track = self
            .track
            .ok_or_else(|| EncoderError::Consistency("sample before track registration".into()))?;
        if !self.muxer_started {
            return Err(EncoderError::Consistency("sample before muxer start".into()));
        }
        if let Some(last) = self.stats.last_pts_us.filter(|last| sample.presentation_time_us <= *last) {
            return Err(EncoderError::Consistency(format!(
                "sample at {}us not after {}us",
                sample.presentation_time_us, last
            )));
        }

        self.muxer.write_sample(track, &sample)?;
        self.stats.samples_written += 1;
        self.stats.bytes_written += sample.size() as u64;
        self.stats.last_pts_us = Some(sample.presentation_time_us);
        Ok(())
    }

    /// Signals end of stream if needed, drains everything, then finalizes.
    pub fn finish(&mut self) -> Result<SinkStats> {
        if self.state == SinkState::Started {
            self.signal_end_of_stream()?;
        }
        while !self.drain()? {}
        self.finalize()?;
        Ok(self.stats)
    }

    /// Stops the muxer if it was started and releases both resources.
    /// Runs at most once; later calls are no-ops.
    pub fn finalize(&mut self) -> Result<()> {
        if self.state == SinkState::Finalized {
            return Ok(());
        }
        self.transition(SinkState::Finalized)?;

        let stopped = if self.muxer_started {
            self.muxer_started = false;
            self.muxer.stop()
        } else {
            Ok(())
        };
        self.encoder.release();
        self.muxer.release();

        info!(
            "Sink finalized: {} samples, {} bytes",
            self.stats.samples_written, self.stats.bytes_written
        );
        stopped
    }
}

impl Drop for EncodeMuxSink {
    fn drop(&mut self) {
        if self.state != SinkState::Finalized {
            warn!("Encode/mux sink dropped in {:?}, finalizing", self.state);
            if let Err(e) = self.finalize() {
                warn!("Finalize on drop failed: {}", e);
            }
        }
    }
}
