use super::*;
use crate::annexb::{contains_idr, split_parameter_sets};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use hl_core::SurfaceFrame;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

#[cfg(feature = "openh264")]
use openh264::OpenH264API;
#[cfg(feature = "openh264")]
use openh264::encoder::{BitRate, Encoder as H264Encoder, EncoderConfig as H264Config, FrameRate, RateControlMode};
#[cfg(feature = "openh264")]
use openh264::formats::{RgbaSliceU8, YUVBuffer};

/// H.264 encoder reading composited frames from a producer surface.
pub struct OpenH264Encoder {
    config: Option<EncoderConfig>,
    #[cfg(feature = "openh264")]
    encoder: Option<H264Encoder>,
    input: Option<Receiver<SurfaceFrame>>,
    pending: VecDeque<EncoderOutput>,
    started: bool,
    eos_requested: bool,
    eos_emitted: bool,
    format_sent: bool,
    frame_count: u64,
    last_pts_us: i64,
}

impl OpenH264Encoder {
    pub fn new() -> Self {
        Self {
            config: None,
            #[cfg(feature = "openh264")]
            encoder: None,
            input: None,
            pending: VecDeque::new(),
            started: false,
            eos_requested: false,
            eos_emitted: false,
            format_sent: false,
            frame_count: 0,
            last_pts_us: 0,
        }
    }

    pub fn is_available() -> bool {
        cfg!(feature = "openh264")
    }

    fn config(&self) -> Result<&EncoderConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| EncoderError::InitFailed("Encoder not configured".into()))
    }

    /// Queues the outputs for one encoded access unit: the format event on
    /// first sight of parameter sets, the config buffer, then the picture.
    fn push_access_unit(&mut self, data: &[u8], pts_us: i64) -> Result<()> {
        let (params, picture) = split_parameter_sets(data);
        let config = self.config()?.clone();

        if !params.is_empty() {
            let csd = Bytes::from(params);
            if !self.format_sent {
                self.pending.push_back(EncoderOutput::FormatChanged(TrackFormat {
                    codec: config.codec,
                    width: config.width,
                    height: config.height,
                    fps: config.fps,
                    csd: csd.clone(),
                }));
                self.format_sent = true;
            }
            self.pending.push_back(EncoderOutput::Buffer(EncodedSample {
                data: csd,
                presentation_time_us: pts_us,
                flags: SampleFlags {
                    config: true,
                    ..Default::default()
                },
            }));
        }

        if !picture.is_empty() {
            let keyframe = contains_idr(&picture);
            debug!(
                "Encoded frame {}: {} bytes, keyframe: {}",
                self.frame_count,
                picture.len(),
                keyframe
            );
            self.pending.push_back(EncoderOutput::Buffer(EncodedSample {
                data: Bytes::from(picture),
                presentation_time_us: pts_us,
                flags: SampleFlags {
                    keyframe,
                    ..Default::default()
                },
            }));
        }
        Ok(())
    }

    #[cfg(feature = "openh264")]
    fn encode_frame(&mut self, frame: SurfaceFrame) -> Result<()> {
        let config = self.config()?.clone();
        if frame.width != config.width || frame.height != config.height {
            return Err(EncoderError::EncodingFailed(format!(
                "frame {}x{} does not match encoder {}x{}",
                frame.width, frame.height, config.width, config.height
            )));
        }

        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.data.len() != expected {
            return Err(EncoderError::EncodingFailed(format!(
                "frame holds {} bytes, expected {} for RGBA {}x{}",
                frame.data.len(),
                expected,
                frame.width,
                frame.height
            )));
        }
        let rgba = RgbaSliceU8::new(&frame.data, (frame.width as usize, frame.height as usize));
        let yuv_source = YUVBuffer::from_rgb_source(rgba);

        let encoder = self
            .encoder
            .as_mut()
            .ok_or(EncoderError::EncodingFailed("Encoder not available".into()))?;

        if self.frame_count % config.keyframe_interval_frames() == 0 {
            encoder.force_intra_frame();
        }

        let bitstream = encoder
            .encode(&yuv_source)
            .map_err(|e| EncoderError::EncodingFailed(format!("Encoding failed: {:?}", e)))?;

        let mut encoded_data = Vec::new();
        for layer_idx in 0..bitstream.num_layers() {
            if let Some(layer) = bitstream.layer(layer_idx) {
                for nal_idx in 0..layer.nal_count() {
                    if let Some(nal_unit) = layer.nal_unit(nal_idx) {
                        encoded_data.extend_from_slice(nal_unit);
                    }
                }
            }
        }

        let pts_us = frame.presentation_time_ns / 1000;
        self.frame_count += 1;
        self.last_pts_us = pts_us;

        if encoded_data.is_empty() {
            // rate control skipped this frame
            debug!("Encoder skipped frame at {}us", pts_us);
            return Ok(());
        }
        self.push_access_unit(&encoded_data, pts_us)
    }

    #[cfg(not(feature = "openh264"))]
    fn encode_frame(&mut self, _frame: SurfaceFrame) -> Result<()> {
        Err(EncoderError::EncodingFailed("OpenH264 feature not enabled".into()))
    }
}

/// Rate settings handed to OpenH264. Keyframes are forced from
/// `encode_frame` at the configured interval.
#[cfg(feature = "openh264")]
fn h264_config(config: &EncoderConfig) -> H264Config {
    H264Config::new()
        .rate_control_mode(RateControlMode::Bitrate)
        .bitrate(BitRate::from_bps(config.bitrate_bps()))
        .max_frame_rate(FrameRate::from_hz(config.fps as f32))
}

impl Default for OpenH264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceEncoder for OpenH264Encoder {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<()> {
        config.validate()?;
        if config.codec != VideoCodec::H264 {
            return Err(EncoderError::UnsupportedCodec(config.codec));
        }
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(EncoderError::InvalidConfig(format!(
                "H.264 needs even dimensions, got {}x{}",
                config.width, config.height
            )));
        }

        #[cfg(feature = "openh264")]
        {
            info!(
                "Initializing OpenH264 encoder: {}x{} @ {} fps, {} kbps",
                config.width, config.height, config.fps, config.bitrate_kbps
            );

            let encoder = H264Encoder::with_api_config(OpenH264API::from_source(), h264_config(config))
                .map_err(|e| EncoderError::InitFailed(format!("OpenH264 init failed: {:?}", e)))?;

            self.encoder = Some(encoder);
            self.config = Some(config.clone());
            Ok(())
        }

        #[cfg(not(feature = "openh264"))]
        {
            Err(EncoderError::InitFailed("OpenH264 feature not enabled".into()))
        }
    }

    fn create_input_surface(&mut self) -> Result<ProducerSurface> {
        let config = self.config()?;
        if self.input.is_some() {
            return Err(EncoderError::InvalidConfig("input surface already created".into()));
        }
        let (surface, rx) = ProducerSurface::new(config.width, config.height);
        self.input = Some(rx);
        Ok(surface)
    }

    fn start(&mut self) -> Result<()> {
        self.config()?;
        if self.input.is_none() {
            return Err(EncoderError::InitFailed("no input surface".into()));
        }
        self.started = true;
        info!("OpenH264 encoder started");
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> Result<()> {
        if !self.started {
            return Err(EncoderError::EncodingFailed("end of stream before start".into()));
        }
        self.eos_requested = true;
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<EncoderOutput> {
        if let Some(output) = self.pending.pop_front() {
            return Ok(output);
        }
        if !self.started {
            return Err(EncoderError::EncodingFailed("Encoder not started".into()));
        }
        if self.eos_emitted {
            return Ok(EncoderOutput::TryAgainLater);
        }

        let rx = self
            .input
            .as_ref()
            .ok_or_else(|| EncoderError::EncodingFailed("no input surface".into()))?;

        let frame = if self.eos_requested {
            rx.try_recv().ok()
        } else {
            match rx.recv_timeout(timeout) {
                Ok(frame) => Some(frame),
                Err(RecvTimeoutError::Timeout) => return Ok(EncoderOutput::TryAgainLater),
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Encoder input surface disconnected before end of stream");
                    return Ok(EncoderOutput::TryAgainLater);
                }
            }
        };

        match frame {
            Some(frame) => {
                self.encode_frame(frame)?;
                Ok(self.pending.pop_front().unwrap_or(EncoderOutput::TryAgainLater))
            }
            None => {
                self.eos_emitted = true;
                debug!("Encoder emitted end of stream after {} frames", self.frame_count);
                Ok(EncoderOutput::Buffer(EncodedSample::end_of_stream(self.last_pts_us)))
            }
        }
    }

    fn release(&mut self) {
        #[cfg(feature = "openh264")]
        {
            self.encoder = None;
        }
        self.input = None;
        self.pending.clear();
        self.started = false;
    }
}
