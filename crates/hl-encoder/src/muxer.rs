use crate::annexb::contains_sps;
use crate::{EncodedSample, EncoderError, Result, TrackFormat, VideoCodec};
use muxide::api::{Muxer, MuxerBuilder, VideoCodec as MuxCodec};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Container multiplexer fed with already-encoded samples.
///
/// Ordering contract: `add_track` before `start`, `start` exactly once,
/// `write_sample` only between `start` and `stop`.
pub trait ContainerMuxer: Send {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize>;
    fn start(&mut self) -> Result<()>;
    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn release(&mut self);
}

/// Single-video-track MP4 writer.
pub struct Mp4Muxer {
    path: PathBuf,
    file: Option<File>,
    format: Option<TrackFormat>,
    muxer: Option<Muxer<File>>,
    stopped: bool,
    last_pts_us: Option<i64>,
}

impl Mp4Muxer {
    /// Creates (truncating) the output file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        debug!("Created muxer output {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
            format: None,
            muxer: None,
            stopped: false,
            last_pts_us: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContainerMuxer for Mp4Muxer {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize> {
        if self.muxer.is_some() || self.stopped {
            return Err(EncoderError::Consistency("track added after muxer start".into()));
        }
        if self.format.is_some() {
            return Err(EncoderError::Consistency("video track already registered".into()));
        }
        if format.codec != VideoCodec::H264 {
            return Err(EncoderError::UnsupportedCodec(format.codec));
        }
        self.format = Some(format.clone());
        Ok(0)
    }

    fn start(&mut self) -> Result<()> {
        if self.muxer.is_some() || self.stopped {
            return Err(EncoderError::Consistency("muxer started twice".into()));
        }
        let format = self
            .format
            .as_ref()
            .ok_or_else(|| EncoderError::Consistency("muxer started without a track".into()))?;
        let file = self
            .file
            .take()
            .ok_or_else(|| EncoderError::Muxer("output file already released".into()))?;

        let muxer = MuxerBuilder::new(file)
            .video(MuxCodec::H264, format.width, format.height, format.fps as f64)
            .build()
            .map_err(|e| EncoderError::Muxer(e.to_string()))?;
        self.muxer = Some(muxer);

        info!(
            "MP4 muxer started: {} {}x{} @ {} fps",
            self.path.display(),
            format.width,
            format.height,
            format.fps
        );
        Ok(())
    }

    fn write_sample(&mut self, track: usize, sample: &EncodedSample) -> Result<()> {
        let muxer = self
            .muxer
            .as_mut()
            .ok_or_else(|| EncoderError::Consistency("sample written before muxer start".into()))?;
        if track != 0 {
            return Err(EncoderError::Consistency(format!("unknown track {track}")));
        }
        if let Some(last) = self.last_pts_us.filter(|last| sample.presentation_time_us <= *last) {
            return Err(EncoderError::Consistency(format!(
                "non-increasing timestamp {}us after {}us",
                sample.presentation_time_us, last
            )));
        }

        let pts_secs = sample.presentation_time_us as f64 / 1_000_000.0;
        let keyframe = sample.flags.keyframe;

        // keyframes must carry parameter sets in-band
        let result = match &self.format {
            Some(format) if keyframe && !contains_sps(&sample.data) => {
                let mut data = Vec::with_capacity(format.csd.len() + sample.data.len());
                data.extend_from_slice(&format.csd);
                data.extend_from_slice(&sample.data);
                muxer.write_video(pts_secs, &data, keyframe)
            }
            _ => muxer.write_video(pts_secs, &sample.data, keyframe),
        };
        result.map_err(|e| EncoderError::Muxer(e.to_string()))?;

        self.last_pts_us = Some(sample.presentation_time_us);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let muxer = self
            .muxer
            .take()
            .ok_or_else(|| EncoderError::Consistency("muxer stopped before start".into()))?;
        self.stopped = true;
        muxer
            .finish_with_stats()
            .map_err(|e| EncoderError::Muxer(e.to_string()))?;
        info!("MP4 muxer finalized {}", self.path.display());
        Ok(())
    }

    fn release(&mut self) {
        self.muxer = None;
        self.file = None;
        self.stopped = true;
    }
}
