use crate::rotate::{rotate_frame, rotation_from_display_matrix};
use crate::selector::ClosestFrameSelector;
use crate::{FrameSource, MediaError, Result};
use ffmpeg_next::{
    Rational, ffi,
    codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder,
    format::{self, Pixel, context::Input},
    frame::Video as DecodedFrame,
    media::Type as MediaType,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use hl_core::{Rotation, VideoFrame, VideoMetadata};
use std::path::Path;
use std::sync::Once;
use tracing::{debug, info};

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            tracing::error!("FFmpeg initialization failed: {}", e);
        }
    });
}

fn open_input(path: &Path) -> Result<Input> {
    init();
    format::input(&path).map_err(|e| MediaError::Open(format!("{}: {}", path.display(), e)))
}

/// Display-matrix side data first, then the legacy `rotate` tag.
fn stream_rotation(stream: &ffmpeg_next::Stream<'_>) -> Rotation {
    if let Some(rotation) = display_matrix_rotation(stream) {
        return rotation;
    }
    stream
        .metadata()
        .get("rotate")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(Rotation::from_degrees)
        .unwrap_or_default()
}

fn display_matrix_rotation(stream: &ffmpeg_next::Stream<'_>) -> Option<Rotation> {
    let parameters = stream.parameters();
    // SAFETY: codecpar and its coded side data live as long as the input
    // context, which outlives this call; the slice is not kept.
    unsafe {
        let par = parameters.as_ptr();
        let entry = ffi::av_packet_side_data_get(
            (*par).coded_side_data,
            (*par).nb_coded_side_data,
            ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if entry.is_null() || (*entry).data.is_null() {
            return None;
        }
        let matrix = std::slice::from_raw_parts((*entry).data, (*entry).size);
        let rotation = rotation_from_display_matrix(matrix);
        debug!("Display matrix rotation: {:?}", rotation);
        rotation
    }
}

fn to_micros(ts: i64, time_base: Rational) -> i64 {
    let num = time_base.numerator() as i128;
    let den = time_base.denominator().max(1) as i128;
    (ts as i128 * num * 1_000_000 / den) as i64
}

pub fn probe(path: &Path, target_fps: u32) -> Result<VideoMetadata> {
    let ictx = open_input(path)?;
    let stream = ictx.streams().best(MediaType::Video).ok_or(MediaError::NoVideoStream)?;

    let decoder = CodecContext::from_parameters(stream.parameters())
        .and_then(|ctx| ctx.decoder().video())
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    let duration_ms = if ictx.duration() > 0 {
        // container duration is in AV_TIME_BASE (microseconds)
        ictx.duration() / 1000
    } else {
        to_micros(stream.duration(), stream.time_base()) / 1000
    };

    let metadata = VideoMetadata::new(
        decoder.width(),
        decoder.height(),
        duration_ms,
        stream_rotation(&stream),
        target_fps,
    );
    info!(
        "Probed {}: {}x{}, {} ms, rotation {}°",
        path.display(),
        metadata.width,
        metadata.height,
        metadata.duration_ms,
        metadata.rotation.degrees()
    );
    Ok(metadata)
}

/// Sequential decoder state, split from the selector so both can be
/// borrowed at once.
struct DecodeState {
    ictx: Input,
    stream_index: usize,
    decoder: VideoDecoder,
    scaler: ScalingContext,
    time_base: Rational,
    start_pts: i64,
    decoded: DecodedFrame,
    scaled: DecodedFrame,
    eof_sent: bool,
}

impl DecodeState {
    fn receive(&mut self) -> Result<Option<VideoFrame>> {
        if self.decoder.receive_frame(&mut self.decoded).is_err() {
            return Ok(None);
        }
        self.scaler
            .run(&self.decoded, &mut self.scaled)
            .map_err(|e| MediaError::Decode(e.to_string()))?;

        let pts = self.decoded.timestamp().or(self.decoded.pts()).unwrap_or(0);
        let pts_us = to_micros(pts - self.start_pts, self.time_base);

        // copy out row by row, dropping line padding
        let (w, h) = (self.scaled.width() as usize, self.scaled.height() as usize);
        let stride = self.scaled.stride(0);
        let plane = self.scaled.data(0);
        let mut data = Vec::with_capacity(w * h * 4);
        for row in 0..h {
            data.extend_from_slice(&plane[row * stride..row * stride + w * 4]);
        }
        Ok(Some(VideoFrame::new(data, w as u32, h as u32, pts_us)))
    }

    fn decode_next(&mut self) -> Result<Option<VideoFrame>> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let next = self.ictx.packets().next();
            match next {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|e| MediaError::Decode(e.to_string()))?;
                }
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| MediaError::Decode(e.to_string()))?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

/// FFmpeg-backed [`FrameSource`] decoding one video stream front to back.
pub struct FfmpegFrameSource {
    state: DecodeState,
    selector: ClosestFrameSelector,
    rotation: Rotation,
}

impl FfmpegFrameSource {
    pub fn open(path: &Path, rotation: Rotation) -> Result<Self> {
        let ictx = open_input(path)?;
        let stream = ictx.streams().best(MediaType::Video).ok_or(MediaError::NoVideoStream)?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let start_pts = stream.start_time().max(0);

        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| MediaError::Decode(e.to_string()))?;

        let scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGBA,
            decoder.width(),
            decoder.height(),
            ScalingFlags::BILINEAR,
        )
        .map_err(|e| MediaError::Decode(e.to_string()))?;

        debug!(
            "Opened decoder for {} stream {} ({}x{})",
            path.display(),
            stream_index,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            state: DecodeState {
                ictx,
                stream_index,
                decoder,
                scaler,
                time_base,
                start_pts,
                decoded: DecodedFrame::empty(),
                scaled: DecodedFrame::empty(),
                eof_sent: false,
            },
            selector: ClosestFrameSelector::new(),
            rotation,
        })
    }
}

impl FrameSource for FfmpegFrameSource {
    fn extract_frame(&mut self, presentation_time_us: i64) -> Result<VideoFrame> {
        let state = &mut self.state;
        let frame = self.selector.select(presentation_time_us, || state.decode_next())?;
        Ok(rotate_frame(&frame, self.rotation))
    }
}
