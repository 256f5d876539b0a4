//! End-to-end runs over in-memory video with counting stand-ins for every
//! device resource.

use bytes::Bytes;
use crossbeam_channel::Receiver;
use hl_core::{
    LANDMARK_COUNT, LabelError, LabelingConfig, ProducerSurface, Result as LabelResult, Rotation, SurfaceFrame,
    VideoFrame, VideoMetadata,
};
use hl_encoder::{
    ContainerMuxer, EncodedSample, EncoderConfig, EncoderError, EncoderOutput, SampleFlags, SurfaceEncoder,
    TrackFormat,
};
use hl_labeler::{LabelingBackend, RunState, VideoLabelingOrchestrator};
use hl_media::{FrameSource, MediaError, MemoryVideo};
use hl_render::skeleton::RIGHT_HAND_COLOR;
use hl_render::{
    ConfigRequest, DrawCommand, GraphicsBackend, ProgramId, ProgramKind, ShareGroup, SoftwareBackend, SurfaceId,
    TextureId,
};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const EPOCH_MS: i64 = 1_700_000_000_000;
const CAPTURE_EVERY: i64 = 15;

#[derive(Debug, Default)]
struct Counters {
    contexts: AtomicI64,
    surfaces: AtomicI64,
    encoders: AtomicI64,
    muxers: AtomicI64,
    sources: AtomicI64,
    probes: AtomicI64,
}

impl Counters {
    fn inc(counter: &AtomicI64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn dec(counter: &AtomicI64) {
        counter.fetch_sub(1, Ordering::SeqCst);
    }

    /// Live handles: contexts, surfaces, encoders, muxers, frame sources.
    fn live(&self) -> [i64; 5] {
        [
            self.contexts.load(Ordering::SeqCst),
            self.surfaces.load(Ordering::SeqCst),
            self.encoders.load(Ordering::SeqCst),
            self.muxers.load(Ordering::SeqCst),
            self.sources.load(Ordering::SeqCst),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FailPoint {
    Probe,
    Graphics,
    Encoder,
    Muxer,
    Frames,
    /// Frame extraction fails on the n-th call.
    MidStream(i64),
    /// The encoder consumes frames but never emits a sample.
    SilentEncoder,
}

#[derive(Debug, Clone, Copy)]
struct SourceVideo {
    width: u32,
    height: u32,
    duration_ms: i64,
    source_fps: u32,
    rotation: Rotation,
}

#[derive(Clone)]
struct FakeBackend {
    video: SourceVideo,
    counters: Arc<Counters>,
    fail: Arc<Mutex<Option<FailPoint>>>,
    captured: Arc<Mutex<Vec<SurfaceFrame>>>,
    muxer_log: Arc<Mutex<Vec<String>>>,
    written_pts: Arc<Mutex<Vec<i64>>>,
}

impl FakeBackend {
    fn new(video: SourceVideo) -> Self {
        Self {
            video,
            counters: Arc::default(),
            fail: Arc::default(),
            captured: Arc::default(),
            muxer_log: Arc::default(),
            written_pts: Arc::default(),
        }
    }

    fn fail_at(&self, point: Option<FailPoint>) {
        *self.fail.lock().unwrap() = point;
    }

    fn fails_at(&self, point: FailPoint) -> bool {
        *self.fail.lock().unwrap() == Some(point)
    }

    fn reset_records(&self) {
        self.captured.lock().unwrap().clear();
        self.muxer_log.lock().unwrap().clear();
        self.written_pts.lock().unwrap().clear();
    }
}

impl LabelingBackend for FakeBackend {
    fn probe(&self, _video: &Path, target_fps: u32) -> LabelResult<VideoMetadata> {
        Counters::inc(&self.counters.probes);
        if self.fails_at(FailPoint::Probe) {
            return Err(LabelError::MediaUnreadable("corrupt container".into()));
        }
        let v = self.video;
        Ok(VideoMetadata::new(v.width, v.height, v.duration_ms, v.rotation, target_fps))
    }

    fn graphics(&self) -> LabelResult<Box<dyn GraphicsBackend>> {
        let inner = if self.fails_at(FailPoint::Graphics) {
            SoftwareBackend::unavailable()
        } else {
            SoftwareBackend::new()
        };
        Ok(Box::new(CountingGraphics {
            inner,
            counters: self.counters.clone(),
            context_live: false,
        }))
    }

    fn open_frames(&self, _video: &Path, metadata: &VideoMetadata) -> LabelResult<Box<dyn FrameSource>> {
        if self.fails_at(FailPoint::Frames) {
            return Err(LabelError::MediaUnreadable("no decoder".into()));
        }
        let fail_after = match *self.fail.lock().unwrap() {
            Some(FailPoint::MidStream(n)) => Some(n),
            _ => None,
        };
        let v = self.video;
        Counters::inc(&self.counters.sources);
        Ok(Box::new(CountedFrames {
            inner: MemoryVideo::synthetic(v.width, v.height, v.duration_ms, v.source_fps, metadata.rotation),
            counters: self.counters.clone(),
            extracted: 0,
            fail_after,
        }))
    }

    fn encoder(&self, _config: &EncoderConfig) -> LabelResult<Box<dyn SurfaceEncoder>> {
        if self.fails_at(FailPoint::Encoder) {
            return Err(LabelError::EncoderConfiguration("no encoder for video/avc".into()));
        }
        Counters::inc(&self.counters.encoders);
        Ok(Box::new(FakeEncoder {
            counters: self.counters.clone(),
            captured: self.captured.clone(),
            config: None,
            input: None,
            pending: VecDeque::new(),
            eos_requested: false,
            eos_emitted: false,
            silent: self.fails_at(FailPoint::SilentEncoder),
            frames: 0,
            last_pts_us: 0,
            released: false,
        }))
    }

    fn muxer(&self, output: &Path) -> LabelResult<Box<dyn ContainerMuxer>> {
        if self.fails_at(FailPoint::Muxer) {
            return Err(LabelError::Muxing("disk full".into()));
        }
        let file = File::create(output)?;
        Counters::inc(&self.counters.muxers);
        Ok(Box::new(FakeMuxer {
            file: Some(file),
            counters: self.counters.clone(),
            log: self.muxer_log.clone(),
            written_pts: self.written_pts.clone(),
            track_added: false,
            started: false,
            released: false,
        }))
    }
}

struct CountingGraphics {
    inner: SoftwareBackend,
    counters: Arc<Counters>,
    context_live: bool,
}

type RenderResult<T> = hl_render::Result<T>;

impl GraphicsBackend for CountingGraphics {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn choose_config(&mut self, request: &ConfigRequest) -> RenderResult<()> {
        self.inner.choose_config(request)
    }

    fn create_context(&mut self, share: Option<ShareGroup>) -> RenderResult<()> {
        self.inner.create_context(share)?;
        if !self.context_live {
            self.context_live = true;
            Counters::inc(&self.counters.contexts);
        }
        Ok(())
    }

    fn destroy_context(&mut self) {
        self.inner.destroy_context();
        if self.context_live {
            self.context_live = false;
            Counters::dec(&self.counters.contexts);
        }
    }

    fn create_window_surface(&mut self, producer: ProducerSurface) -> RenderResult<SurfaceId> {
        let id = self.inner.create_window_surface(producer)?;
        Counters::inc(&self.counters.surfaces);
        Ok(id)
    }

    fn create_pbuffer_surface(&mut self, width: u32, height: u32) -> RenderResult<SurfaceId> {
        let id = self.inner.create_pbuffer_surface(width, height)?;
        Counters::inc(&self.counters.surfaces);
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        if self.inner.surface_size(surface).is_ok() {
            Counters::dec(&self.counters.surfaces);
        }
        self.inner.destroy_surface(surface);
    }

    fn surface_size(&self, surface: SurfaceId) -> RenderResult<(u32, u32)> {
        self.inner.surface_size(surface)
    }

    fn swap_buffers(&mut self, surface: SurfaceId) -> RenderResult<()> {
        self.inner.swap_buffers(surface)
    }

    fn set_presentation_time(&mut self, surface: SurfaceId, nanos: i64) -> RenderResult<()> {
        self.inner.set_presentation_time(surface, nanos)
    }

    fn compile_program(&mut self, kind: ProgramKind) -> RenderResult<ProgramId> {
        self.inner.compile_program(kind)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.inner.delete_program(program)
    }

    fn create_texture(&mut self) -> RenderResult<TextureId> {
        self.inner.create_texture()
    }

    fn upload_texture(&mut self, texture: TextureId, frame: &VideoFrame) -> RenderResult<()> {
        self.inner.upload_texture(texture, frame)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.inner.delete_texture(texture)
    }

    fn clear(&mut self, target: SurfaceId, color: [f32; 4]) -> RenderResult<()> {
        self.inner.clear(target, color)
    }

    fn draw(&mut self, target: SurfaceId, program: ProgramId, command: DrawCommand<'_>) -> RenderResult<()> {
        self.inner.draw(target, program, command)
    }

    fn read_pixels(&self, target: SurfaceId) -> RenderResult<Vec<u8>> {
        self.inner.read_pixels(target)
    }

    fn share_group(&self) -> Option<ShareGroup> {
        self.inner.share_group()
    }
}

struct CountedFrames {
    inner: MemoryVideo,
    counters: Arc<Counters>,
    extracted: i64,
    fail_after: Option<i64>,
}

impl FrameSource for CountedFrames {
    fn extract_frame(&mut self, presentation_time_us: i64) -> hl_media::Result<VideoFrame> {
        if self.fail_after == Some(self.extracted) {
            return Err(MediaError::Decode("truncated packet".into()));
        }
        self.extracted += 1;
        self.inner.extract_frame(presentation_time_us)
    }
}

impl Drop for CountedFrames {
    fn drop(&mut self) {
        Counters::dec(&self.counters.sources);
    }
}

/// Passes every surface frame through as one "encoded" sample and keeps a
/// copy of every 15th picture.
struct FakeEncoder {
    counters: Arc<Counters>,
    captured: Arc<Mutex<Vec<SurfaceFrame>>>,
    config: Option<EncoderConfig>,
    input: Option<Receiver<SurfaceFrame>>,
    pending: VecDeque<EncoderOutput>,
    eos_requested: bool,
    eos_emitted: bool,
    silent: bool,
    frames: i64,
    last_pts_us: i64,
    released: bool,
}

impl SurfaceEncoder for FakeEncoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn configure(&mut self, config: &EncoderConfig) -> hl_encoder::Result<()> {
        config.validate()?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn create_input_surface(&mut self) -> hl_encoder::Result<ProducerSurface> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EncoderError::InitFailed("not configured".into()))?;
        let (surface, rx) = ProducerSurface::new(config.width, config.height);
        self.input = Some(rx);
        Ok(surface)
    }

    fn start(&mut self) -> hl_encoder::Result<()> {
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> hl_encoder::Result<()> {
        self.eos_requested = true;
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> hl_encoder::Result<EncoderOutput> {
        if let Some(output) = self.pending.pop_front() {
            return Ok(output);
        }
        if self.eos_emitted {
            return Ok(EncoderOutput::TryAgainLater);
        }
        let rx = self
            .input
            .as_ref()
            .ok_or_else(|| EncoderError::EncodingFailed("no input".into()))?;

        match rx.try_recv() {
            Ok(_) if self.silent => Ok(EncoderOutput::TryAgainLater),
            Ok(frame) => {
                let config = self.config.clone().unwrap_or_default();
                if self.frames == 0 {
                    self.pending.push_back(EncoderOutput::FormatChanged(TrackFormat {
                        codec: config.codec,
                        width: config.width,
                        height: config.height,
                        fps: config.fps,
                        csd: Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42, 0x0a]),
                    }));
                }
                let pts_us = frame.presentation_time_ns / 1000;
                self.pending.push_back(EncoderOutput::Buffer(EncodedSample {
                    data: Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]),
                    presentation_time_us: pts_us,
                    flags: SampleFlags {
                        keyframe: self.frames == 0,
                        ..Default::default()
                    },
                }));
                if self.frames % CAPTURE_EVERY == 0 {
                    self.captured.lock().unwrap().push(frame);
                }
                self.frames += 1;
                self.last_pts_us = pts_us;
                Ok(self.pending.pop_front().unwrap_or(EncoderOutput::TryAgainLater))
            }
            Err(_) if self.eos_requested => {
                self.eos_emitted = true;
                Ok(EncoderOutput::Buffer(EncodedSample::end_of_stream(self.last_pts_us)))
            }
            Err(_) => Ok(EncoderOutput::TryAgainLater),
        }
    }

    fn release(&mut self) {
        self.input = None;
        if !self.released {
            self.released = true;
            Counters::dec(&self.counters.encoders);
        }
    }
}

struct FakeMuxer {
    file: Option<File>,
    counters: Arc<Counters>,
    log: Arc<Mutex<Vec<String>>>,
    written_pts: Arc<Mutex<Vec<i64>>>,
    track_added: bool,
    started: bool,
    released: bool,
}

impl ContainerMuxer for FakeMuxer {
    fn add_track(&mut self, _format: &TrackFormat) -> hl_encoder::Result<usize> {
        if self.started {
            return Err(EncoderError::Consistency("track after start".into()));
        }
        self.track_added = true;
        self.log.lock().unwrap().push("add_track".into());
        Ok(0)
    }

    fn start(&mut self) -> hl_encoder::Result<()> {
        if !self.track_added || self.started {
            return Err(EncoderError::Consistency("bad start".into()));
        }
        self.started = true;
        self.log.lock().unwrap().push("start".into());
        Ok(())
    }

    fn write_sample(&mut self, _track: usize, sample: &EncodedSample) -> hl_encoder::Result<()> {
        if !self.started {
            return Err(EncoderError::Consistency("write before start".into()));
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| EncoderError::Muxer("released".into()))?;
        file.write_all(&sample.data)?;
        self.written_pts.lock().unwrap().push(sample.presentation_time_us);
        Ok(())
    }

    fn stop(&mut self) -> hl_encoder::Result<()> {
        if !self.started {
            return Err(EncoderError::Consistency("stop before start".into()));
        }
        self.log.lock().unwrap().push("stop".into());
        Ok(())
    }

    fn release(&mut self) {
        self.file = None;
        if !self.released {
            self.released = true;
            self.log.lock().unwrap().push("release".into());
            Counters::dec(&self.counters.muxers);
        }
    }
}

fn header() -> String {
    let mut cols = vec![
        "timestampMs".to_string(),
        "frameNumber".to_string(),
        "handedness".to_string(),
        "confidence".to_string(),
    ];
    for i in 0..LANDMARK_COUNT {
        cols.extend([format!("x{i}"), format!("y{i}"), format!("z{i}")]);
    }
    cols.join(",")
}

/// One row with every landmark at `(x, y)`.
fn row(ts: i64, frame: i64, hand: &str, x: f32, y: f32) -> String {
    let mut cols = vec![ts.to_string(), frame.to_string(), hand.to_string(), "0.9".to_string()];
    for _ in 0..LANDMARK_COUNT {
        cols.extend([x.to_string(), y.to_string(), "0".to_string()]);
    }
    cols.join(",")
}

fn table(rows: &[String]) -> String {
    let mut text = header();
    for r in rows {
        text.push('\n');
        text.push_str(r);
    }
    text.push('\n');
    text
}

/// Session directory with a placeholder video, an empty left table and the
/// given right-hand rows.
fn session(right_rows: &[String]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("video.mp4"), b"placeholder").unwrap();
    fs::write(dir.path().join("keypoints_left.csv"), table(&[])).unwrap();
    fs::write(dir.path().join("keypoints_right.csv"), table(right_rows)).unwrap();
    dir
}

fn right_hand_every_frame(count: i64, x: f32, y: f32) -> Vec<String> {
    (0..count)
        .map(|i| row(EPOCH_MS + i * 1000 / 30, i, "Right", x, y))
        .collect()
}

fn output_of(dir: &Path) -> PathBuf {
    dir.join("video_labeled.mp4")
}

fn rgba8(c: [f32; 4]) -> [u8; 4] {
    c.map(|v| (v * 255.0).round() as u8)
}

fn pixel(frame: &SurfaceFrame, x: u32, y: u32) -> [u8; 4] {
    let idx = ((y * frame.width + x) * 4) as usize;
    [frame.data[idx], frame.data[idx + 1], frame.data[idx + 2], frame.data[idx + 3]]
}

fn landscape(duration_ms: i64) -> SourceVideo {
    SourceVideo {
        width: 640,
        height: 480,
        duration_ms,
        source_fps: 30,
        rotation: Rotation::Deg0,
    }
}

#[test]
fn test_two_second_session_end_to_end() {
    let dir = session(&right_hand_every_frame(60, 0.75, 0.25));
    let backend = FakeBackend::new(landscape(2000));
    let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());

    let outcome = labeler.run(dir.path(), |_| {}).unwrap();

    assert_eq!(outcome.output, output_of(dir.path()));
    assert!(outcome.output.exists());
    assert_eq!(outcome.stats.frames_rendered, 60);
    assert_eq!(outcome.stats.frames_with_overlay, 60);
    assert_eq!(outcome.stats.hands_drawn, 60);
    assert_eq!(outcome.sink.samples_written, 60);
    assert_eq!(outcome.skipped_keypoint_rows, 0);
    assert_eq!(labeler.last_state(), RunState::Completed);

    let pts = backend.written_pts.lock().unwrap().clone();
    assert_eq!(pts.len(), 60);
    assert_eq!(pts[0], 0);
    assert_eq!(pts[59], 59 * 1_000_000 / 30);
    assert!(pts.windows(2).all(|w| w[0] < w[1]));

    assert_eq!(*backend.muxer_log.lock().unwrap(), ["add_track", "start", "stop", "release"]);

    let captured = backend.captured.lock().unwrap();
    assert_eq!(captured.len(), 4);
    for (n, frame) in captured.iter().enumerate() {
        let index = n as i64 * CAPTURE_EVERY;
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(frame.presentation_time_ns, index * 1_000_000_000 / 30);
        assert_eq!(pixel(frame, 480, 120), rgba8(RIGHT_HAND_COLOR), "frame {index}");
        assert_eq!(pixel(frame, 100, 400), [index as u8, 0, 96, 255], "frame {index}");
    }

    assert_eq!(backend.counters.live(), [0; 5]);
}

#[test]
fn test_rotated_source_is_upright_with_rotated_landmarks() {
    let dir = session(&right_hand_every_frame(30, 0.25, 0.25));
    let backend = FakeBackend::new(SourceVideo {
        rotation: Rotation::Deg90,
        ..landscape(1000)
    });
    let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());

    let outcome = labeler.run(dir.path(), |_| {}).unwrap();
    assert_eq!(outcome.stats.frames_rendered, 30);

    let captured = backend.captured.lock().unwrap();
    assert!(!captured.is_empty());
    for frame in captured.iter() {
        assert_eq!((frame.width, frame.height), (480, 640));
        // (0.25, 0.25) turned a quarter clockwise lands at (0.75, 0.25)
        assert_eq!(pixel(frame, 360, 160), rgba8(RIGHT_HAND_COLOR));
    }
}

#[test]
fn test_overlay_only_within_sync_tolerance() {
    let rows = vec![row(EPOCH_MS, 0, "Right", 0.5, 0.5), row(EPOCH_MS + 500, 15, "Right", 0.5, 0.5)];
    let dir = session(&rows);
    let backend = FakeBackend::new(landscape(1000));
    let mut labeler = VideoLabelingOrchestrator::new(backend, LabelingConfig::default());

    let outcome = labeler.run(dir.path(), |_| {}).unwrap();

    // 0 and 33.3 ms match the first row; 466.7, 500 and 533.3 ms the second
    assert_eq!(outcome.stats.frames_rendered, 30);
    assert_eq!(outcome.stats.frames_with_overlay, 5);
    assert_eq!(outcome.stats.hands_drawn, 5);
}

#[test]
fn test_frame_count_rounds_up_partial_frame() {
    let dir = session(&[]);
    let backend = FakeBackend::new(landscape(1001));
    let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());

    let outcome = labeler.run(dir.path(), |_| {}).unwrap();
    assert_eq!(outcome.stats.frames_rendered, 31);
    assert_eq!(outcome.stats.frames_with_overlay, 0);
    assert_eq!(backend.written_pts.lock().unwrap().last(), Some(&1_000_000));
}

#[test]
fn test_malformed_rows_are_skipped() {
    let mut rows = right_hand_every_frame(30, 0.5, 0.5);
    rows.insert(3, "garbage,row".to_string());
    let dir = session(&rows);
    let mut labeler = VideoLabelingOrchestrator::new(FakeBackend::new(landscape(1000)), LabelingConfig::default());

    let outcome = labeler.run(dir.path(), |_| {}).unwrap();
    assert_eq!(outcome.skipped_keypoint_rows, 1);
    assert_eq!(outcome.stats.frames_with_overlay, 30);
}

#[test]
fn test_failure_at_every_stage_releases_everything() {
    let cases = [
        (FailPoint::Probe, "media_unreadable"),
        (FailPoint::Graphics, "graphics_unavailable"),
        (FailPoint::Encoder, "encoder_configuration"),
        (FailPoint::Muxer, "muxing"),
        (FailPoint::Frames, "media_unreadable"),
        (FailPoint::MidStream(10), "media_unreadable"),
    ];

    let dir = session(&right_hand_every_frame(30, 0.5, 0.5));
    let output = output_of(dir.path());
    let backend = FakeBackend::new(landscape(1000));

    for (point, kind) in cases {
        backend.reset_records();
        backend.fail_at(Some(point));
        let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());

        let err = labeler.run(dir.path(), |_| {}).unwrap_err();
        assert_eq!(err.kind(), kind, "{point:?}: {err}");
        assert_eq!(labeler.last_state(), RunState::Failed, "{point:?}");
        assert!(!output.exists(), "{point:?} left a partial output");
        assert_eq!(backend.counters.live(), [0; 5], "{point:?} leaked a handle");

        // the next run on the same resources succeeds
        backend.fail_at(None);
        let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());
        let path = labeler.process_video(dir.path(), |_| {}).unwrap();
        assert!(path.exists(), "rerun after {point:?}");
        assert_eq!(backend.counters.live(), [0; 5]);
        fs::remove_file(path).unwrap();
    }
}

#[test]
fn test_zero_length_video_fails_before_any_resource() {
    let dir = session(&[]);
    let backend = FakeBackend::new(landscape(0));
    let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());

    let err = labeler.run(dir.path(), |_| {}).unwrap_err();
    assert_eq!(err.kind(), "media_unreadable", "{err}");
    assert_eq!(labeler.last_state(), RunState::Failed);
    assert!(!output_of(dir.path()).exists());
    assert!(backend.muxer_log.lock().unwrap().is_empty());
    assert_eq!(backend.counters.live(), [0; 5]);
}

#[test]
fn test_run_without_samples_deletes_empty_output() {
    let dir = session(&right_hand_every_frame(30, 0.5, 0.5));
    let backend = FakeBackend::new(landscape(1000));
    backend.fail_at(Some(FailPoint::SilentEncoder));
    let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());

    let err = labeler.run(dir.path(), |_| {}).unwrap_err();
    assert_eq!(err.kind(), "encoding", "{err}");
    assert_eq!(labeler.last_state(), RunState::Failed);
    assert!(!output_of(dir.path()).exists());
    assert!(backend.written_pts.lock().unwrap().is_empty());
    assert_eq!(backend.counters.live(), [0; 5]);
}

#[test]
fn test_mid_stream_failure_stops_started_muxer() {
    let dir = session(&[]);
    let backend = FakeBackend::new(landscape(1000));
    backend.fail_at(Some(FailPoint::MidStream(5)));
    let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());

    assert!(labeler.run(dir.path(), |_| {}).is_err());
    assert_eq!(*backend.muxer_log.lock().unwrap(), ["add_track", "start", "stop", "release"]);
    assert_eq!(backend.written_pts.lock().unwrap().len(), 5);
}

#[test]
fn test_cancellation_deletes_output() {
    let dir = session(&right_hand_every_frame(60, 0.5, 0.5));
    let backend = FakeBackend::new(landscape(2000));
    let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());
    let token = labeler.cancellation_token();

    let err = labeler
        .run(dir.path(), move |p| {
            if p >= 0.5 {
                token.cancel();
            }
        })
        .unwrap_err();

    assert!(matches!(err, LabelError::Cancelled));
    assert_eq!(labeler.last_state(), RunState::Failed);
    assert!(!output_of(dir.path()).exists());
    assert_eq!(backend.counters.live(), [0; 5]);
    let written = backend.written_pts.lock().unwrap().len();
    assert!(written > 0 && written < 60, "wrote {written} samples");
}

#[test]
fn test_progress_is_monotonic_and_completes() {
    let dir = session(&right_hand_every_frame(30, 0.5, 0.5));
    let mut labeler = VideoLabelingOrchestrator::new(FakeBackend::new(landscape(1000)), LabelingConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    labeler.run(dir.path(), move |p| sink.lock().unwrap().push(p)).unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen.len() > 2);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(seen.last(), Some(&1.0));
}

#[test]
fn test_missing_input_fails_before_any_resource() {
    let dir = session(&[]);
    fs::remove_file(dir.path().join("keypoints_right.csv")).unwrap();
    let backend = FakeBackend::new(landscape(1000));
    let mut labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());

    let err = labeler.process_video(dir.path(), |_| {}).unwrap_err();
    match err {
        LabelError::InputMissing(path) => assert!(path.ends_with("keypoints_right.csv")),
        other => panic!("expected missing input, got {other:?}"),
    }
    assert_eq!(labeler.last_state(), RunState::Failed);
    assert_eq!(backend.counters.probes.load(Ordering::SeqCst), 0);
    assert_eq!(backend.counters.live(), [0; 5]);
}

#[test]
fn test_is_supported_follows_graphics() {
    let backend = FakeBackend::new(landscape(1000));
    let labeler = VideoLabelingOrchestrator::new(backend.clone(), LabelingConfig::default());
    assert!(labeler.is_supported());

    backend.fail_at(Some(FailPoint::Graphics));
    assert!(!labeler.is_supported());
    assert_eq!(backend.counters.live(), [0; 5]);
}
