use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Number of landmarks in one detected hand.
pub const LANDMARK_COUNT: usize = 21;

/// One normalized hand landmark, `x` and `y` in `[0, 1]` image space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

pub type HandLandmarks = [Landmark; LANDMARK_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
    Unknown,
}

impl Handedness {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            l if l.eq_ignore_ascii_case("left") => Handedness::Left,
            l if l.eq_ignore_ascii_case("right") => Handedness::Right,
            _ => Handedness::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
            Handedness::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Handedness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All hands detected at one capture timestamp. `hand_labels[i]` labels
/// `hands[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointFrame {
    pub timestamp_ms: i64,
    pub frame_number: i64,
    pub hands: Vec<HandLandmarks>,
    pub hand_labels: Vec<Handedness>,
}

/// Merged keypoint stream, sorted ascending by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeypointLog {
    pub frames: Vec<KeypointFrame>,
    pub start_timestamp_ms: i64,
}

impl KeypointLog {
    pub fn new(frames: Vec<KeypointFrame>) -> Self {
        let start_timestamp_ms = frames.iter().map(|f| f.timestamp_ms).min().unwrap_or(0);
        Self {
            frames,
            start_timestamp_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Timestamp of `frame` relative to the start of the log.
    pub fn relative_ms(&self, frame: &KeypointFrame) -> i64 {
        frame.timestamp_ms.saturating_sub(self.start_timestamp_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalizes any angle to the nearest quarter turn, so `-90` and `270`
    /// are the same rotation.
    pub fn from_degrees(degrees: i64) -> Self {
        let normalized = degrees.rem_euclid(360);
        match ((normalized + 45) / 90) % 4 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }

    /// Rotation applied after `self`.
    pub fn then(&self, other: Rotation) -> Rotation {
        Rotation::from_degrees((self.degrees() + other.degrees()) as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub duration_ms: i64,
    pub rotation: Rotation,
    pub estimated_frame_count: i64,
}

impl VideoMetadata {
    pub fn new(width: u32, height: u32, duration_ms: i64, rotation: Rotation, target_fps: u32) -> Self {
        Self {
            width,
            height,
            duration_ms,
            rotation,
            estimated_frame_count: duration_ms * target_fps as i64 / 1000,
        }
    }

    /// Dimensions the output is stored in, upright after rotation.
    pub fn upright_dimensions(&self) -> (u32, u32) {
        if self.rotation.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// Decoded RGBA8 picture, tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts_us: i64,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, pts_us: i64) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Self {
            data,
            width,
            height,
            pts_us,
        }
    }

    pub fn filled(width: u32, height: u32, rgba: [u8; 4], pts_us: i64) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self::new(data, width, height, pts_us)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * self.width + x) * 4) as usize;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2], self.data[idx + 3]]
    }
}

/// Picture published by swapping a producer-bound surface.
#[derive(Debug, Clone)]
pub struct SurfaceFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub presentation_time_ns: i64,
}

/// Drawing target whose swapped pictures feed an encoder input queue.
#[derive(Debug, Clone)]
pub struct ProducerSurface {
    pub width: u32,
    pub height: u32,
    tx: Sender<SurfaceFrame>,
}

impl ProducerSurface {
    /// Creates the surface and the consumer end the encoder reads from.
    pub fn new(width: u32, height: u32) -> (Self, Receiver<SurfaceFrame>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { width, height, tx }, rx)
    }

    /// Returns `false` once the consuming encoder has been released.
    pub fn queue(&self, frame: SurfaceFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}
