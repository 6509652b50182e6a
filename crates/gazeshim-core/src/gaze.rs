//! Gaze data model and the single-writer snapshot cache.
//!
//! The acquisition loop owns the only [`GazeCache`]; every other component
//! holds a [`GazeReader`] and reads the latest [`GazeSnapshot`] without
//! blocking the writer.

use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::calibration::TargetId;

/// A raw gaze direction. The server does not guarantee unit length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeDirection {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl GazeDirection {
    /// Straight ahead in a right-handed, -Z forward frame.
    pub const FORWARD: Self = Self::new(0.0, 0.0, -1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Unit-length copy, or `None` for zero-length or non-finite vectors.
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if !len.is_finite() || len <= f32::EPSILON {
            return None;
        }
        Some(self * (1.0 / len))
    }

    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Angle in radians between two directions; `None` if either has no direction.
    pub fn angle_to(self, other: Self) -> Option<f32> {
        let a = self.normalized()?;
        let b = other.normalized()?;
        Some(a.cross(b).length().atan2(a.dot(b)))
    }
}

impl Default for GazeDirection {
    fn default() -> Self {
        Self::FORWARD
    }
}

impl Add for GazeDirection {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for GazeDirection {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for GazeDirection {
    type Output = Self;

    fn mul(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }
}

/// One gaze reading with its validity flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    pub direction: GazeDirection,
    pub valid: bool,
}

impl GazeSample {
    pub fn valid(direction: GazeDirection) -> Self {
        Self {
            direction,
            valid: true,
        }
    }

    /// The direction, if the sample is valid.
    pub fn get(&self) -> Option<GazeDirection> {
        self.valid.then_some(self.direction)
    }
}

/// Which eye a per-eye sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Derive the combined gaze from both eyes.
///
/// Both valid: normalized mean of the two unit directions. One valid: that
/// eye. None valid (or degenerate vectors): no combined gaze.
pub fn combine(left: &GazeSample, right: &GazeSample) -> Option<GazeDirection> {
    let l = left.get().and_then(GazeDirection::normalized);
    let r = right.get().and_then(GazeDirection::normalized);
    match (l, r) {
        (Some(l), Some(r)) => ((l + r) * 0.5).normalized().or(Some(r)),
        (Some(l), None) => Some(l),
        (None, Some(r)) => Some(r),
        (None, None) => None,
    }
}

/// Calibration status carried alongside the samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CalibrationSummary {
    /// Target currently collecting samples.
    pub calibrating: Option<TargetId>,
    /// Every configured target is calibrated.
    pub fully_calibrated: bool,
    /// Corrections are applied on read.
    pub applying: bool,
    /// Reference direction the user should look at right now.
    pub current_target: Option<GazeDirection>,
}

/// Everything a reader can know about the current gaze state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GazeSnapshot {
    pub combined: GazeSample,
    pub per_eye: [GazeSample; 2],
    pub enabled: bool,
    pub connected: bool,
    /// Bumped on every successful acquisition.
    pub sequence: u64,
    pub calibration: CalibrationSummary,
}

impl GazeSnapshot {
    pub fn eye(&self, eye: Eye) -> &GazeSample {
        &self.per_eye[eye.index()]
    }

    /// Mark every sample invalid while keeping the last directions.
    pub fn invalidate(&mut self) {
        self.combined.valid = false;
        for sample in &mut self.per_eye {
            sample.valid = false;
        }
    }
}

/// Write side of the snapshot cache. Owned by the acquisition loop.
#[derive(Debug)]
pub struct GazeCache {
    tx: watch::Sender<GazeSnapshot>,
}

impl GazeCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GazeSnapshot::default());
        Self { tx }
    }

    /// A new read handle.
    pub fn reader(&self) -> GazeReader {
        GazeReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Current snapshot as seen by the writer.
    pub fn current(&self) -> GazeSnapshot {
        *self.tx.borrow()
    }

    /// Apply `f` and notify readers only when it reports a change.
    pub fn update(&self, f: impl FnOnce(&mut GazeSnapshot) -> bool) {
        self.tx.send_if_modified(f);
    }
}

impl Default for GazeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blocking read handle onto the latest [`GazeSnapshot`].
#[derive(Debug, Clone)]
pub struct GazeReader {
    rx: watch::Receiver<GazeSnapshot>,
}

impl GazeReader {
    pub fn snapshot(&self) -> GazeSnapshot {
        *self.rx.borrow()
    }

    pub fn combined(&self) -> GazeSample {
        self.rx.borrow().combined
    }

    pub fn eye(&self, eye: Eye) -> GazeSample {
        *self.rx.borrow().eye(eye)
    }

    pub fn is_connected(&self) -> bool {
        self.rx.borrow().connected
    }

    pub fn is_enabled(&self) -> bool {
        self.rx.borrow().enabled
    }

    /// Whether the writer published since this reader last looked.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Mark the current snapshot as seen and return it.
    pub fn mark_seen(&mut self) -> GazeSnapshot {
        *self.rx.borrow_and_update()
    }

    /// Wait for the next publish. Returns `false` once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
