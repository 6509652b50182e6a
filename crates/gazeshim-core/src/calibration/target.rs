//! One calibration target: a raster of points, a cursor and a state.

use serde::{Deserialize, Serialize};

use gazeshim_config::CorrectionPolicy;

use super::CalibrationError;
use super::raster::Raster;
use crate::gaze::{Eye, GazeDirection};

/// Which gaze stream a target corrects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetId {
    Left,
    Right,
    Combined,
}

impl TargetId {
    /// Fixed order used when picking the next target to calibrate.
    pub const ALL: [TargetId; 3] = [TargetId::Left, TargetId::Right, TargetId::Combined];

    pub fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Combined => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Combined => "combined",
        }
    }

    pub fn eye(self) -> Option<Eye> {
        match self {
            Self::Left => Some(Eye::Left),
            Self::Right => Some(Eye::Right),
            Self::Combined => None,
        }
    }
}

impl From<Eye> for TargetId {
    fn from(eye: Eye) -> Self {
        match eye {
            Eye::Left => Self::Left,
            Eye::Right => Self::Right,
        }
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationState {
    #[default]
    Idle,
    Calibrating,
    Calibrated,
}

/// A raster cell.
#[derive(Debug, Clone)]
pub struct CalibrationPoint {
    target: GazeDirection,
    sum: GazeDirection,
    samples: u32,
    measured: Option<GazeDirection>,
}

// The running sum is an accumulator only; equality covers what a point
// exposes.
impl PartialEq for CalibrationPoint {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
            && self.samples == other.samples
            && self.measured == other.measured
    }
}

impl CalibrationPoint {
    fn new(target: GazeDirection) -> Self {
        Self {
            target,
            sum: GazeDirection::new(0.0, 0.0, 0.0),
            samples: 0,
            measured: None,
        }
    }

    /// Restore a fitted point.
    pub(crate) fn fitted(target: GazeDirection, measured: GazeDirection, samples: u32) -> Self {
        Self {
            target,
            sum: measured * samples as f32,
            samples,
            measured: Some(measured),
        }
    }

    /// Reference direction the user looks at for this point.
    pub fn target(&self) -> GazeDirection {
        self.target
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Mean unit direction measured while looking at the target.
    pub fn measured(&self) -> Option<GazeDirection> {
        self.measured
    }

    pub fn is_calibrated(&self) -> bool {
        self.measured.is_some()
    }

    /// Offset that maps the measured direction onto the target.
    pub fn correction(&self) -> Option<GazeDirection> {
        self.measured.map(|m| self.target - m)
    }

    fn discard(&mut self) {
        if !self.is_calibrated() {
            self.sum = GazeDirection::new(0.0, 0.0, 0.0);
            self.samples = 0;
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationTarget {
    id: TargetId,
    state: CalibrationState,
    points: Vec<CalibrationPoint>,
    cursor: usize,
    calibrated_points: usize,
    samples_per_point: u32,
    policy: CorrectionPolicy,
}

impl CalibrationTarget {
    pub fn new(id: TargetId, raster: &Raster, samples_per_point: u32, policy: CorrectionPolicy) -> Self {
        Self {
            id,
            state: CalibrationState::Idle,
            points: raster.directions().into_iter().map(CalibrationPoint::new).collect(),
            cursor: 0,
            calibrated_points: 0,
            samples_per_point: samples_per_point.max(1),
            policy,
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrating(&self) -> bool {
        self.state == CalibrationState::Calibrating
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == CalibrationState::Calibrated
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn calibrated_points(&self) -> usize {
        self.calibrated_points
    }

    /// Whether the point under the cursor already has enough samples.
    pub fn current_point_calibrated(&self) -> bool {
        self.points
            .get(self.cursor)
            .is_some_and(CalibrationPoint::is_calibrated)
    }

    /// Reference direction of the point under the cursor while calibrating.
    pub fn current_target(&self) -> Option<GazeDirection> {
        if !self.is_calibrating() {
            return None;
        }
        self.points.get(self.cursor).map(CalibrationPoint::target)
    }

    /// Begin collecting samples from the first raster point. Returns `false`
    /// when already calibrated.
    pub fn start(&mut self) -> bool {
        if self.is_calibrated() {
            return false;
        }
        self.state = CalibrationState::Calibrating;
        self.cursor = 0;
        true
    }

    /// Return to `Idle`, discarding samples of points that are not complete.
    pub fn stop(&mut self) -> bool {
        if !self.is_calibrating() {
            return false;
        }
        for point in &mut self.points {
            point.discard();
        }
        self.state = CalibrationState::Idle;
        true
    }

    /// Feed one raw direction into the current point. Returns `true` when
    /// this sample completed the point.
    pub fn add_sample(&mut self, direction: GazeDirection) -> Result<bool, CalibrationError> {
        if !self.is_calibrating() {
            return Err(CalibrationError::NotCalibrating(self.id));
        }
        let index = self.cursor;
        let samples_per_point = self.samples_per_point;
        let Some(point) = self.points.get_mut(index) else {
            return Err(CalibrationError::NotCalibrating(self.id));
        };
        if point.is_calibrated() {
            return Err(CalibrationError::PointAlreadyCalibrated { index });
        }
        let unit = direction.normalized().ok_or(CalibrationError::InvalidSample)?;

        point.sum = point.sum + unit;
        point.samples += 1;
        if point.samples < samples_per_point {
            return Ok(false);
        }
        point.measured = Some(point.sum.normalized().unwrap_or(point.target));
        self.calibrated_points += 1;
        Ok(true)
    }

    /// Move to the next point that still needs samples, wrapping around.
    /// Once every point is calibrated the target becomes `Calibrated`.
    pub fn increment_raster(&mut self) {
        if !self.is_calibrating() {
            return;
        }
        if self.calibrated_points >= self.points.len() {
            self.state = CalibrationState::Calibrated;
            return;
        }
        let len = self.points.len();
        if let Some(next) = (1..=len)
            .map(|step| (self.cursor + step) % len)
            .find(|&i| !self.points[i].is_calibrated())
        {
            self.cursor = next;
        }
    }

    /// Forget every sample and fitted point.
    pub fn reset(&mut self) {
        for point in &mut self.points {
            *point = CalibrationPoint::new(point.target);
        }
        self.state = CalibrationState::Idle;
        self.cursor = 0;
        self.calibrated_points = 0;
    }

    /// Corrected direction. Raw input passes through unless `Calibrated`.
    pub fn apply(&self, raw: GazeDirection) -> GazeDirection {
        if !self.is_calibrated() {
            return raw;
        }
        correct(&self.points, self.policy, raw)
    }

    /// Replace all points with fitted ones and mark the target `Calibrated`.
    pub(crate) fn restore(&mut self, points: Vec<CalibrationPoint>) -> Result<(), CalibrationError> {
        if points.len() != self.points.len() {
            return Err(CalibrationError::RasterMismatch {
                expected: self.points.len(),
                actual: points.len(),
            });
        }
        self.calibrated_points = points.len();
        self.points = points;
        self.cursor = 0;
        self.state = CalibrationState::Calibrated;
        Ok(())
    }
}

const EXACT_MATCH_RAD: f32 = 1e-6;

/// Apply the fitted corrections of `points` to `raw`.
pub fn correct(points: &[CalibrationPoint], policy: CorrectionPolicy, raw: GazeDirection) -> GazeDirection {
    let length = raw.length();
    let Some(unit) = raw.normalized() else {
        return raw;
    };

    let fitted = points
        .iter()
        .filter_map(|p| Some((p.measured?, p.correction()?)));

    let offset = match policy {
        CorrectionPolicy::Nearest => {
            let mut best: Option<(f32, GazeDirection)> = None;
            for (measured, correction) in fitted {
                let angle = unit.angle_to(measured).unwrap_or(std::f32::consts::PI);
                if best.is_none_or(|(a, _)| angle < a) {
                    best = Some((angle, correction));
                }
            }
            best.map(|(_, c)| c)
        }
        CorrectionPolicy::InverseDistance => {
            let mut acc = GazeDirection::new(0.0, 0.0, 0.0);
            let mut weight_sum = 0.0;
            let mut exact = None;
            for (measured, correction) in fitted {
                let angle = unit.angle_to(measured).unwrap_or(std::f32::consts::PI);
                if angle < EXACT_MATCH_RAD {
                    exact = Some(correction);
                    break;
                }
                let weight = 1.0 / (angle * angle);
                acc = acc + correction * weight;
                weight_sum += weight;
            }
            exact.or_else(|| (weight_sum > 0.0).then(|| acc * (1.0 / weight_sum)))
        }
    };

    match offset.and_then(|o| (unit + o).normalized()) {
        Some(corrected) => corrected * length,
        None => raw,
    }
}
