//! Calibration state machine.
//!
//! A [`Calibrator`] owns up to three [`CalibrationTarget`]s (left eye, right
//! eye, combined). Each walks `Idle → Calibrating → Calibrated` over a raster
//! of reference directions:
//!
//! ```text
//!   start()          add_sample() x N          increment_raster()
//! Idle ──────▶ Calibrating ──────────▶ point done ──────────▶ next point
//!   ▲               │                                          │
//!   └─── stop() ────┘               all points done ──▶ Calibrated
//! ```
//!
//! Once calibrated, and while apply is enabled, raw directions read through
//! the calibrator are corrected. The calibrator is owned by the acquisition
//! loop and never shared.

pub mod raster;
pub mod store;
pub mod target;

use std::path::PathBuf;

use tracing::{debug, info, trace, warn};

use gazeshim_config::CalibrationConfig;

use crate::gaze::{CalibrationSummary, Eye, GazeDirection};
pub use raster::Raster;
pub use store::{CalibrationDocument, CalibrationStore};
pub use target::{CalibrationPoint, CalibrationState, CalibrationTarget, TargetId};

/// Errors from sampling and persistence.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("{0} target is not calibrating")]
    NotCalibrating(TargetId),

    #[error("raster point {index} already calibrated")]
    PointAlreadyCalibrated { index: usize },

    #[error("sample is not a finite non-zero direction")]
    InvalidSample,

    #[error("{0} target is not calibrated")]
    NotCalibrated(TargetId),

    #[error("{0} target is disabled")]
    Disabled(TargetId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid calibration file: {0}")]
    Format(String),

    #[error("calibration file has {actual} points, raster has {expected}")]
    RasterMismatch { expected: usize, actual: usize },

    #[error("calibration file is for the {actual} target, expected {expected}")]
    TargetMismatch { expected: TargetId, actual: TargetId },
}

pub struct Calibrator {
    targets: [Option<CalibrationTarget>; 3],
    apply: bool,
    auto_increment: bool,
    store: CalibrationStore,
}

impl Calibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        let raster = Raster::from_config(config);
        let make = |enabled: bool, id: TargetId| {
            enabled.then(|| {
                CalibrationTarget::new(id, &raster, config.samples_per_point, config.correction)
            })
        };
        Self {
            targets: [
                make(config.left, TargetId::Left),
                make(config.right, TargetId::Right),
                make(config.combined, TargetId::Combined),
            ],
            apply: config.apply_on_start,
            auto_increment: config.auto_increment,
            store: CalibrationStore::new(PathBuf::from(&config.data_dir)),
        }
    }

    pub fn target(&self, id: TargetId) -> Option<&CalibrationTarget> {
        self.targets[id.index()].as_ref()
    }

    fn target_mut(&mut self, id: TargetId) -> Option<&mut CalibrationTarget> {
        self.targets[id.index()].as_mut()
    }

    pub fn is_enabled(&self, id: TargetId) -> bool {
        self.target(id).is_some()
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Every enabled target is `Calibrated`.
    pub fn is_fully_calibrated(&self) -> bool {
        self.targets.iter().flatten().all(CalibrationTarget::is_calibrated)
    }

    pub fn is_calibrated(&self, id: TargetId) -> bool {
        self.target(id).is_some_and(CalibrationTarget::is_calibrated)
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating_target().is_some()
    }

    /// The target currently collecting samples. Only one of the eyes can be
    /// calibrating; combined may run alongside.
    pub fn calibrating_target(&self) -> Option<TargetId> {
        TargetId::ALL
            .into_iter()
            .find(|&id| self.target(id).is_some_and(CalibrationTarget::is_calibrating))
    }

    /// Reference direction the user should look at right now.
    pub fn current_target(&self) -> Option<GazeDirection> {
        self.calibrating_target()
            .and_then(|id| self.target(id))
            .and_then(CalibrationTarget::current_target)
    }

    /// Start the next uncalibrated target in left, right, combined order.
    /// Does nothing while fully calibrated or already calibrating.
    pub fn start_calibrating(&mut self) -> Option<TargetId> {
        if self.is_fully_calibrated() || self.is_calibrating() {
            return None;
        }
        let id = TargetId::ALL
            .into_iter()
            .find(|&id| self.target(id).is_some_and(|t| !t.is_calibrated()))?;
        self.start(id).then_some(id)
    }

    /// Stop every target that is calibrating. An eye and combined may be
    /// running together; both stop. Returns the stopped targets.
    pub fn stop_calibrating(&mut self) -> Vec<TargetId> {
        TargetId::ALL
            .into_iter()
            .filter(|&id| self.stop(id))
            .collect()
    }

    /// Start one eye unless the other eye is calibrating.
    pub fn start_eye_calibration(&mut self, eye: Eye) -> bool {
        if self
            .target(eye.other().into())
            .is_some_and(CalibrationTarget::is_calibrating)
        {
            debug!(eye = eye.as_str(), "Other eye is calibrating, not starting");
            return false;
        }
        self.start(eye.into())
    }

    pub fn stop_eye_calibration(&mut self) -> bool {
        Eye::BOTH.into_iter().any(|eye| self.stop(eye.into()))
    }

    pub fn start_combined_calibration(&mut self) -> bool {
        self.start(TargetId::Combined)
    }

    pub fn stop_combined_calibration(&mut self) -> bool {
        self.stop(TargetId::Combined)
    }

    fn start(&mut self, id: TargetId) -> bool {
        let started = self.target_mut(id).is_some_and(CalibrationTarget::start);
        if started {
            info!(target_id = %id, "Calibration started");
        }
        started
    }

    fn stop(&mut self, id: TargetId) -> bool {
        let stopped = self.target_mut(id).is_some_and(CalibrationTarget::stop);
        if stopped {
            info!(target_id = %id, "Calibration stopped");
        }
        stopped
    }

    /// Feed a raw direction to `id`. With auto-increment, a sample that
    /// completes the current point advances the raster.
    pub fn add_sample(&mut self, id: TargetId, direction: GazeDirection) -> Result<(), CalibrationError> {
        let auto = self.auto_increment;
        let target = self.target_mut(id).ok_or(CalibrationError::Disabled(id))?;
        let completed = target.add_sample(direction)?;
        if completed {
            debug!(
                target_id = %id,
                point = target.cursor(),
                calibrated = target.calibrated_points(),
                "Calibration point complete"
            );
            if auto {
                advance(target);
            }
        }
        Ok(())
    }

    /// Read-path sampling: errors are ignored, and with auto-increment a
    /// read on an already calibrated point advances the raster.
    pub fn sample(&mut self, id: TargetId, direction: GazeDirection) {
        let auto = self.auto_increment;
        let Some(target) = self.target_mut(id) else {
            return;
        };
        if !target.is_calibrating() {
            return;
        }
        if auto && target.current_point_calibrated() {
            advance(target);
            return;
        }
        if let Err(e) = self.add_sample(id, direction) {
            trace!(target_id = %id, error = %e, "Calibration sample ignored");
        }
    }

    /// Advance the calibrating target to its next point.
    pub fn increment_raster(&mut self) -> bool {
        let Some(id) = self.calibrating_target() else {
            return false;
        };
        match self.target_mut(id) {
            Some(target) => {
                advance(target);
                true
            }
            None => false,
        }
    }

    /// Corrected direction for `id`, or `raw` when not applicable.
    pub fn apply(&self, id: TargetId, raw: GazeDirection) -> GazeDirection {
        if !self.apply {
            return raw;
        }
        match self.target(id) {
            Some(target) => target.apply(raw),
            None => raw,
        }
    }

    pub fn is_applying(&self) -> bool {
        self.apply
    }

    pub fn set_apply_calibration(&mut self, apply: bool) {
        self.apply = apply;
    }

    pub fn toggle_apply_calibration(&mut self) -> bool {
        self.apply = !self.apply;
        info!(apply = self.apply, "Calibration apply toggled");
        self.apply
    }

    pub fn reset_calibrations(&mut self) {
        for target in self.targets.iter_mut().flatten() {
            target.reset();
        }
        info!("Calibrations reset");
    }

    pub fn summary(&self) -> CalibrationSummary {
        CalibrationSummary {
            calibrating: self.calibrating_target(),
            fully_calibrated: self.is_fully_calibrated(),
            applying: self.apply,
            current_target: self.current_target(),
        }
    }

    /// Load one target from disk. Failures are logged and leave the target
    /// as it was.
    pub async fn load(&mut self, id: TargetId) -> bool {
        let store = self.store.clone();
        let Some(target) = self.target_mut(id) else {
            return false;
        };
        // Restore into a copy so a rejected file leaves the target untouched.
        let mut candidate = target.clone();
        candidate.reset();
        match store.load(&mut candidate).await {
            Ok(path) => {
                *target = candidate;
                info!(target_id = %id, path = %path.display(), "Calibration loaded");
                true
            }
            Err(e) => {
                warn!(target_id = %id, path = %store.path(id).display(), error = %e, "Failed to load calibration");
                false
            }
        }
    }

    /// Load every enabled target. `true` only if all of them loaded.
    pub async fn load_calibrations(&mut self) -> bool {
        let mut all = true;
        for id in TargetId::ALL {
            if self.is_enabled(id) {
                all &= self.load(id).await;
            }
        }
        all
    }

    pub async fn save(&self, id: TargetId) -> bool {
        let Some(target) = self.target(id) else {
            return false;
        };
        match self.store.save(target).await {
            Ok(path) => {
                info!(target_id = %id, path = %path.display(), "Calibration saved");
                true
            }
            Err(e) => {
                warn!(target_id = %id, error = %e, "Failed to save calibration");
                false
            }
        }
    }

    /// Save every enabled target. `true` only if all of them saved.
    pub async fn save_calibrations(&self) -> bool {
        let mut all = true;
        for id in TargetId::ALL {
            if self.is_enabled(id) {
                all &= self.save(id).await;
            }
        }
        all
    }
}

fn advance(target: &mut CalibrationTarget) {
    target.increment_raster();
    if target.is_calibrated() {
        info!(target_id = %target.id(), "Calibration complete");
    }
}

impl std::fmt::Debug for Calibrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Calibrator")
            .field("calibrating", &self.calibrating_target())
            .field("fully_calibrated", &self.is_fully_calibrated())
            .field("apply", &self.apply)
            .finish()
    }
}
