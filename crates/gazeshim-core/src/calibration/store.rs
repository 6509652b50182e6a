//! JSON persistence of fitted calibration targets.
//!
//! One file per target, `<dir>/<left|right|combined>.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CalibrationError;
use super::target::{CalibrationPoint, CalibrationTarget, TargetId};
use crate::gaze::GazeDirection;

/// Current document version.
pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDocument {
    pub version: u32,
    pub target: TargetId,
    pub points: Vec<PointRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub target: GazeDirection,
    pub measured: GazeDirection,
    pub samples: u32,
}

impl CalibrationDocument {
    /// Snapshot a `Calibrated` target.
    pub fn from_target(target: &CalibrationTarget) -> Result<Self, CalibrationError> {
        if !target.is_calibrated() {
            return Err(CalibrationError::NotCalibrated(target.id()));
        }
        let points = target
            .points()
            .iter()
            .map(|p| {
                Ok(PointRecord {
                    target: p.target(),
                    measured: p.measured().ok_or(CalibrationError::NotCalibrated(target.id()))?,
                    samples: p.samples(),
                })
            })
            .collect::<Result<Vec<_>, CalibrationError>>()?;
        Ok(Self {
            version: DOCUMENT_VERSION,
            target: target.id(),
            points,
        })
    }

    /// Install this document into `target`, which becomes `Calibrated`.
    pub fn restore_into(self, target: &mut CalibrationTarget) -> Result<(), CalibrationError> {
        if self.version != DOCUMENT_VERSION {
            return Err(CalibrationError::Format(format!(
                "unsupported document version {}",
                self.version
            )));
        }
        if self.target != target.id() {
            return Err(CalibrationError::TargetMismatch {
                expected: target.id(),
                actual: self.target,
            });
        }
        let mut points = Vec::with_capacity(self.points.len());
        for record in self.points {
            if record.measured.normalized().is_none() {
                return Err(CalibrationError::Format("degenerate measured direction".into()));
            }
            if !record.target.is_finite() {
                return Err(CalibrationError::Format("non-finite target direction".into()));
            }
            points.push(CalibrationPoint::fitted(
                record.target,
                record.measured,
                record.samples,
            ));
        }
        target.restore(points)
    }
}

/// Directory-backed store.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, id: TargetId) -> PathBuf {
        self.dir.join(format!("{}.json", id.as_str()))
    }

    pub async fn save(&self, target: &CalibrationTarget) -> Result<PathBuf, CalibrationError> {
        let document = CalibrationDocument::from_target(target)?;
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| CalibrationError::Format(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(target.id());
        tokio::fs::write(&path, json).await?;
        debug!(path = %path.display(), target = %target.id(), "Saved calibration");
        Ok(path)
    }

    pub async fn load(&self, target: &mut CalibrationTarget) -> Result<PathBuf, CalibrationError> {
        let path = self.path(target.id());
        let json = tokio::fs::read_to_string(&path).await?;
        let document: CalibrationDocument =
            serde_json::from_str(&json).map_err(|e| CalibrationError::Format(e.to_string()))?;
        document.restore_into(target)?;
        debug!(path = %path.display(), target = %target.id(), "Loaded calibration");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::raster::Raster;
    use gazeshim_config::CorrectionPolicy;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn raster(columns: u32) -> Raster {
        Raster {
            columns,
            rows: 2,
            horizontal_span_deg: 30.0,
            vertical_span_deg: 20.0,
        }
    }

    fn calibrated(id: TargetId, columns: u32) -> CalibrationTarget {
        let mut target = CalibrationTarget::new(id, &raster(columns), 2, CorrectionPolicy::Nearest);
        target.start();
        let bias = GazeDirection::new(0.013, -0.021, 0.0);
        while !target.is_calibrated() {
            let aim = target.points()[target.cursor()].target() + bias;
            while !target.add_sample(aim).unwrap() {}
            target.increment_raster();
        }
        target
    }

    #[tokio::test]
    async fn test_save_load_round_trip_is_exact() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path().join("nested"));
        let original = calibrated(TargetId::Left, 3);

        let path = store.save(&original).await.unwrap();
        assert_eq!(path, dir.path().join("nested").join("left.json"));

        let mut restored =
            CalibrationTarget::new(TargetId::Left, &raster(3), 2, CorrectionPolicy::Nearest);
        store.load(&mut restored).await.unwrap();
        assert!(restored.is_calibrated());
        assert_eq!(restored.points(), original.points());

        let raw = GazeDirection::new(0.2, 0.1, -0.95);
        assert_eq!(restored.apply(raw), original.apply(raw));
    }

    #[tokio::test]
    async fn test_save_requires_calibrated_target() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        let idle = CalibrationTarget::new(TargetId::Right, &raster(2), 2, CorrectionPolicy::Nearest);
        assert!(matches!(
            store.save(&idle).await,
            Err(CalibrationError::NotCalibrated(TargetId::Right))
        ));
        assert!(!store.path(TargetId::Right).exists());
    }

    #[tokio::test]
    async fn test_load_rejects_mismatches() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        store.save(&calibrated(TargetId::Combined, 3)).await.unwrap();

        let mut smaller =
            CalibrationTarget::new(TargetId::Combined, &raster(2), 2, CorrectionPolicy::Nearest);
        assert!(matches!(
            store.load(&mut smaller).await,
            Err(CalibrationError::RasterMismatch {
                expected: 4,
                actual: 6
            })
        ));
        assert!(!smaller.is_calibrated());

        // A file saved for one target copied over another.
        tokio::fs::copy(store.path(TargetId::Combined), store.path(TargetId::Left))
            .await
            .unwrap();
        let mut left = CalibrationTarget::new(TargetId::Left, &raster(3), 2, CorrectionPolicy::Nearest);
        assert!(matches!(
            store.load(&mut left).await,
            Err(CalibrationError::TargetMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_missing_and_garbage() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        let mut target =
            CalibrationTarget::new(TargetId::Left, &raster(2), 2, CorrectionPolicy::Nearest);
        assert!(matches!(
            store.load(&mut target).await,
            Err(CalibrationError::Io(_))
        ));

        tokio::fs::write(store.path(TargetId::Left), "{ not json")
            .await
            .unwrap();
        assert!(matches!(
            store.load(&mut target).await,
            Err(CalibrationError::Format(_))
        ));
    }

    #[test]
    fn test_document_shape() {
        let doc = CalibrationDocument::from_target(&calibrated(TargetId::Right, 1)).unwrap();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["target"], "right");
        assert_eq!(json["points"].as_array().unwrap().len(), 2);
        assert_eq!(json["points"][0]["samples"], 2);
        assert!(json["points"][0]["measured"]["z"].is_number());
    }
}
