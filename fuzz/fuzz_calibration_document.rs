//! Fuzz target for loading calibration files.
//!
//! Run with: cargo +nightly fuzz run fuzz_calibration_document
//!
//! Parses arbitrary JSON as a calibration document and restores it into a
//! default-sized target. Rejection is fine; panics are not.

#![no_main]

use gazeshim_config::CalibrationConfig;
use gazeshim_core::calibration::{CalibrationDocument, CalibrationTarget, Raster};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(document) = serde_json::from_slice::<CalibrationDocument>(data) else {
        return;
    };
    let config = CalibrationConfig::default();
    let mut target = CalibrationTarget::new(
        document.target,
        &Raster::from_config(&config),
        config.samples_per_point,
        config.correction,
    );
    if document.restore_into(&mut target).is_ok() {
        assert!(target.is_calibrated());
        let _ = target.apply(gazeshim_core::GazeDirection::FORWARD);
    }
});
