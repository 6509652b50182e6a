//! Calibration raster geometry.

use gazeshim_config::CalibrationConfig;

use crate::gaze::GazeDirection;

/// A `columns x rows` grid of reference directions spanning a field of view
/// centred on straight ahead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Raster {
    pub columns: u32,
    pub rows: u32,
    pub horizontal_span_deg: f32,
    pub vertical_span_deg: f32,
}

impl Raster {
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            columns: config.columns,
            rows: config.rows,
            horizontal_span_deg: config.horizontal_span_deg,
            vertical_span_deg: config.vertical_span_deg,
        }
    }

    pub fn len(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unit reference directions in row-major order, top-left first.
    pub fn directions(&self) -> Vec<GazeDirection> {
        let mut out = Vec::with_capacity(self.len());
        for row in 0..self.rows {
            // Top row looks up.
            let pitch = -spread(row, self.rows, self.vertical_span_deg);
            for column in 0..self.columns {
                let yaw = spread(column, self.columns, self.horizontal_span_deg);
                out.push(direction_from_angles(yaw, pitch));
            }
        }
        out
    }
}

/// Offset in degrees of cell `index` out of `count`, evenly covering `span`.
fn spread(index: u32, count: u32, span: f32) -> f32 {
    if count <= 1 {
        return 0.0;
    }
    -span / 2.0 + span * index as f32 / (count - 1) as f32
}

/// Unit direction for a yaw (positive right) and pitch (positive up), in
/// degrees, in a -Z forward frame.
pub fn direction_from_angles(yaw_deg: f32, pitch_deg: f32) -> GazeDirection {
    let (yaw, pitch) = (yaw_deg.to_radians(), pitch_deg.to_radians());
    GazeDirection::new(
        yaw.sin() * pitch.cos(),
        pitch.sin(),
        -yaw.cos() * pitch.cos(),
    )
}
