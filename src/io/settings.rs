//! YAML settings: calibration plus optional pipeline tuning overrides.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::camera::CameraModel;
use crate::odometry::OdometryConfig;

/// Rectified stereo calibration as stored in the settings file.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraSettings {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Baseline times fx, in pixel-meters.
    pub bf: f64,
}

impl CameraSettings {
    pub fn camera_model(&self) -> CameraModel {
        CameraModel::new(self.fx, self.fy, self.cx, self.cy, self.bf)
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub camera: CameraSettings,
    /// Pipeline tuning; every field falls back to its default, so the
    /// settings file only needs to name what it changes.
    #[serde(default)]
    pub odometry: OdometryConfig,
}

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_yaml::from_reader(file).with_context(|| format!("malformed settings {}", path.display()))
}
