//! Stereo camera intrinsics and derived projection matrices.

use anyhow::Result;
use opencv::core::{Mat, Point2d};

/// Immutable pinhole intrinsics for a rectified stereo pair.
///
/// `bf` is baseline times horizontal focal length, the form KITTI-style
/// calibration files carry. Constructed once at startup and shared
/// read-only by every pipeline stage.
#[derive(Debug, Clone, Copy)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub bf: f64,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, bf: f64) -> Self {
        Self { fx, fy, cx, cy, bf }
    }

    /// Stereo baseline in meters.
    pub fn baseline(&self) -> f64 {
        self.bf / self.fx
    }

    pub fn principal_point(&self) -> Point2d {
        Point2d::new(self.cx, self.cy)
    }

    /// 3x3 intrinsic matrix K (CV_64F).
    pub fn intrinsic_matrix(&self) -> Result<Mat> {
        let k = Mat::from_slice_2d(&[
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ])?;
        Ok(k)
    }

    /// 3x4 projection matrix of the left (reference) camera.
    pub fn projection_left(&self) -> Result<Mat> {
        let p = Mat::from_slice_2d(&[
            [self.fx as f32, 0.0, self.cx as f32, 0.0],
            [0.0, self.fy as f32, self.cy as f32, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ])?;
        Ok(p)
    }

    /// 3x4 projection matrix of the right camera, offset by -bf along x.
    pub fn projection_right(&self) -> Result<Mat> {
        let p = Mat::from_slice_2d(&[
            [self.fx as f32, 0.0, self.cx as f32, -self.bf as f32],
            [0.0, self.fy as f32, self.cy as f32, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ])?;
        Ok(p)
    }
}
