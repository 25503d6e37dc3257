//! Stereo frame: one image pair plus the features currently tracked on it.

use anyhow::{bail, Result};
use opencv::core::{Mat, Point2f, Vector};
use opencv::prelude::*;

/// A tracked 2D feature: pixel position on the left image plus its age.
///
/// The age counts how many consecutive circular-matching rounds the point
/// has survived; fresh detections start at zero. Keeping position and age
/// in one record keeps pruning a single retain pass.
#[derive(Debug, Clone, Copy)]
pub struct FeaturePoint {
    pub point: Point2f,
    pub age: u32,
}

impl FeaturePoint {
    pub fn new(point: Point2f) -> Self {
        Self { point, age: 0 }
    }
}

/// One stereo frame. Images are read-only once set; only the feature set
/// mutates as tracking refreshes and prunes it between steps.
pub struct Frame {
    pub id: u64,
    left: Mat,
    right: Mat,
    pub features: Vec<FeaturePoint>,
}

impl Frame {
    pub fn new(id: u64, left: Mat, right: Mat) -> Result<Self> {
        if left.empty() || right.empty() {
            bail!("frame {id}: empty image buffer");
        }
        if left.size()? != right.size()? {
            bail!(
                "frame {id}: stereo pair size mismatch ({}x{} vs {}x{})",
                left.cols(),
                left.rows(),
                right.cols(),
                right.rows()
            );
        }
        Ok(Self {
            id,
            left,
            right,
            features: Vec::new(),
        })
    }

    pub fn left(&self) -> &Mat {
        &self.left
    }

    pub fn right(&self) -> &Mat {
        &self.right
    }

    /// Feature positions in tracking order, as the seed set for optical flow.
    pub fn keypoints(&self) -> Vector<Point2f> {
        self.features.iter().map(|f| f.point).collect()
    }
}
