//! Feature replenishment and spatial bucketing over the left image.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use opencv::core::{KeyPoint, Mat, Point2f, Ptr, Vector};
use opencv::features2d::{FastFeatureDetector, FastFeatureDetector_DetectorType};
use opencv::prelude::*;
use serde::Deserialize;
use tracing::debug;

use crate::frame::{FeaturePoint, Frame};

/// Interest-point detector seam; the pipeline only needs pixel coordinates.
pub trait FeatureDetector {
    fn detect(&mut self, image: &Mat) -> Result<Vector<Point2f>>;
}

/// FAST corner detector, the same primitive the tracking front end has
/// always been fed with.
pub struct FastDetector {
    fast: Ptr<FastFeatureDetector>,
}

impl FastDetector {
    pub fn new(threshold: i32) -> Result<Self> {
        let fast = FastFeatureDetector::create(
            threshold,
            true,
            FastFeatureDetector_DetectorType::TYPE_9_16,
        )?;
        Ok(Self { fast })
    }
}

impl FeatureDetector for FastDetector {
    fn detect(&mut self, image: &Mat) -> Result<Vector<Point2f>> {
        let mut keypoints = Vector::<KeyPoint>::new();
        let mask = Mat::default();
        self.fast.detect(image, &mut keypoints, &mask)?;
        Ok(keypoints.iter().map(|kp| kp.pt()).collect())
    }
}

/// Tuning knobs for feature distribution. The bucket geometry and the
/// replenish floor are scene/sensor dependent, hence configurable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Refill from the detector when the live set drops below this count.
    pub min_features: usize,
    /// Side length of a square bucket cell, in pixels.
    pub bucket_size: i32,
    /// Maximum features kept per bucket cell.
    pub per_bucket_cap: usize,
    /// Reject fresh detections closer than this to an existing feature.
    pub min_distance: f32,
    /// FAST corner threshold.
    pub fast_threshold: i32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            min_features: 2000,
            bucket_size: 50,
            per_bucket_cap: 4,
            min_distance: 10.0,
            fast_threshold: 20,
        }
    }
}

/// Maintains the spatial distribution of a frame's feature set.
pub struct FeatureManager {
    config: FeatureConfig,
}

impl FeatureManager {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Top up the frame's feature set from the detector when it has shrunk
    /// below the floor. New points enter at age zero; candidates landing in
    /// an occupied `min_distance` cell are skipped to avoid near-duplicates.
    pub fn replenish(&self, frame: &mut Frame, detector: &mut dyn FeatureDetector) -> Result<()> {
        if frame.features.len() >= self.config.min_features {
            return Ok(());
        }

        let cell = self.config.min_distance.max(1.0);
        let mut occupied: HashSet<(i32, i32)> = frame
            .features
            .iter()
            .map(|f| ((f.point.x / cell) as i32, (f.point.y / cell) as i32))
            .collect();

        let candidates = detector.detect(frame.left())?;
        let before = frame.features.len();
        for point in candidates.iter() {
            let key = ((point.x / cell) as i32, (point.y / cell) as i32);
            if occupied.insert(key) {
                frame.features.push(FeaturePoint::new(point));
            }
        }

        debug!(
            frame = frame.id,
            added = frame.features.len() - before,
            total = frame.features.len(),
            "replenished feature set"
        );
        Ok(())
    }

    /// Partition the left image into `bucket_size` cells and keep at most
    /// `per_bucket_cap` features per cell, preferring older (more
    /// established) tracks. Ties keep first-seen order; the surviving set
    /// stays in its original order.
    pub fn bucket(&self, frame: &mut Frame) {
        let size = self.config.bucket_size.max(1);
        let mut cells: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (idx, feature) in frame.features.iter().enumerate() {
            let key = (
                (feature.point.x as i32) / size,
                (feature.point.y as i32) / size,
            );
            cells.entry(key).or_default().push(idx);
        }

        let mut keep = vec![false; frame.features.len()];
        for indices in cells.values_mut() {
            // Stable sort: equal ages keep insertion order.
            indices.sort_by_key(|&idx| std::cmp::Reverse(frame.features[idx].age));
            for &idx in indices.iter().take(self.config.per_bucket_cap) {
                keep[idx] = true;
            }
        }

        let features = std::mem::take(&mut frame.features);
        frame.features = features
            .into_iter()
            .zip(keep)
            .filter_map(|(feature, keep)| keep.then_some(feature))
            .collect();

        debug!(
            frame = frame.id,
            kept = frame.features.len(),
            "bucketed feature set"
        );
    }
}
