//! Per-step results and diagnostics.
//!
//! These types describe what happened during one ingested stereo pair:
//! - whether the step advanced, skipped, or was gated out
//! - the running world pose after the step
//! - correspondence counts and timing for profiling

use nalgebra::Vector3;

use crate::geometry::Pose;

/// Outcome of one odometry step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    /// First ingested pair; no previous frame to track against.
    FirstFrame,
    /// Incremental pose estimated and composed into the world pose.
    Tracked,
    /// Too few circular-matched points to attempt pose estimation.
    InsufficientCorrespondences { tracked: usize },
    /// A RANSAC stage failed to converge or found near-zero inliers.
    SolverDiverged,
    /// Estimated rotation exceeded the drift-gate bound on some axis;
    /// the world pose was left unchanged.
    RotationRejected { euler: Vector3<f64> },
}

impl StepStatus {
    /// Whether this step advanced the world pose.
    pub fn integrated(&self) -> bool {
        matches!(self, StepStatus::Tracked)
    }
}

/// Scalar metrics for one step.
#[derive(Debug, Clone, Default)]
pub struct StepMetrics {
    /// Feature count after replenish and bucketing, before tracking.
    pub n_seeds: usize,
    /// Points surviving circular matching.
    pub n_tracked: usize,
    /// PnP inliers, zero when no pose was estimated.
    pub n_inliers: usize,
    /// Wall-clock time for the whole step.
    pub total_ms: f64,
}

/// Summary of one ingested stereo pair.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub frame_id: u64,
    pub status: StepStatus,
    /// World pose after the step (unchanged unless `status.integrated()`).
    pub pose: Pose,
    pub metrics: StepMetrics,
}
