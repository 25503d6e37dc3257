//! Frame-to-frame pose recovery from validated correspondences.
//!
//! The default solver combines two RANSAC stages: epipolar geometry on the
//! 2D-2D correspondences for a rotation initializer, then PnP on the 3D-2D
//! correspondences for the metrically scaled transform. The PnP result in
//! the solver's world-in-camera convention is reconciled into the
//! camera-in-world incremental transform the integrator expects.

use nalgebra::{Matrix3, Vector3};
use opencv::calib3d;
use opencv::core::{Mat, Point2f, Point3f, Vector, CV_64FC1};
use opencv::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::camera::CameraModel;
use crate::geometry::Pose;

/// Soft failures of pose estimation. Neither variant is fatal: the caller
/// skips integration for the step and carries tracked points forward.
#[derive(Debug, Error)]
pub enum EstimateError {
    #[error("insufficient correspondences for pose estimation: {got} < {min}")]
    InsufficientCorrespondences { got: usize, min: usize },
    #[error("pose solver diverged: {0}")]
    SolverDiverged(String),
}

/// An incremental pose together with the inlier support behind it.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    pub pose: Pose,
    pub n_inliers: usize,
}

/// Capability seam for pose recovery, so alternate solvers (e.g. a joint
/// refinement) can be swapped in without touching the pipeline.
pub trait PoseSolver {
    fn estimate(
        &self,
        camera: &CameraModel,
        points_t0: &Vector<Point2f>,
        points_t1: &Vector<Point2f>,
        landmarks_t0: &Vector<Point3f>,
    ) -> Result<PoseEstimate, EstimateError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Minimum surviving correspondences before any solver stage runs.
    pub min_correspondences: usize,
    /// Essential-matrix RANSAC inlier threshold, pixels.
    pub essential_threshold: f64,
    pub essential_confidence: f64,
    pub essential_max_iters: i32,
    /// PnP RANSAC iteration budget.
    pub pnp_iterations: i32,
    /// PnP reprojection-error inlier threshold, pixels.
    pub pnp_reprojection_error: f32,
    pub pnp_confidence: f64,
    /// Below this PnP inlier count the step is treated as diverged.
    pub min_inliers: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            min_correspondences: 6,
            essential_threshold: 1.0,
            essential_confidence: 0.999,
            essential_max_iters: 1000,
            pnp_iterations: 200,
            pnp_reprojection_error: 2.0,
            pnp_confidence: 0.95,
            min_inliers: 5,
        }
    }
}

/// Rotation from epipolar geometry, translation from PnP.
pub struct EpipolarPnpSolver {
    config: SolverConfig,
}

impl EpipolarPnpSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }
}

impl PoseSolver for EpipolarPnpSolver {
    fn estimate(
        &self,
        camera: &CameraModel,
        points_t0: &Vector<Point2f>,
        points_t1: &Vector<Point2f>,
        landmarks_t0: &Vector<Point3f>,
    ) -> Result<PoseEstimate, EstimateError> {
        let n = points_t0.len().min(points_t1.len()).min(landmarks_t0.len());
        if n < self.config.min_correspondences {
            return Err(EstimateError::InsufficientCorrespondences {
                got: n,
                min: self.config.min_correspondences,
            });
        }

        let diverged = |e: opencv::Error| EstimateError::SolverDiverged(e.to_string());

        let k = camera.intrinsic_matrix().map_err(|e| {
            EstimateError::SolverDiverged(format!("intrinsic matrix construction failed: {e}"))
        })?;

        // Stage 1: rotation initializer from the essential matrix. The
        // monocular translation has no observable scale and is discarded.
        let mut mask = Mat::default();
        let essential = calib3d::find_essential_mat(
            points_t1,
            points_t0,
            &k,
            calib3d::RANSAC,
            self.config.essential_confidence,
            self.config.essential_threshold,
            self.config.essential_max_iters,
            &mut mask,
        )
        .map_err(diverged)?;
        if essential.rows() != 3 || essential.cols() != 3 {
            return Err(EstimateError::SolverDiverged(format!(
                "degenerate essential matrix ({}x{})",
                essential.rows(),
                essential.cols()
            )));
        }

        let mut rotation_guess = Mat::default();
        let mut translation_mono = Mat::default();
        calib3d::recover_pose_estimated(
            &essential,
            points_t1,
            points_t0,
            &k,
            &mut rotation_guess,
            &mut translation_mono,
            &mut mask,
        )
        .map_err(diverged)?;

        // Stage 2: PnP with the stage-1 rotation as extrinsic guess.
        let mut rvec = Mat::default();
        calib3d::rodrigues(&rotation_guess, &mut rvec, &mut opencv::core::no_array())
            .map_err(diverged)?;
        let mut tvec = Mat::zeros(3, 1, CV_64FC1)
            .and_then(|m| m.to_mat())
            .map_err(diverged)?;
        let dist_coeffs = Mat::zeros(4, 1, CV_64FC1)
            .and_then(|m| m.to_mat())
            .map_err(diverged)?;
        let mut inliers = Mat::default();

        calib3d::solve_pnp_ransac(
            landmarks_t0,
            points_t1,
            &k,
            &dist_coeffs,
            &mut rvec,
            &mut tvec,
            true,
            self.config.pnp_iterations,
            self.config.pnp_reprojection_error,
            self.config.pnp_confidence,
            &mut inliers,
            calib3d::SOLVEPNP_ITERATIVE,
        )
        .map_err(diverged)?;

        let n_inliers = inliers.rows() as usize;
        if n_inliers < self.config.min_inliers {
            return Err(EstimateError::SolverDiverged(format!(
                "PnP kept {n_inliers} inliers (minimum {})",
                self.config.min_inliers
            )));
        }
        debug!(correspondences = n, inliers = n_inliers, "PnP converged");

        // Stage 3: reconcile world-in-camera into camera-in-world.
        let mut rotation_cw = Mat::default();
        calib3d::rodrigues(&rvec, &mut rotation_cw, &mut opencv::core::no_array())
            .map_err(diverged)?;
        let rotation = mat3_to_matrix3(&rotation_cw).map_err(diverged)?.transpose();
        let translation = -Vector3::new(
            *tvec.at::<f64>(0).map_err(diverged)?,
            *tvec.at::<f64>(1).map_err(diverged)?,
            *tvec.at::<f64>(2).map_err(diverged)?,
        );

        Ok(PoseEstimate {
            pose: Pose::from_rt(rotation, translation),
            n_inliers,
        })
    }
}

/// Convert an OpenCV 3x3 Mat into a nalgebra Matrix3.
fn mat3_to_matrix3(mat: &Mat) -> opencv::Result<Matrix3<f64>> {
    let mut values = [0.0f64; 9];
    for row in 0..3 {
        for col in 0..3 {
            values[(row * 3 + col) as usize] = *mat.at_2d::<f64>(row, col)?;
        }
    }
    Ok(Matrix3::from_row_slice(&values))
}
