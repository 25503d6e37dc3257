//! Stereo visual odometry pipeline: one pose per ingested stereo pair.
//!
//! Each step drives feature replenishment and bucketing on the previous
//! frame, circular matching into the current frame, triangulation of the
//! surviving t0 correspondences, pose estimation, and drift-gated
//! integration. State carried between steps is exactly the previous frame
//! (with its surviving, aged features) and the running world pose.

use std::time::Instant;

use anyhow::Result;
use opencv::core::Mat;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::camera::CameraModel;
use crate::features::{FastDetector, FeatureConfig, FeatureDetector, FeatureManager};
use crate::frame::{FeaturePoint, Frame};
use crate::geometry::triangulate_stereo;
use crate::solver::{EpipolarPnpSolver, EstimateError, PoseSolver, SolverConfig};
use crate::tracking::{
    CircularTracker, FlowTracker, PyrLkTracker, StepMetrics, StepResult, StepStatus,
    TrackingConfig, TrackingState,
};
use crate::trajectory::{GateDecision, IntegratorConfig, TrajectoryIntegrator};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OdometryConfig {
    pub features: FeatureConfig,
    pub tracking: TrackingConfig,
    pub solver: SolverConfig,
    pub integrator: IntegratorConfig,
}

/// The odometry orchestrator. Owns the previous/current frame slots and
/// every pipeline stage; emits one `StepResult` per stereo pair.
pub struct StereoOdometry {
    camera: CameraModel,
    features: FeatureManager,
    tracker: CircularTracker,
    detector: Box<dyn FeatureDetector>,
    flow: Box<dyn FlowTracker>,
    solver: Box<dyn PoseSolver>,
    integrator: TrajectoryIntegrator,
    state: TrackingState,
    last_frame: Option<Frame>,
    next_frame_id: u64,
}

impl StereoOdometry {
    /// Build the pipeline with the standard primitives: FAST detection,
    /// pyramidal LK flow, and the epipolar+PnP solver.
    pub fn new(camera: CameraModel, config: OdometryConfig) -> Result<Self> {
        let detector = Box::new(FastDetector::new(config.features.fast_threshold)?);
        let solver = Box::new(EpipolarPnpSolver::new(config.solver.clone()));
        Ok(Self::with_components(
            camera,
            config,
            detector,
            Box::new(PyrLkTracker::default()),
            solver,
        ))
    }

    /// Build the pipeline with injected primitives.
    pub fn with_components(
        camera: CameraModel,
        config: OdometryConfig,
        detector: Box<dyn FeatureDetector>,
        flow: Box<dyn FlowTracker>,
        solver: Box<dyn PoseSolver>,
    ) -> Self {
        Self {
            camera,
            features: FeatureManager::new(config.features),
            tracker: CircularTracker::new(config.tracking),
            detector,
            flow,
            solver,
            integrator: TrajectoryIntegrator::new(config.integrator),
            state: TrackingState::AwaitingFirstFrame,
            last_frame: None,
            next_frame_id: 0,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// The accumulated world pose.
    pub fn pose(&self) -> &crate::geometry::Pose {
        self.integrator.world()
    }

    /// Ingest one stereo pair and advance the pipeline by one step.
    ///
    /// Soft failures (too few correspondences, solver divergence, drift
    /// gate rejection) skip integration but still roll frame bookkeeping
    /// forward so the next step can recover. Only unusable input images
    /// propagate as hard errors.
    pub fn step(&mut self, left: Mat, right: Mat) -> Result<StepResult> {
        let started = Instant::now();
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        let mut current = Frame::new(frame_id, left, right)?;

        let mut last = match self.last_frame.take() {
            Some(last) => last,
            None => {
                self.state = TrackingState::Tracking;
                self.last_frame = Some(current);
                info!(frame = frame_id, "first frame ingested, awaiting motion");
                return Ok(StepResult {
                    frame_id,
                    status: StepStatus::FirstFrame,
                    pose: self.integrator.world().clone(),
                    metrics: StepMetrics {
                        total_ms: started.elapsed().as_secs_f64() * 1000.0,
                        ..Default::default()
                    },
                });
            }
        };

        // Keep the seed set dense and spatially even before tracking.
        self.features.replenish(&mut last, self.detector.as_mut())?;
        self.features.bucket(&mut last);

        let seeds = last.keypoints();
        let matches = self
            .tracker
            .track(self.flow.as_ref(), &last, &current, &seeds)?;

        // Survivors become the current frame's features: positioned at
        // their t1 coordinates, aged by one round.
        let mut carried = Vec::with_capacity(matches.len());
        let mut survivor_idx = 0;
        for (feature, keep) in last.features.iter().zip(&matches.survivors) {
            if *keep {
                carried.push(FeaturePoint {
                    point: matches.left_t1.get(survivor_idx)?,
                    age: feature.age + 1,
                });
                survivor_idx += 1;
            }
        }
        current.features = carried;

        let landmarks = triangulate_stereo(&self.camera, &matches.left_t0, &matches.right_t0)?;

        let mut n_inliers = 0;
        let status = match self.solver.estimate(
            &self.camera,
            &matches.left_t0,
            &matches.left_t1,
            &landmarks,
        ) {
            Ok(estimate) => {
                n_inliers = estimate.n_inliers;
                match self.integrator.integrate(&estimate.pose) {
                    GateDecision::Accepted => StepStatus::Tracked,
                    GateDecision::Rejected { euler } => StepStatus::RotationRejected { euler },
                }
            }
            Err(EstimateError::InsufficientCorrespondences { got, min }) => {
                warn!(
                    frame = frame_id,
                    tracked = got,
                    min,
                    "too few correspondences, skipping integration"
                );
                StepStatus::InsufficientCorrespondences { tracked: got }
            }
            Err(err @ EstimateError::SolverDiverged(_)) => {
                warn!(frame = frame_id, error = %err, "skipping integration");
                StepStatus::SolverDiverged
            }
        };

        debug!(
            frame = frame_id,
            seeds = seeds.len(),
            tracked = matches.len(),
            inliers = n_inliers,
            integrated = status.integrated(),
            "step complete"
        );

        self.last_frame = Some(current);

        Ok(StepResult {
            frame_id,
            status,
            pose: self.integrator.world().clone(),
            metrics: StepMetrics {
                n_seeds: seeds.len(),
                n_tracked: matches.len(),
                n_inliers,
                total_ms: started.elapsed().as_secs_f64() * 1000.0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Pose;
    use crate::solver::PoseEstimate;
    use anyhow::Result;
    use nalgebra::{Rotation3, Vector3};
    use opencv::core::{Point2f, Point3f, Size, Vector, CV_8UC1};
    use opencv::prelude::*;

    fn gray() -> Mat {
        Mat::zeros(100, 100, CV_8UC1).unwrap().to_mat().unwrap()
    }

    fn camera() -> CameraModel {
        CameraModel::new(700.0, 700.0, 50.0, 50.0, 700.0 * 0.5)
    }

    /// Detector producing a fixed well-spread grid.
    struct GridDetector;

    impl FeatureDetector for GridDetector {
        fn detect(&mut self, _image: &Mat) -> Result<Vector<Point2f>> {
            let mut pts = Vector::new();
            for x in [20.0f32, 40.0, 60.0, 80.0] {
                for y in [25.0f32, 45.0, 65.0] {
                    pts.push(Point2f::new(x, y));
                }
            }
            Ok(pts)
        }
    }

    /// Flow with a fixed stereo disparity and zero temporal motion; legs
    /// are identified by which images they connect is irrelevant here, the
    /// shift cycles through the four call positions per step.
    struct StaticSceneFlow {
        disparity: f32,
        calls: std::cell::Cell<usize>,
        fail_from: Option<usize>,
    }

    impl StaticSceneFlow {
        fn new(disparity: f32) -> Self {
            Self {
                disparity,
                calls: std::cell::Cell::new(0),
                fail_from: None,
            }
        }
    }

    impl FlowTracker for StaticSceneFlow {
        fn track(
            &self,
            _from: &Mat,
            _to: &Mat,
            seeds: &Vector<Point2f>,
            _win: Size,
        ) -> Result<(Vector<Point2f>, Vector<u8>)> {
            let leg = self.calls.get() % 4;
            self.calls.set(self.calls.get() + 1);
            let dx = match leg {
                0 => -self.disparity,
                2 => self.disparity,
                _ => 0.0,
            };
            let mut tracked = Vector::new();
            let mut status = Vector::new();
            for (i, p) in seeds.iter().enumerate() {
                tracked.push(Point2f::new(p.x + dx, p.y));
                let ok = self.fail_from.map_or(true, |from| i < from);
                status.push(u8::from(ok));
            }
            Ok((tracked, status))
        }
    }

    /// Solver returning a scripted estimate.
    struct ScriptedSolver(Result<PoseEstimate, &'static str>);

    impl PoseSolver for ScriptedSolver {
        fn estimate(
            &self,
            _camera: &CameraModel,
            points_t0: &Vector<Point2f>,
            _points_t1: &Vector<Point2f>,
            _landmarks: &Vector<Point3f>,
        ) -> Result<PoseEstimate, EstimateError> {
            match &self.0 {
                Ok(est) => Ok(PoseEstimate {
                    pose: est.pose.clone(),
                    n_inliers: points_t0.len(),
                }),
                Err(msg) => Err(EstimateError::SolverDiverged((*msg).to_string())),
            }
        }
    }

    fn pipeline(solver: Box<dyn PoseSolver>) -> StereoOdometry {
        pipeline_with_flow(solver, Box::new(StaticSceneFlow::new(8.0)))
    }

    fn pipeline_with_flow(
        solver: Box<dyn PoseSolver>,
        flow: Box<dyn FlowTracker>,
    ) -> StereoOdometry {
        StereoOdometry::with_components(
            camera(),
            OdometryConfig::default(),
            Box::new(GridDetector),
            flow,
            solver,
        )
    }

    fn identity_solver() -> Box<dyn PoseSolver> {
        Box::new(ScriptedSolver(Ok(PoseEstimate {
            pose: Pose::identity(),
            n_inliers: 0,
        })))
    }

    #[test]
    fn test_first_frame_emits_no_motion() {
        let mut vo = pipeline(identity_solver());
        assert_eq!(vo.state(), TrackingState::AwaitingFirstFrame);

        let result = vo.step(gray(), gray()).unwrap();

        assert_eq!(result.status, StepStatus::FirstFrame);
        assert_eq!(result.frame_id, 0);
        assert_eq!(vo.state(), TrackingState::Tracking);
        assert_eq!(result.pose, Pose::identity());
    }

    #[test]
    fn test_static_scene_keeps_world_pose_at_identity() {
        let mut vo = pipeline(identity_solver());
        vo.step(gray(), gray()).unwrap();

        let result = vo.step(gray(), gray()).unwrap();

        assert_eq!(result.status, StepStatus::Tracked);
        assert_eq!(result.metrics.n_seeds, 12);
        assert_eq!(result.metrics.n_tracked, 12);
        assert_eq!(result.pose, Pose::identity());
    }

    #[test]
    fn test_insufficient_correspondences_skips_integration() {
        // Real solver; the flow fails all but three points, so the
        // correspondence floor trips before any RANSAC stage runs.
        let solver = Box::new(EpipolarPnpSolver::new(SolverConfig::default()));
        let mut flow = StaticSceneFlow::new(8.0);
        flow.fail_from = Some(3);
        let mut vo = pipeline_with_flow(solver, Box::new(flow));
        vo.step(gray(), gray()).unwrap();

        let result = vo.step(gray(), gray()).unwrap();

        assert_eq!(
            result.status,
            StepStatus::InsufficientCorrespondences { tracked: 3 }
        );
        assert_eq!(result.pose, Pose::identity());
    }

    #[test]
    fn test_implausible_rotation_is_gated_out() {
        let spin = Pose::from_rt(
            Rotation3::from_euler_angles(0.0, 0.3, 0.0).into_inner(),
            Vector3::new(0.0, 0.0, 1.0),
        );
        let mut vo = pipeline(Box::new(ScriptedSolver(Ok(PoseEstimate {
            pose: spin,
            n_inliers: 0,
        }))));
        vo.step(gray(), gray()).unwrap();

        let result = vo.step(gray(), gray()).unwrap();

        assert!(matches!(
            result.status,
            StepStatus::RotationRejected { .. }
        ));
        assert_eq!(result.pose, Pose::identity());
    }

    #[test]
    fn test_solver_divergence_degrades_gracefully() {
        let mut vo = pipeline(Box::new(ScriptedSolver(Err("no consensus"))));
        vo.step(gray(), gray()).unwrap();

        let diverged = vo.step(gray(), gray()).unwrap();
        assert_eq!(diverged.status, StepStatus::SolverDiverged);
        assert_eq!(diverged.pose, Pose::identity());

        // Tracking state and feature bookkeeping roll forward regardless.
        let next = vo.step(gray(), gray()).unwrap();
        assert_eq!(next.metrics.n_tracked, 12);
    }

    #[test]
    fn test_surviving_features_age_across_rounds() {
        let mut vo = pipeline(identity_solver());
        vo.step(gray(), gray()).unwrap();
        vo.step(gray(), gray()).unwrap();
        vo.step(gray(), gray()).unwrap();

        let last = vo.last_frame.as_ref().unwrap();
        assert!(!last.features.is_empty());
        assert!(last.features.iter().all(|f| f.age == 2));
    }
}
