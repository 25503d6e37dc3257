//! World-pose accumulation behind a per-step drift gate.

use nalgebra::Vector3;
use serde::Deserialize;
use tracing::warn;

use crate::geometry::Pose;

/// Verdict of the drift gate for one incremental transform.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Accepted,
    /// The per-axis Euler decomposition that tripped the gate.
    Rejected { euler: Vector3<f64> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    /// Per-axis Euler bound on one step's rotation, radians.
    pub max_step_rotation: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            max_step_rotation: 0.1,
        }
    }
}

/// Composes accepted incremental transforms onto the running world pose.
///
/// A single spurious rotation estimate corrupts a dead-reckoned trajectory
/// far more than one skipped update, so any step whose rotation exceeds
/// the bound on some axis is reported and dropped; the world pose stays
/// untouched and tracking state rolls forward normally.
pub struct TrajectoryIntegrator {
    world: Pose,
    config: IntegratorConfig,
}

impl TrajectoryIntegrator {
    pub fn new(config: IntegratorConfig) -> Self {
        Self {
            world: Pose::identity(),
            config,
        }
    }

    pub fn world(&self) -> &Pose {
        &self.world
    }

    /// Gate and, if plausible, compose one incremental transform.
    pub fn integrate(&mut self, incremental: &Pose) -> GateDecision {
        let euler = incremental.euler_angles();
        let bound = self.config.max_step_rotation;
        if euler.iter().all(|angle| angle.abs() < bound) {
            self.world = self.world.compose(incremental);
            GateDecision::Accepted
        } else {
            warn!(
                x = euler.x,
                y = euler.y,
                z = euler.z,
                bound,
                "step rotation exceeds drift gate, skipping integration"
            );
            GateDecision::Rejected { euler }
        }
    }
}
