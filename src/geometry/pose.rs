//! Rigid-body transform used for both incremental and accumulated poses.

use nalgebra::{Matrix3, Matrix4, Vector3};

/// A rigid transform: 3x3 rotation plus 3x1 translation.
///
/// Two flavors share this type: the *incremental* transform produced by a
/// pose solver (camera at t1 expressed in the camera frame at t0) and the
/// *world* pose accumulated by the trajectory integrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Right-multiply an incremental transform onto this pose.
    ///
    /// The translation is updated with the pre-composition rotation:
    /// `t' = t + R * t_inc`, `R' = R * R_inc`.
    pub fn compose(&self, incremental: &Pose) -> Pose {
        Pose {
            rotation: self.rotation * incremental.rotation,
            translation: self.translation + self.rotation * incremental.translation,
        }
    }

    pub fn inverse(&self) -> Pose {
        let rotation = self.rotation.transpose();
        Pose {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Decompose the rotation into ZYX Euler angles (x, y, z in radians).
    ///
    /// Matches the convention `R = Rz(z) * Ry(y) * Rx(x)`; used by the
    /// trajectory drift gate to bound per-step rotation on every axis.
    pub fn euler_angles(&self) -> Vector3<f64> {
        let r = &self.rotation;
        let sy = (r[(0, 0)] * r[(0, 0)] + r[(1, 0)] * r[(1, 0)]).sqrt();

        if sy < 1e-6 {
            // Gimbal lock: x and z are coupled, report z as zero.
            Vector3::new((-r[(1, 2)]).atan2(r[(1, 1)]), (-r[(2, 0)]).atan2(sy), 0.0)
        } else {
            Vector3::new(
                r[(2, 1)].atan2(r[(2, 2)]),
                (-r[(2, 0)]).atan2(sy),
                r[(1, 0)].atan2(r[(0, 0)]),
            )
        }
    }

    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}
