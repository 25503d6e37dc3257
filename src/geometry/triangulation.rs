//! Stereo triangulation of matched left/right pixel pairs.

use anyhow::Result;
use opencv::calib3d;
use opencv::core::{Mat, Point2f, Point3f, Vector};
use opencv::prelude::*;

use crate::camera::CameraModel;

/// Triangulate matched left/right points into 3D landmarks in the left
/// camera's frame, with the homogeneous coordinates already converted.
///
/// Landmarks with non-positive or degenerate depth are propagated as-is;
/// the PnP RANSAC stage downstream suppresses them statistically.
pub fn triangulate_stereo(
    camera: &CameraModel,
    points_left: &Vector<Point2f>,
    points_right: &Vector<Point2f>,
) -> Result<Vector<Point3f>> {
    let mut landmarks = Vector::<Point3f>::new();
    if points_left.is_empty() {
        return Ok(landmarks);
    }

    let proj_left = camera.projection_left()?;
    let proj_right = camera.projection_right()?;

    let mut points4d = Mat::default();
    calib3d::triangulate_points(
        &proj_left,
        &proj_right,
        points_left,
        points_right,
        &mut points4d,
    )?;

    // triangulate_points yields 4xN; the conversion expects Nx4.
    let points4d_t = points4d.t()?.to_mat()?;
    let mut points3d = Mat::default();
    calib3d::convert_points_from_homogeneous(&points4d_t, &mut points3d)?;

    landmarks.reserve(points3d.rows() as usize);
    for i in 0..points3d.rows() {
        landmarks.push(*points3d.at::<Point3f>(i)?);
    }
    Ok(landmarks)
}
