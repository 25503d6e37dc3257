//! Geometry utilities: rigid-body poses and stereo triangulation.

pub mod pose;
pub mod triangulation;

pub use pose::Pose;
pub use triangulation::triangulate_stereo;
