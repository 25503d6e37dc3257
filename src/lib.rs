pub mod camera;
pub mod features;
pub mod frame;
pub mod geometry;
pub mod io;
pub mod odometry;
pub mod solver;
pub mod tracking;
pub mod trajectory;
