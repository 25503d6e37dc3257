pub mod kitti;
pub mod settings;
pub mod trajectory;
