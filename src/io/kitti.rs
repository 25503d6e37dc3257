//! KITTI odometry sequence loading.
//!
//! A sequence directory holds rectified grayscale frames as
//! `image_0/%06d.png` (left) and `image_1/%06d.png` (right). Ground-truth
//! poses, when available, live in a separate whitespace-delimited file of
//! row-major 3x4 matrices, one line per frame.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use nalgebra::{Matrix3, Vector3};
use opencv::core::Mat;
use opencv::imgcodecs::{self, IMREAD_GRAYSCALE};
use opencv::prelude::*;
use thiserror::Error;

use crate::geometry::Pose;

/// Recoverable sequence access failures; callers typically treat
/// `Exhausted` as normal end-of-input.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("sequence exhausted: requested frame {index} of {len}")]
    Exhausted { index: usize, len: usize },
    #[error("unreadable or empty image {path}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: Option<opencv::Error>,
    },
}

#[derive(Debug)]
pub struct StereoImagePair {
    pub left: Mat,
    pub right: Mat,
}

/// One KITTI odometry sequence, indexed by frame number.
#[derive(Debug)]
pub struct KittiSequence {
    sequence_path: PathBuf,
    len: usize,
}

impl KittiSequence {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let left_count = count_frames(&root.join("image_0"))?;
        let right_count = count_frames(&root.join("image_1"))?;
        if left_count != right_count {
            bail!(
                "left and right image counts differ: {} vs {}",
                left_count,
                right_count
            );
        }
        Ok(Self {
            sequence_path: root,
            len: left_count,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Load the stereo pair at `index`, grayscale.
    pub fn stereo_pair(&self, index: usize) -> Result<StereoImagePair, SequenceError> {
        if index >= self.len {
            return Err(SequenceError::Exhausted {
                index,
                len: self.len,
            });
        }
        let left = self.read_image("image_0", index)?;
        let right = self.read_image("image_1", index)?;
        Ok(StereoImagePair { left, right })
    }

    fn read_image(&self, side: &str, index: usize) -> Result<Mat, SequenceError> {
        let path = self
            .sequence_path
            .join(side)
            .join(format!("{index:06}.png"));
        let Some(path_str) = path.to_str() else {
            return Err(SequenceError::UnreadableImage { path, source: None });
        };
        let image = imgcodecs::imread(path_str, IMREAD_GRAYSCALE).map_err(|source| {
            SequenceError::UnreadableImage {
                path: path.clone(),
                source: Some(source),
            }
        })?;
        // A missing or undecodable file comes back as an empty Mat.
        if image.empty() {
            return Err(SequenceError::UnreadableImage { path, source: None });
        }
        Ok(image)
    }
}

fn count_frames(dir: &Path) -> Result<usize> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    let mut count = 0;
    for entry in entries {
        let entry = entry?;
        if entry.path().extension().is_some_and(|ext| ext == "png") {
            count += 1;
        }
    }
    Ok(count)
}

/// Load ground-truth poses from a KITTI `poses/XX.txt` file.
pub fn load_poses<P: AsRef<Path>>(path: P) -> Result<Vec<Pose>> {
    let path = path.as_ref();
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    parse_poses(file).with_context(|| format!("malformed pose file {}", path.display()))
}

fn parse_poses<R: Read>(reader: R) -> Result<Vec<Pose>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .from_reader(reader);

    let mut poses = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 12 {
            bail!("expected 12 values per pose row, got {}", rec.len());
        }
        let mut values = [0.0f64; 12];
        for (slot, field) in values.iter_mut().zip(rec.iter()) {
            *slot = field.trim().parse()?;
        }
        let rotation = Matrix3::new(
            values[0], values[1], values[2], values[4], values[5], values[6], values[8], values[9],
            values[10],
        );
        let translation = Vector3::new(values[3], values[7], values[11]);
        poses.push(Pose::from_rt(rotation, translation));
    }
    Ok(poses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_poses_reads_row_major_rt() {
        let text = "1 0 0 0 0 1 0 0 0 0 1 0\n\
                    0 0 1 0.5 0 1 0 -0.25 -1 0 0 2.0\n";

        let poses = parse_poses(text.as_bytes()).unwrap();

        assert_eq!(poses.len(), 2);
        assert_eq!(poses[0], Pose::identity());
        assert_relative_eq!(poses[1].rotation[(0, 2)], 1.0);
        assert_relative_eq!(poses[1].rotation[(2, 0)], -1.0);
        assert_relative_eq!(poses[1].translation.x, 0.5);
        assert_relative_eq!(poses[1].translation.y, -0.25);
        assert_relative_eq!(poses[1].translation.z, 2.0);
    }

    #[test]
    fn test_parse_poses_rejects_short_rows() {
        let text = "1 0 0 0\n";
        assert!(parse_poses(text.as_bytes()).is_err());
    }

    #[test]
    fn test_empty_sequence_is_exhausted_immediately() {
        let root = std::env::temp_dir().join("stereo-vo-test-empty-seq");
        fs::create_dir_all(root.join("image_0")).unwrap();
        fs::create_dir_all(root.join("image_1")).unwrap();

        let sequence = KittiSequence::new(&root).unwrap();
        assert!(sequence.is_empty());

        let err = sequence.stereo_pair(0).unwrap_err();
        assert!(matches!(err, SequenceError::Exhausted { index: 0, len: 0 }));
    }

    #[test]
    fn test_corrupt_image_reports_its_path() {
        let root = std::env::temp_dir().join("stereo-vo-test-corrupt-seq");
        fs::create_dir_all(root.join("image_0")).unwrap();
        fs::create_dir_all(root.join("image_1")).unwrap();
        fs::write(root.join("image_0").join("000000.png"), b"not a png").unwrap();
        fs::write(root.join("image_1").join("000000.png"), b"not a png").unwrap();

        let sequence = KittiSequence::new(&root).unwrap();
        let err = sequence.stereo_pair(0).unwrap_err();

        match err {
            SequenceError::UnreadableImage { path, .. } => {
                assert!(path.ends_with("image_0/000000.png"), "path: {path:?}");
            }
            other => panic!("expected UnreadableImage, got {other}"),
        }
    }

    #[test]
    fn test_missing_directory_is_a_hard_error() {
        let root = std::env::temp_dir().join("stereo-vo-test-no-such-seq");
        assert!(KittiSequence::new(&root).is_err());
    }
}
