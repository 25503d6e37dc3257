use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stereo_vo::io::kitti::{load_poses, KittiSequence, SequenceError};
use stereo_vo::io::settings::load_settings;
use stereo_vo::io::trajectory::TrajectoryWriter;
use stereo_vo::odometry::StereoOdometry;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(sequence_path), Some(settings_path)) = (args.next(), args.next()) else {
        bail!("usage: stereo-vo <sequence_dir> <settings.yaml> [ground_truth.txt] [trajectory_out.txt]");
    };
    let groundtruth_path = args.next();
    let trajectory_path = args.next();

    let settings = load_settings(&settings_path)?;
    let sequence = KittiSequence::new(&sequence_path)
        .with_context(|| format!("failed to open sequence {sequence_path}"))?;
    info!(frames = sequence.len(), path = %sequence_path, "sequence loaded");

    let groundtruth = match &groundtruth_path {
        Some(path) => {
            let poses = load_poses(path)?;
            info!(poses = poses.len(), path = %path, "ground truth loaded");
            poses
        }
        None => Vec::new(),
    };

    let mut trajectory_out = trajectory_path
        .as_deref()
        .map(TrajectoryWriter::create)
        .transpose()?;

    let mut vo = StereoOdometry::new(settings.camera.camera_model(), settings.odometry)?;

    for index in 0..sequence.len() {
        let pair = match sequence.stereo_pair(index) {
            Ok(pair) => pair,
            Err(SequenceError::Exhausted { .. }) => break,
            Err(err) => return Err(err).context("failed to load stereo pair"),
        };

        let result = vo.step(pair.left, pair.right)?;
        let fps = 1000.0 / result.metrics.total_ms.max(1e-6);
        info!(
            frame = result.frame_id,
            status = ?result.status,
            tracked = result.metrics.n_tracked,
            inliers = result.metrics.n_inliers,
            fps = format!("{fps:.1}"),
            "step"
        );

        if let Some(writer) = trajectory_out.as_mut() {
            writer.write_pose(&result.pose)?;
        }

        if index % 100 == 0 {
            if let Some(gt) = groundtruth.get(index) {
                let drift = (result.pose.translation - gt.translation).norm();
                info!(frame = index, drift_m = format!("{drift:.2}"), "ground truth drift");
            }
        }
    }

    if let Some(writer) = trajectory_out {
        writer.finish()?;
        if let Some(path) = &trajectory_path {
            info!(path = %path, "trajectory written");
        }
    }

    let world = vo.pose();
    info!(
        frames = sequence.len(),
        x = format!("{:.2}", world.translation.x),
        y = format!("{:.2}", world.translation.y),
        z = format!("{:.2}", world.translation.z),
        "done"
    );
    if !groundtruth.is_empty() && sequence.len() > groundtruth.len() {
        warn!(
            frames = sequence.len(),
            poses = groundtruth.len(),
            "sequence has more frames than ground truth poses"
        );
    }

    Ok(())
}
