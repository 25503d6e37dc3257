//! Four-leg circular matching between two consecutive stereo frames.
//!
//! Every seed point on the previous left image is chased through
//! left_t0 → right_t0 → right_t1 → left_t1 → back to left_t0. A point
//! survives only if all four optical-flow legs succeed, every reported
//! coordinate stays in valid bounds, and the round trip lands back on the
//! origin within a pixel tolerance. This validates the stereo
//! correspondence at both time steps, not just the temporal tracking.

use anyhow::Result;
use opencv::core::{Mat, Point2f, Size, TermCriteria, Vector};
use opencv::video;
use serde::Deserialize;
use tracing::debug;

use crate::frame::Frame;

/// Optical-flow seam: track seed points from one image into another,
/// reporting per-point success. Failed points may carry out-of-bounds
/// coordinates; the circular gate handles both.
pub trait FlowTracker {
    fn track(
        &self,
        from: &Mat,
        to: &Mat,
        seeds: &Vector<Point2f>,
        win: Size,
    ) -> Result<(Vector<Point2f>, Vector<u8>)>;
}

/// Pyramidal Lucas-Kanade tracker.
pub struct PyrLkTracker {
    max_level: i32,
    term_max_count: i32,
    term_epsilon: f64,
    min_eig_threshold: f64,
}

impl Default for PyrLkTracker {
    fn default() -> Self {
        Self {
            max_level: 3,
            term_max_count: 30,
            term_epsilon: 0.01,
            min_eig_threshold: 0.001,
        }
    }
}

impl FlowTracker for PyrLkTracker {
    fn track(
        &self,
        from: &Mat,
        to: &Mat,
        seeds: &Vector<Point2f>,
        win: Size,
    ) -> Result<(Vector<Point2f>, Vector<u8>)> {
        let mut tracked = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        let criteria = TermCriteria {
            typ: opencv::core::TermCriteria_COUNT + opencv::core::TermCriteria_EPS,
            max_count: self.term_max_count,
            epsilon: self.term_epsilon,
        };
        video::calc_optical_flow_pyr_lk(
            from,
            to,
            seeds,
            &mut tracked,
            &mut status,
            &mut err,
            win,
            self.max_level,
            criteria,
            0,
            self.min_eig_threshold,
        )?;
        Ok((tracked, status))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// LK window for the temporal legs (same image, consecutive times).
    pub win_size: i32,
    /// LK window for the stereo legs (left/right at one time).
    pub stereo_win_size: i32,
    /// Maximum Chebyshev distance between a seed and its returned point.
    pub round_trip_tolerance: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            win_size: 21,
            stereo_win_size: 21,
            round_trip_tolerance: 0.0,
        }
    }
}

/// Validated correspondences of one circular-matching pass. The four
/// coordinate vectors are co-indexed and equal length; `survivors` is
/// indexed against the original seed set so the caller can prune its
/// feature records in lockstep.
pub struct CircularMatches {
    pub left_t0: Vector<Point2f>,
    pub right_t0: Vector<Point2f>,
    pub right_t1: Vector<Point2f>,
    pub left_t1: Vector<Point2f>,
    pub survivors: Vec<bool>,
}

impl CircularMatches {
    pub fn len(&self) -> usize {
        self.left_t0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left_t0.is_empty()
    }
}

pub struct CircularTracker {
    config: TrackingConfig,
}

impl CircularTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self { config }
    }

    /// Run the four legs and prune in one pass.
    pub fn track(
        &self,
        flow: &dyn FlowTracker,
        last: &Frame,
        current: &Frame,
        seeds: &Vector<Point2f>,
    ) -> Result<CircularMatches> {
        let stereo_win = Size::new(self.config.stereo_win_size, self.config.stereo_win_size);
        let temporal_win = Size::new(self.config.win_size, self.config.win_size);

        // Legs depend sequentially on each other's output.
        let (right_t0, status0) = flow.track(last.left(), last.right(), seeds, stereo_win)?;
        let (right_t1, status1) = flow.track(last.right(), current.right(), &right_t0, temporal_win)?;
        let (left_t1, status2) = flow.track(current.right(), current.left(), &right_t1, stereo_win)?;
        let (left_t0_return, status3) = flow.track(current.left(), last.left(), &left_t1, temporal_win)?;

        let mut matches = CircularMatches {
            left_t0: Vector::new(),
            right_t0: Vector::new(),
            right_t1: Vector::new(),
            left_t1: Vector::new(),
            survivors: Vec::with_capacity(seeds.len()),
        };

        for i in 0..seeds.len() {
            let pt0 = seeds.get(i)?;
            let pt1 = right_t0.get(i)?;
            let pt2 = right_t1.get(i)?;
            let pt3 = left_t1.get(i)?;
            let ret = left_t0_return.get(i)?;

            let legs_ok = status0.get(i)? != 0
                && status1.get(i)? != 0
                && status2.get(i)? != 0
                && status3.get(i)? != 0;
            let in_bounds = [pt0, pt1, pt2, pt3, ret]
                .iter()
                .all(|p| p.x >= 0.0 && p.y >= 0.0);
            let drift = (pt0.x - ret.x).abs().max((pt0.y - ret.y).abs());

            let keep = legs_ok && in_bounds && drift <= self.config.round_trip_tolerance;
            matches.survivors.push(keep);
            if keep {
                matches.left_t0.push(pt0);
                matches.right_t0.push(pt1);
                matches.right_t1.push(pt2);
                matches.left_t1.push(pt3);
            }
        }

        debug!(
            seeds = seeds.len(),
            survived = matches.len(),
            "circular matching pass"
        );
        Ok(matches)
    }
}
