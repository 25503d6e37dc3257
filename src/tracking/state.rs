//! Odometry state machine.

/// State of the odometry pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    /// No previous frame yet; the first ingested pair emits no pose.
    AwaitingFirstFrame,
    /// A previous frame is live and every step attempts a pose.
    Tracking,
}

impl Default for TrackingState {
    fn default() -> Self {
        Self::AwaitingFirstFrame
    }
}
