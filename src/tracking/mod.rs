//! Feature tracking across a stereo frame pair:
//! - four-leg circular matching with round-trip validation
//! - per-step results and diagnostics
//! - the odometry state machine

pub mod circular;
pub mod result;
pub mod state;

pub use circular::{CircularMatches, CircularTracker, FlowTracker, PyrLkTracker, TrackingConfig};
pub use result::{StepMetrics, StepResult, StepStatus};
pub use state::TrackingState;
