//! Classification of channels as usable or dead, separately for high and low gain.
//!
//! Each reason a channel is dead sets one bit of its [`DeadStatus`]. The
//! classification runs for both gains at run start. When pedestals are given
//! per time slice only the pedestal bits are re-tested at each slice boundary.

mod classifier;
mod external;
mod status;
mod thresholds;

pub use classifier::{ClassificationStage, DeadChannelClassifier};
pub use external::{ExternalStatus, RecordedDeadChannels, SimulationTruth, SlowControlReadings};
pub use status::{DeadReason, DeadStatus};
pub use thresholds::{CameraPedvarStats, DeadChannelThresholds};
