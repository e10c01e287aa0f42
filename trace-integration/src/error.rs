use crate::calibration::GainState;
use fadc_common::{ChannelId, TelescopeId};
use thiserror::Error;

/// Problems with the run configuration or calibration. These stop the run.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error(
        "All {channels} {gain} channels of telescope {telescope} are dead, insufficient calibration data"
    )]
    AllChannelsDead {
        telescope: TelescopeId,
        gain: GainState,
        channels: usize,
    },
    #[error("Calibration for {gain} has {found} channels, telescope has {expected}")]
    CalibrationSize {
        gain: GainState,
        expected: usize,
        found: usize,
    },
    #[error("Pixel status table has {found} entries, telescope has {expected} channels")]
    PixelStatusSize { expected: usize, found: usize },
    #[error("Telescope {0} has no samples per trace")]
    NoSamples(TelescopeId),
    #[error("Telescope {0} has no channels")]
    NoChannels(TelescopeId),
    #[error("Pulse timing fractions must be strictly increasing and lie in (0,1), got {0:?}")]
    InvalidTimingFractions(Vec<f64>),
    #[error("T0 timing level {index} out of range, only {levels} levels defined")]
    TimingLevelOutOfRange { index: usize, levels: usize },
    #[error("Crate layout needs one reference channel per crate: {crates} crates, {references} references")]
    CrateReferenceCount { crates: usize, references: usize },
    #[error("Crate boundary {boundary} is not increasing or exceeds {channels} channels")]
    CrateBoundary { boundary: ChannelId, channels: usize },
}

/// Problems looking up a single channel during an event. The channel is
/// skipped for the current event only.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ChannelError {
    #[error("Hit index {hit} out of range, event has {hits} hits")]
    HitIndexOutOfRange { hit: usize, hits: usize },
    #[error("Channel {channel} out of range, telescope has {channels} channels")]
    ChannelOutOfRange { channel: ChannelId, channels: usize },
    #[error("No {gain} calibration for channel {channel}")]
    MissingCalibration { channel: ChannelId, gain: GainState },
}

impl ChannelError {
    pub(crate) fn failure_kind(&self) -> fadc_common::metrics::failures::FailureKind {
        use fadc_common::metrics::failures::FailureKind;
        match self {
            ChannelError::HitIndexOutOfRange { .. } => FailureKind::HitIndexOutOfRange,
            ChannelError::ChannelOutOfRange { .. } => FailureKind::ChannelOutOfRange,
            ChannelError::MissingCalibration { .. } => FailureKind::MissingCalibration,
        }
    }
}
