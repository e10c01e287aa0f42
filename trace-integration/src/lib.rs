//! Integration of digitised photomultiplier traces into calibrated per-channel
//! charges and arrival times.
//!
//! For every triggered event the [`TraceIntegrationEngine`] walks the hit
//! channels of one telescope, places an integration window on each trace,
//! sums the pedestal-subtracted samples and measures the pulse arrival time
//! at a fixed set of fractional levels of the pulse maximum. Shower events may
//! be integrated twice: the first pass feeds an external image fit, the second
//! pass re-centres each window on the arrival time predicted by that fit.
//!
//! Channels are classified as usable or dead once per run (and again at each
//! pedestal time slice) by the [`DeadChannelClassifier`].

pub mod calibration;
pub mod context;
pub mod crate_jitter;
pub mod dead_channels;
pub mod engine;
pub mod error;
pub mod event;
pub mod low_gain;
pub mod parameters;
pub mod simulation;
pub mod source;
pub mod telescope;
pub mod trace_handler;
pub mod window;

pub use calibration::{CalibrationSet, GainCalibration, GainState, GainTable};
pub use crate_jitter::{CrateJitter, CrateJitterCorrector, CrateLayout};
pub use dead_channels::{
    ClassificationStage, DeadChannelClassifier, DeadChannelThresholds, DeadReason, DeadStatus,
    ExternalStatus, RecordedDeadChannels,
};
pub use engine::{RunSetup, TraceIntegrationEngine};
pub use error::{ChannelError, ConfigurationError};
pub use event::{EventOutputs, ImageFit};
pub use low_gain::LowGainCorrector;
pub use parameters::IntegrationParameters;
pub use source::{ImageFitProvider, PreIntegrated, RecordedEvent, WaveformSource};
pub use telescope::{PixelPosition, Telescope, WindowSettings};
pub use trace_handler::{PulseTiming, TimingLevels, TraceHandler};
pub use window::{IntegrationWindow, SummationWindowPlanner};

pub type Real = f64;
