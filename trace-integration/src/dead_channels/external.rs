use super::DeadChannelThresholds;
use crate::{Real, calibration::GainState};
use fadc_common::ChannelId;
use serde::Deserialize;

/// Channel states known from the simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimulationTruth {
    /// Channels that do not exist in the simulated camera.
    pub missing: Vec<ChannelId>,
    /// Channels simulated as dead.
    pub disabled: Vec<ChannelId>,
}

/// Per-channel slow control measurements, indexed by channel. Empty when not recorded.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SlowControlReadings {
    pub l1_rates: Vec<Real>,
    pub hv_rms: Vec<Real>,
}

impl SlowControlReadings {
    pub fn l1_rate_dead(&self, thresholds: &DeadChannelThresholds) -> Vec<ChannelId> {
        Self::dead_list(&self.l1_rates, |rate| thresholds.test_l1_rate(rate).is_some())
    }

    pub fn hv_dead(&self, thresholds: &DeadChannelThresholds) -> Vec<ChannelId> {
        Self::dead_list(&self.hv_rms, |hv_rms| thresholds.test_hv_rms(hv_rms).is_some())
    }

    fn dead_list(readings: &[Real], is_dead: impl Fn(Real) -> bool) -> Vec<ChannelId> {
        readings
            .iter()
            .enumerate()
            .filter(|(_, reading)| is_dead(**reading))
            .map(|(channel, _)| channel)
            .collect()
    }
}

/// Status codes stored with the data by an earlier analysis, indexed by channel.
/// When present they replace the classification at run start.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RecordedDeadChannels {
    pub high_gain: Vec<u32>,
    pub low_gain: Vec<u32>,
}

impl RecordedDeadChannels {
    pub fn codes(&self, gain: GainState) -> &[u32] {
        match gain {
            GainState::High => &self.high_gain,
            GainState::Low => &self.low_gain,
        }
    }
}

/// Optional inputs of the classification besides the calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalStatus<'a> {
    /// Present for simulated runs only.
    pub simulation: Option<&'a SimulationTruth>,
    pub slow_control: Option<&'a SlowControlReadings>,
}
