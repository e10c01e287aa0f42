use crate::{
    Real,
    dead_channels::DeadChannelThresholds,
    error::{ChannelError, ConfigurationError},
};
use fadc_common::ChannelId;
use serde::Deserialize;

/// Amplification path of a channel for the current event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
pub enum GainState {
    #[default]
    #[strum(to_string = "high gain")]
    High,
    #[strum(to_string = "low gain")]
    Low,
}

impl GainState {
    pub const ALL: [GainState; 2] = [GainState::High, GainState::Low];

    pub fn from_low_gain(low_gain: bool) -> Self {
        if low_gain {
            GainState::Low
        } else {
            GainState::High
        }
    }

    pub fn is_low(self) -> bool {
        matches!(self, GainState::Low)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            GainState::High => 0,
            GainState::Low => 1,
        }
    }
}

/// Calibration constants of one channel in one gain state.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GainCalibration {
    /// Pedestal mean per sample.
    pub pedestal: Real,
    /// Pedestal RMS (pedestal variation) for the configured window.
    pub pedestal_rms: Real,
    /// Relative gain.
    pub gain: Real,
    pub gain_rms: Real,
    /// Nominal gain the measured gain is compared against.
    pub nominal_gain: Real,
    /// Arrival time offset relative to the camera average, in samples.
    pub time_offset: Real,
}

impl Default for GainCalibration {
    fn default() -> Self {
        Self {
            pedestal: 16.0,
            pedestal_rms: 2.0,
            gain: 1.0,
            gain_rms: 0.3,
            nominal_gain: 1.0,
            time_offset: 0.0,
        }
    }
}

/// Constants of every channel for one gain state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GainTable {
    pub channels: Vec<GainCalibration>,
    /// Gains were measured (flasher/laser run) rather than defaulted.
    #[serde(default)]
    pub gains_loaded: bool,
    /// Time offsets were measured rather than defaulted.
    #[serde(default)]
    pub time_offsets_loaded: bool,
}

impl GainTable {
    pub fn uniform(channels: usize, calibration: GainCalibration) -> Self {
        Self {
            channels: vec![calibration; channels],
            gains_loaded: true,
            time_offsets_loaded: true,
        }
    }
}

/// Calibration of one telescope, constant for a run or for one pedestal time slice.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CalibrationSet {
    pub high_gain: GainTable,
    pub low_gain: GainTable,
    /// Channel switched on in the external pixel status list. Empty means all on.
    #[serde(default)]
    pub pixel_enabled: Vec<bool>,
    /// Pedestals are provided per time slice and dead channels must be re-evaluated.
    #[serde(default)]
    pub time_sliced: bool,
    #[serde(default)]
    pub dead_thresholds: DeadChannelThresholds,
    /// Separate thresholds for low gain, otherwise the high-gain ones apply.
    #[serde(default)]
    pub low_gain_dead_thresholds: Option<DeadChannelThresholds>,
}

impl CalibrationSet {
    pub fn uniform(channels: usize, high_gain: GainCalibration, low_gain: GainCalibration) -> Self {
        Self {
            high_gain: GainTable::uniform(channels, high_gain),
            low_gain: GainTable::uniform(channels, low_gain),
            ..Default::default()
        }
    }

    pub fn table(&self, gain: GainState) -> &GainTable {
        match gain {
            GainState::High => &self.high_gain,
            GainState::Low => &self.low_gain,
        }
    }

    pub fn thresholds(&self, gain: GainState) -> &DeadChannelThresholds {
        match gain {
            GainState::High => &self.dead_thresholds,
            GainState::Low => self
                .low_gain_dead_thresholds
                .as_ref()
                .unwrap_or(&self.dead_thresholds),
        }
    }

    pub fn channel(
        &self,
        channel: ChannelId,
        gain: GainState,
    ) -> Result<&GainCalibration, ChannelError> {
        self.table(gain)
            .channels
            .get(channel)
            .ok_or(ChannelError::MissingCalibration { channel, gain })
    }

    pub fn pixel_enabled(&self, channel: ChannelId) -> bool {
        self.pixel_enabled.get(channel).copied().unwrap_or(true)
    }

    pub fn validate(&self, channels: usize) -> Result<(), ConfigurationError> {
        for gain in GainState::ALL {
            let found = self.table(gain).channels.len();
            if found != channels {
                return Err(ConfigurationError::CalibrationSize {
                    gain,
                    expected: channels,
                    found,
                });
            }
        }
        if !self.pixel_enabled.is_empty() && self.pixel_enabled.len() != channels {
            return Err(ConfigurationError::PixelStatusSize {
                expected: channels,
                found: self.pixel_enabled.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_gain_thresholds_fall_back_to_high_gain() {
        let mut calibration = CalibrationSet::uniform(4, Default::default(), Default::default());
        calibration.dead_thresholds.pedestal_max = 99.0;
        assert_eq!(calibration.thresholds(GainState::Low).pedestal_max, 99.0);

        let low = DeadChannelThresholds {
            pedestal_max: 10.0,
            ..Default::default()
        };
        calibration.low_gain_dead_thresholds = Some(low);
        assert_eq!(calibration.thresholds(GainState::Low).pedestal_max, 10.0);
        assert_eq!(calibration.thresholds(GainState::High).pedestal_max, 99.0);
    }

    #[test]
    fn thresholds_read_with_calibration() {
        let calibration: CalibrationSet = serde_json::from_str(
            r#"{
                "high-gain": { "channels": [{}, {}] },
                "low-gain": { "channels": [{}, {}] },
                "dead-thresholds": { "pedestal-max": 99.0 },
                "low-gain-dead-thresholds": { "gain-min": 0.05 }
            }"#,
        )
        .unwrap();
        assert_eq!(calibration.thresholds(GainState::High).pedestal_max, 99.0);
        assert_eq!(calibration.thresholds(GainState::High).gain_min, 0.2);
        assert_eq!(calibration.thresholds(GainState::Low).gain_min, 0.05);
        assert_eq!(calibration.thresholds(GainState::Low).pedestal_max, 250.0);

        let calibration: CalibrationSet = serde_json::from_str(
            r#"{ "high-gain": { "channels": [] }, "low-gain": { "channels": [] } }"#,
        )
        .unwrap();
        assert_eq!(calibration.dead_thresholds, DeadChannelThresholds::default());
        assert!(calibration.low_gain_dead_thresholds.is_none());
    }

    #[test]
    fn missing_channel_is_an_error() {
        let calibration = CalibrationSet::uniform(4, Default::default(), Default::default());
        assert!(calibration.channel(3, GainState::Low).is_ok());
        assert_eq!(
            calibration.channel(4, GainState::Low),
            Err(ChannelError::MissingCalibration {
                channel: 4,
                gain: GainState::Low
            })
        );
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut calibration = CalibrationSet::uniform(4, Default::default(), Default::default());
        assert!(calibration.validate(4).is_ok());
        calibration.low_gain.channels.pop();
        assert_eq!(
            calibration.validate(4),
            Err(ConfigurationError::CalibrationSize {
                gain: GainState::Low,
                expected: 4,
                found: 3
            })
        );
    }
}
