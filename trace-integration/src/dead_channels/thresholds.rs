use super::DeadReason;
use crate::{Real, calibration::GainTable};
use clap::Args;
use serde::Deserialize;

/// Limits outside of which a channel is classified dead.
#[derive(Debug, Clone, PartialEq, Args, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeadChannelThresholds {
    /// Lowest accepted pedestal (digitiser counts per sample).
    #[clap(long, default_value = "1")]
    pub pedestal_min: Real,

    #[clap(long, default_value = "250")]
    pub pedestal_max: Real,

    /// Lowest accepted pedestal variation.
    #[clap(long, default_value = "0.3")]
    pub pedvar_min: Real,

    #[clap(long, default_value = "50")]
    pub pedvar_max: Real,

    /// Pedestal variations more than this many camera RMS below the camera mean are dead.
    #[clap(long, default_value = "3")]
    pub pedvar_relative_min: Real,

    /// Pedestal variations more than this many camera RMS above the camera mean are dead.
    #[clap(long, default_value = "5")]
    pub pedvar_relative_max: Real,

    #[clap(long, default_value = "0.2")]
    pub gain_min: Real,

    #[clap(long, default_value = "5")]
    pub gain_max: Real,

    #[clap(long, default_value = "0")]
    pub gain_rms_min: Real,

    #[clap(long, default_value = "2")]
    pub gain_rms_max: Real,

    /// Largest accepted relative deviation of the gain from its nominal value.
    #[clap(long, default_value = "0.5")]
    pub gain_max_deviation: Real,

    /// Largest accepted absolute time offset, in samples.
    #[clap(long, default_value = "20")]
    pub time_offset_max: Real,

    /// Accepted range of L1 trigger rates (Hz).
    #[clap(long, default_value = "1")]
    pub l1_rate_min: Real,

    #[clap(long, default_value = "1e7")]
    pub l1_rate_max: Real,

    /// Accepted range of the high voltage RMS (V).
    #[clap(long, default_value = "0")]
    pub hv_rms_min: Real,

    #[clap(long, default_value = "5")]
    pub hv_rms_max: Real,

    /// Number of channels to disable at random in simulated runs.
    #[clap(long, default_value = "0")]
    pub random_dead_channels: usize,

    #[clap(long, default_value = "0")]
    pub random_seed: u64,

    /// Ignore channels flagged dead in the simulation configuration.
    #[clap(long)]
    pub ignore_simulated_dead: bool,

    /// Warn when more channels than this are dead on one telescope.
    #[clap(long, default_value = "30")]
    pub dead_warning_level: usize,
}

impl Default for DeadChannelThresholds {
    fn default() -> Self {
        Self {
            pedestal_min: 1.0,
            pedestal_max: 250.0,
            pedvar_min: 0.3,
            pedvar_max: 50.0,
            pedvar_relative_min: 3.0,
            pedvar_relative_max: 5.0,
            gain_min: 0.2,
            gain_max: 5.0,
            gain_rms_min: 0.0,
            gain_rms_max: 2.0,
            gain_max_deviation: 0.5,
            time_offset_max: 20.0,
            l1_rate_min: 1.0,
            l1_rate_max: 1.0e7,
            hv_rms_min: 0.0,
            hv_rms_max: 5.0,
            random_dead_channels: 0,
            random_seed: 0,
            ignore_simulated_dead: false,
            dead_warning_level: 30,
        }
    }
}

fn outside(value: Real, min: Real, max: Real) -> bool {
    value < min || value > max
}

/// Mean and RMS of the pedestal variations of a camera.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraPedvarStats {
    pub mean: Real,
    pub rms: Real,
}

impl CameraPedvarStats {
    /// Channels without a measured variation are left out.
    pub fn from_table(table: &GainTable) -> Self {
        let (n, sum, sum2) = table
            .channels
            .iter()
            .map(|channel| channel.pedestal_rms)
            .filter(|pedvar| *pedvar > 0.0)
            .fold((0usize, 0.0, 0.0), |(n, sum, sum2), pedvar| {
                (n + 1, sum + pedvar, sum2 + pedvar * pedvar)
            });
        if n == 0 {
            return Self::default();
        }
        let mean = sum / n as Real;
        let variance = (sum2 / n as Real - mean * mean).max(0.0);
        Self {
            mean,
            rms: variance.sqrt(),
        }
    }
}

impl DeadChannelThresholds {
    pub fn test_pedestal(&self, pedestal: Real) -> Option<DeadReason> {
        outside(pedestal, self.pedestal_min, self.pedestal_max)
            .then_some(DeadReason::PedestalRange)
    }

    pub fn test_pedvar(&self, pedvar: Real) -> Option<DeadReason> {
        outside(pedvar, self.pedvar_min, self.pedvar_max)
            .then_some(DeadReason::PedestalVarianceRange)
    }

    pub fn test_pedvar_relative(&self, pedvar: Real, camera: &CameraPedvarStats) -> Option<DeadReason> {
        if pedvar < camera.mean - self.pedvar_relative_min * camera.rms {
            Some(DeadReason::PedestalVarianceSmall)
        } else if pedvar > camera.mean + self.pedvar_relative_max * camera.rms {
            Some(DeadReason::PedestalVarianceLarge)
        } else {
            None
        }
    }

    pub fn test_gain(&self, gain: Real) -> Option<DeadReason> {
        outside(gain, self.gain_min, self.gain_max).then_some(DeadReason::GainRange)
    }

    pub fn test_gain_rms(&self, gain_rms: Real) -> Option<DeadReason> {
        outside(gain_rms, self.gain_rms_min, self.gain_rms_max).then_some(DeadReason::GainVariance)
    }

    pub fn test_gain_deviation(&self, gain: Real, nominal_gain: Real) -> Option<DeadReason> {
        if nominal_gain <= 0.0 {
            return None;
        }
        ((gain - nominal_gain).abs() / nominal_gain > self.gain_max_deviation)
            .then_some(DeadReason::GainDeviation)
    }

    pub fn test_time_offset(&self, time_offset: Real) -> Option<DeadReason> {
        (time_offset.abs() > self.time_offset_max).then_some(DeadReason::TimeOffset)
    }

    pub fn test_l1_rate(&self, rate: Real) -> Option<DeadReason> {
        outside(rate, self.l1_rate_min, self.l1_rate_max).then_some(DeadReason::L1Rate)
    }

    pub fn test_hv_rms(&self, hv_rms: Real) -> Option<DeadReason> {
        outside(hv_rms, self.hv_rms_min, self.hv_rms_max).then_some(DeadReason::HighVoltage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::GainCalibration;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn large_relative_pedvar_within_absolute_range() {
        let thresholds = DeadChannelThresholds::default();
        let camera = CameraPedvarStats { mean: 3.0, rms: 1.0 };

        assert_eq!(thresholds.test_pedvar(15.0), None);
        assert_eq!(
            thresholds.test_pedvar_relative(15.0, &camera),
            Some(DeadReason::PedestalVarianceLarge)
        );
        assert_eq!(thresholds.test_pedvar_relative(3.5, &camera), None);
    }

    #[test]
    fn small_relative_pedvar() {
        let thresholds = DeadChannelThresholds::default();
        let camera = CameraPedvarStats { mean: 6.0, rms: 1.0 };
        assert_eq!(
            thresholds.test_pedvar_relative(2.5, &camera),
            Some(DeadReason::PedestalVarianceSmall)
        );
    }

    #[test]
    fn absolute_bounds() {
        let thresholds = DeadChannelThresholds::default();
        assert_eq!(thresholds.test_pedestal(0.5), Some(DeadReason::PedestalRange));
        assert_eq!(thresholds.test_pedestal(16.0), None);
        assert_eq!(thresholds.test_pedvar(0.1), Some(DeadReason::PedestalVarianceRange));
        assert_eq!(thresholds.test_gain(6.0), Some(DeadReason::GainRange));
        assert_eq!(thresholds.test_gain_rms(2.5), Some(DeadReason::GainVariance));
        assert_eq!(thresholds.test_gain_deviation(1.6, 1.0), Some(DeadReason::GainDeviation));
        assert_eq!(thresholds.test_gain_deviation(1.4, 1.0), None);
        assert_eq!(thresholds.test_time_offset(-25.0), Some(DeadReason::TimeOffset));
        assert_eq!(thresholds.test_l1_rate(0.0), Some(DeadReason::L1Rate));
        assert_eq!(thresholds.test_hv_rms(6.0), Some(DeadReason::HighVoltage));
    }

    #[test]
    fn camera_stats_skip_unmeasured_channels() {
        let table = GainTable {
            channels: [0.0, 2.0, 4.0, 0.0]
                .into_iter()
                .map(|pedestal_rms| GainCalibration {
                    pedestal_rms,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let stats = CameraPedvarStats::from_table(&table);
        assert_approx_eq!(stats.mean, 3.0);
        assert_approx_eq!(stats.rms, 1.0);
    }
}
