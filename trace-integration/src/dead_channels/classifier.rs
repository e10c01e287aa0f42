use super::{CameraPedvarStats, DeadReason, DeadStatus, ExternalStatus};
use crate::{
    calibration::{CalibrationSet, GainState},
    error::ConfigurationError,
};
use fadc_common::{
    ChannelId, TelescopeId,
    metrics::{gains, metric_names::DEAD_CHANNELS},
    telescope_number,
};
use metrics::gauge;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info, warn};

/// Bound on the number of draws when disabling random channels.
const MAX_RANDOM_DRAWS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationStage {
    /// Full classification before the first event.
    RunStart,
    /// Boundary of a pedestal time slice.
    TimeSlice,
}

#[derive(Debug, Clone)]
pub struct DeadChannelClassifier {
    telescope: TelescopeId,
    channels: usize,
    status: [Vec<DeadStatus>; 2],
}

impl DeadChannelClassifier {
    pub fn new(telescope: TelescopeId, channels: usize) -> Self {
        Self {
            telescope,
            channels,
            status: [
                vec![DeadStatus::ALIVE; channels],
                vec![DeadStatus::ALIVE; channels],
            ],
        }
    }

    pub fn status(&self, channel: ChannelId, gain: GainState) -> DeadStatus {
        self.status[gain.index()]
            .get(channel)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_dead(&self, channel: ChannelId, gain: GainState) -> bool {
        self.status(channel, gain).is_dead()
    }

    pub fn n_dead(&self, gain: GainState) -> usize {
        self.status[gain.index()]
            .iter()
            .filter(|status| status.is_dead())
            .count()
    }

    /// `(high gain, low gain)` status codes of every channel.
    pub fn table(&self) -> Vec<(u32, u32)> {
        let [high, low] = &self.status;
        high.iter()
            .zip(low)
            .map(|(high, low)| (high.code(), low.code()))
            .collect()
    }

    /// Takes over packed status codes recorded by an earlier analysis. Channels
    /// without a code are alive.
    pub fn load_packed(
        &mut self,
        gain: GainState,
        codes: &[u32],
        warning_level: usize,
    ) -> Result<usize, ConfigurationError> {
        let statuses = &mut self.status[gain.index()];
        statuses.fill(DeadStatus::ALIVE);
        for (status, code) in statuses.iter_mut().zip(codes) {
            *status = DeadStatus::from_packed(*code);
        }
        self.summarise(gain, warning_level)
    }

    /// Classifies every channel for `gain`. Returns the number of dead channels.
    #[tracing::instrument(skip_all, fields(telescope = telescope_number(self.telescope), %gain, ?stage))]
    pub fn classify(
        &mut self,
        gain: GainState,
        stage: ClassificationStage,
        calibration: &CalibrationSet,
        external: ExternalStatus,
        crate_references: &[ChannelId],
    ) -> Result<usize, ConfigurationError> {
        if stage == ClassificationStage::TimeSlice && !calibration.time_sliced {
            return Ok(self.n_dead(gain));
        }

        let thresholds = calibration.thresholds(gain);
        let table = calibration.table(gain);
        let camera = CameraPedvarStats::from_table(table);
        let is_reference = |channel: ChannelId| crate_references.contains(&channel);
        let statuses = &mut self.status[gain.index()];

        match stage {
            ClassificationStage::RunStart => statuses.fill(DeadStatus::ALIVE),
            ClassificationStage::TimeSlice => statuses
                .iter_mut()
                .for_each(DeadStatus::clear_pedestal_reasons),
        }

        for (channel, (status, constants)) in statuses.iter_mut().zip(&table.channels).enumerate() {
            if is_reference(channel) {
                *status = DeadReason::CrateReference.into();
                continue;
            }

            [
                thresholds.test_pedestal(constants.pedestal),
                thresholds.test_pedvar(constants.pedestal_rms),
                thresholds.test_pedvar_relative(constants.pedestal_rms, &camera),
            ]
            .into_iter()
            .flatten()
            .for_each(|reason| status.set(reason));

            if stage == ClassificationStage::TimeSlice {
                continue;
            }

            if table.gains_loaded {
                [
                    thresholds.test_gain(constants.gain),
                    thresholds.test_gain_rms(constants.gain_rms),
                    thresholds.test_gain_deviation(constants.gain, constants.nominal_gain),
                ]
                .into_iter()
                .flatten()
                .for_each(|reason| status.set(reason));
            }
            if table.time_offsets_loaded {
                if let Some(reason) = thresholds.test_time_offset(constants.time_offset) {
                    status.set(reason);
                }
            }
            if !calibration.pixel_enabled(channel) {
                status.set(DeadReason::PixelStatus);
            }
        }

        if stage == ClassificationStage::RunStart {
            let mut mark = |channels: &[ChannelId], reason: DeadReason| {
                for &channel in channels {
                    if is_reference(channel) {
                        continue;
                    }
                    if let Some(status) = statuses.get_mut(channel) {
                        status.set(reason);
                    }
                }
            };

            if let Some(simulation) = external.simulation {
                mark(&simulation.missing, DeadReason::SimulationTruth);
                if !thresholds.ignore_simulated_dead {
                    mark(&simulation.disabled, DeadReason::SimulationTruth);
                }
            }

            if let Some(slow_control) = external.slow_control {
                let half = self.channels / 2;
                for (list, reason) in [
                    (slow_control.l1_rate_dead(thresholds), DeadReason::L1Rate),
                    (slow_control.hv_dead(thresholds), DeadReason::HighVoltage),
                ] {
                    if list.len() < half {
                        mark(&list, reason);
                    } else {
                        warn!(
                            %reason,
                            channels = list.len(),
                            "Ignoring slow control dead channel list covering half the camera"
                        );
                    }
                }
            }

            if external.simulation.is_some() && thresholds.random_dead_channels > 0 {
                self.set_random_dead(gain, thresholds.random_dead_channels, thresholds.random_seed);
            }
        }

        self.summarise(gain, thresholds.dead_warning_level)
    }

    fn set_random_dead(&mut self, gain: GainState, count: usize, seed: u64) {
        if self.channels == 0 {
            return;
        }
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(gain.index() as u64));
        let statuses = &mut self.status[gain.index()];
        let mut disabled = 0;
        for _ in 0..MAX_RANDOM_DRAWS {
            if disabled == count {
                break;
            }
            let channel = rng.random_range(0..self.channels);
            if let Some(status) = statuses.get_mut(channel).filter(|status| !status.is_dead()) {
                status.set(DeadReason::Random);
                disabled += 1;
            }
        }
        if disabled < count {
            warn!(disabled, requested = count, "Too many draws setting random dead channels");
        }
        info!(disabled, seed, "Set random dead channels");
    }

    fn summarise(&self, gain: GainState, warning_level: usize) -> Result<usize, ConfigurationError> {
        let n_dead = self.n_dead(gain);
        for (channel, status) in self.status[gain.index()].iter().enumerate() {
            if status.is_dead() {
                debug!(channel, code = status.code(), "Dead channel: {status}");
            }
        }
        gauge!(DEAD_CHANNELS, &[gains::get_label(gain.is_low())]).set(n_dead as f64);

        let telescope = telescope_number(self.telescope);
        if n_dead > warning_level {
            warn!("Number of dead {gain} channels on telescope {telescope} exceeds {warning_level}: {n_dead}");
        } else {
            info!("Number of dead {gain} channels on telescope {telescope}: {n_dead}");
        }

        if n_dead == self.channels {
            return Err(ConfigurationError::AllChannelsDead {
                telescope,
                gain,
                channels: self.channels,
            });
        }
        Ok(n_dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        calibration::GainCalibration,
        dead_channels::{SimulationTruth, SlowControlReadings},
    };

    const CHANNELS: usize = 100;

    fn calibration() -> CalibrationSet {
        let mut calibration =
            CalibrationSet::uniform(CHANNELS, Default::default(), Default::default());
        // camera pedvars of 2, 3 and 4
        for (channel, constants) in calibration.high_gain.channels.iter_mut().enumerate() {
            constants.pedestal_rms = 2.0 + (channel % 3) as f64;
        }
        calibration
    }

    fn classify(
        classifier: &mut DeadChannelClassifier,
        calibration: &CalibrationSet,
        stage: ClassificationStage,
    ) -> Result<usize, ConfigurationError> {
        classifier.classify(
            GainState::High,
            stage,
            calibration,
            ExternalStatus::default(),
            &[],
        )
    }

    #[test]
    fn noisy_channel_is_flagged_relative_to_camera() {
        let mut calibration = calibration();
        calibration.high_gain.channels[7].pedestal_rms = 15.0;
        let mut classifier = DeadChannelClassifier::new(0, CHANNELS);

        assert_eq!(classify(&mut classifier, &calibration, ClassificationStage::RunStart), Ok(1));
        let status = classifier.status(7, GainState::High);
        assert!(status.contains(DeadReason::PedestalVarianceLarge));
        assert!(!status.contains(DeadReason::PedestalVarianceRange));
        assert!(!classifier.is_dead(7, GainState::Low));
    }

    #[test]
    fn classification_is_idempotent() {
        let mut calibration = calibration();
        calibration.high_gain.channels[3].gain = 9.0;
        calibration.high_gain.channels[5].pedestal = 0.0;
        calibration.pixel_enabled = (0..CHANNELS).map(|channel| channel != 11).collect();
        let mut classifier = DeadChannelClassifier::new(0, CHANNELS);

        classify(&mut classifier, &calibration, ClassificationStage::RunStart).unwrap();
        let first = classifier.table();
        classify(&mut classifier, &calibration, ClassificationStage::RunStart).unwrap();
        assert_eq!(classifier.table(), first);
        assert_eq!(classifier.n_dead(GainState::High), 3);
    }

    #[test]
    fn all_dead_is_fatal() {
        let mut calibration = calibration();
        calibration.pixel_enabled = vec![false; CHANNELS];
        let mut classifier = DeadChannelClassifier::new(2, CHANNELS);

        assert_eq!(
            classify(&mut classifier, &calibration, ClassificationStage::RunStart),
            Err(ConfigurationError::AllChannelsDead {
                telescope: 3,
                gain: GainState::High,
                channels: CHANNELS
            })
        );
    }

    #[test]
    fn time_slice_retests_only_pedestal_reasons() {
        let mut calibration = calibration();
        calibration.time_sliced = true;
        calibration.high_gain.channels[1].pedestal = 300.0;
        calibration.high_gain.channels[2].gain = 9.0;
        let mut classifier = DeadChannelClassifier::new(0, CHANNELS);
        classify(&mut classifier, &calibration, ClassificationStage::RunStart).unwrap();

        // the pedestal recovers, the gain test is not repeated
        calibration.high_gain.channels[1].pedestal = 20.0;
        calibration.high_gain.channels[2].gain = 1.0;
        calibration.high_gain.channels[4].pedestal = 0.5;
        assert_eq!(classify(&mut classifier, &calibration, ClassificationStage::TimeSlice), Ok(2));

        assert!(!classifier.is_dead(1, GainState::High));
        assert!(classifier.status(2, GainState::High).contains(DeadReason::GainRange));
        assert!(classifier.status(4, GainState::High).contains(DeadReason::PedestalRange));
    }

    #[test]
    fn time_slice_without_sliced_pedestals_changes_nothing() {
        let mut calibration = calibration();
        let mut classifier = DeadChannelClassifier::new(0, CHANNELS);
        classify(&mut classifier, &calibration, ClassificationStage::RunStart).unwrap();

        calibration.high_gain.channels[4].pedestal = 0.5;
        assert_eq!(classify(&mut classifier, &calibration, ClassificationStage::TimeSlice), Ok(0));
    }

    #[test]
    fn gain_tests_need_loaded_gains() {
        let mut calibration = calibration();
        calibration.high_gain.channels[3].gain = 9.0;
        calibration.high_gain.channels[4].time_offset = 40.0;
        calibration.high_gain.gains_loaded = false;
        calibration.high_gain.time_offsets_loaded = false;
        let mut classifier = DeadChannelClassifier::new(0, CHANNELS);

        assert_eq!(classify(&mut classifier, &calibration, ClassificationStage::RunStart), Ok(0));

        calibration.high_gain.time_offsets_loaded = true;
        classify(&mut classifier, &calibration, ClassificationStage::RunStart).unwrap();
        assert_eq!(
            classifier.status(4, GainState::High),
            DeadStatus::from(DeadReason::TimeOffset)
        );
    }

    #[test]
    fn crate_references_carry_only_their_reason() {
        let mut calibration = calibration();
        calibration.high_gain.channels[0] = GainCalibration {
            pedestal: 0.0,
            ..Default::default()
        };
        let simulation = SimulationTruth {
            missing: vec![0, 6],
            disabled: vec![],
        };
        let mut classifier = DeadChannelClassifier::new(0, CHANNELS);
        let external = ExternalStatus {
            simulation: Some(&simulation),
            slow_control: None,
        };

        classifier
            .classify(GainState::High, ClassificationStage::RunStart, &calibration, external, &[0])
            .unwrap();
        assert_eq!(
            classifier.status(0, GainState::High),
            DeadStatus::from(DeadReason::CrateReference)
        );
        assert_eq!(
            classifier.status(6, GainState::High),
            DeadStatus::from(DeadReason::SimulationTruth)
        );
    }

    #[test]
    fn slow_control_lists_below_half_the_camera() {
        let calibration = calibration();
        let mut l1_rates = vec![100.0; CHANNELS];
        l1_rates[3] = 0.0;
        l1_rates[8] = 0.0;
        let slow_control = SlowControlReadings {
            l1_rates,
            hv_rms: vec![9.0; CHANNELS],
        };
        let external = ExternalStatus {
            simulation: None,
            slow_control: Some(&slow_control),
        };
        let mut classifier = DeadChannelClassifier::new(0, CHANNELS);

        let n_dead = classifier
            .classify(GainState::High, ClassificationStage::RunStart, &calibration, external, &[])
            .unwrap();
        assert_eq!(n_dead, 2);
        assert!(classifier.status(3, GainState::High).contains(DeadReason::L1Rate));
        assert!(classifier.status(8, GainState::High).contains(DeadReason::L1Rate));
        assert!(
            (0..CHANNELS).all(|channel| !classifier
                .status(channel, GainState::High)
                .contains(DeadReason::HighVoltage))
        );
    }

    #[test]
    fn random_dead_channels_are_reproducible() {
        let mut calibration = calibration();
        calibration.dead_thresholds.random_dead_channels = 4;
        calibration.dead_thresholds.random_seed = 42;
        let simulation = SimulationTruth::default();
        let external = ExternalStatus {
            simulation: Some(&simulation),
            slow_control: None,
        };

        let mut tables = Vec::new();
        for _ in 0..2 {
            let mut classifier = DeadChannelClassifier::new(0, CHANNELS);
            let n_dead = classifier
                .classify(GainState::High, ClassificationStage::RunStart, &calibration, external, &[])
                .unwrap();
            assert_eq!(n_dead, 4);
            tables.push(classifier.table());
        }
        assert_eq!(tables[0], tables[1]);

        // no random channels outside simulations
        let mut classifier = DeadChannelClassifier::new(0, CHANNELS);
        assert_eq!(classify(&mut classifier, &calibration, ClassificationStage::RunStart), Ok(0));
    }

    #[test]
    fn packed_codes_are_loaded() {
        let mut classifier = DeadChannelClassifier::new(0, 4);
        let n_dead = classifier
            .load_packed(GainState::Low, &[0, 1 << 11, 0, (1 << 1) | (1 << 8)], 30)
            .unwrap();
        assert_eq!(n_dead, 2);
        assert_eq!(classifier.table()[3], (0, (1 << 1) | (1 << 8)));
        assert!(
            classifier
                .load_packed(GainState::Low, &[1 << 9; 4], 30)
                .is_err()
        );
    }
}
