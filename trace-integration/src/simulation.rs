//! Simulated runs described by a JSON file, used by the binary to drive the engine.

use crate::{
    Real,
    calibration::{CalibrationSet, GainState},
    crate_jitter::CrateLayout,
    dead_channels::{RecordedDeadChannels, SimulationTruth, SlowControlReadings},
    engine::RunSetup,
    event::ImageFit,
    low_gain::LowGainCorrector,
    parameters::IntegrationParameters,
    source::RecordedEvent,
    telescope::Telescope,
};
use fadc_common::{ChannelId, EventNumber, Sample};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use std::{fs::File, io::BufReader, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunDescriptionError {
    #[error("Cannot open run description: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid run description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid Normal Distribution: {0}")]
    NormalDistribution(#[from] rand_distr::NormalError),
    #[error("Invalid Uniform Distribution: [{min}, {max})")]
    UniformDistribution { min: Real, max: Real },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "random-type")]
pub enum FloatRandomDistribution {
    Constant { value: Real },
    Uniform { min: Real, max: Real },
    Normal { mean: Real, sd: Real },
}

impl FloatRandomDistribution {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<Real, RunDescriptionError> {
        match *self {
            FloatRandomDistribution::Constant { value } => Ok(value),
            FloatRandomDistribution::Uniform { min, max } => {
                if min < max {
                    Ok(rng.random_range(min..max))
                } else {
                    Err(RunDescriptionError::UniformDistribution { min, max })
                }
            }
            FloatRandomDistribution::Normal { mean, sd } => Ok(Normal::new(mean, sd)?.sample(rng)),
        }
    }
}

/// Pulses and noise of the simulated events.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventTemplate {
    /// Pulse height above pedestal, in high-gain digitiser counts.
    pub amplitude: FloatRandomDistribution,
    /// Arrival time of the pulse maximum before the channel time offset.
    pub arrival_time: FloatRandomDistribution,
    /// Width of the Gaussian pulses, in samples.
    pub pulse_width: Real,
    #[serde(default)]
    pub noise_sd: Real,
    /// Probability of a channel being read out.
    #[serde(default = "EventTemplate::default_occupancy")]
    pub occupancy: Real,
    /// Pulses higher than this are recorded in low gain.
    #[serde(default)]
    pub low_gain_threshold: Option<Real>,
    /// Pulse height of the crate reference channels.
    #[serde(default = "EventTemplate::default_reference_amplitude")]
    pub reference_amplitude: Real,
    /// Arrival time of the pulses of the crate reference channels.
    #[serde(default)]
    pub reference_time: Option<FloatRandomDistribution>,
}

impl EventTemplate {
    fn default_occupancy() -> Real {
        1.0
    }

    fn default_reference_amplitude() -> Real {
        200.0
    }
}

/// Calibration taking over from a given event onwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimeSlice {
    pub first_event: EventNumber,
    pub calibration: CalibrationSet,
}

/// A telescope, its calibration and the events to simulate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunDescription {
    pub telescope: Telescope,
    pub calibration: CalibrationSet,
    #[serde(default)]
    pub crate_layout: CrateLayout,
    #[serde(default)]
    pub low_gain_multipliers: LowGainCorrector,
    #[serde(default)]
    pub simulation: Option<SimulationTruth>,
    #[serde(default)]
    pub slow_control: Option<SlowControlReadings>,
    /// Dead channel codes of an earlier analysis, replacing the classification.
    #[serde(default)]
    pub recorded_dead_channels: Option<RecordedDeadChannels>,
    pub events: EventTemplate,
    /// Pedestal time slices, ordered by first event.
    #[serde(default)]
    pub time_slices: Vec<TimeSlice>,
    /// Image fit handed to the second pass of every event.
    #[serde(default)]
    pub image_fit: Option<ImageFit>,
}

impl RunDescription {
    pub fn load(path: &Path) -> Result<Self, RunDescriptionError> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    pub fn run_setup(&self, parameters: IntegrationParameters) -> RunSetup {
        RunSetup {
            telescope: self.telescope.clone(),
            parameters,
            calibration: self.calibration.clone(),
            crate_layout: self.crate_layout.clone(),
            low_gain: self.low_gain_multipliers.clone(),
            simulation: self.simulation.clone(),
            slow_control: self.slow_control.clone(),
            recorded_dead: self.recorded_dead_channels.clone(),
        }
    }
}

/// Generates the events of a [`RunDescription`].
pub struct EventSimulator<'a> {
    description: &'a RunDescription,
    low_gain_multiplier: Real,
    max_code: Sample,
    rng: StdRng,
}

impl<'a> EventSimulator<'a> {
    pub fn new(description: &'a RunDescription, parameters: &IntegrationParameters, seed: u64) -> Self {
        Self {
            description,
            low_gain_multiplier: parameters.low_gain_multiplier,
            max_code: parameters.max_sample_code,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn trace(
        &mut self,
        pedestal: Real,
        amplitude: Real,
        arrival_time: Real,
    ) -> Result<Vec<Sample>, RunDescriptionError> {
        let description = self.description;
        let template = &description.events;
        let noise = Normal::new(0.0, template.noise_sd)?;
        let max_code = Real::from(self.max_code);
        Ok((0..description.telescope.samples)
            .map(|sample| {
                let x = (sample as Real - arrival_time) / template.pulse_width;
                let value = pedestal
                    + amplitude * Real::exp(-0.5 * x * x)
                    + noise.sample(&mut self.rng);
                value.round().clamp(0.0, max_code) as Sample
            })
            .collect())
    }

    fn is_missing(&self, channel: ChannelId) -> bool {
        self.description
            .simulation
            .as_ref()
            .is_some_and(|simulation| simulation.missing.contains(&channel))
    }

    pub fn event(&mut self, event_number: EventNumber) -> Result<RecordedEvent, RunDescriptionError> {
        let description = self.description;
        let template = &description.events;
        let mut event = RecordedEvent::new(event_number);
        let arrival_time = template.arrival_time.sample(&mut self.rng)?;

        for channel in 0..description.telescope.channels {
            if description.crate_layout.reference_channels.contains(&channel)
                || self.is_missing(channel)
                || self.rng.random::<Real>() >= template.occupancy
            {
                continue;
            }
            let amplitude = template.amplitude.sample(&mut self.rng)?;
            let low_gain = template
                .low_gain_threshold
                .is_some_and(|threshold| amplitude > threshold);
            let gain = GainState::from_low_gain(low_gain);
            let constants = description.calibration.table(gain).channels.get(channel);
            let pedestal = constants.map_or(0.0, |constants| constants.pedestal);
            let time_offset = description
                .calibration
                .high_gain
                .channels
                .get(channel)
                .map_or(0.0, |constants| constants.time_offset);
            let amplitude = if low_gain {
                amplitude / self.low_gain_multiplier
            } else {
                amplitude
            };

            event = event.with_trace(channel, self.trace(pedestal, amplitude, arrival_time + time_offset)?);
            if low_gain {
                event = event.with_low_gain(channel);
            }
        }

        let reference_time = template
            .reference_time
            .as_ref()
            .unwrap_or(&template.arrival_time);
        let reference_pedestal = description
            .calibration
            .high_gain
            .channels
            .first()
            .map_or(0.0, |constants| constants.pedestal);
        for &reference in &description.crate_layout.reference_channels {
            let time = reference_time.sample(&mut self.rng)?;
            let pedestal = description
                .calibration
                .high_gain
                .channels
                .get(reference)
                .map_or(reference_pedestal, |constants| constants.pedestal);
            event = event.with_trace(reference, self.trace(pedestal, template.reference_amplitude, time)?);
        }
        Ok(event)
    }
}
