//! Correction of the trigger time jitter between digitiser crates.
//!
//! Every crate digitises one reference channel carrying a large trigger pulse.
//! The difference between the arrival time of the first crate's reference
//! pulse and that of another crate is added to the timing of all channels of
//! that crate.

use crate::{
    Real,
    calibration::{CalibrationSet, GainState},
    context::EngineContext,
    error::ConfigurationError,
    event::EventOutputs,
    source::WaveformSource,
    trace_handler::{TimingLevels, TraceHandler},
};
use fadc_common::{ChannelId, Sample, metrics::metric_names::CRATE_JITTER_WARNINGS};
use metrics::counter;
use serde::Deserialize;
use std::ops::Range;
use tracing::{trace, warn};

/// Assignment of channels to crates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrateLayout {
    /// Reference channel of each crate. A reference channel may lie outside the camera.
    pub reference_channels: Vec<ChannelId>,
    /// First channel of every crate after the first.
    pub boundaries: Vec<ChannelId>,
}

impl CrateLayout {
    pub fn crates(&self) -> usize {
        self.reference_channels.len()
    }

    pub fn crate_range(&self, index: usize, channels: usize) -> Range<ChannelId> {
        let start = match index {
            0 => 0,
            _ => self.boundaries.get(index - 1).copied().unwrap_or(channels),
        };
        let stop = self.boundaries.get(index).copied().unwrap_or(channels);
        start.min(channels)..stop.min(channels)
    }

    /// Reference channels inside the camera.
    pub fn camera_references(&self, channels: usize) -> Vec<ChannelId> {
        self.reference_channels
            .iter()
            .copied()
            .filter(|&channel| channel < channels)
            .collect()
    }

    pub fn validate(&self, channels: usize) -> Result<(), ConfigurationError> {
        if self.reference_channels.is_empty() && self.boundaries.is_empty() {
            return Ok(());
        }
        if self.reference_channels.len() != self.boundaries.len() + 1 {
            return Err(ConfigurationError::CrateReferenceCount {
                crates: self.boundaries.len() + 1,
                references: self.reference_channels.len(),
            });
        }
        let mut previous = 0;
        for &boundary in &self.boundaries {
            if boundary <= previous || boundary > channels {
                return Err(ConfigurationError::CrateBoundary { boundary, channels });
            }
            previous = boundary;
        }
        Ok(())
    }
}

/// Reference measurements and offsets of one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrateJitter {
    /// T0 of each reference channel, 0 when not measured.
    pub reference_times: Vec<Real>,
    /// Full-trace sum of each reference channel.
    pub reference_sums: Vec<Real>,
    /// Offset added to the timing of each crate.
    pub offsets: Vec<Real>,
}

/// Offsets of each crate relative to the first one. Crates whose reference
/// time, or the first crate's, was not measured are not corrected.
pub fn offsets(reference_times: &[Real]) -> Vec<Real> {
    let baseline = reference_times.first().copied().unwrap_or_default();
    reference_times
        .iter()
        .enumerate()
        .map(|(index, &time)| {
            if index > 0 && baseline > 0.0 && time > 0.0 {
                baseline - time
            } else {
                0.0
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct CrateJitterCorrector {
    layout: CrateLayout,
    channels: usize,
    significance_threshold: Real,
    warning_threshold: Real,
    max_code: Sample,
}

impl CrateJitterCorrector {
    pub fn new(
        layout: CrateLayout,
        channels: usize,
        significance_threshold: Real,
        warning_threshold: Real,
    ) -> Self {
        Self {
            layout,
            channels,
            significance_threshold,
            warning_threshold,
            max_code: Sample::MAX,
        }
    }

    /// Reference pulses reaching this digitiser code are not timed.
    pub fn with_max_code(mut self, max_code: Sample) -> Self {
        self.max_code = max_code;
        self
    }

    pub fn layout(&self) -> &CrateLayout {
        &self.layout
    }

    pub fn is_enabled(&self) -> bool {
        self.layout.crates() > 0
    }

    /// Times the reference pulses of the current event.
    pub fn measure<S: WaveformSource + ?Sized>(
        &self,
        source: &S,
        calibration: &CalibrationSet,
        levels: &TimingLevels,
    ) -> CrateJitter {
        let crates = self.layout.crates();
        let mut reference_times = vec![0.0; crates];
        let mut reference_sums = vec![0.0; crates];

        // pedestal for reference channels that have no calibration of their own
        let borrowed_pedestal = self
            .layout
            .camera_references(self.channels)
            .into_iter()
            .filter(|&channel| !source.is_zero_suppressed(channel))
            .last();

        for (index, &reference) in self.layout.reference_channels.iter().enumerate() {
            let Some(samples) = source.hit_index(reference).and_then(|hit| source.samples(hit))
            else {
                continue;
            };
            if source.is_zero_suppressed(reference) {
                continue;
            }
            let pedestal_channel = if reference < self.channels {
                reference
            } else if let Some(channel) = borrowed_pedestal {
                channel
            } else {
                continue;
            };
            let Ok(constants) = calibration.channel(pedestal_channel, GainState::High) else {
                continue;
            };

            let handler = TraceHandler::new(samples, constants.pedestal, constants.pedestal_rms)
                .with_max_code(self.max_code);
            let full = handler.full_window();
            let sum = handler.sum(full);
            reference_sums[index] = sum;
            let saturated = handler.maximum().saturated > 0;
            if sum > self.significance_threshold && !source.is_low_gain(reference) && !saturated {
                reference_times[index] = handler
                    .pulse_timing(full, full, levels)
                    .tzero()
                    .unwrap_or_default();
            }
            trace!(index, reference, sum, time = reference_times[index], "Crate reference");
        }

        CrateJitter {
            offsets: offsets(&reference_times),
            reference_times,
            reference_sums,
        }
    }

    /// Adds the crate offsets to the corrected timing of all channels but the
    /// reference channels.
    pub fn apply(&self, jitter: &CrateJitter, outputs: &mut EventOutputs, context: &mut EngineContext) {
        for (index, &offset) in jitter.offsets.iter().enumerate().skip(1) {
            if offset.abs() > self.warning_threshold {
                counter!(CRATE_JITTER_WARNINGS).increment(1);
                if context.crate_jitter_warning() {
                    warn!(
                        event = outputs.event_number,
                        crate_index = index,
                        offset,
                        "Crate offset exceeds {} samples, likely a mis-trigger",
                        self.warning_threshold
                    );
                }
            }
            let reference = self.layout.reference_channels.get(index).copied();
            for channel in self.layout.crate_range(index, outputs.channels()) {
                outputs.crate_offsets[channel] = offset;
                if Some(channel) != reference {
                    outputs
                        .pulse_timing
                        .column_mut(channel)
                        .iter_mut()
                        .for_each(|time| *time = time.map(|time| time + offset));
                }
            }
        }
        for (stored, measured) in outputs
            .crate_reference_times
            .iter_mut()
            .zip(&jitter.reference_times)
        {
            *stored = *measured;
        }
        for (stored, measured) in outputs
            .crate_reference_sums
            .iter_mut()
            .zip(&jitter.reference_sums)
        {
            *stored = *measured;
        }
    }
}
