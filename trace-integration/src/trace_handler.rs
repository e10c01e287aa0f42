//! Charge, timing and shape measurements on a single digitised trace.
//!
//! All values are pedestal subtracted. Indices are sample numbers; interpolated
//! times are fractional sample numbers.

use crate::{Real, error::ConfigurationError, window::IntegrationWindow};
use fadc_common::Sample;
use itertools::Itertools;
use std::iter::once;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Peak,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingLevel {
    pub fraction: Real,
    pub edge: Edge,
}

/// Ordered pulse timing levels, fixed for a run. For fractions `[0.2, 0.5]`
/// the levels are rising 20%, rising 50%, peak, falling 50%, falling 20%.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingLevels {
    levels: Vec<TimingLevel>,
    tzero: usize,
}

impl TimingLevels {
    pub fn new(fractions: &[Real], tzero: usize) -> Result<Self, ConfigurationError> {
        let in_range = fractions.iter().all(|f| *f > 0.0 && *f < 1.0);
        let increasing = fractions.iter().tuple_windows().all(|(a, b)| a < b);
        if fractions.is_empty() || !in_range || !increasing {
            return Err(ConfigurationError::InvalidTimingFractions(
                fractions.to_vec(),
            ));
        }

        let levels = fractions
            .iter()
            .map(|&fraction| TimingLevel {
                fraction,
                edge: Edge::Rising,
            })
            .chain(once(TimingLevel {
                fraction: 1.0,
                edge: Edge::Peak,
            }))
            .chain(fractions.iter().rev().map(|&fraction| TimingLevel {
                fraction,
                edge: Edge::Falling,
            }))
            .collect_vec();

        if tzero >= levels.len() {
            return Err(ConfigurationError::TimingLevelOutOfRange {
                index: tzero,
                levels: levels.len(),
            });
        }
        Ok(Self { levels, tzero })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Index of the level used as the pulse arrival time.
    pub fn tzero_index(&self) -> usize {
        self.tzero
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimingLevel> {
        self.levels.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub sample: usize,
    pub amplitude: Real,
}

/// Times at which the pulse crosses each timing level. `None` marks a level
/// that was not found.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseTiming {
    times: Vec<Option<Real>>,
    tzero: usize,
    peak: Option<Peak>,
}

impl PulseTiming {
    pub fn invalid(levels: &TimingLevels) -> Self {
        Self {
            times: vec![None; levels.len()],
            tzero: levels.tzero_index(),
            peak: None,
        }
    }

    /// A pulse was found and its arrival time could be measured.
    pub fn is_valid(&self) -> bool {
        self.peak.is_some() && self.tzero().is_some()
    }

    pub fn tzero(&self) -> Option<Real> {
        self.times.get(self.tzero).copied().flatten()
    }

    pub fn times(&self) -> &[Option<Real>] {
        &self.times
    }

    pub fn peak(&self) -> Option<Peak> {
        self.peak
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TraceMaximum {
    /// Largest pedestal-subtracted value, scaled like the sums.
    pub amplitude: Real,
    /// Largest raw digitiser code.
    pub raw: Sample,
    /// Number of samples at the highest digitiser code.
    pub saturated: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct TraceHandler<'a> {
    samples: &'a [Sample],
    pedestal: Real,
    pedestal_rms: Real,
    gain_multiplier: Option<Real>,
    max_code: Sample,
}

impl<'a> TraceHandler<'a> {
    pub fn new(samples: &'a [Sample], pedestal: Real, pedestal_rms: Real) -> Self {
        Self {
            samples,
            pedestal,
            pedestal_rms,
            gain_multiplier: None,
            max_code: Sample::MAX,
        }
    }

    /// Multiplier applied to sums and amplitudes of low-gain traces.
    pub fn with_gain_multiplier(mut self, gain_multiplier: Option<Real>) -> Self {
        self.gain_multiplier = gain_multiplier;
        self
    }

    pub fn with_max_code(mut self, max_code: Sample) -> Self {
        self.max_code = max_code;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn full_window(&self) -> IntegrationWindow {
        IntegrationWindow::new(0, self.len())
    }

    fn scale(&self) -> Real {
        self.gain_multiplier.unwrap_or(1.0)
    }

    fn value(&self, index: usize) -> Real {
        Real::from(self.samples[index]) - self.pedestal
    }

    fn values_in(&self, window: IntegrationWindow) -> impl Iterator<Item = (usize, Real)> + '_ {
        let window = window.clamped(self.len());
        window.range().map(move |index| (index, self.value(index)))
    }

    /// Sum of the pedestal-subtracted samples in `window`.
    pub fn sum(&self, window: IntegrationWindow) -> Real {
        self.values_in(window).map(|(_, value)| value).sum::<Real>() * self.scale()
    }

    /// Largest sample in `window`, first one on ties. Pulses not exceeding the
    /// pedestal RMS are ignored.
    pub fn peak(&self, window: IntegrationWindow) -> Option<Peak> {
        let (sample, amplitude) = self
            .values_in(window)
            .fold(None, |best: Option<(usize, Real)>, (index, value)| match best {
                Some((_, best_value)) if best_value >= value => best,
                _ => Some((index, value)),
            })?;
        (amplitude > self.pedestal_rms.max(0.0)).then_some(Peak { sample, amplitude })
    }

    fn rising_crossing(&self, peak: Peak, level: Real, search: IntegrationWindow) -> Option<Real> {
        let mut index = peak.sample;
        while index > search.first && self.value(index - 1) >= level {
            index -= 1;
        }
        if index == search.first {
            return None;
        }
        let below = self.value(index - 1);
        let above = self.value(index);
        Some((index - 1) as Real + (level - below) / (above - below))
    }

    fn falling_crossing(&self, peak: Peak, level: Real, search: IntegrationWindow) -> Option<Real> {
        let mut index = peak.sample;
        while index + 1 < search.last && self.value(index + 1) >= level {
            index += 1;
        }
        if index + 1 >= search.last {
            return None;
        }
        let above = self.value(index);
        let below = self.value(index + 1);
        Some(index as Real + (above - level) / (above - below))
    }

    /// Times of the timing levels of the pulse with its maximum in `window`.
    /// Edges are followed up to the limits of `search`.
    pub fn pulse_timing(
        &self,
        window: IntegrationWindow,
        search: IntegrationWindow,
        levels: &TimingLevels,
    ) -> PulseTiming {
        let window = window.clamped(self.len());
        let search = search.union(window).clamped(self.len());
        let Some(peak) = self.peak(window) else {
            return PulseTiming::invalid(levels);
        };

        let times = levels
            .iter()
            .map(|level| {
                let threshold = level.fraction * peak.amplitude;
                match level.edge {
                    Edge::Peak => Some(peak.sample as Real),
                    Edge::Rising => self.rising_crossing(peak, threshold, search),
                    Edge::Falling => self.falling_crossing(peak, threshold, search),
                }
            })
            .collect();

        PulseTiming {
            times,
            tzero: levels.tzero_index(),
            peak: Some(peak),
        }
    }

    pub fn maximum(&self) -> TraceMaximum {
        let raw = self.samples.iter().copied().max().unwrap_or_default();
        let saturated = self.samples.iter().filter(|&&s| s >= self.max_code).count() as u32;
        TraceMaximum {
            amplitude: (Real::from(raw) - self.pedestal) * self.scale(),
            raw,
            saturated,
        }
    }

    /// Charge-weighted mean sample of the positive part of `window`.
    pub fn average_time(&self, window: IntegrationWindow) -> Option<Real> {
        let (weighted, total) = self
            .values_in(window)
            .filter(|(_, value)| *value > 0.0)
            .fold((0.0, 0.0), |(weighted, total), (index, value)| {
                (weighted + index as Real * value, total + value)
            });
        (total > 0.0).then(|| weighted / total)
    }

    /// Time between the `low` and `high` fractions of the maximum on the rising edge.
    pub fn rise_time(&self, window: IntegrationWindow, low: Real, high: Real) -> Option<Real> {
        let window = window.clamped(self.len());
        let search = self.full_window();
        let peak = self.peak(window)?;
        let start = self.rising_crossing(peak, low * peak.amplitude, search)?;
        let stop = self.rising_crossing(peak, high * peak.amplitude, search)?;
        Some(stop - start)
    }

    /// Time between the `high` and `low` fractions of the maximum on the falling edge.
    pub fn fall_time(&self, window: IntegrationWindow, high: Real, low: Real) -> Option<Real> {
        let window = window.clamped(self.len());
        let search = self.full_window();
        let peak = self.peak(window)?;
        let start = self.falling_crossing(peak, high * peak.amplitude, search)?;
        let stop = self.falling_crossing(peak, low * peak.amplitude, search)?;
        Some(stop - start)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    pub(crate) fn gaussian_trace(
        samples: usize,
        pedestal: Real,
        amplitude: Real,
        mean: Real,
        sd: Real,
    ) -> Vec<Sample> {
        (0..samples)
            .map(|i| {
                let x = (i as Real - mean) / sd;
                (pedestal + amplitude * Real::exp(-0.5 * x * x)).round() as Sample
            })
            .collect()
    }

    fn levels() -> TimingLevels {
        TimingLevels::new(&[0.2, 0.5], 1).unwrap()
    }

    #[test]
    fn flat_trace_has_no_pulse() {
        let trace = vec![100; 20];
        let handler = TraceHandler::new(&trace, 100.0, 2.0);
        let window = IntegrationWindow::new(2, 10);

        assert_eq!(handler.sum(window), 0.0);
        let timing = handler.pulse_timing(window, handler.full_window(), &levels());
        assert!(!timing.is_valid());
        assert!(timing.times().iter().all(Option::is_none));
        assert_eq!(timing.times().len(), 5);
    }

    #[test]
    fn gaussian_pulse_sum_and_timing() {
        let trace = gaussian_trace(20, 100.0, 500.0, 8.0, 1.5);
        let handler = TraceHandler::new(&trace, 100.0, 2.0);
        let window = IntegrationWindow::new(3, 13);

        let expected: Real = trace[3..13].iter().map(|&s| Real::from(s) - 100.0).sum();
        assert_eq!(handler.sum(window), expected);
        // integral of the Gaussian within the window
        assert_approx_eq!(handler.sum(window), 500.0 * 1.5 * (2.0 * std::f64::consts::PI).sqrt(), 10.0);

        let timing = handler.pulse_timing(window, handler.full_window(), &levels());
        assert!(timing.is_valid());
        assert_eq!(timing.peak().map(|p| p.sample), Some(8));
        let t50 = timing.tzero().unwrap();
        assert!(6.0 < t50 && t50 < 7.0, "t50 = {t50}");
        assert!(Real::from(trace[6]) - 100.0 < 250.0);
        assert!(Real::from(trace[7]) - 100.0 >= 250.0);

        let times = timing.times();
        assert_eq!(times[2], Some(8.0));
        // symmetric pulse
        assert_approx_eq!(times[3].unwrap() - 8.0, 8.0 - t50, 0.05);
        assert!(times[0].unwrap() < t50);
        assert!(times[4].unwrap() > times[3].unwrap());
    }

    #[test]
    fn sum_is_exact_for_any_window() {
        let trace: Vec<Sample> = (0..16).map(|i| 20 + (i * 7 % 11) as Sample).collect();
        let handler = TraceHandler::new(&trace, 18.5, 1.0);
        for first in 0..16 {
            for last in first + 1..=16 {
                let expected: Real = trace[first..last].iter().map(|&s| Real::from(s) - 18.5).sum();
                assert_approx_eq!(handler.sum(IntegrationWindow::new(first, last)), expected, 1e-9);
            }
        }
    }

    #[test]
    fn empty_window() {
        let trace = gaussian_trace(20, 100.0, 500.0, 8.0, 1.5);
        let handler = TraceHandler::new(&trace, 100.0, 2.0);
        let window = IntegrationWindow::new(8, 8);

        assert_eq!(handler.sum(window), 0.0);
        assert!(!handler.pulse_timing(window, window, &levels()).is_valid());
    }

    #[test]
    fn window_beyond_trace_is_clamped() {
        let trace = gaussian_trace(20, 100.0, 500.0, 8.0, 1.5);
        let handler = TraceHandler::new(&trace, 100.0, 2.0);

        assert_eq!(
            handler.sum(IntegrationWindow::new(15, 40)),
            handler.sum(IntegrationWindow::new(15, 20))
        );
        assert_eq!(handler.sum(IntegrationWindow::new(30, 40)), 0.0);
        assert!(
            !handler
                .pulse_timing(IntegrationWindow::new(30, 40), IntegrationWindow::new(0, 50), &levels())
                .is_valid()
        );
    }

    #[test]
    fn window_before_pulse_is_invalid() {
        let trace = gaussian_trace(30, 100.0, 500.0, 20.0, 1.5);
        let handler = TraceHandler::new(&trace, 100.0, 2.0);
        let timing = handler.pulse_timing(
            IntegrationWindow::new(0, 8),
            handler.full_window(),
            &levels(),
        );
        assert!(!timing.is_valid());
    }

    #[test]
    fn edge_outside_search_range_is_not_found() {
        let trace = gaussian_trace(20, 100.0, 500.0, 8.0, 1.5);
        let handler = TraceHandler::new(&trace, 100.0, 2.0);
        let window = IntegrationWindow::new(7, 10);
        let timing = handler.pulse_timing(window, window, &levels());
        // the 50% crossing lies between samples 6 and 7, outside the search range
        assert_eq!(timing.tzero(), None);
        assert!(!timing.is_valid());
        assert_eq!(timing.times()[2], Some(8.0));
    }

    #[test]
    fn low_gain_multiplier_scales_sum_and_amplitude() {
        let trace = gaussian_trace(20, 100.0, 50.0, 8.0, 2.0);
        let high = TraceHandler::new(&trace, 100.0, 2.0);
        let low = high.with_gain_multiplier(Some(6.0));
        let window = IntegrationWindow::new(0, 20);

        assert_approx_eq!(low.sum(window), 6.0 * high.sum(window), 1e-9);
        assert_approx_eq!(low.maximum().amplitude, 6.0 * high.maximum().amplitude, 1e-9);
        // timing does not depend on the scale
        assert_eq!(
            low.pulse_timing(window, window, &levels()),
            high.pulse_timing(window, window, &levels())
        );
    }

    #[test]
    fn saturated_samples_are_counted() {
        let mut trace = vec![16; 20];
        trace[7] = 255;
        trace[8] = 255;
        trace[9] = 200;
        let handler = TraceHandler::new(&trace, 16.0, 1.0).with_max_code(255);
        let maximum = handler.maximum();
        assert_eq!(maximum.raw, 255);
        assert_eq!(maximum.saturated, 2);
        assert_eq!(maximum.amplitude, 239.0);
    }

    #[test]
    fn triangular_rise_and_fall() {
        // rises by 10 per sample from sample 2 to 12, falls by 5 per sample to 32
        let trace: Vec<Sample> = (0..40)
            .map(|i| match i {
                0..=2 => 0,
                3..=12 => 10 * (i - 2),
                13..=32 => 100 - 5 * (i - 12),
                _ => 0,
            })
            .collect();
        let handler = TraceHandler::new(&trace, 0.0, 1.0);
        let window = handler.full_window();

        assert_approx_eq!(handler.rise_time(window, 0.1, 0.9).unwrap(), 8.0, 1e-9);
        assert_approx_eq!(handler.fall_time(window, 0.9, 0.1).unwrap(), 16.0, 1e-9);
        assert_approx_eq!(handler.average_time(IntegrationWindow::new(12, 13)).unwrap(), 12.0, 1e-9);
    }

    #[test]
    fn timing_levels_are_validated() {
        assert!(TimingLevels::new(&[], 0).is_err());
        assert!(TimingLevels::new(&[0.5, 0.2], 0).is_err());
        assert!(TimingLevels::new(&[0.2, 1.0], 0).is_err());
        assert_eq!(
            TimingLevels::new(&[0.2, 0.5], 5),
            Err(ConfigurationError::TimingLevelOutOfRange {
                index: 5,
                levels: 5
            })
        );
        let levels = TimingLevels::new(&[0.2, 0.5], 1).unwrap();
        let edges = levels.iter().map(|l| l.edge).collect_vec();
        assert_eq!(
            edges,
            vec![Edge::Rising, Edge::Rising, Edge::Peak, Edge::Falling, Edge::Falling]
        );
    }
}
