use crate::{Real, telescope::PixelPosition, window::IntegrationWindow};
use fadc_common::{ChannelId, EventNumber, Sample};
use ndarray::{Array1, Array2};
use serde::Deserialize;

/// Parameters of the pass-1 image used to place the pass-2 windows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageFit {
    pub centroid_x: Real,
    pub centroid_y: Real,
    /// Angle of the major axis, in radians.
    pub phi: Real,
    /// Slope of the arrival time along the major axis, samples per degree.
    pub time_gradient: Real,
    /// Arrival time at the centroid.
    pub time_intercept: Real,
}

impl ImageFit {
    pub fn position_along_axis(&self, position: PixelPosition) -> Real {
        (position.x - self.centroid_x) * self.phi.cos()
            + (position.y - self.centroid_y) * self.phi.sin()
    }

    /// Arrival time at `position`, `None` when the gradient is not trusted.
    pub fn predicted_time(&self, position: PixelPosition, max_gradient: Real) -> Option<Real> {
        (self.time_gradient.abs() < max_gradient)
            .then(|| self.time_gradient * self.position_along_axis(position) + self.time_intercept)
    }
}

/// Results of one event, overwritten by the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutputs {
    pub event_number: EventNumber,
    /// Window-1 charge per channel.
    pub sums: Array1<Real>,
    /// Window-2 charge per channel.
    pub sums2: Array1<Real>,
    /// Corrected arrival times, indexed by timing level and channel.
    pub pulse_timing: Array2<Option<Real>>,
    /// Arrival times before crate jitter and time offset corrections.
    pub pulse_timing_uncorrected: Array2<Option<Real>>,
    pub trace_max: Vec<Real>,
    pub trace_raw_max: Vec<Sample>,
    pub n_saturated: Vec<u32>,
    pub trace_average_time: Vec<Option<Real>>,
    pub rise_time: Vec<Option<Real>>,
    pub fall_time: Vec<Option<Real>>,
    pub windows: Vec<IntegrationWindow>,
    pub windows_2: Vec<IntegrationWindow>,
    pub low_gain: Vec<bool>,
    pub zero_suppressed: Vec<bool>,
    /// Crate jitter correction applied to each channel.
    pub crate_offsets: Vec<Real>,
    /// T0 and full-trace sum of each crate reference channel.
    pub crate_reference_times: Vec<Real>,
    pub crate_reference_sums: Vec<Real>,
    /// Mean corrected T0 of the telescope, `None` if no channel had a valid T0.
    pub mean_arrival_time: Option<Real>,
    pub n_low_gain: usize,
    pub n_saturated_channels: usize,
}

impl EventOutputs {
    pub fn new(channels: usize, levels: usize, crates: usize) -> Self {
        Self {
            event_number: 0,
            sums: Array1::zeros(channels),
            sums2: Array1::zeros(channels),
            pulse_timing: Array2::from_elem((levels, channels), None),
            pulse_timing_uncorrected: Array2::from_elem((levels, channels), None),
            trace_max: vec![0.0; channels],
            trace_raw_max: vec![0; channels],
            n_saturated: vec![0; channels],
            trace_average_time: vec![None; channels],
            rise_time: vec![None; channels],
            fall_time: vec![None; channels],
            windows: vec![IntegrationWindow::default(); channels],
            windows_2: vec![IntegrationWindow::default(); channels],
            low_gain: vec![false; channels],
            zero_suppressed: vec![false; channels],
            crate_offsets: vec![0.0; channels],
            crate_reference_times: vec![0.0; crates],
            crate_reference_sums: vec![0.0; crates],
            mean_arrival_time: None,
            n_low_gain: 0,
            n_saturated_channels: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.sums.len()
    }

    /// Restores every value to its default before a new event.
    pub fn reset(&mut self, event_number: EventNumber) {
        self.event_number = event_number;
        self.sums.fill(0.0);
        self.sums2.fill(0.0);
        self.pulse_timing.fill(None);
        self.pulse_timing_uncorrected.fill(None);
        self.trace_max.fill(0.0);
        self.trace_raw_max.fill(0);
        self.n_saturated.fill(0);
        self.trace_average_time.fill(None);
        self.rise_time.fill(None);
        self.fall_time.fill(None);
        self.windows.fill(IntegrationWindow::default());
        self.windows_2.fill(IntegrationWindow::default());
        self.low_gain.fill(false);
        self.zero_suppressed.fill(false);
        self.crate_offsets.fill(0.0);
        self.crate_reference_times.fill(0.0);
        self.crate_reference_sums.fill(0.0);
        self.mean_arrival_time = None;
        self.n_low_gain = 0;
        self.n_saturated_channels = 0;
    }

    /// Corrected T0 of a channel.
    pub fn tzero(&self, channel: ChannelId, tzero_level: usize) -> Option<Real> {
        self.pulse_timing
            .get((tzero_level, channel))
            .copied()
            .flatten()
    }
}
