use crate::{
    Real,
    calibration::GainState,
    parameters::IntegrationParameters,
    telescope::{Telescope, WindowSettings},
    trace_handler::{TimingLevels, TraceHandler},
};
use std::ops::Range;

/// Half-open range `[first, last)` of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationWindow {
    pub first: usize,
    pub last: usize,
}

impl IntegrationWindow {
    /// A `last` before `first` gives an empty window at `first`.
    pub fn new(first: usize, last: usize) -> Self {
        Self {
            first,
            last: last.max(first),
        }
    }

    pub fn len(&self) -> usize {
        self.last.saturating_sub(self.first)
    }

    pub fn is_empty(&self) -> bool {
        self.last <= self.first
    }

    pub fn range(&self) -> Range<usize> {
        self.first..self.last
    }

    pub fn clamped(&self, samples: usize) -> Self {
        Self::new(self.first.min(samples), self.last.min(samples))
    }

    /// Smallest window containing both.
    pub fn union(&self, other: Self) -> Self {
        Self::new(self.first.min(other.first), self.last.max(other.last))
    }
}

/// Inputs of the pass-2 window placement for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondPassInput {
    /// Arrival time predicted by the image fit, `None` if the fit is unusable.
    pub predicted_time: Option<Real>,
    /// Mean corrected arrival time of the telescope in pass 1.
    pub mean_arrival_time: Real,
    pub time_offset: Real,
    pub crate_offset: Real,
    pub gain: GainState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondPassWindows {
    pub window: IntegrationWindow,
    pub window_2: IntegrationWindow,
    /// The mean arrival time was used instead of the fit prediction.
    pub used_fallback: bool,
}

/// Places the summation windows of the channels of one telescope.
#[derive(Debug, Clone)]
pub struct SummationWindowPlanner {
    settings: WindowSettings,
    samples: usize,
    fix_window_start: bool,
    fix_window_2_start: bool,
    low_gain_search_offset: Option<i64>,
    max_low_gain_time_difference: Real,
}

impl SummationWindowPlanner {
    pub fn new(telescope: &Telescope, parameters: &IntegrationParameters) -> Self {
        Self {
            settings: telescope.window,
            samples: telescope.samples,
            fix_window_start: parameters.fix_window_start,
            fix_window_2_start: parameters.fix_window_2_start,
            low_gain_search_offset: parameters.low_gain_search_offset,
            max_low_gain_time_difference: parameters.max_low_gain_time_difference,
        }
    }

    pub fn settings(&self) -> &WindowSettings {
        &self.settings
    }

    /// Clamps a sample position to `[0, samples]`.
    pub fn position(&self, position: i64) -> usize {
        usize::try_from(position).map_or(0, |position| position.min(self.samples))
    }

    fn window_from(&self, first: usize, length: usize) -> IntegrationWindow {
        IntegrationWindow::new(first, first.saturating_add(length).min(self.samples))
    }

    /// Whole samples by which a channel's window is moved to align it with the
    /// camera, rounded towards more negative values.
    pub fn channel_offset(&self, time_offset: Real) -> i64 {
        if self.fix_window_start {
            0
        } else {
            time_offset.floor() as i64
        }
    }

    /// Pass-1 window 1 aligned by the channel time offset.
    pub fn aligned(&self, time_offset: Real) -> IntegrationWindow {
        let start = self.settings.start.saturating_add(self.channel_offset(time_offset));
        let first = self.position(start);
        let last = self.position(start.saturating_add(self.settings.length as i64));
        IntegrationWindow::new(first, last)
    }

    /// Applies the configured window shift to an aligned pass-1 window.
    pub fn shifted(&self, window: IntegrationWindow, time_offset: Real) -> IntegrationWindow {
        if self.settings.shift == 0 || self.fix_window_start {
            return window;
        }
        let first = self.position(
            self.settings
                .start
                .saturating_add(time_offset.trunc() as i64)
                .saturating_add(self.settings.shift),
        );
        self.window_from(first, self.settings.length)
    }

    /// Window 1 starting at a measured arrival time.
    pub fn starting_at(&self, tzero: Real) -> IntegrationWindow {
        let first = self.position((tzero.floor() as i64).saturating_add(self.settings.shift));
        self.window_from(first, self.settings.length)
    }

    /// Window 2 sharing the start of window 1.
    pub fn window_2_from(&self, first: usize) -> IntegrationWindow {
        self.window_from(first, self.settings.length_2)
    }

    /// Length of window 1 in pass 2; low-gain channels use the window-2 length.
    pub fn dynamic_length(&self, gain: GainState) -> usize {
        match gain {
            GainState::High => self.settings.length,
            GainState::Low => self.settings.length_2,
        }
    }

    /// Moves a camera-frame arrival time back into the frame of the channel's trace.
    fn uncorrected(&self, time: Real, input: &SecondPassInput) -> Real {
        time + input.time_offset - input.crate_offset + self.settings.shift as Real
    }

    fn mean_fallback(&self, input: &SecondPassInput) -> i64 {
        self.uncorrected(input.mean_arrival_time - 0.5, input).trunc() as i64
    }

    /// Re-measures the arrival time of a low-gain pulse behind the predicted start.
    fn low_gain_start(&self, predicted: i64, handler: &TraceHandler, levels: &TimingLevels) -> i64 {
        let samples = self.samples as i64;
        let search_start = match self.low_gain_search_offset {
            Some(offset) => predicted.saturating_add(offset),
            None => 0,
        };
        let search = IntegrationWindow::new(self.position(search_start), self.samples);
        let start = match handler.pulse_timing(search, search, levels).tzero() {
            Some(tzero) if (search_start as Real - tzero) < self.max_low_gain_time_difference => {
                (tzero.round() as i64).saturating_add(self.settings.shift)
            }
            Some(_) => search_start,
            None => samples,
        };
        start.max(0)
    }

    pub fn second_pass(
        &self,
        input: &SecondPassInput,
        handler: &TraceHandler,
        levels: &TimingLevels,
    ) -> SecondPassWindows {
        let mut used_fallback = false;
        let mut first = match input.predicted_time {
            Some(time) => self.uncorrected(time, input).trunc() as i64,
            None => i64::MIN,
        };
        if first < self.settings.start {
            first = self.mean_fallback(input);
            used_fallback = true;
        }

        if input.gain.is_low() {
            if first < self.samples as i64 {
                first = self.low_gain_start(first, handler, levels);
            }
        } else if first < 0 {
            first = self.mean_fallback(input);
            used_fallback = true;
        }

        let first = self.position(first);
        let window = self.window_from(first, self.dynamic_length(input.gain));
        let window_2 = if self.fix_window_2_start {
            let fixed = self.settings.start as Real + input.time_offset - input.crate_offset;
            self.window_2_from(self.position(fixed.trunc() as i64))
        } else {
            self.window_2_from(first)
        };

        SecondPassWindows {
            window,
            window_2,
            used_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_handler::tests::gaussian_trace;

    fn planner(parameters: &IntegrationParameters) -> SummationWindowPlanner {
        let telescope = Telescope::new(0, 4, 20).with_window(WindowSettings {
            start: 4,
            length: 6,
            length_2: 10,
            shift: 0,
        });
        SummationWindowPlanner::new(&telescope, parameters)
    }

    fn input(predicted_time: Option<Real>, gain: GainState) -> SecondPassInput {
        SecondPassInput {
            predicted_time,
            mean_arrival_time: 7.0,
            time_offset: 0.0,
            crate_offset: 0.0,
            gain,
        }
    }

    #[test]
    fn positions_are_clamped() {
        let planner = planner(&Default::default());
        assert_eq!(planner.position(-3), 0);
        assert_eq!(planner.position(12), 12);
        assert_eq!(planner.position(25), 20);
    }

    #[test]
    fn negative_offsets_round_down() {
        let planner = planner(&Default::default());
        assert_eq!(planner.channel_offset(1.7), 1);
        assert_eq!(planner.channel_offset(-0.3), -1);
        assert_eq!(planner.channel_offset(-1.5), -2);
        assert_eq!(planner.aligned(-1.5), IntegrationWindow::new(2, 8));
        assert_eq!(planner.aligned(2.2), IntegrationWindow::new(6, 12));
    }

    #[test]
    fn fixed_start_ignores_offsets() {
        let parameters = IntegrationParameters {
            fix_window_start: true,
            ..Default::default()
        };
        let planner = planner(&parameters);
        assert_eq!(planner.aligned(-3.5), IntegrationWindow::new(4, 10));
    }

    #[test]
    fn window_at_end_of_trace_is_clamped() {
        let planner = planner(&Default::default());
        assert_eq!(planner.aligned(12.0), IntegrationWindow::new(16, 20));
        assert_eq!(planner.aligned(30.0), IntegrationWindow::new(20, 20));
        assert_eq!(planner.window_2_from(15), IntegrationWindow::new(15, 20));
        assert_eq!(planner.starting_at(-4.0), IntegrationWindow::new(0, 6));
    }

    #[test]
    fn extreme_offsets_saturate() {
        let planner = planner(&Default::default());
        assert_eq!(planner.aligned(1e30), IntegrationWindow::new(20, 20));
        assert_eq!(planner.aligned(-1e30), IntegrationWindow::new(0, 0));
        assert_eq!(planner.starting_at(Real::INFINITY), IntegrationWindow::new(20, 20));

        let shifting = SummationWindowPlanner::new(
            &Telescope::new(0, 4, 20).with_window(WindowSettings {
                start: 4,
                length: 6,
                length_2: 10,
                shift: 2,
            }),
            &Default::default(),
        );
        let window = shifting.aligned(1e30);
        assert_eq!(shifting.shifted(window, 1e30), IntegrationWindow::new(20, 20));
        assert_eq!(shifting.shifted(window, -1e30), IntegrationWindow::new(0, 6));
    }

    #[test]
    fn inverted_window_is_empty() {
        let window = IntegrationWindow { first: 5, last: 3 };
        assert_eq!(window.len(), 0);
        assert!(window.is_empty());
        assert!(IntegrationWindow::new(5, 3).is_empty());
        assert_eq!(IntegrationWindow::new(3, 5).len(), 2);
    }

    #[test]
    fn second_pass_follows_prediction() {
        let planner = planner(&Default::default());
        let trace = vec![16; 20];
        let handler = TraceHandler::new(&trace, 16.0, 1.0);
        let levels = TimingLevels::new(&[0.5], 0).unwrap();

        let windows = planner.second_pass(&input(Some(8.6), GainState::High), &handler, &levels);
        assert!(!windows.used_fallback);
        assert_eq!(windows.window, IntegrationWindow::new(8, 14));
        assert_eq!(windows.window_2, IntegrationWindow::new(8, 18));
    }

    #[test]
    fn second_pass_falls_back_to_mean_time() {
        let planner = planner(&Default::default());
        let trace = vec![16; 20];
        let handler = TraceHandler::new(&trace, 16.0, 1.0);
        let levels = TimingLevels::new(&[0.5], 0).unwrap();

        // before the nominal start
        let windows = planner.second_pass(&input(Some(1.0), GainState::High), &handler, &levels);
        assert!(windows.used_fallback);
        assert_eq!(windows.window.first, 6);

        // unusable fit
        let windows = planner.second_pass(&input(None, GainState::High), &handler, &levels);
        assert!(windows.used_fallback);
        assert_eq!(windows.window.first, 6);
    }

    #[test]
    fn fixed_window_2_start() {
        let parameters = IntegrationParameters {
            fix_window_2_start: true,
            ..Default::default()
        };
        let planner = planner(&parameters);
        let trace = vec![16; 20];
        let handler = TraceHandler::new(&trace, 16.0, 1.0);
        let levels = TimingLevels::new(&[0.5], 0).unwrap();
        let mut input = input(Some(10.0), GainState::High);
        input.time_offset = 2.0;
        input.crate_offset = 1.0;

        let windows = planner.second_pass(&input, &handler, &levels);
        assert_eq!(windows.window.first, 11);
        assert_eq!(windows.window_2, IntegrationWindow::new(5, 15));
    }

    #[test]
    fn low_gain_restarts_search_at_zero_without_offset() {
        let planner = planner(&Default::default());
        let trace = gaussian_trace(20, 16.0, 200.0, 12.0, 1.5);
        let handler = TraceHandler::new(&trace, 16.0, 1.0);
        let levels = TimingLevels::new(&[0.5], 0).unwrap();

        let windows = planner.second_pass(&input(Some(5.0), GainState::Low), &handler, &levels);
        // T0 is near 10.2, the search from sample 0 finds it
        assert_eq!(windows.window, IntegrationWindow::new(10, 20));
    }

    #[test]
    fn low_gain_time_difference_bound_is_configurable() {
        let trace = gaussian_trace(20, 16.0, 200.0, 6.0, 1.5);
        let handler = TraceHandler::new(&trace, 16.0, 1.0);
        let levels = TimingLevels::new(&[0.5], 0).unwrap();

        // pulse T0 is near 4.2; the search starts at 10 + 1 and finds nothing behind it
        let parameters = IntegrationParameters {
            low_gain_search_offset: Some(1),
            ..Default::default()
        };
        let windows =
            planner(&parameters).second_pass(&input(Some(10.0), GainState::Low), &handler, &levels);
        assert_eq!(windows.window, IntegrationWindow::new(20, 20));

        // search from before the pulse, accepted only when the time difference is small enough
        let trace = gaussian_trace(20, 16.0, 200.0, 9.0, 1.5);
        let handler = TraceHandler::new(&trace, 16.0, 1.0);
        let parameters = IntegrationParameters {
            low_gain_search_offset: Some(-6),
            max_low_gain_time_difference: 0.0,
            ..Default::default()
        };
        let windows =
            planner(&parameters).second_pass(&input(Some(10.0), GainState::Low), &handler, &levels);
        assert_eq!(windows.window.first, 7);

        let parameters = IntegrationParameters {
            low_gain_search_offset: Some(-6),
            max_low_gain_time_difference: -4.0,
            ..Default::default()
        };
        let windows =
            planner(&parameters).second_pass(&input(Some(10.0), GainState::Low), &handler, &levels);
        assert_eq!(windows.window.first, 4);
    }
}
