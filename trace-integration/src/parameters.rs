use crate::{Real, error::ConfigurationError, trace_handler::TimingLevels};
use clap::{ArgAction, Args};
use fadc_common::Sample;

/// Behaviour of the trace integration, shared by all telescopes of a run.
#[derive(Debug, Clone, Args)]
pub struct IntegrationParameters {
    /// Integrate shower events twice, re-centring the window on the image time gradient.
    #[clap(long)]
    pub double_pass: bool,

    /// Ignore channel time offsets when placing the pass-1 window.
    #[clap(long)]
    pub fix_window_start: bool,

    /// In pass 2, start window 2 at the nominal window start instead of the predicted arrival time.
    #[clap(long)]
    pub fix_window_2_start: bool,

    /// Start the pass-1 window at the T0 of the full trace.
    #[clap(long)]
    pub window_start_at_t0: bool,

    /// Fractions of the pulse maximum at which the rising (and mirrored falling) edge is timed.
    #[clap(long, value_delimiter = ',', default_value = "0.2,0.5")]
    pub timing_fractions: Vec<Real>,

    /// Index into the timing levels of the level used as the arrival time (T0).
    #[clap(long, default_value = "1")]
    pub tzero_level: usize,

    /// Image time gradients above this magnitude (samples per degree) are not trusted in pass 2.
    #[clap(long, default_value = "200")]
    pub max_time_gradient: Real,

    /// Added to the predicted pass-2 start of low-gain channels before the arrival time
    /// is searched again. Without it the search restarts at sample 0.
    #[clap(long, allow_hyphen_values = true)]
    pub low_gain_search_offset: Option<i64>,

    /// Largest accepted difference between predicted start and re-measured low-gain T0.
    #[clap(long, default_value = "10")]
    pub max_low_gain_time_difference: Real,

    /// Minimum full-trace charge of a crate reference channel for its T0 to be used.
    #[clap(long, default_value = "300")]
    pub crate_reference_threshold: Real,

    /// Crate offsets beyond this many samples are reported as likely mis-triggers.
    #[clap(long, default_value = "5")]
    pub crate_jitter_warning: Real,

    /// Measure rise and fall times of each pulse.
    #[clap(long)]
    pub characterize_pulse_shape: bool,

    #[clap(long, default_value = "0.1")]
    pub rise_fall_low_level: Real,

    #[clap(long, default_value = "0.9")]
    pub rise_fall_high_level: Real,

    /// Highest digitiser code, samples at this value count as saturated.
    #[clap(long, default_value = "255")]
    pub max_sample_code: Sample,

    /// Ratio of high-gain to low-gain amplification applied to low-gain traces.
    #[clap(long, default_value = "6")]
    pub low_gain_multiplier: Real,

    #[clap(long = "no-gain-correction", action = ArgAction::SetFalse)]
    pub gain_correction: bool,

    /// Integrate the FADC traces; when disabled the pre-integrated sums of the source are used.
    #[clap(long = "no-fadc-analysis", action = ArgAction::SetFalse)]
    pub fadc_analysis: bool,
}

impl Default for IntegrationParameters {
    fn default() -> Self {
        Self {
            double_pass: false,
            fix_window_start: false,
            fix_window_2_start: false,
            window_start_at_t0: false,
            timing_fractions: vec![0.2, 0.5],
            tzero_level: 1,
            max_time_gradient: 200.0,
            low_gain_search_offset: None,
            max_low_gain_time_difference: 10.0,
            crate_reference_threshold: 300.0,
            crate_jitter_warning: 5.0,
            characterize_pulse_shape: false,
            rise_fall_low_level: 0.1,
            rise_fall_high_level: 0.9,
            max_sample_code: 255,
            low_gain_multiplier: 6.0,
            gain_correction: true,
            fadc_analysis: true,
        }
    }
}

impl IntegrationParameters {
    pub fn timing_levels(&self) -> Result<TimingLevels, ConfigurationError> {
        TimingLevels::new(&self.timing_fractions, self.tzero_level)
    }
}
