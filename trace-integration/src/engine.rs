use crate::{
    Real,
    calibration::{CalibrationSet, GainCalibration, GainState},
    context::EngineContext,
    crate_jitter::{CrateJitterCorrector, CrateLayout},
    dead_channels::{
        ClassificationStage, DeadChannelClassifier, DeadStatus, ExternalStatus,
        RecordedDeadChannels, SimulationTruth, SlowControlReadings,
    },
    error::{ChannelError, ConfigurationError},
    event::{EventOutputs, ImageFit},
    low_gain::LowGainCorrector,
    parameters::IntegrationParameters,
    source::{ImageFitProvider, WaveformSource},
    telescope::Telescope,
    trace_handler::{TimingLevels, TraceHandler},
    window::{SecondPassInput, SummationWindowPlanner},
};
use fadc_common::{
    ChannelId, Sample,
    metrics::{
        failures,
        metric_names::{
            CHANNELS_SKIPPED, EVENTS_PROCESSED, SATURATED_CHANNELS, SECOND_PASS_FALLBACKS,
        },
        passes::{self, IntegrationPass},
    },
    telescope_number,
};
use metrics::counter;
use tracing::{debug, info, trace};

/// Everything the engine needs for a run of one telescope.
#[derive(Debug, Clone)]
pub struct RunSetup {
    pub telescope: Telescope,
    pub parameters: IntegrationParameters,
    pub calibration: CalibrationSet,
    pub crate_layout: CrateLayout,
    pub low_gain: LowGainCorrector,
    /// Present for simulated runs.
    pub simulation: Option<SimulationTruth>,
    pub slow_control: Option<SlowControlReadings>,
    /// Dead channel codes stored with pre-integrated data, used instead of classifying.
    pub recorded_dead: Option<RecordedDeadChannels>,
}

impl RunSetup {
    pub fn new(telescope: Telescope, calibration: CalibrationSet) -> Self {
        Self {
            telescope,
            parameters: IntegrationParameters::default(),
            calibration,
            crate_layout: CrateLayout::default(),
            low_gain: LowGainCorrector::default(),
            simulation: None,
            slow_control: None,
            recorded_dead: None,
        }
    }
}

/// A hit integrated from its trace in the first pass.
#[derive(Debug, Clone, Copy)]
struct TraceHit {
    hit: usize,
    channel: ChannelId,
    gain: GainState,
    constants: GainCalibration,
}

/// Integrates the traces of one telescope, event by event.
pub struct TraceIntegrationEngine {
    telescope: Telescope,
    parameters: IntegrationParameters,
    calibration: CalibrationSet,
    levels: TimingLevels,
    planner: SummationWindowPlanner,
    low_gain: LowGainCorrector,
    crate_jitter: CrateJitterCorrector,
    classifier: DeadChannelClassifier,
    outputs: EventOutputs,
    context: EngineContext,
    /// Channels of the current event integrated from their traces.
    integrated: Vec<bool>,
    trace_hits: Vec<TraceHit>,
}

impl TraceIntegrationEngine {
    /// Validates the setup and classifies the channels of both gains.
    #[tracing::instrument(skip_all, fields(telescope = telescope_number(setup.telescope.id)))]
    pub fn new(setup: RunSetup) -> Result<Self, ConfigurationError> {
        let RunSetup {
            telescope,
            parameters,
            calibration,
            crate_layout,
            low_gain,
            simulation,
            slow_control,
            recorded_dead,
        } = setup;

        telescope.validate()?;
        let channels = telescope.channels;
        calibration.validate(channels)?;
        crate_layout.validate(channels)?;
        let levels = parameters.timing_levels()?;

        let mut classifier = DeadChannelClassifier::new(telescope.id, channels);
        let external = ExternalStatus {
            simulation: simulation.as_ref(),
            slow_control: slow_control.as_ref(),
        };
        let references = crate_layout.camera_references(channels);
        for gain in GainState::ALL {
            match &recorded_dead {
                Some(recorded) => classifier.load_packed(
                    gain,
                    recorded.codes(gain),
                    calibration.thresholds(gain).dead_warning_level,
                )?,
                None => classifier.classify(
                    gain,
                    ClassificationStage::RunStart,
                    &calibration,
                    external,
                    &references,
                )?,
            };
        }

        info!(
            channels,
            samples = telescope.samples,
            double_pass = parameters.double_pass,
            crates = crate_layout.crates(),
            "Trace integration ready"
        );

        Ok(Self {
            planner: SummationWindowPlanner::new(&telescope, &parameters),
            outputs: EventOutputs::new(channels, levels.len(), crate_layout.crates()),
            crate_jitter: CrateJitterCorrector::new(
                crate_layout,
                channels,
                parameters.crate_reference_threshold,
                parameters.crate_jitter_warning,
            )
            .with_max_code(parameters.max_sample_code),
            integrated: vec![false; channels],
            trace_hits: Vec::with_capacity(channels),
            context: EngineContext::default(),
            telescope,
            parameters,
            calibration,
            levels,
            low_gain,
            classifier,
        })
    }

    pub fn telescope(&self) -> &Telescope {
        &self.telescope
    }

    pub fn levels(&self) -> &TimingLevels {
        &self.levels
    }

    pub fn outputs(&self) -> &EventOutputs {
        &self.outputs
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn dead_status(&self, channel: ChannelId, gain: GainState) -> DeadStatus {
        self.classifier.status(channel, gain)
    }

    /// `(high gain, low gain)` dead status code of every channel.
    pub fn dead_channel_table(&self) -> Vec<(u32, u32)> {
        self.classifier.table()
    }

    /// Takes over the calibration of a new pedestal time slice.
    #[tracing::instrument(skip_all, fields(telescope = telescope_number(self.telescope.id)))]
    pub fn begin_time_slice(&mut self, calibration: CalibrationSet) -> Result<(), ConfigurationError> {
        calibration.validate(self.telescope.channels)?;
        self.calibration = calibration;
        let references = self
            .crate_jitter
            .layout()
            .camera_references(self.telescope.channels);
        for gain in GainState::ALL {
            self.classifier.classify(
                gain,
                ClassificationStage::TimeSlice,
                &self.calibration,
                ExternalStatus::default(),
                &references,
            )?;
        }
        Ok(())
    }

    /// Integrates an event in as many passes as configured.
    pub fn process_event<S, F>(&mut self, source: &S, fitter: &mut F) -> &EventOutputs
    where
        S: WaveformSource + ?Sized,
        F: ImageFitProvider + ?Sized,
    {
        if !self.parameters.double_pass {
            return self.process_single_pass(source);
        }
        self.process_first_pass(source);
        let fit = fitter.fit(&self.telescope, &self.outputs);
        self.process_second_pass(source, fit.as_ref())
    }

    /// Integrates an event once with the pass-1 windows.
    pub fn process_single_pass<S: WaveformSource + ?Sized>(&mut self, source: &S) -> &EventOutputs {
        self.integrate_first_pass(source, IntegrationPass::Single);
        &self.outputs
    }

    /// Integrates an event with the pass-1 windows. With double pass enabled
    /// window 2 is left for the second pass.
    pub fn process_first_pass<S: WaveformSource + ?Sized>(&mut self, source: &S) -> &EventOutputs {
        self.integrate_first_pass(source, IntegrationPass::First);
        &self.outputs
    }

    /// Re-integrates both windows around the arrival time predicted by the pass-1 image.
    #[tracing::instrument(skip_all, fields(
        telescope = telescope_number(self.telescope.id),
        event = source.event_number(),
        has_fit = fit.is_some(),
    ))]
    pub fn process_second_pass<S: WaveformSource + ?Sized>(
        &mut self,
        source: &S,
        fit: Option<&ImageFit>,
    ) -> &EventOutputs {
        if !self.uses_traces(source) {
            return &self.outputs;
        }
        let mean_arrival_time = self
            .outputs
            .mean_arrival_time
            .unwrap_or(self.planner.settings().start as Real);
        let settings = *self.planner.settings();

        for index in 0..self.trace_hits.len() {
            let TraceHit {
                hit,
                channel,
                gain,
                constants,
            } = self.trace_hits[index];
            let Some(samples) = source.samples(hit) else {
                continue;
            };
            let handler = self.handler(samples, &constants, gain);
            let predicted_time = fit.and_then(|fit| {
                self.telescope
                    .position(channel)
                    .and_then(|position| fit.predicted_time(position, self.parameters.max_time_gradient))
            });
            let input = SecondPassInput {
                predicted_time,
                mean_arrival_time,
                time_offset: constants.time_offset,
                crate_offset: self.outputs.crate_offsets[channel],
                gain,
            };
            let windows = self.planner.second_pass(&input, &handler, &self.levels);
            if windows.used_fallback {
                self.context.second_pass_fallback();
                counter!(SECOND_PASS_FALLBACKS).increment(1);
                trace!(channel, "Window placed at the mean arrival time");
            }

            self.outputs.sums[channel] = handler.sum(windows.window)
                * self
                    .low_gain
                    .correction(settings.length, windows.window.len(), gain);
            self.outputs.sums2[channel] = handler.sum(windows.window_2)
                * self
                    .low_gain
                    .correction(settings.length_2, windows.window_2.len(), gain);
            self.outputs.windows[channel] = windows.window;
            self.outputs.windows_2[channel] = windows.window_2;
        }

        self.gain_correct();
        counter!(EVENTS_PROCESSED, &[passes::get_label(IntegrationPass::Second)]).increment(1);
        &self.outputs
    }

    /// Logs the totals of the run.
    pub fn report(&self) {
        self.context.report();
    }

    fn uses_traces<S: WaveformSource + ?Sized>(&self, source: &S) -> bool {
        self.parameters.fadc_analysis && source.has_fadc_trace()
    }

    fn gain(&self, channel: ChannelId) -> GainState {
        GainState::from_low_gain(self.outputs.low_gain[channel])
    }

    fn skip(&mut self, error: ChannelError) {
        counter!(CHANNELS_SKIPPED, &[failures::get_label(error.failure_kind())]).increment(1);
        self.context.channel_error(&error);
    }

    /// Channel of a hit if it is in the camera, alive and calibrated.
    fn usable_channel<S: WaveformSource + ?Sized>(
        &mut self,
        source: &S,
        hit: usize,
    ) -> Option<(ChannelId, GainState, GainCalibration)> {
        let channels = self.telescope.channels;
        let channel = match source.hit_channel(hit) {
            Ok(channel) if channel < channels => channel,
            // crate references outside the camera are only timed
            Ok(channel) if self.crate_jitter.layout().reference_channels.contains(&channel) => {
                return None;
            }
            Ok(channel) => {
                self.skip(ChannelError::ChannelOutOfRange { channel, channels });
                return None;
            }
            Err(error) => {
                self.skip(error);
                return None;
            }
        };
        let gain = self.gain(channel);
        if self.classifier.is_dead(channel, gain) {
            return None;
        }
        match self.calibration.channel(channel, gain) {
            Ok(constants) => Some((channel, gain, *constants)),
            Err(error) => {
                self.skip(error);
                None
            }
        }
    }

    fn handler<'a>(
        &self,
        samples: &'a [Sample],
        constants: &GainCalibration,
        gain: GainState,
    ) -> TraceHandler<'a> {
        TraceHandler::new(samples, constants.pedestal, constants.pedestal_rms)
            .with_gain_multiplier(gain.is_low().then_some(self.parameters.low_gain_multiplier))
            .with_max_code(self.parameters.max_sample_code)
    }

    /// Resets the outputs and takes over the gain selection and zero suppression of the event.
    fn begin_event<S: WaveformSource + ?Sized>(&mut self, source: &S) {
        self.outputs.reset(source.event_number());
        self.integrated.fill(false);
        self.trace_hits.clear();
        for channel in 0..self.telescope.channels {
            let low_gain = source.is_low_gain(channel);
            self.outputs.low_gain[channel] = low_gain;
            self.outputs.zero_suppressed[channel] = source.is_zero_suppressed(channel);
            if low_gain && !self.classifier.is_dead(channel, GainState::Low) {
                self.outputs.n_low_gain += 1;
            }
        }
    }

    #[tracing::instrument(skip_all, fields(
        telescope = telescope_number(self.telescope.id),
        event = source.event_number(),
        ?pass,
    ))]
    fn integrate_first_pass<S: WaveformSource + ?Sized>(&mut self, source: &S, pass: IntegrationPass) {
        self.begin_event(source);
        let traces = self.uses_traces(source);

        for hit in 0..source.num_hits() {
            let Some((channel, gain, constants)) = self.usable_channel(source, hit) else {
                continue;
            };
            match source.samples(hit).filter(|_| traces) {
                Some(samples) => {
                    let handler = self.handler(samples, &constants, gain);
                    self.integrate_channel(channel, gain, &constants, &handler);
                    self.integrated[channel] = true;
                    self.trace_hits.push(TraceHit {
                        hit,
                        channel,
                        gain,
                        constants,
                    });
                }
                None => self.copy_pre_integrated(source, channel),
            }
        }

        self.outputs
            .pulse_timing_uncorrected
            .assign(&self.outputs.pulse_timing);
        if traces && self.crate_jitter.is_enabled() {
            let jitter = self.crate_jitter.measure(source, &self.calibration, &self.levels);
            self.crate_jitter
                .apply(&jitter, &mut self.outputs, &mut self.context);
        }
        self.timing_correct();
        self.outputs.mean_arrival_time = self.mean_arrival_time();
        self.gain_correct();

        if self.outputs.n_saturated_channels > 0 {
            counter!(SATURATED_CHANNELS).increment(self.outputs.n_saturated_channels as u64);
        }
        counter!(EVENTS_PROCESSED, &[passes::get_label(pass)]).increment(1);
        self.context.event_processed();
        debug!(
            low_gain = self.outputs.n_low_gain,
            saturated = self.outputs.n_saturated_channels,
            mean_arrival_time = ?self.outputs.mean_arrival_time,
            "Integrated event"
        );
    }

    /// Pass-1 sum, timing and trace diagnostics of one channel.
    fn integrate_channel(
        &mut self,
        channel: ChannelId,
        gain: GainState,
        constants: &GainCalibration,
        handler: &TraceHandler,
    ) {
        let settings = *self.planner.settings();
        let aligned = self.planner.aligned(constants.time_offset);
        let timing_window = if self.parameters.window_start_at_t0 {
            handler.full_window()
        } else {
            aligned
        };
        let timing = handler.pulse_timing(timing_window, handler.full_window(), &self.levels);
        for (slot, time) in self
            .outputs
            .pulse_timing
            .column_mut(channel)
            .iter_mut()
            .zip(timing.times())
        {
            *slot = *time;
        }

        let mut window = self.planner.shifted(aligned, constants.time_offset);
        if self.parameters.window_start_at_t0 {
            if let Some(tzero) = timing.tzero() {
                window = self.planner.starting_at(tzero);
            }
        }
        let sum = handler.sum(window) * self.low_gain.correction(settings.length, window.len(), gain);
        self.outputs.sums[channel] = sum;
        self.outputs.windows[channel] = window;

        let maximum = handler.maximum();
        self.outputs.trace_max[channel] = maximum.amplitude;
        self.outputs.trace_raw_max[channel] = maximum.raw;
        self.outputs.n_saturated[channel] = maximum.saturated;
        if maximum.saturated > 0 {
            self.outputs.n_saturated_channels += 1;
        }
        self.outputs.trace_average_time[channel] = handler.average_time(window);
        if self.parameters.characterize_pulse_shape {
            let (low, high) = (
                self.parameters.rise_fall_low_level,
                self.parameters.rise_fall_high_level,
            );
            self.outputs.rise_time[channel] = handler.rise_time(window, low, high);
            self.outputs.fall_time[channel] = handler.fall_time(window, high, low);
        }

        if !self.parameters.double_pass {
            let window_2 = self.planner.window_2_from(window.first);
            self.outputs.sums2[channel] = if window_2 == window {
                sum
            } else {
                handler.sum(window_2)
                    * self
                        .low_gain
                        .correction(settings.length_2, window_2.len(), gain)
            };
            self.outputs.windows_2[channel] = window_2;
        }
    }

    /// Copies the values of a channel integrated upstream.
    fn copy_pre_integrated<S: WaveformSource + ?Sized>(&mut self, source: &S, channel: ChannelId) {
        let Some(values) = source.pre_integrated(channel) else {
            return;
        };
        self.outputs.sums[channel] = values.sum;
        self.outputs.sums2[channel] = values.sum2;
        self.outputs.trace_max[channel] = values.trace_max;
        self.outputs.trace_raw_max[channel] = values.trace_raw_max;
        for (slot, time) in self
            .outputs
            .pulse_timing
            .column_mut(channel)
            .iter_mut()
            .zip(&values.pulse_timing)
        {
            *slot = Some(*time);
        }
    }

    /// Moves the corrected timing of integrated channels by their time offset.
    fn timing_correct(&mut self) {
        for channel in 0..self.telescope.channels {
            if !self.integrated[channel] {
                continue;
            }
            let gain = self.gain(channel);
            let Ok(constants) = self.calibration.channel(channel, gain) else {
                continue;
            };
            let offset = constants.time_offset;
            self.outputs
                .pulse_timing
                .column_mut(channel)
                .iter_mut()
                .for_each(|time| *time = time.map(|time| time - offset));
        }
    }

    /// Mean corrected T0 of the integrated channels.
    fn mean_arrival_time(&self) -> Option<Real> {
        let tzero_level = self.levels.tzero_index();
        let (n, total) = (0..self.telescope.channels)
            .filter(|&channel| self.integrated[channel])
            .filter_map(|channel| self.outputs.tzero(channel, tzero_level))
            .fold((0usize, 0.0), |(n, total), tzero| (n + 1, total + tzero));
        (n > 0).then(|| total / n as Real)
    }

    /// Divides the sums of integrated channels by their relative gain.
    fn gain_correct(&mut self) {
        if !self.parameters.gain_correction {
            return;
        }
        for channel in 0..self.telescope.channels {
            if !self.integrated[channel] {
                continue;
            }
            let gain = self.gain(channel);
            let relative_gain = self
                .calibration
                .channel(channel, gain)
                .map(|constants| constants.gain)
                .unwrap_or_default();
            if relative_gain > 0.0 && !self.classifier.is_dead(channel, gain) {
                self.outputs.sums[channel] /= relative_gain;
                self.outputs.sums2[channel] /= relative_gain;
            } else {
                self.outputs.sums[channel] = 0.0;
                self.outputs.sums2[channel] = 0.0;
            }
        }
    }
}
