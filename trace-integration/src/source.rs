use crate::{
    Real,
    error::ChannelError,
    event::{EventOutputs, ImageFit},
    telescope::Telescope,
};
use fadc_common::{ChannelId, EventNumber, Sample};
use std::collections::HashMap;

/// Charge and timing integrated before the data reached this stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreIntegrated {
    pub sum: Real,
    pub sum2: Real,
    /// Arrival times at the recorded timing levels, which may be fewer or more
    /// than the levels configured here.
    pub pulse_timing: Vec<Real>,
    pub trace_max: Real,
    pub trace_raw_max: Sample,
}

/// Access to the hits of the current event of one telescope.
pub trait WaveformSource {
    fn event_number(&self) -> EventNumber;

    fn num_hits(&self) -> usize;

    fn hit_channel(&self, hit: usize) -> Result<ChannelId, ChannelError>;

    /// Position in the hit list of a channel, `None` if it was not read out.
    fn hit_index(&self, channel: ChannelId) -> Option<usize>;

    /// The data carries digitised traces. Pre-integrated formats do not.
    fn has_fadc_trace(&self) -> bool;

    /// Trace of a hit, `None` if no samples were recorded for it.
    fn samples(&self, hit: usize) -> Option<&[Sample]>;

    fn is_low_gain(&self, channel: ChannelId) -> bool;

    fn is_zero_suppressed(&self, channel: ChannelId) -> bool;

    fn pre_integrated(&self, channel: ChannelId) -> Option<&PreIntegrated>;
}

/// Fits the pass-1 image of an event. Returns `None` when there is no usable image.
pub trait ImageFitProvider {
    fn fit(&mut self, telescope: &Telescope, outputs: &EventOutputs) -> Option<ImageFit>;
}

impl<F> ImageFitProvider for F
where
    F: FnMut(&Telescope, &EventOutputs) -> Option<ImageFit>,
{
    fn fit(&mut self, telescope: &Telescope, outputs: &EventOutputs) -> Option<ImageFit> {
        self(telescope, outputs)
    }
}

/// An event held in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordedEvent {
    event_number: EventNumber,
    hits: Vec<ChannelId>,
    traces: Vec<Option<Vec<Sample>>>,
    low_gain: Vec<ChannelId>,
    zero_suppressed: Vec<ChannelId>,
    pre_integrated: HashMap<ChannelId, PreIntegrated>,
}

impl RecordedEvent {
    pub fn new(event_number: EventNumber) -> Self {
        Self {
            event_number,
            ..Default::default()
        }
    }

    pub fn with_trace(mut self, channel: ChannelId, samples: Vec<Sample>) -> Self {
        self.hits.push(channel);
        self.traces.push(Some(samples));
        self
    }

    pub fn with_pre_integrated(mut self, channel: ChannelId, values: PreIntegrated) -> Self {
        if !self.hits.contains(&channel) {
            self.hits.push(channel);
            self.traces.push(None);
        }
        self.pre_integrated.insert(channel, values);
        self
    }

    pub fn with_low_gain(mut self, channel: ChannelId) -> Self {
        self.low_gain.push(channel);
        self
    }

    pub fn with_zero_suppressed(mut self, channel: ChannelId) -> Self {
        self.zero_suppressed.push(channel);
        self
    }
}

impl WaveformSource for RecordedEvent {
    fn event_number(&self) -> EventNumber {
        self.event_number
    }

    fn num_hits(&self) -> usize {
        self.hits.len()
    }

    fn hit_channel(&self, hit: usize) -> Result<ChannelId, ChannelError> {
        self.hits
            .get(hit)
            .copied()
            .ok_or(ChannelError::HitIndexOutOfRange {
                hit,
                hits: self.hits.len(),
            })
    }

    fn hit_index(&self, channel: ChannelId) -> Option<usize> {
        self.hits.iter().position(|&hit| hit == channel)
    }

    fn has_fadc_trace(&self) -> bool {
        self.traces.iter().any(Option::is_some)
    }

    fn samples(&self, hit: usize) -> Option<&[Sample]> {
        self.traces.get(hit)?.as_deref()
    }

    fn is_low_gain(&self, channel: ChannelId) -> bool {
        self.low_gain.contains(&channel)
    }

    fn is_zero_suppressed(&self, channel: ChannelId) -> bool {
        self.zero_suppressed.contains(&channel)
    }

    fn pre_integrated(&self, channel: ChannelId) -> Option<&PreIntegrated> {
        self.pre_integrated.get(&channel)
    }
}
