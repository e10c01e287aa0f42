use crate::{Real, calibration::GainState};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::trace;

/// Rescales low-gain sums integrated over a window whose length differs from the
/// length the high/low gain ratio was measured for.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct LowGainCorrector {
    /// High/low gain ratio by summation window length.
    multipliers: BTreeMap<usize, Real>,
}

impl LowGainCorrector {
    pub fn new(multipliers: impl IntoIterator<Item = (usize, Real)>) -> Self {
        Self {
            multipliers: multipliers.into_iter().collect(),
        }
    }

    pub fn multiplier(&self, window_length: usize) -> Option<Real> {
        self.multipliers.get(&window_length).copied()
    }

    /// Factor applied to a sum over `actual_length` samples. It is 1 for high
    /// gain, for the reference length, and when either ratio is unknown.
    pub fn correction(&self, reference_length: usize, actual_length: usize, gain: GainState) -> Real {
        if !gain.is_low() || reference_length == actual_length {
            return 1.0;
        }
        match (
            self.multiplier(reference_length),
            self.multiplier(actual_length),
        ) {
            (Some(reference), Some(actual)) if reference > 0.0 => actual / reference,
            _ => {
                trace!(reference_length, actual_length, "No low gain multiplier");
                1.0
            }
        }
    }
}
