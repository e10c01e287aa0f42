use crate::error::ChannelError;
use fadc_common::metrics::failures::FailureKind;
use std::collections::HashMap;
use tracing::{info, warn};

/// Counts occurrences of a condition that is only logged the first time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogThrottle {
    occurrences: u64,
}

impl LogThrottle {
    /// Records an occurrence, returns `true` if it should be logged.
    pub fn record(&mut self) -> bool {
        self.occurrences += 1;
        self.occurrences == 1
    }

    pub fn occurrences(&self) -> u64 {
        self.occurrences
    }

    pub fn suppressed(&self) -> u64 {
        self.occurrences.saturating_sub(1)
    }
}

/// State of the engine that lives for a whole run.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    channel_errors: HashMap<FailureKind, LogThrottle>,
    crate_jitter: LogThrottle,
    second_pass_fallbacks: u64,
    events_processed: u64,
}

impl EngineContext {
    /// Records a skipped channel and logs the first skip of each kind.
    pub fn channel_error(&mut self, error: &ChannelError) {
        if self
            .channel_errors
            .entry(error.failure_kind())
            .or_default()
            .record()
        {
            warn!("{error}, skipping channel (further occurrences are counted only)");
        }
    }

    /// Records a large crate offset, returns `true` if it should be logged.
    pub fn crate_jitter_warning(&mut self) -> bool {
        self.crate_jitter.record()
    }

    pub fn second_pass_fallback(&mut self) {
        self.second_pass_fallbacks += 1;
    }

    pub fn event_processed(&mut self) {
        self.events_processed += 1;
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn second_pass_fallbacks(&self) -> u64 {
        self.second_pass_fallbacks
    }

    pub fn channel_errors(&self, kind: FailureKind) -> u64 {
        self.channel_errors
            .get(&kind)
            .map(LogThrottle::occurrences)
            .unwrap_or_default()
    }

    pub fn crate_jitter_warnings(&self) -> u64 {
        self.crate_jitter.occurrences()
    }

    /// Logs the totals of the run.
    pub fn report(&self) {
        info!(
            events = self.events_processed,
            second_pass_fallbacks = self.second_pass_fallbacks,
            "Trace integration finished"
        );
        for (kind, throttle) in &self.channel_errors {
            info!(
                ?kind,
                total = throttle.occurrences(),
                suppressed = throttle.suppressed(),
                "Skipped channels"
            );
        }
        if self.crate_jitter.occurrences() > 0 {
            info!(
                total = self.crate_jitter.occurrences(),
                suppressed = self.crate_jitter.suppressed(),
                "Large crate offsets"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_logs_first_occurrence_only() {
        let mut throttle = LogThrottle::default();
        assert!(throttle.record());
        assert!(!throttle.record());
        assert!(!throttle.record());
        assert_eq!(throttle.occurrences(), 3);
        assert_eq!(throttle.suppressed(), 2);
    }

    #[test]
    fn channel_errors_counted_by_kind() {
        let mut context = EngineContext::default();
        let error = ChannelError::ChannelOutOfRange {
            channel: 600,
            channels: 500,
        };
        context.channel_error(&error);
        context.channel_error(&error);
        assert_eq!(context.channel_errors(FailureKind::ChannelOutOfRange), 2);
        assert_eq!(context.channel_errors(FailureKind::MissingCalibration), 0);
    }
}
