use metrics::{describe_gauge, gauge};

pub fn component_info_metric(name: &'static str) {
    static NAME: &str = "fadc_pipeline_component_info";

    describe_gauge!(NAME, "Basic information about the component");

    let git_rev = option_env!("GIT_VERSION").unwrap_or("unknown");
    gauge!(NAME, "component" => name, "git_version" => git_rev).set(1);
}

pub mod metric_names {
    use const_format::concatcp;

    pub const METRIC_NAME_PREFIX: &str = "fadc_pipeline_";

    pub const EVENTS_PROCESSED: &str = concatcp!(METRIC_NAME_PREFIX, "events_processed");
    pub const CHANNELS_SKIPPED: &str = concatcp!(METRIC_NAME_PREFIX, "channels_skipped");
    pub const DEAD_CHANNELS: &str = concatcp!(METRIC_NAME_PREFIX, "dead_channels");
    pub const SATURATED_CHANNELS: &str = concatcp!(METRIC_NAME_PREFIX, "saturated_channels");
    pub const CRATE_JITTER_WARNINGS: &str =
        concatcp!(METRIC_NAME_PREFIX, "crate_jitter_warnings");
    pub const SECOND_PASS_FALLBACKS: &str =
        concatcp!(METRIC_NAME_PREFIX, "second_pass_fallbacks");
}

pub mod passes {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum IntegrationPass {
        Single,
        First,
        Second,
    }

    // Label building function
    pub fn get_label(pass: IntegrationPass) -> (&'static str, &'static str) {
        (
            "pass",
            match pass {
                IntegrationPass::Single => "single",
                IntegrationPass::First => "first",
                IntegrationPass::Second => "second",
            },
        )
    }
}

pub mod failures {
    #[derive(Debug, Clone, Copy, Eq, Hash, PartialEq)]
    pub enum FailureKind {
        HitIndexOutOfRange,
        ChannelOutOfRange,
        MissingCalibration,
    }

    // Label building function
    pub fn get_label(failure_kind: FailureKind) -> (&'static str, &'static str) {
        (
            "failure_kind",
            match failure_kind {
                FailureKind::HitIndexOutOfRange => "hit_index_out_of_range",
                FailureKind::ChannelOutOfRange => "channel_out_of_range",
                FailureKind::MissingCalibration => "missing_calibration",
            },
        )
    }
}

pub mod gains {
    // Label building function
    pub fn get_label(low_gain: bool) -> (&'static str, &'static str) {
        ("gain", if low_gain { "low" } else { "high" })
    }
}
