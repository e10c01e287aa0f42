use anyhow::Result;
use clap::Parser;
use fadc_common::{
    EventNumber, TracerOptions, init_tracer,
    metrics::{
        component_info_metric,
        metric_names::{
            CHANNELS_SKIPPED, CRATE_JITTER_WARNINGS, DEAD_CHANNELS, EVENTS_PROCESSED,
            SATURATED_CHANNELS, SECOND_PASS_FALLBACKS,
        },
    },
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{net::SocketAddr, path::PathBuf};
use trace_integration::{
    CalibrationSet, DeadChannelThresholds, EventOutputs, IntegrationParameters, Telescope, TraceIntegrationEngine,
    simulation::{EventSimulator, RunDescription},
};
use tracing::{debug, info, level_filters::LevelFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// JSON file describing the telescope, its calibration and the simulated events.
    #[clap(long)]
    run_description: PathBuf,

    /// Number of events to simulate.
    #[clap(long, default_value = "100")]
    events: EventNumber,

    /// Seed of the waveform simulation.
    #[clap(long, default_value = "0")]
    seed: u64,

    #[clap(long, env, default_value = "127.0.0.1:9090")]
    observability_address: SocketAddr,

    #[command(flatten)]
    parameters: IntegrationParameters,

    /// Used unless the run description sets its own thresholds.
    #[command(flatten)]
    thresholds: DeadChannelThresholds,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let _tracer = init_tracer!(TracerOptions {
        default_level: LevelFilter::INFO,
        ..Default::default()
    })?;

    PrometheusBuilder::new()
        .with_http_listener(args.observability_address)
        .install()?;
    component_info_metric("trace-integration");
    describe_metrics();

    let description = RunDescription::load(&args.run_description)?;
    let mut setup = description.run_setup(args.parameters.clone());
    apply_thresholds(&mut setup.calibration, &args.thresholds);
    let mut engine = TraceIntegrationEngine::new(setup)?;

    let mut simulator = EventSimulator::new(&description, &args.parameters, args.seed);
    let mut time_slices = description.time_slices.iter().peekable();
    let mut fitter = |_: &Telescope, _: &EventOutputs| description.image_fit;

    for event_number in 0..args.events {
        while let Some(slice) = time_slices.next_if(|slice| slice.first_event <= event_number) {
            let mut calibration = slice.calibration.clone();
            apply_thresholds(&mut calibration, &args.thresholds);
            engine.begin_time_slice(calibration)?;
        }
        let event = simulator.event(event_number)?;
        let outputs = engine.process_event(&event, &mut fitter);
        debug!(
            event = event_number,
            total_charge = outputs.sums.sum(),
            low_gain = outputs.n_low_gain,
            "Event processed"
        );
    }

    let dead = engine
        .dead_channel_table()
        .iter()
        .filter(|(high, low)| *high != 0 || *low != 0)
        .count();
    info!(events = args.events, dead, "Run finished");
    engine.report();
    Ok(())
}

/// Command line thresholds replace the defaults of a calibration without thresholds of its own.
fn apply_thresholds(calibration: &mut CalibrationSet, thresholds: &DeadChannelThresholds) {
    if calibration.dead_thresholds == DeadChannelThresholds::default() {
        calibration.dead_thresholds = thresholds.clone();
    }
}

fn describe_metrics() {
    describe_counter!(
        EVENTS_PROCESSED,
        metrics::Unit::Count,
        "Number of integration passes run, by pass"
    );
    describe_counter!(
        CHANNELS_SKIPPED,
        metrics::Unit::Count,
        "Channels skipped for the current event, by failure kind"
    );
    describe_gauge!(
        DEAD_CHANNELS,
        metrics::Unit::Count,
        "Number of dead channels, by gain"
    );
    describe_counter!(
        SATURATED_CHANNELS,
        metrics::Unit::Count,
        "Channels with at least one saturated sample"
    );
    describe_counter!(
        CRATE_JITTER_WARNINGS,
        metrics::Unit::Count,
        "Crate offsets beyond the warning threshold"
    );
    describe_counter!(
        SECOND_PASS_FALLBACKS,
        metrics::Unit::Count,
        "Second-pass windows placed at the mean arrival time"
    );
}
