use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub struct TracerOptions {
    /// Level used when `RUST_LOG` is not set.
    pub default_level: LevelFilter,
    pub ansi: bool,
}

impl Default for TracerOptions {
    fn default() -> Self {
        Self {
            default_level: LevelFilter::INFO,
            ansi: true,
        }
    }
}

/// Installs the stdout subscriber for a component.
/// The filter is taken from `RUST_LOG`, falling back to `TracerOptions::default_level`.
pub struct TracerEngine {
    service_name: String,
}

impl TracerEngine {
    pub fn new(options: TracerOptions, service_name: &str) -> Result<Self, TracerError> {
        let stdout_tracer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(options.ansi);

        let log_filter = EnvFilter::builder()
            .with_default_directive(options.default_level.into())
            .from_env_lossy();

        let subscriber =
            tracing_subscriber::Registry::default().with(stdout_tracer.with_filter(log_filter));

        tracing::subscriber::set_global_default(subscriber)?;

        Ok(Self {
            service_name: service_name.to_owned(),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Should be called at the start of each binary.
#[macro_export]
macro_rules! init_tracer {
    ($options:expr) => {
        $crate::TracerEngine::new($options, env!("CARGO_BIN_NAME"))
    };
}
