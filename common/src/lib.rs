pub mod metrics;
pub mod tracer;

pub use tracer::{TracerEngine, TracerError, TracerOptions};

pub type TelescopeId = u32;
pub type ChannelId = usize;
pub type Sample = u16;
pub type EventNumber = u64;

/// Converts a zero-based telescope index to the one-based number used in
/// operator-facing messages.
pub fn telescope_number(telescope: TelescopeId) -> u32 {
    telescope + 1
}
