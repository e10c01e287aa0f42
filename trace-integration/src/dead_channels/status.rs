use std::fmt;
use strum::{EnumIter, IntoEnumIterator};
use tracing::warn;

/// Reason for a channel to be excluded. The discriminant is the bit position
/// in the packed status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, strum::Display)]
#[repr(u8)]
pub enum DeadReason {
    #[strum(to_string = "pedestal out of range")]
    PedestalRange = 1,
    #[strum(to_string = "pedestal variation out of range")]
    PedestalVarianceRange = 2,
    #[strum(to_string = "pedestal variation too small compared to camera")]
    PedestalVarianceSmall = 3,
    #[strum(to_string = "pedestal variation too large compared to camera")]
    PedestalVarianceLarge = 4,
    #[strum(to_string = "gain out of range")]
    GainRange = 5,
    #[strum(to_string = "gain variation out of range")]
    GainVariance = 6,
    #[strum(to_string = "gain deviates from nominal")]
    GainDeviation = 7,
    #[strum(to_string = "time offset out of range")]
    TimeOffset = 8,
    #[strum(to_string = "crate reference channel")]
    CrateReference = 9,
    #[strum(to_string = "random dead channel")]
    Random = 10,
    #[strum(to_string = "disabled in pixel status")]
    PixelStatus = 11,
    #[strum(to_string = "dead in simulation")]
    SimulationTruth = 12,
    #[strum(to_string = "L1 rate out of range")]
    L1Rate = 13,
    #[strum(to_string = "high voltage out of range")]
    HighVoltage = 14,
}

impl DeadReason {
    pub fn bit(self) -> u32 {
        1 << (self as u8)
    }

    /// Reasons re-tested at every pedestal time slice.
    pub fn is_pedestal(self) -> bool {
        matches!(
            self,
            DeadReason::PedestalRange
                | DeadReason::PedestalVarianceRange
                | DeadReason::PedestalVarianceSmall
                | DeadReason::PedestalVarianceLarge
        )
    }
}

/// Set of reasons for which a channel is dead in one gain state. Empty means alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeadStatus(u32);

impl DeadStatus {
    pub const ALIVE: DeadStatus = DeadStatus(0);

    /// Decodes a packed status code from an external source. Bits that do not
    /// correspond to a known reason are dropped.
    pub fn from_packed(code: u32) -> Self {
        let known = DeadReason::iter().fold(0, |mask, reason| mask | reason.bit());
        if code & !known != 0 {
            warn!(code, unknown = code & !known, "Dropping unknown dead channel bits");
        }
        DeadStatus(code & known)
    }

    pub fn code(&self) -> u32 {
        self.0
    }

    pub fn set(&mut self, reason: DeadReason) {
        self.0 |= reason.bit();
    }

    pub fn clear(&mut self, reason: DeadReason) {
        self.0 &= !reason.bit();
    }

    pub fn contains(&self, reason: DeadReason) -> bool {
        self.0 & reason.bit() != 0
    }

    pub fn is_dead(&self) -> bool {
        self.0 != 0
    }

    pub fn clear_pedestal_reasons(&mut self) {
        DeadReason::iter()
            .filter(|reason| reason.is_pedestal())
            .for_each(|reason| self.clear(reason));
    }

    pub fn reasons(&self) -> impl Iterator<Item = DeadReason> + '_ {
        DeadReason::iter().filter(|reason| self.contains(*reason))
    }
}

impl From<DeadReason> for DeadStatus {
    fn from(reason: DeadReason) -> Self {
        DeadStatus(reason.bit())
    }
}

impl fmt::Display for DeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_dead() {
            return write!(f, "alive");
        }
        for (i, reason) in self.reasons().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{reason}")?;
        }
        Ok(())
    }
}
