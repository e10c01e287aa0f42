use crate::{Real, error::ConfigurationError};
use fadc_common::{ChannelId, TelescopeId};
use serde::Deserialize;

/// Camera coordinates of a pixel, in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct PixelPosition {
    pub x: Real,
    pub y: Real,
}

/// Nominal summation window of a telescope, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WindowSettings {
    /// First sample of the pass-1 window before time-offset alignment.
    pub start: i64,
    /// Length of window 1 (the short window used for image charges).
    pub length: usize,
    /// Length of window 2 (used for low-gain and large pulses).
    pub length_2: usize,
    /// Constant shift applied to every window start.
    pub shift: i64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            start: 2,
            length: 6,
            length_2: 12,
            shift: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Telescope {
    pub id: TelescopeId,
    pub channels: usize,
    /// Samples per trace.
    pub samples: usize,
    #[serde(default)]
    pub window: WindowSettings,
    /// Positions of the pixels, indexed by channel. May be empty when no
    /// second pass is run.
    #[serde(default)]
    pub pixel_positions: Vec<PixelPosition>,
}

impl Telescope {
    pub fn new(id: TelescopeId, channels: usize, samples: usize) -> Self {
        Self {
            id,
            channels,
            samples,
            window: WindowSettings::default(),
            pixel_positions: Vec::new(),
        }
    }

    pub fn with_window(mut self, window: WindowSettings) -> Self {
        self.window = window;
        self
    }

    pub fn with_pixel_positions(mut self, pixel_positions: Vec<PixelPosition>) -> Self {
        self.pixel_positions = pixel_positions;
        self
    }

    pub fn position(&self, channel: ChannelId) -> Option<PixelPosition> {
        self.pixel_positions.get(channel).copied()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.channels == 0 {
            return Err(ConfigurationError::NoChannels(self.id));
        }
        if self.samples == 0 {
            return Err(ConfigurationError::NoSamples(self.id));
        }
        Ok(())
    }
}
