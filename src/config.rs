/// Startup configuration for the sequencer core
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub bpm: f64,
    pub steps_per_bar: u32,
    pub max_steps: usize,
    pub beats_per_bar: u32,
    pub clock_master: bool,
    pub sync_source: Option<String>,
    pub output_port: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            steps_per_bar: 16,
            max_steps: 64,
            beats_per_bar: 4,
            clock_master: true,
            sync_source: None,
            output_port: 0,
        }
    }
}

impl SequencerConfig {
    /// Parse a JSON document; missing keys fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.bpm > 0.0) {
            return Err(Error::Config(format!("bpm must be positive, got {}", self.bpm)));
        }
        if self.steps_per_bar == 0 {
            return Err(Error::Config("steps_per_bar must be at least 1".into()));
        }
        if self.max_steps == 0 {
            return Err(Error::Config("max_steps must be at least 1".into()));
        }
        if self.beats_per_bar == 0 {
            return Err(Error::Config("beats_per_bar must be at least 1".into()));
        }
        Ok(())
    }

    /// Length every channel starts with.
    pub fn initial_channel_length(&self) -> usize {
        (self.steps_per_bar as usize).min(self.max_steps)
    }
}
