/// Error types shared by every sequencer component
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a MIDI output sink.
///
/// Playback loops absorb these: they are logged and the loop moves on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("MIDI send failed: {0}")]
pub struct SinkError(pub String);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("Channel must be between 0 and 15, got {0}")]
    ChannelOutOfRange(u8),

    #[error("Step must be between 0 and {}, got {step}", .max_steps - 1)]
    StepOutOfRange { step: usize, max_steps: usize },

    #[error("Note must be between 0 and 127, got {0}")]
    NoteOutOfRange(u8),

    #[error("Velocity must be between 0 and 127, got {0}")]
    VelocityOutOfRange(u8),

    #[error("BPM must be greater than 0, got {0}")]
    InvalidBpm(f64),

    #[error("Length must be between 1 and {max_steps}, got {length}")]
    LengthOutOfRange { length: usize, max_steps: usize },

    #[error("Chance must be between 0.0 and 1.0, got {0}")]
    ChanceOutOfRange(f64),

    #[error("MIDI input port not found: {0}")]
    SourceNotFound(String),

    #[error("No sync source set for slave mode")]
    NoSyncSource,

    #[error("Unknown scale type: {0}")]
    UnknownScaleType(String),

    #[error("Invalid root note '{0}'")]
    UnknownRootNote(String),

    #[error("Scale has no notes")]
    EmptyScale,

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True for every value rejected at the API boundary for being out of bounds.
    pub fn is_range_error(&self) -> bool {
        matches!(
            self,
            Error::ChannelOutOfRange(_)
                | Error::StepOutOfRange { .. }
                | Error::NoteOutOfRange(_)
                | Error::VelocityOutOfRange(_)
                | Error::InvalidBpm(_)
                | Error::LengthOutOfRange { .. }
                | Error::ChanceOutOfRange(_)
        )
    }
}
