/// SQNC - A multi-channel MIDI step sequencer library
///
/// This library provides the timing core of a hardware step sequencer:
/// - Per-channel step patterns with independent playback lengths
/// - A step playback loop that drives a shared MIDI output
/// - Randomised scale playback and pattern generation
/// - A master/slave MIDI clock with tempo following
/// - Audio preview output for auditioning without MIDI hardware

pub mod config;
pub mod error;
pub mod events;
pub mod midi;
pub mod sequencer;

#[cfg(feature = "audio")]
pub mod audio;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::SequencerConfig;
pub use error::{Error, Result, SinkError};
pub use events::{poll_events, ClockEvent, ClockSource, Event, EventBus};
pub use midi::clock::{ClockState, MidiClock, PPQN};
pub use midi::input::{ClockInput, InputConnection, MidirClockInput, RealtimeHandler};
pub use midi::scales::{NoteName, Scale, ScaleType};
pub use midi::{midi_note_name, MidiOutputDevice, MidiSink, RealtimeMessage};
pub use sequencer::playback::{StepSequencer, StepTiming};
pub use sequencer::scale_player::{apply_random_pattern_with, ScalePlayer};
pub use sequencer::{PatternSnapshot, PatternStorage, PatternStore, Step, StepTrigger};

#[cfg(feature = "audio")]
pub use audio::AudioPreview;
