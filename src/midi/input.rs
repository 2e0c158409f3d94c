/// MIDI clock input - external sync source for slave mode

use midir::{MidiInput, MidiInputConnection};

use super::RealtimeMessage;
use crate::error::{Error, Result};

pub type RealtimeHandler = Box<dyn FnMut(RealtimeMessage) + Send + 'static>;

/// An open input subscription. Closing (or dropping) it stops callbacks.
pub trait InputConnection: Send {
    fn close(self: Box<Self>);
}

/// Source of external clock and transport messages
pub trait ClockInput: Send + Sync {
    fn available_inputs(&self) -> Vec<String>;

    /// Open `port_name` and dispatch every realtime message to `handler`
    /// on the input's own thread.
    fn connect(&self, port_name: &str, handler: RealtimeHandler) -> Result<Box<dyn InputConnection>>;
}

impl InputConnection for MidiInputConnection<()> {
    fn close(self: Box<Self>) {
        let _ = (*self).close();
    }
}

/// `ClockInput` backed by the system's MIDI inputs
#[derive(Debug, Default, Clone, Copy)]
pub struct MidirClockInput;

impl MidirClockInput {
    pub fn new() -> Self {
        Self
    }

    fn open() -> Result<MidiInput> {
        let mut midi_in = MidiInput::new("SQNC MIDI Clock")
            .map_err(|e| Error::Midi(format!("Midi init error: {}", e)))?;
        // Only clock and transport bytes are of interest
        midi_in.ignore(midir::Ignore::Sysex);
        Ok(midi_in)
    }
}

impl ClockInput for MidirClockInput {
    fn available_inputs(&self) -> Vec<String> {
        match Self::open() {
            Ok(midi_in) => midi_in
                .ports()
                .iter()
                .filter_map(|p| midi_in.port_name(p).ok())
                .collect(),
            Err(_) => vec![],
        }
    }

    fn connect(&self, port_name: &str, mut handler: RealtimeHandler) -> Result<Box<dyn InputConnection>> {
        let midi_in = Self::open()?;

        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_in
                    .port_name(p)
                    .map(|name| name == port_name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| Error::SourceNotFound(port_name.to_string()))?;

        let connection = midi_in
            .connect(
                port,
                "sqnc-clock-input",
                move |_timestamp, message, _| {
                    if let Some(message) = RealtimeMessage::from_bytes(message) {
                        handler(message);
                    }
                },
                (),
            )
            .map_err(|e| Error::Midi(format!("MIDI connection failed: {}", e)))?;

        log::info!("Listening for MIDI clock on {}", port_name);
        Ok(Box::new(connection))
    }
}
