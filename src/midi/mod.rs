/// MIDI output using midir
use midir::{MidiOutput, MidiOutputConnection};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result, SinkError};

pub mod clock;
pub mod input;
pub mod scales;

const NOTE_ON: u8 = 0x90;
const NOTE_OFF: u8 = 0x80;

/// System realtime messages used for clock and transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealtimeMessage {
    Clock,
    Start,
    Continue,
    Stop,
}

impl RealtimeMessage {
    pub fn status_byte(self) -> u8 {
        match self {
            RealtimeMessage::Clock => 0xF8,
            RealtimeMessage::Start => 0xFA,
            RealtimeMessage::Continue => 0xFB,
            RealtimeMessage::Stop => 0xFC,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RealtimeMessage::Clock => "clock",
            RealtimeMessage::Start => "start",
            RealtimeMessage::Continue => "continue",
            RealtimeMessage::Stop => "stop",
        }
    }

    /// Parse a raw message. Anything other than a realtime clock/transport
    /// byte yields `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.first()? {
            0xF8 => Some(RealtimeMessage::Clock),
            0xFA => Some(RealtimeMessage::Start),
            0xFB => Some(RealtimeMessage::Continue),
            0xFC => Some(RealtimeMessage::Stop),
            _ => None,
        }
    }
}

/// The MIDI output capability every timing loop writes to.
///
/// Implementations are called from several threads at once and must keep
/// each message intact.
pub trait MidiSink: Send + Sync {
    /// Sound `note` for `duration`. Must not block for the note's length.
    fn send_note(
        &self,
        note: u8,
        duration: Duration,
        channel: u8,
        velocity: u8,
    ) -> std::result::Result<(), SinkError>;

    fn send_raw_clock_message(&self, message: RealtimeMessage) -> std::result::Result<(), SinkError>;
}

type SharedConnection = Arc<Mutex<Option<MidiOutputConnection>>>;

pub struct MidiOutputDevice {
    connection: SharedConnection,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: Arc::new(Mutex::new(None)),
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new("SQNC MIDI Output") {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(&self, port_index: usize) -> Result<()> {
        let midi_out = MidiOutput::new("SQNC MIDI Output")
            .map_err(|e| Error::Midi(format!("Failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports.get(port_index).ok_or_else(|| {
            Error::Midi(format!(
                "Invalid port index {} ({} ports available)",
                port_index,
                ports.len()
            ))
        })?;
        let port_name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = midi_out
            .connect(port, "sqnc")
            .map_err(|e| Error::Midi(format!("Failed to connect: {}", e)))?;

        *lock(&self.connection) = Some(connection);
        log::info!("MIDI output connected: {}", port_name);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.connection).is_some()
    }

    pub fn disconnect(&self) {
        if let Some(connection) = lock(&self.connection).take() {
            connection.close();
            log::info!("MIDI output disconnected");
        }
    }
}

impl MidiSink for MidiOutputDevice {
    fn send_note(
        &self,
        note: u8,
        duration: Duration,
        channel: u8,
        velocity: u8,
    ) -> std::result::Result<(), SinkError> {
        if note > 127 || velocity > 127 || channel > 15 {
            return Err(SinkError(format!(
                "invalid note message: note {} velocity {} channel {}",
                note, velocity, channel
            )));
        }

        send(&self.connection, &[NOTE_ON | channel, note, velocity])?;

        // Schedule note off
        let connection = Arc::clone(&self.connection);
        thread::spawn(move || {
            thread::sleep(duration);
            if let Err(e) = send(&connection, &[NOTE_OFF | channel, note, velocity]) {
                log::warn!("{}", e);
            }
        });
        Ok(())
    }

    fn send_raw_clock_message(&self, message: RealtimeMessage) -> std::result::Result<(), SinkError> {
        send(&self.connection, &[message.status_byte()])
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(connection: &SharedConnection) -> std::sync::MutexGuard<'_, Option<MidiOutputConnection>> {
    connection.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write one message while holding the port lock. Disconnected ports drop it.
fn send(connection: &SharedConnection, message: &[u8]) -> std::result::Result<(), SinkError> {
    if let Some(ref mut conn) = *lock(connection) {
        conn.send(message)
            .map_err(|e| SinkError(format!("{:02X?}: {}", message, e)))?;
    }
    Ok(())
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}
