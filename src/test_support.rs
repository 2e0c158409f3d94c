/// Shared fakes for unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, SinkError};
use crate::midi::input::{ClockInput, InputConnection, RealtimeHandler};
use crate::midi::{MidiSink, RealtimeMessage};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentNote {
    pub note: u8,
    pub duration: Duration,
    pub channel: u8,
    pub velocity: u8,
}

/// Records everything sent to it; can be told to fail note sends.
#[derive(Debug, Default)]
pub struct RecordingSink {
    notes: Mutex<Vec<SentNote>>,
    clock: Mutex<Vec<RealtimeMessage>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.failing.store(true, Ordering::Relaxed);
        sink
    }

    pub fn notes(&self) -> Vec<SentNote> {
        self.notes.lock().unwrap().clone()
    }

    pub fn clock_messages(&self) -> Vec<RealtimeMessage> {
        self.clock.lock().unwrap().clone()
    }
}

impl MidiSink for RecordingSink {
    fn send_note(
        &self,
        note: u8,
        duration: Duration,
        channel: u8,
        velocity: u8,
    ) -> std::result::Result<(), SinkError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(SinkError("port unplugged".into()));
        }
        self.notes.lock().unwrap().push(SentNote {
            note,
            duration,
            channel,
            velocity,
        });
        Ok(())
    }

    fn send_raw_clock_message(&self, message: RealtimeMessage) -> std::result::Result<(), SinkError> {
        self.clock.lock().unwrap().push(message);
        Ok(())
    }
}

/// The connected port and its handler
type HandlerSlot = Arc<Mutex<Option<(String, RealtimeHandler)>>>;

/// Clock input whose messages are injected by the test.
pub struct ScriptedInput {
    ports: Vec<String>,
    handler: HandlerSlot,
}

impl ScriptedInput {
    pub fn new(ports: &[&str]) -> Self {
        Self {
            ports: ports.iter().map(|p| p.to_string()).collect(),
            handler: Arc::new(Mutex::new(None)),
        }
    }

    pub fn connected_port(&self) -> Option<String> {
        self.handler.lock().unwrap().as_ref().map(|(port, _)| port.clone())
    }

    pub fn inject(&self, message: RealtimeMessage) {
        if let Some((_, handler)) = self.handler.lock().unwrap().as_mut() {
            handler(message);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}

struct ScriptedConnection(HandlerSlot);

impl InputConnection for ScriptedConnection {
    fn close(self: Box<Self>) {
        self.0.lock().unwrap().take();
    }
}

impl ClockInput for ScriptedInput {
    fn available_inputs(&self) -> Vec<String> {
        self.ports.clone()
    }

    fn connect(&self, port_name: &str, handler: RealtimeHandler) -> Result<Box<dyn InputConnection>> {
        if !self.ports.iter().any(|p| p == port_name) {
            return Err(crate::Error::SourceNotFound(port_name.to_string()));
        }
        *self.handler.lock().unwrap() = Some((port_name.to_string(), handler));
        Ok(Box::new(ScriptedConnection(Arc::clone(&self.handler))))
    }
}
