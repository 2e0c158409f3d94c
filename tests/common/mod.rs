//! Fakes shared by the integration tests
//!
//! The crate's own test fakes are `#[cfg(test)]` and invisible from here,
//! so the clock input is repeated. The sink differs: it keeps notes and
//! realtime messages in one list to check ordering across threads.

#![allow(dead_code)]

use sqnc::{ClockInput, InputConnection, MidiSink, RealtimeHandler, RealtimeMessage, SinkError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sent {
    Note { note: u8, duration: Duration, channel: u8, velocity: u8 },
    Realtime(RealtimeMessage),
}

/// Records every message in arrival order, whichever thread sent it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<(u8, u8, u8)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Note { note, channel, velocity, .. } => Some((channel, note, velocity)),
                Sent::Realtime(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl MidiSink for RecordingSink {
    fn send_note(&self, note: u8, duration: Duration, channel: u8, velocity: u8) -> Result<(), SinkError> {
        self.sent.lock().unwrap().push(Sent::Note { note, duration, channel, velocity });
        Ok(())
    }

    fn send_raw_clock_message(&self, message: RealtimeMessage) -> Result<(), SinkError> {
        self.sent.lock().unwrap().push(Sent::Realtime(message));
        Ok(())
    }
}

type HandlerSlot = Arc<Mutex<Option<RealtimeHandler>>>;

/// Clock input driven by `inject`
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

    pub fn inject(&self, message: RealtimeMessage) {
        if let Some(handler) = self.handler.lock().unwrap().as_mut() {
            handler(message);
        }
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

    fn connect(&self, port_name: &str, handler: RealtimeHandler) -> sqnc::Result<Box<dyn InputConnection>> {
        if !self.ports.iter().any(|p| p == port_name) {
            return Err(sqnc::Error::SourceNotFound(port_name.to_string()));
        }
        *self.handler.lock().unwrap() = Some(handler);
        Ok(Box::new(ScriptedConnection(Arc::clone(&self.handler))))
    }
}
