/// Event bus - fans sequencer and clock notifications out to subscribers
///
/// Owned by the application root and handed to components as `Arc<EventBus>`.
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockEvent {
    /// Published every 6th pulse (one 16th note at 24 PPQN)
    Pulse { pulse: u64, tempo: f64, beat: u32, bar: u64 },
    Beat { beat: u32, bar: u64 },
    Bar { bar: u64 },
    Tempo { bpm: f64, source: ClockSource },
    Transport { message: &'static str, source: ClockSource },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StepAdvanced(usize),
    SequencerState { running: bool },
    ScalePlayback { running: bool },
    Clock(ClockEvent),
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Dropping the receiver unsubscribes.
    ///
    /// The channel is unbounded and the sequencer publishes on every step,
    /// so a subscriber must keep draining it (see [`poll_events`]) or drop it.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (sender, receiver) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Queue `event` on every live subscription. Never blocks; subscribers
    /// whose receiver was dropped are removed.
    pub fn publish(&self, event: Event) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Drain everything currently queued on a subscription without blocking.
pub fn poll_events(receiver: &Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
