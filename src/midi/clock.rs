/// MIDI clock - generates (master) or follows (slave) 24 PPQN timing pulses
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::input::{ClockInput, InputConnection};
use super::{MidiSink, RealtimeMessage};
use crate::error::{Error, Result};
use crate::events::{ClockEvent, ClockSource, Event, EventBus};
use crate::sequencer::playback::beat_division;

/// Pulses per quarter note
pub const PPQN: u32 = 24;
pub const DEFAULT_TEMPO: f64 = 120.0;
pub const DEFAULT_BEATS_PER_BAR: u32 = 4;

/// One pulse event per 16th note
const PULSES_PER_EVENT: u64 = 6;
/// Weight kept from the previous tempo estimate on each slave pulse
const TEMPO_SMOOTHING: f64 = 0.95;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    RunningMaster,
    RunningSlave,
}

#[derive(Debug)]
struct Counters {
    tempo: f64,
    pulse_count: u64,
    current_beat: u32,
    current_bar: u64,
    last_pulse: Option<Instant>,
}

/// Pulse bookkeeping shared by the master thread, the slave input callback
/// and the owning `MidiClock`.
#[derive(Debug)]
pub(crate) struct ClockCore {
    counters: Mutex<Counters>,
    beats_per_bar: AtomicU32,
    is_master: AtomicBool,
    events: Arc<EventBus>,
}

impl ClockCore {
    fn new(events: Arc<EventBus>) -> Self {
        Self {
            counters: Mutex::new(Counters {
                tempo: DEFAULT_TEMPO,
                pulse_count: 0,
                current_beat: 0,
                current_bar: 0,
                last_pulse: None,
            }),
            beats_per_bar: AtomicU32::new(DEFAULT_BEATS_PER_BAR),
            is_master: AtomicBool::new(true),
            events,
        }
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tempo(&self) -> f64 {
        self.counters().tempo
    }

    fn set_tempo(&self, bpm: f64) {
        self.counters().tempo = bpm;
    }

    /// Falls back to the default tempo if a slave estimate drifted out of range.
    fn pulse_interval(&self) -> Duration {
        beat_division(self.tempo(), PPQN as f64)
            .or_else(|| beat_division(DEFAULT_TEMPO, PPQN as f64))
            .unwrap_or(IDLE_SLEEP)
    }

    fn reset_counters(&self) {
        let mut counters = self.counters();
        counters.pulse_count = 0;
        counters.current_beat = 0;
        counters.current_bar = 0;
        counters.last_pulse = None;
    }

    /// Count one pulse received at `now`. In slave mode the tempo estimate
    /// is low-pass filtered towards the observed pulse rate.
    pub(crate) fn handle_pulse_at(&self, now: Instant) {
        let beats_per_bar = self.beats_per_bar.load(Ordering::Relaxed).max(1);
        let is_master = self.is_master.load(Ordering::Relaxed);
        let mut published = Vec::with_capacity(3);

        {
            let mut counters = self.counters();

            if let Some(last) = counters.last_pulse {
                let pulse_time = now.saturating_duration_since(last).as_secs_f64();
                if !is_master && pulse_time > 0.0 {
                    let estimated = 60.0 / (pulse_time * PPQN as f64);
                    counters.tempo =
                        counters.tempo * TEMPO_SMOOTHING + estimated * (1.0 - TEMPO_SMOOTHING);
                }
            }
            counters.last_pulse = Some(now);
            counters.pulse_count += 1;

            if counters.pulse_count % PPQN as u64 == 0 {
                counters.current_beat += 1;
                if counters.current_beat >= beats_per_bar {
                    counters.current_beat = 0;
                    counters.current_bar += 1;
                    published.push(ClockEvent::Bar {
                        bar: counters.current_bar,
                    });
                }
                published.push(ClockEvent::Beat {
                    beat: counters.current_beat,
                    bar: counters.current_bar,
                });
            }

            if counters.pulse_count % PULSES_PER_EVENT == 0 {
                published.push(ClockEvent::Pulse {
                    pulse: counters.pulse_count,
                    tempo: counters.tempo,
                    beat: counters.current_beat,
                    bar: counters.current_bar,
                });
            }
        }

        for event in published {
            self.events.publish(Event::Clock(event));
        }
    }

    fn handle_external(&self, message: RealtimeMessage) {
        match message {
            RealtimeMessage::Clock => self.handle_pulse_at(Instant::now()),
            RealtimeMessage::Start => {
                self.reset_counters();
                log::debug!("Received MIDI start");
                self.publish_transport(message);
            }
            RealtimeMessage::Stop | RealtimeMessage::Continue => {
                log::debug!("Received MIDI {}", message.as_str());
                self.publish_transport(message);
            }
        }
    }

    fn publish_transport(&self, message: RealtimeMessage) {
        self.events.publish(Event::Clock(ClockEvent::Transport {
            message: message.as_str(),
            source: ClockSource::External,
        }));
    }
}

struct MasterLoop {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

struct SlaveListener {
    active: Arc<AtomicBool>,
    connection: Box<dyn InputConnection>,
}

/// Master/slave MIDI clock.
///
/// Runs independently of the step sequencer's own timer. The mode is fixed
/// while running; `set_master` restarts the clock to switch.
pub struct MidiClock {
    sink: Arc<dyn MidiSink>,
    input: Arc<dyn ClockInput>,
    core: Arc<ClockCore>,
    state: ClockState,
    sync_source: Option<String>,
    master: Option<MasterLoop>,
    slave: Option<SlaveListener>,
}

impl MidiClock {
    pub fn new(sink: Arc<dyn MidiSink>, input: Arc<dyn ClockInput>, events: Arc<EventBus>) -> Self {
        Self {
            sink,
            input,
            core: Arc::new(ClockCore::new(events)),
            state: ClockState::Stopped,
            sync_source: None,
            master: None,
            slave: None,
        }
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != ClockState::Stopped
    }

    pub fn is_master(&self) -> bool {
        self.core.is_master.load(Ordering::Relaxed)
    }

    pub fn tempo(&self) -> f64 {
        self.core.tempo()
    }

    pub fn pulse_count(&self) -> u64 {
        self.core.counters().pulse_count
    }

    pub fn current_beat(&self) -> u32 {
        self.core.counters().current_beat
    }

    pub fn current_bar(&self) -> u64 {
        self.core.counters().current_bar
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.core.beats_per_bar.load(Ordering::Relaxed)
    }

    pub fn set_beats_per_bar(&self, beats: u32) -> Result<()> {
        if beats == 0 {
            return Err(Error::Config("beats_per_bar must be at least 1".into()));
        }
        self.core.beats_per_bar.store(beats, Ordering::Relaxed);
        Ok(())
    }

    pub fn sync_source(&self) -> Option<&str> {
        self.sync_source.as_deref()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        if self.is_master() {
            log::info!("Starting MIDI clock as master");
            let (stop_tx, stop_rx) = channel();
            let core = Arc::clone(&self.core);
            let sink = Arc::clone(&self.sink);

            let handle = thread::spawn(move || {
                log::debug!("Master clock thread started");
                if let Err(e) = sink.send_raw_clock_message(RealtimeMessage::Start) {
                    log::warn!("{}", e);
                }
                core.reset_counters();

                let mut next_pulse = Instant::now() + core.pulse_interval();
                loop {
                    let now = Instant::now();
                    let wait = if now >= next_pulse {
                        if let Err(e) = sink.send_raw_clock_message(RealtimeMessage::Clock) {
                            log::warn!("{}", e);
                        }
                        core.handle_pulse_at(now);

                        let interval = core.pulse_interval();
                        next_pulse += interval;
                        // Fell more than a pulse behind: resync instead of bursting
                        if now > next_pulse {
                            next_pulse = now + interval;
                        }
                        interval.mul_f64(0.2)
                    } else {
                        IDLE_SLEEP.min(next_pulse - now)
                    };

                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                }
                log::debug!("Master clock thread exited");
            });

            self.master = Some(MasterLoop { stop_tx, handle });
            self.state = ClockState::RunningMaster;
        } else {
            let source = self.sync_source.clone().ok_or_else(|| {
                log::warn!("No sync source set for slave mode");
                Error::NoSyncSource
            })?;
            log::info!("Starting MIDI clock as slave");

            self.core.reset_counters();
            let active = Arc::new(AtomicBool::new(true));
            let handler_active = Arc::clone(&active);
            let core = Arc::clone(&self.core);

            let connection = self
                .input
                .connect(
                    &source,
                    Box::new(move |message: RealtimeMessage| {
                        if handler_active.load(Ordering::Acquire) {
                            core.handle_external(message);
                        }
                    }),
                )
                .inspect_err(|e| log::error!("Error setting up slave clock: {}", e))?;

            self.slave = Some(SlaveListener { active, connection });
            self.state = ClockState::RunningSlave;
        }
        Ok(())
    }

    /// Stop either loop and wait for it to finish. Safe to call when stopped.
    pub fn stop(&mut self) {
        if let Some(master) = self.master.take() {
            let _ = master.stop_tx.send(());
            if master.handle.join().is_err() {
                log::error!("Master clock thread panicked");
            }
        }
        if let Some(slave) = self.slave.take() {
            slave.active.store(false, Ordering::Release);
            slave.connection.close();
        }
        if self.state != ClockState::Stopped {
            log::info!("Stopping MIDI clock");
        }

        self.state = ClockState::Stopped;
        self.core.reset_counters();
    }

    /// Set the generated tempo. Values without a schedulable pulse interval
    /// (non-positive, non-finite or vanishingly small) are logged and ignored.
    pub fn set_tempo(&self, bpm: f64) {
        if beat_division(bpm, PPQN as f64).is_none() {
            log::warn!("Invalid tempo: {}", bpm);
            return;
        }

        self.core.set_tempo(bpm);
        log::info!("Tempo set to {} BPM", bpm);
        self.core.events.publish(Event::Clock(ClockEvent::Tempo {
            bpm,
            source: ClockSource::Internal,
        }));
    }

    /// Switch between generating and following clock, restarting if running.
    pub fn set_master(&mut self, is_master: bool) -> Result<()> {
        if self.is_master() == is_master {
            return Ok(());
        }

        let was_running = self.is_running();
        self.stop();
        self.core.is_master.store(is_master, Ordering::Relaxed);
        log::info!(
            "Clock mode set to {}",
            if is_master { "master" } else { "slave" }
        );

        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Choose the input port followed in slave mode. An active slave
    /// listener keeps its current port until restarted.
    pub fn set_sync_source(&mut self, port_name: &str) -> Result<()> {
        if !self.input.available_inputs().iter().any(|name| name == port_name) {
            log::warn!("MIDI input port not found: {}", port_name);
            return Err(Error::SourceNotFound(port_name.to_string()));
        }

        self.sync_source = Some(port_name.to_string());
        log::info!("Sync source set to {}", port_name);
        Ok(())
    }

    pub fn send_start(&self) -> Result<()> {
        self.send_transport(RealtimeMessage::Start)
    }

    pub fn send_stop(&self) -> Result<()> {
        self.send_transport(RealtimeMessage::Stop)
    }

    pub fn send_continue(&self) -> Result<()> {
        self.send_transport(RealtimeMessage::Continue)
    }

    fn send_transport(&self, message: RealtimeMessage) -> Result<()> {
        if !self.is_master() {
            return Ok(());
        }
        self.sink.send_raw_clock_message(message)?;
        log::debug!("Sent MIDI {}", message.as_str());
        Ok(())
    }
}

impl Drop for MidiClock {
    fn drop(&mut self) {
        self.stop();
    }
}
