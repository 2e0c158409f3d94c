/// Playback engine - steps through the pattern grid on its own timer
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::PatternStore;
use crate::config::SequencerConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::midi::MidiSink;

/// Notes are cut at 90% of the step so adjacent steps don't overlap.
const NOTE_LENGTH_RATIO: f64 = 0.9;
/// Longest interval any timing loop will schedule
const MAX_INTERVAL: Duration = Duration::from_secs(u32::MAX as u64);

/// Length of one of `divisions_per_beat` equal parts of a beat at `bpm`.
///
/// `None` unless the result is a non-zero interval no longer than
/// `MAX_INTERVAL`, so callers can sleep on it and add it to an `Instant`.
pub(crate) fn beat_division(bpm: f64, divisions_per_beat: f64) -> Option<Duration> {
    if !(bpm > 0.0 && bpm.is_finite() && divisions_per_beat > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(60.0 / (bpm * divisions_per_beat))
        .ok()
        .filter(|interval| !interval.is_zero() && *interval <= MAX_INTERVAL)
}

/// Tempo and step length, shared as the timing reference of every loop
/// that plays on the step grid.
#[derive(Debug)]
pub struct StepTiming {
    bpm_bits: AtomicU64,
    steps_per_bar: u32,
}

impl StepTiming {
    pub fn new(bpm: f64, steps_per_bar: u32) -> Result<Self> {
        if steps_per_bar == 0 {
            return Err(Error::Config("steps_per_bar must be at least 1".into()));
        }
        check_bpm(bpm, steps_per_bar)?;
        Ok(Self {
            bpm_bits: AtomicU64::new(bpm.to_bits()),
            steps_per_bar,
        })
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm_bits.load(Ordering::Relaxed))
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        check_bpm(bpm, self.steps_per_bar)?;
        self.bpm_bits.store(bpm.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn steps_per_bar(&self) -> u32 {
        self.steps_per_bar
    }

    /// `60 / (bpm * steps_per_bar / 4)` seconds
    pub fn step_duration(&self) -> Duration {
        beat_division(self.bpm(), steps_per_beat(self.steps_per_bar)).unwrap_or(MAX_INTERVAL)
    }

    pub fn note_duration(&self) -> Duration {
        self.step_duration().mul_f64(NOTE_LENGTH_RATIO)
    }
}

impl Default for StepTiming {
    fn default() -> Self {
        let config = SequencerConfig::default();
        Self {
            bpm_bits: AtomicU64::new(config.bpm.to_bits()),
            steps_per_bar: config.steps_per_bar,
        }
    }
}

fn steps_per_beat(steps_per_bar: u32) -> f64 {
    steps_per_bar as f64 / 4.0
}

/// Reject tempos whose step length can't be scheduled.
fn check_bpm(bpm: f64, steps_per_bar: u32) -> Result<()> {
    if beat_division(bpm, steps_per_beat(steps_per_bar)).is_some() {
        Ok(())
    } else {
        Err(Error::InvalidBpm(bpm))
    }
}

/// Everything one playback iteration touches. Cloned into the loop thread.
#[derive(Clone)]
struct PlaybackContext {
    patterns: Arc<PatternStore>,
    sink: Arc<dyn MidiSink>,
    timing: Arc<StepTiming>,
    events: Arc<EventBus>,
    playback_step: Arc<AtomicUsize>,
}

impl PlaybackContext {
    /// Send every note due at the current step. Returns the step played.
    fn play_current_step(&self) -> usize {
        let step = self.playback_step.load(Ordering::Acquire);
        self.events.publish(Event::StepAdvanced(step));

        let note_duration = self.timing.note_duration();
        for trigger in self.patterns.triggers_at(step) {
            if let Err(e) =
                self.sink
                    .send_note(trigger.note, note_duration, trigger.channel, trigger.velocity)
            {
                log::warn!(
                    "Dropped note {} on channel {} at step {}: {}",
                    trigger.note,
                    trigger.channel,
                    step,
                    e
                );
            }
        }
        step
    }

    /// Wrap on channel 0's length, whichever channels hold the notes.
    fn advance(&self) -> usize {
        let length = self.patterns.channel_length(0).unwrap_or(1).max(1);
        let current = self.playback_step.load(Ordering::Acquire);
        let next = (current + 1) % length;
        self.playback_step.store(next, Ordering::Release);
        next
    }
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Multi-channel step sequencer: `Stopped` until `start`, `Running` until `stop`.
pub struct StepSequencer {
    context: PlaybackContext,
    is_running: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl StepSequencer {
    pub fn new(patterns: Arc<PatternStore>, sink: Arc<dyn MidiSink>, events: Arc<EventBus>) -> Self {
        Self::with_timing(patterns, sink, events, Arc::new(StepTiming::default()))
    }

    pub fn from_config(
        config: &SequencerConfig,
        patterns: Arc<PatternStore>,
        sink: Arc<dyn MidiSink>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        let timing = StepTiming::new(config.bpm, config.steps_per_bar)?;
        Ok(Self::with_timing(patterns, sink, events, Arc::new(timing)))
    }

    pub fn with_timing(
        patterns: Arc<PatternStore>,
        sink: Arc<dyn MidiSink>,
        events: Arc<EventBus>,
        timing: Arc<StepTiming>,
    ) -> Self {
        Self {
            context: PlaybackContext {
                patterns,
                sink,
                timing,
                events,
                playback_step: Arc::new(AtomicUsize::new(0)),
            },
            is_running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn patterns(&self) -> &Arc<PatternStore> {
        &self.context.patterns
    }

    /// Shared timing reference, read by the scale player.
    pub fn timing(&self) -> Arc<StepTiming> {
        Arc::clone(&self.context.timing)
    }

    pub fn bpm(&self) -> f64 {
        self.context.timing.bpm()
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<()> {
        self.context.timing.set_bpm(bpm)
    }

    pub fn steps_per_bar(&self) -> u32 {
        self.context.timing.steps_per_bar()
    }

    pub fn step_duration(&self) -> Duration {
        self.context.timing.step_duration()
    }

    pub fn playback_step(&self) -> usize {
        self.context.playback_step.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Play the current step and advance without waiting, e.g. when driven
    /// by an external clock. Returns the step that was played.
    pub fn tick(&self) -> usize {
        let played = self.context.play_current_step();
        self.context.advance();
        played
    }

    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }

        self.is_running.store(true, Ordering::Release);
        let (stop_tx, stop_rx) = channel::<()>();
        let context = self.context.clone();

        let handle = thread::spawn(move || loop {
            let started = Instant::now();
            context.play_current_step();

            let wait = context
                .timing
                .step_duration()
                .saturating_sub(started.elapsed());
            match stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }

            context.advance();
        });

        self.worker = Some(Worker { stop_tx, handle });
        log::info!("Sequencer started at {} BPM", self.bpm());
        self.context
            .events
            .publish(Event::SequencerState { running: true });
    }

    /// Stop playback and wait for the loop thread to exit. No note is sent
    /// by this sequencer once this returns.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = worker.stop_tx.send(());
        if worker.handle.join().is_err() {
            log::error!("Sequencer thread panicked");
        }

        self.is_running.store(false, Ordering::Release);
        log::info!("Sequencer stopped");
        self.context
            .events
            .publish(Event::SequencerState { running: false });
    }
}

impl Drop for StepSequencer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::poll_events;
    use crate::test_support::RecordingSink;

    fn sequencer_with(sink: Arc<RecordingSink>) -> StepSequencer {
        StepSequencer::new(
            Arc::new(PatternStore::default()),
            sink,
            Arc::new(EventBus::new()),
        )
    }

    #[test]
    fn test_step_duration() {
        let timing = StepTiming::new(120.0, 16).unwrap();
        assert_eq!(timing.step_duration(), Duration::from_millis(125));
        assert_eq!(timing.note_duration(), Duration::from_micros(112_500));

        let eighths = StepTiming::new(120.0, 8).unwrap();
        assert_eq!(eighths.step_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_set_bpm() {
        let seq = sequencer_with(Arc::new(RecordingSink::default()));
        seq.set_bpm(60.0).unwrap();
        assert_eq!(seq.step_duration(), Duration::from_millis(250));

        assert_eq!(seq.set_bpm(0.0), Err(Error::InvalidBpm(0.0)));
        assert!(seq.set_bpm(-1.0).is_err());
        assert_eq!(seq.bpm(), 60.0);
    }

    #[test]
    fn test_unschedulable_bpm_rejected() {
        let seq = sequencer_with(Arc::new(RecordingSink::default()));
        for bpm in [1e-300, 1e-12, f64::MIN_POSITIVE, 1e300, f64::INFINITY, f64::NAN] {
            assert!(matches!(seq.set_bpm(bpm), Err(Error::InvalidBpm(_))));
        }
        assert_eq!(seq.bpm(), 120.0);
        assert_eq!(seq.step_duration(), Duration::from_millis(125));
        assert!(StepTiming::new(1e-300, 16).is_err());

        // Slow but schedulable tempos are still fine
        seq.set_bpm(0.5).unwrap();
        assert_eq!(seq.step_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_beat_division_bounds() {
        assert_eq!(
            beat_division(120.0, 24.0),
            Some(Duration::from_secs_f64(60.0 / 2880.0))
        );
        assert_eq!(beat_division(1e-300, 4.0), None);
        assert_eq!(beat_division(f64::INFINITY, 24.0), None);
        assert_eq!(beat_division(120.0, 0.0), None);
    }

    #[test]
    fn test_wraps_on_channel_zero_length() {
        let seq = sequencer_with(Arc::new(RecordingSink::default()));
        seq.patterns().set_channel_length(0, 4).unwrap();
        seq.patterns().set_channel_length(1, 32).unwrap();

        let played: Vec<usize> = (0..10).map(|_| seq.tick()).collect();
        assert_eq!(played, vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
        assert!(seq.playback_step() <= 3);
    }

    #[test]
    fn test_tick_sends_every_active_channel() {
        let sink = Arc::new(RecordingSink::default());
        let seq = sequencer_with(sink.clone());
        seq.patterns().set_step(0, 0, true, Some(60), 100).unwrap();
        seq.patterns().set_step(5, 0, true, Some(40), 64).unwrap();
        seq.patterns().set_step(6, 0, false, Some(41), 64).unwrap();
        seq.patterns().set_step(0, 1, true, Some(62), 90).unwrap();

        seq.tick();
        let notes = sink.notes();
        assert_eq!(notes.len(), 2);
        assert_eq!((notes[0].channel, notes[0].note, notes[0].velocity), (0, 60, 100));
        assert_eq!((notes[1].channel, notes[1].note, notes[1].velocity), (5, 40, 64));
        assert_eq!(notes[0].duration, seq.step_duration().mul_f64(0.9));

        seq.tick();
        assert_eq!(sink.notes().last().map(|n| n.note), Some(62));
    }

    #[test]
    fn test_sink_errors_do_not_stall() {
        let sink = Arc::new(RecordingSink::failing());
        let seq = sequencer_with(sink);
        seq.patterns().set_step(0, 0, true, Some(60), 100).unwrap();

        assert_eq!(seq.tick(), 0);
        assert_eq!(seq.tick(), 1);
    }

    #[test]
    fn test_tick_publishes_step() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let seq = StepSequencer::new(
            Arc::new(PatternStore::default()),
            Arc::new(RecordingSink::default()),
            events,
        );
        seq.tick();
        seq.tick();
        assert_eq!(
            poll_events(&rx),
            vec![Event::StepAdvanced(0), Event::StepAdvanced(1)]
        );
    }

    #[test]
    fn test_start_stop_joins_loop() {
        let sink = Arc::new(RecordingSink::default());
        let mut seq = sequencer_with(sink.clone());
        seq.set_bpm(1200.0).unwrap();
        for step in 0..16 {
            seq.patterns().set_step(0, step, true, Some(60), 100).unwrap();
        }

        seq.start();
        seq.start();
        assert!(seq.is_running());
        thread::sleep(Duration::from_millis(60));
        seq.stop();
        assert!(!seq.is_running());

        let sent = sink.notes().len();
        assert!(sent > 0);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(sink.notes().len(), sent);

        // Stopping twice is harmless
        seq.stop();
    }

    #[test]
    fn test_immediate_stop_sends_at_most_one_batch() {
        let sink = Arc::new(RecordingSink::default());
        let mut seq = sequencer_with(sink.clone());
        seq.patterns().set_step(0, 0, true, Some(60), 100).unwrap();
        seq.patterns().set_step(1, 0, true, Some(64), 100).unwrap();
        seq.patterns().set_step(0, 1, true, Some(67), 100).unwrap();

        seq.start();
        seq.stop();

        let notes: Vec<u8> = sink.notes().iter().map(|n| n.note).collect();
        assert!(notes.is_empty() || notes == vec![60, 64]);
    }
}
