/// Scale player - random notes drawn from a scale, off the step grid
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use super::playback::StepTiming;
use super::{check_channel, PatternStore, Step};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::midi::scales::Scale;
use crate::midi::MidiSink;

const LIVE_VELOCITY: std::ops::RangeInclusive<u8> = 70..=100;
const PATTERN_VELOCITY: std::ops::RangeInclusive<u8> = 80..=100;

/// Walks a scale snapshot, occasionally jumping octave.
#[derive(Debug, Clone)]
struct ScaleWalker {
    scale: Scale,
    octaves: Vec<i32>,
    current_octave: i32,
    note_chance: f64,
    octave_chance: f64,
}

impl ScaleWalker {
    fn new(scale: &Scale, note_chance: f64, octave_chance: f64) -> Result<Self> {
        check_chance(note_chance)?;
        check_chance(octave_chance)?;
        let current_octave = match scale.lowest_octave() {
            Some(octave) if !scale.is_empty() => octave,
            _ => return Err(Error::EmptyScale),
        };

        Ok(Self {
            scale: scale.clone(),
            octaves: scale.octaves().collect(),
            current_octave,
            note_chance,
            octave_chance,
        })
    }

    /// One draw: maybe a note, maybe an octave change first.
    /// A chance of 0.0 never fires and 1.0 always does.
    fn next_note<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<u8> {
        if rng.gen::<f64>() >= self.note_chance {
            return None;
        }

        if rng.gen::<f64>() < self.octave_chance {
            if let Some(&octave) = self.octaves.choose(rng) {
                self.current_octave = octave;
            }
        }

        self.scale
            .notes(self.current_octave)
            .and_then(|notes| notes.choose(rng))
            .copied()
    }
}

fn check_chance(chance: f64) -> Result<()> {
    if (0.0..=1.0).contains(&chance) {
        Ok(())
    } else {
        Err(Error::ChanceOutOfRange(chance))
    }
}

/// Clear `channel` and refill its playback length with random notes from
/// `scale`. Steps that miss their note chance stay at the default.
pub fn apply_random_pattern_with<R: Rng + ?Sized>(
    store: &PatternStore,
    channel: u8,
    scale: &Scale,
    note_chance: f64,
    octave_chance: f64,
    rng: &mut R,
) -> Result<()> {
    check_channel(channel)?;
    let length = store.channel_length(channel)?;
    let mut walker = ScaleWalker::new(scale, note_chance, octave_chance)?;

    let steps: Vec<Step> = (0..length)
        .map(|_| match walker.next_note(rng) {
            Some(note) => Step {
                active: true,
                note: Some(note),
                velocity: rng.gen_range(PATTERN_VELOCITY),
            },
            None => Step::default(),
        })
        .collect();

    store.fill_channel(channel, &steps)
}

/// Auditions a scale by playing random notes from it on a background thread.
///
/// Paced by the sequencer's step duration, read through the shared
/// `StepTiming`, but otherwise independent of the step grid.
pub struct ScalePlayer {
    sink: Arc<dyn MidiSink>,
    timing: Arc<StepTiming>,
    patterns: Arc<PatternStore>,
    events: Arc<EventBus>,
    playing: Option<Arc<AtomicBool>>,
}

impl ScalePlayer {
    pub fn new(
        sink: Arc<dyn MidiSink>,
        timing: Arc<StepTiming>,
        patterns: Arc<PatternStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            sink,
            timing,
            patterns,
            events,
            playing: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Start playing random notes from a snapshot of `scale` on `channel`.
    /// A previous playback, if any, is told to stop first.
    pub fn start_scale_playback(
        &mut self,
        scale: &Scale,
        note_chance: f64,
        octave_chance: f64,
        channel: u8,
    ) -> Result<()> {
        check_channel(channel)?;
        let mut walker = ScaleWalker::new(scale, note_chance, octave_chance)?;
        self.stop_scale_playback();

        let playing = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&playing);
        let sink = Arc::clone(&self.sink);
        let timing = Arc::clone(&self.timing);

        thread::spawn(move || {
            let mut rng = StdRng::from_entropy();
            while flag.load(Ordering::Acquire) {
                if let Some(note) = walker.next_note(&mut rng) {
                    let velocity = rng.gen_range(LIVE_VELOCITY);
                    if let Err(e) = sink.send_note(note, timing.note_duration(), channel, velocity) {
                        log::warn!("Dropped scale note {}: {}", note, e);
                    }
                }
                thread::sleep(timing.step_duration());
            }
            log::debug!("Scale playback thread exited");
        });

        self.playing = Some(playing);
        log::info!("Scale playback started on channel {}", channel);
        self.events.publish(Event::ScalePlayback { running: true });
        Ok(())
    }

    /// Ask the playback thread to finish. It exits at its next step boundary.
    pub fn stop_scale_playback(&mut self) {
        if let Some(flag) = self.playing.take() {
            flag.store(false, Ordering::Release);
            log::info!("Scale playback stopped");
            self.events.publish(Event::ScalePlayback { running: false });
        }
    }

    pub fn apply_random_pattern_from_scale(
        &self,
        channel: u8,
        scale: &Scale,
        note_chance: f64,
        octave_chance: f64,
    ) -> Result<()> {
        apply_random_pattern_with(
            &self.patterns,
            channel,
            scale,
            note_chance,
            octave_chance,
            &mut rand::thread_rng(),
        )
    }
}

impl Drop for ScalePlayer {
    fn drop(&mut self) {
        self.stop_scale_playback();
    }
}
