/// Core sequencer data - per-channel step grids and their invariants
///
/// Every one of the 16 MIDI channels owns a fixed array of `max_steps` slots.
/// The channel length only bounds playback; storage never shrinks.
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::SequencerConfig;
use crate::error::{Error, Result};

pub mod playback;
pub mod scale_player;

pub const NUM_CHANNELS: usize = 16;
pub const DEFAULT_MAX_STEPS: usize = 64;
pub const DEFAULT_VELOCITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub active: bool,
    pub note: Option<u8>,
    pub velocity: u8,
}

impl Step {
    pub fn new(active: bool, note: Option<u8>, velocity: u8) -> Result<Self> {
        if let Some(note) = note {
            check_note(note)?;
        }
        check_velocity(velocity)?;
        Ok(Self {
            active,
            note,
            velocity,
        })
    }

    /// The note this step fires, if any.
    pub fn trigger(&self) -> Option<u8> {
        if self.active {
            self.note
        } else {
            None
        }
    }
}

impl Default for Step {
    fn default() -> Self {
        Self {
            active: false,
            note: None,
            velocity: DEFAULT_VELOCITY,
        }
    }
}

/// A note due on one channel at the current playback step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTrigger {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
}

/// Complete copy of the pattern store, handed to persistence collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub max_steps: usize,
    pub channel_lengths: Vec<usize>,
    pub patterns: Vec<Vec<Step>>,
}

/// Load/save contract fulfilled outside the core.
pub trait PatternStorage {
    fn load(&self, name: &str) -> Result<PatternSnapshot>;
    fn save(&self, name: &str, snapshot: &PatternSnapshot) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Channels {
    patterns: Vec<Vec<Step>>,
    lengths: [usize; NUM_CHANNELS],
}

/// Thread-safe pattern grid shared by the playback loop and editors.
///
/// Steps are replaced whole under the lock, so a reader sees either the old
/// or the new value of a slot.
#[derive(Debug)]
pub struct PatternStore {
    max_steps: usize,
    channels: RwLock<Channels>,
}

impl PatternStore {
    pub fn new(max_steps: usize, initial_length: usize) -> Result<Self> {
        if max_steps == 0 {
            return Err(Error::Config("max_steps must be at least 1".into()));
        }
        check_length(initial_length, max_steps)?;

        Ok(Self {
            max_steps,
            channels: RwLock::new(Channels {
                patterns: vec![vec![Step::default(); max_steps]; NUM_CHANNELS],
                lengths: [initial_length; NUM_CHANNELS],
            }),
        })
    }

    pub fn from_config(config: &SequencerConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.max_steps, config.initial_channel_length())
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn set_step(
        &self,
        channel: u8,
        step: usize,
        active: bool,
        note: Option<u8>,
        velocity: u8,
    ) -> Result<()> {
        check_channel(channel)?;
        self.check_step(step)?;
        let value = Step::new(active, note, velocity)?;

        self.write().patterns[channel as usize][step] = value;
        Ok(())
    }

    pub fn get_step(&self, channel: u8, step: usize) -> Result<Step> {
        check_channel(channel)?;
        self.check_step(step)?;
        Ok(self.read().patterns[channel as usize][step])
    }

    pub fn clear_channel(&self, channel: u8) -> Result<()> {
        check_channel(channel)?;
        self.write().patterns[channel as usize].fill(Step::default());
        Ok(())
    }

    /// Change how many steps a channel cycles through. Slots at or past the
    /// new length are reset to their default immediately.
    pub fn set_channel_length(&self, channel: u8, length: usize) -> Result<()> {
        check_channel(channel)?;
        check_length(length, self.max_steps)?;

        let mut channels = self.write();
        channels.lengths[channel as usize] = length;
        channels.patterns[channel as usize][length..].fill(Step::default());
        Ok(())
    }

    pub fn channel_length(&self, channel: u8) -> Result<usize> {
        check_channel(channel)?;
        Ok(self.read().lengths[channel as usize])
    }

    /// Deep-copy every slot of `source` into `target`, regardless of length.
    pub fn copy_channel(&self, source: u8, target: u8) -> Result<()> {
        check_channel(source)?;
        check_channel(target)?;

        let mut channels = self.write();
        let copy = channels.patterns[source as usize].clone();
        channels.patterns[target as usize] = copy;
        Ok(())
    }

    /// Replace the first `steps.len()` slots of a channel in one write and
    /// reset the rest.
    pub fn fill_channel(&self, channel: u8, steps: &[Step]) -> Result<()> {
        check_channel(channel)?;
        if steps.len() > self.max_steps {
            return Err(Error::StepOutOfRange {
                step: steps.len() - 1,
                max_steps: self.max_steps,
            });
        }
        for step in steps {
            Step::new(step.active, step.note, step.velocity)?;
        }

        let mut channels = self.write();
        let row = &mut channels.patterns[channel as usize];
        row.fill(Step::default());
        row[..steps.len()].copy_from_slice(steps);
        Ok(())
    }

    /// Every note that fires at `step` across all channels, read under one lock.
    pub fn triggers_at(&self, step: usize) -> Vec<StepTrigger> {
        let channels = self.read();
        channels
            .patterns
            .iter()
            .enumerate()
            .filter_map(|(channel, row)| {
                let slot = row.get(step)?;
                slot.trigger().map(|note| StepTrigger {
                    channel: channel as u8,
                    note,
                    velocity: slot.velocity,
                })
            })
            .collect()
    }

    pub fn snapshot(&self) -> PatternSnapshot {
        let channels = self.read();
        PatternSnapshot {
            max_steps: self.max_steps,
            channel_lengths: channels.lengths.to_vec(),
            patterns: channels.patterns.clone(),
        }
    }

    pub fn restore(&self, snapshot: &PatternSnapshot) -> Result<()> {
        if snapshot.max_steps != self.max_steps {
            return Err(Error::Config(format!(
                "snapshot has {} steps per channel, store has {}",
                snapshot.max_steps, self.max_steps
            )));
        }
        if snapshot.patterns.len() != NUM_CHANNELS
            || snapshot.channel_lengths.len() != NUM_CHANNELS
        {
            return Err(Error::Config(format!(
                "snapshot must describe {} channels",
                NUM_CHANNELS
            )));
        }

        let mut lengths = [0; NUM_CHANNELS];
        for (slot, &length) in lengths.iter_mut().zip(&snapshot.channel_lengths) {
            check_length(length, self.max_steps)?;
            *slot = length;
        }
        for row in &snapshot.patterns {
            if row.len() != self.max_steps {
                return Err(Error::Config(format!(
                    "snapshot row has {} steps, expected {}",
                    row.len(),
                    self.max_steps
                )));
            }
            for step in row {
                Step::new(step.active, step.note, step.velocity)?;
            }
        }

        *self.write() = Channels {
            patterns: snapshot.patterns.clone(),
            lengths,
        };
        Ok(())
    }

    fn check_step(&self, step: usize) -> Result<()> {
        if step < self.max_steps {
            Ok(())
        } else {
            Err(Error::StepOutOfRange {
                step,
                max_steps: self.max_steps,
            })
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Channels> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Channels> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PatternStore {
    fn default() -> Self {
        let config = SequencerConfig::default();
        Self {
            max_steps: config.max_steps,
            channels: RwLock::new(Channels {
                patterns: vec![vec![Step::default(); config.max_steps]; NUM_CHANNELS],
                lengths: [config.initial_channel_length(); NUM_CHANNELS],
            }),
        }
    }
}

pub(crate) fn check_channel(channel: u8) -> Result<()> {
    if (channel as usize) < NUM_CHANNELS {
        Ok(())
    } else {
        Err(Error::ChannelOutOfRange(channel))
    }
}

fn check_note(note: u8) -> Result<()> {
    if note <= 127 {
        Ok(())
    } else {
        Err(Error::NoteOutOfRange(note))
    }
}

fn check_velocity(velocity: u8) -> Result<()> {
    if velocity <= 127 {
        Ok(())
    } else {
        Err(Error::VelocityOutOfRange(velocity))
    }
}

fn check_length(length: usize, max_steps: usize) -> Result<()> {
    if (1..=max_steps).contains(&length) {
        Ok(())
    } else {
        Err(Error::LengthOutOfRange { length, max_steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_creation() {
        let store = PatternStore::default();
        assert_eq!(store.max_steps(), 64);
        for channel in 0..16 {
            assert_eq!(store.channel_length(channel).unwrap(), 16);
            assert_eq!(store.get_step(channel, 63).unwrap(), Step::default());
        }
    }

    #[test]
    fn test_set_get_round_trip() {
        let store = PatternStore::default();
        store.set_step(15, 63, true, Some(127), 0).unwrap();
        store.set_step(0, 0, false, None, 127).unwrap();

        assert_eq!(
            store.get_step(15, 63).unwrap(),
            Step { active: true, note: Some(127), velocity: 0 }
        );
        assert_eq!(
            store.get_step(0, 0).unwrap(),
            Step { active: false, note: None, velocity: 127 }
        );
    }

    #[test]
    fn test_range_errors() {
        let store = PatternStore::default();
        assert_eq!(
            store.set_step(16, 0, true, Some(60), 100),
            Err(Error::ChannelOutOfRange(16))
        );
        assert!(matches!(
            store.set_step(0, 64, true, Some(60), 100),
            Err(Error::StepOutOfRange { step: 64, .. })
        ));
        assert_eq!(
            store.set_step(0, 0, true, Some(128), 100),
            Err(Error::NoteOutOfRange(128))
        );
        assert_eq!(
            store.set_step(0, 0, true, Some(60), 200),
            Err(Error::VelocityOutOfRange(200))
        );
        assert!(store.get_step(0, 64).is_err());
        assert!(store.set_channel_length(0, 0).is_err());
        assert!(store.set_channel_length(0, 65).is_err());
        // Nothing was written by the rejected calls
        assert_eq!(store.get_step(0, 0).unwrap(), Step::default());
    }

    #[test]
    fn test_clear_channel() {
        let store = PatternStore::default();
        store.set_step(3, 10, true, Some(64), 90).unwrap();
        store.set_step(4, 10, true, Some(64), 90).unwrap();
        store.clear_channel(3).unwrap();

        assert_eq!(store.get_step(3, 10).unwrap(), Step::default());
        assert!(store.get_step(4, 10).unwrap().active);
    }

    #[test]
    fn test_shrinking_length_resets_tail() {
        let store = PatternStore::default();
        store.set_channel_length(2, 32).unwrap();
        store.set_step(2, 3, true, Some(60), 100).unwrap();
        store.set_step(2, 20, true, Some(62), 100).unwrap();

        store.set_channel_length(2, 8).unwrap();
        assert!(store.get_step(2, 3).unwrap().active);
        assert_eq!(store.get_step(2, 20).unwrap(), Step::default());

        // Growing again does not bring the old step back
        store.set_channel_length(2, 32).unwrap();
        assert_eq!(store.get_step(2, 20).unwrap(), Step::default());
    }

    #[test]
    fn test_copy_channel_copies_whole_array() {
        let store = PatternStore::default();
        store.set_channel_length(0, 4).unwrap();
        store.set_step(0, 2, true, Some(48), 70).unwrap();
        // Slot 40 is past channel 1's playback length but still stored
        store.set_step(1, 40, true, Some(50), 70).unwrap();
        store.copy_channel(1, 5).unwrap();
        store.copy_channel(0, 6).unwrap();

        assert!(store.get_step(5, 40).unwrap().active);
        assert_eq!(store.get_step(6, 2).unwrap().note, Some(48));
        assert_eq!(store.channel_length(6).unwrap(), 16);
    }

    #[test]
    fn test_triggers_skip_inactive_and_noteless() {
        let store = PatternStore::default();
        store.set_step(0, 1, true, Some(60), 100).unwrap();
        store.set_step(1, 1, true, None, 100).unwrap();
        store.set_step(2, 1, false, Some(62), 100).unwrap();
        store.set_step(9, 1, true, Some(36), 80).unwrap();

        assert_eq!(
            store.triggers_at(1),
            vec![
                StepTrigger { channel: 0, note: 60, velocity: 100 },
                StepTrigger { channel: 9, note: 36, velocity: 80 },
            ]
        );
        assert!(store.triggers_at(64).is_empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let store = PatternStore::default();
        store.set_step(7, 5, true, Some(72), 99).unwrap();
        store.set_channel_length(7, 12).unwrap();
        let snapshot = store.snapshot();

        let other = PatternStore::default();
        other.restore(&snapshot).unwrap();
        assert_eq!(other.get_step(7, 5).unwrap().note, Some(72));
        assert_eq!(other.channel_length(7).unwrap(), 12);

        let mismatched = PatternStore::new(32, 16).unwrap();
        assert!(mismatched.restore(&snapshot).is_err());
    }

    #[test]
    fn test_snapshot_json() {
        let store = PatternStore::new(4, 4).unwrap();
        store.set_step(0, 0, true, Some(60), 100).unwrap();
        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let parsed: PatternSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, store.snapshot());
    }
}
