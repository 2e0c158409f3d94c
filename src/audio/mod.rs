/// Audio preview using cpal - a monophonic sine voice behind the `MidiSink` trait
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::SinkError;
use crate::midi::{MidiSink, RealtimeMessage};

const MAX_AMPLITUDE: f32 = 0.2;

#[derive(Debug, Default)]
struct Tone {
    frequency: Option<f32>,
    amplitude: f32,
    phase: f32,
}

type SharedTone = Arc<Mutex<Tone>>;

fn lock(tone: &SharedTone) -> MutexGuard<'_, Tone> {
    tone.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Plays every note it receives on the default output device, regardless
/// of MIDI channel. A newer note replaces the sounding one.
pub struct AudioPreview {
    tone: SharedTone,
    generation: Arc<AtomicU64>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl AudioPreview {
    /// Open the default output device. `None` when no usable device exists.
    pub fn new() -> Option<Self> {
        let tone = Arc::new(Mutex::new(Tone::default()));
        let (ready_tx, ready_rx) = channel();
        let (shutdown_tx, shutdown_rx) = channel::<()>();

        // The stream stays on the thread that built it
        let stream_tone = Arc::clone(&tone);
        let worker = thread::spawn(move || {
            let Some(stream) = Self::setup_audio_stream(stream_tone) else {
                let _ = ready_tx.send(false);
                return;
            };
            let _ = ready_tx.send(true);
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        if ready_rx.recv().unwrap_or(false) {
            log::info!("Audio preview running on default output device");
            Some(Self {
                tone,
                generation: Arc::new(AtomicU64::new(0)),
                shutdown: Some(shutdown_tx),
                worker: Some(worker),
            })
        } else {
            let _ = worker.join();
            None
        }
    }

    /// A preview that tracks notes but renders nothing.
    pub fn silent() -> Self {
        Self {
            tone: Arc::new(Mutex::new(Tone::default())),
            generation: Arc::new(AtomicU64::new(0)),
            shutdown: None,
            worker: None,
        }
    }

    fn setup_audio_stream(tone: SharedTone) -> Option<cpal::Stream> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let config = device.default_output_config().ok()?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut voice = lock(&tone);
                    for frame in data.chunks_mut(channels.max(1)) {
                        let frequency = voice.frequency;
                        let sample = match frequency {
                            Some(frequency) => {
                                let value = (voice.phase * 2.0 * std::f32::consts::PI).sin()
                                    * voice.amplitude;
                                voice.phase += frequency / sample_rate;
                                if voice.phase >= 1.0 {
                                    voice.phase -= 1.0;
                                }
                                value
                            }
                            None => {
                                voice.phase = 0.0;
                                0.0
                            }
                        };
                        frame.fill(sample);
                    }
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            ),
            format => {
                log::warn!("Unsupported sample format for preview: {:?}", format);
                return None;
            }
        };

        match stream {
            Ok(stream) => {
                if let Err(e) = stream.play() {
                    log::error!("Failed to start audio stream: {}", e);
                    return None;
                }
                Some(stream)
            }
            Err(e) => {
                log::error!("Failed to build audio stream: {}", e);
                None
            }
        }
    }

    pub fn sounding_frequency(&self) -> Option<f32> {
        lock(&self.tone).frequency
    }
}

impl MidiSink for AudioPreview {
    fn send_note(
        &self,
        note: u8,
        duration: Duration,
        _channel: u8,
        velocity: u8,
    ) -> Result<(), SinkError> {
        {
            let mut tone = lock(&self.tone);
            tone.frequency = Some(midi_note_to_frequency(note));
            tone.amplitude = MAX_AMPLITUDE * velocity.min(127) as f32 / 127.0;
        }

        // Release only if no newer note took over in the meantime
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let latest = Arc::clone(&self.generation);
        let tone = Arc::clone(&self.tone);
        thread::spawn(move || {
            thread::sleep(duration);
            if latest.load(Ordering::Acquire) == generation {
                lock(&tone).frequency = None;
            }
        });
        Ok(())
    }

    fn send_raw_clock_message(&self, _message: RealtimeMessage) -> Result<(), SinkError> {
        Ok(())
    }
}

impl Default for AudioPreview {
    fn default() -> Self {
        Self::new().unwrap_or_else(Self::silent)
    }
}

impl Drop for AudioPreview {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn midi_note_to_frequency(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_frequency() {
        assert_eq!(midi_note_to_frequency(69), 440.0);
        assert!((midi_note_to_frequency(81) - 880.0).abs() < 1e-3);
    }

    #[test]
    fn test_note_released_after_duration() {
        let preview = AudioPreview::silent();
        preview
            .send_note(69, Duration::from_millis(10), 0, 127)
            .unwrap();
        assert_eq!(preview.sounding_frequency(), Some(440.0));

        thread::sleep(Duration::from_millis(60));
        assert_eq!(preview.sounding_frequency(), None);
    }

    #[test]
    fn test_newer_note_not_cut_by_older_release() {
        let preview = AudioPreview::silent();
        preview
            .send_note(60, Duration::from_millis(10), 0, 100)
            .unwrap();
        preview
            .send_note(69, Duration::from_millis(500), 0, 100)
            .unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(preview.sounding_frequency(), Some(440.0));
    }
}
