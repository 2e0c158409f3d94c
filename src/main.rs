//! sqnc - headless step sequencer player.
//!
//! Usage:
//!   sqnc [--config FILE] [--port N] [--bpm BPM] [--scale ROOT TYPE] [--seconds S] [--audio]

use sqnc::{
    midi_note_name, ClockEvent, Event, EventBus, MidiClock, MidiOutputDevice, MidiSink,
    MidirClockInput, PatternStore, Result, Scale, ScalePlayer, SequencerConfig, StepSequencer,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fs, process};

const USAGE: &str =
    "Usage: sqnc [--config FILE] [--port N] [--bpm BPM] [--scale ROOT TYPE] [--seconds S] [--audio]";

struct Options {
    config: SequencerConfig,
    root: String,
    scale_type: String,
    seconds: u64,
    audio: bool,
}

impl Options {
    fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut config = match value_after(args, "--config") {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .map_err(|e| format!("Failed to read {}: {}", path, e))?;
                SequencerConfig::from_json(&json).map_err(|e| e.to_string())?
            }
            None => SequencerConfig::default(),
        };

        if let Some(port) = value_after(args, "--port") {
            config.output_port = port.parse().map_err(|_| format!("Invalid port: {}", port))?;
        }
        if let Some(bpm) = value_after(args, "--bpm") {
            config.bpm = bpm.parse().map_err(|_| format!("Invalid BPM: {}", bpm))?;
        }
        config.validate().map_err(|e| e.to_string())?;

        let (root, scale_type) = match args.iter().position(|a| a == "--scale") {
            Some(i) => match (args.get(i + 1), args.get(i + 2)) {
                (Some(root), Some(scale_type)) => (root.clone(), scale_type.clone()),
                _ => return Err("--scale needs ROOT and TYPE".to_string()),
            },
            None => ("C".to_string(), "minor".to_string()),
        };

        let seconds = match value_after(args, "--seconds") {
            Some(s) => s.parse().map_err(|_| format!("Invalid duration: {}", s))?,
            None => 16,
        };

        Ok(Self {
            config,
            root,
            scale_type,
            seconds,
            audio: args.iter().any(|a| a == "--audio"),
        })
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = Options::parse(&args).unwrap_or_else(|e| {
        eprintln!("{}", e);
        eprintln!("{}", USAGE);
        process::exit(1);
    });

    if let Err(e) = run(options) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn open_sink(options: &Options) -> Result<Arc<dyn MidiSink>> {
    if options.audio {
        #[cfg(feature = "audio")]
        return Ok(Arc::new(sqnc::AudioPreview::default()));

        #[cfg(not(feature = "audio"))]
        return Err(sqnc::Error::Config(
            "--audio requires the 'audio' feature".to_string(),
        ));
    }

    let ports = MidiOutputDevice::available_ports();
    if ports.is_empty() {
        return Err(sqnc::Error::Midi("No MIDI output ports found".to_string()));
    }
    println!("MIDI outputs:");
    for (i, name) in ports.iter().enumerate() {
        println!("  [{}] {}", i, name);
    }

    let device = MidiOutputDevice::new();
    device.connect(options.config.output_port)?;
    Ok(Arc::new(device))
}

fn run(options: Options) -> Result<()> {
    let config = &options.config;
    let events = Arc::new(EventBus::new());
    let receiver = events.subscribe();
    let sink = open_sink(&options)?;

    let patterns = Arc::new(PatternStore::from_config(config)?);
    let mut sequencer =
        StepSequencer::from_config(config, Arc::clone(&patterns), Arc::clone(&sink), Arc::clone(&events))?;
    let player = ScalePlayer::new(
        Arc::clone(&sink),
        sequencer.timing(),
        Arc::clone(&patterns),
        Arc::clone(&events),
    );

    let scale = Scale::from_names(&options.root, &options.scale_type, 2, 5)?;
    player.apply_random_pattern_from_scale(0, &scale, 0.7, 0.2)?;

    let pattern: Vec<String> = (0..patterns.channel_length(0)?)
        .map(|step| match patterns.get_step(0, step).map(|s| s.trigger()) {
            Ok(Some(note)) => midi_note_name(note),
            _ => "--".to_string(),
        })
        .collect();
    println!("Pattern ({} {}): {}", options.root, options.scale_type, pattern.join(" "));

    let mut clock = MidiClock::new(
        Arc::clone(&sink),
        Arc::new(MidirClockInput::new()),
        Arc::clone(&events),
    );
    clock.set_tempo(config.bpm);
    clock.set_beats_per_bar(config.beats_per_bar)?;
    if !config.clock_master {
        if let Some(source) = &config.sync_source {
            clock.set_sync_source(source)?;
        }
        clock.set_master(false)?;
    }

    clock.start()?;
    sequencer.start();

    let deadline = Instant::now() + Duration::from_secs(options.seconds);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match receiver.recv_timeout(remaining.min(Duration::from_millis(250))) {
            Ok(Event::Clock(ClockEvent::Bar { bar })) => {
                log::info!("Bar {} ({:.1} BPM)", bar, clock.tempo());
            }
            Ok(_) | Err(_) => {}
        }
    }

    sequencer.stop();
    if let Err(e) = clock.send_stop() {
        log::warn!("{}", e);
    }
    clock.stop();
    println!("Stopped.");
    Ok(())
}
