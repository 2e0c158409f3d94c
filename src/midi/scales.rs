/// Musical scales - interval tables and per-octave note maps
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleType {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    HarmonicMinor,
    MelodicMinor,
    WholeTone,
    Chromatic,
    PentatonicMajor,
    PentatonicMinor,
    Blues,
    Diminished,
}

impl ScaleType {
    pub const ALL: [ScaleType; 15] = [
        ScaleType::Major,
        ScaleType::Minor,
        ScaleType::Dorian,
        ScaleType::Phrygian,
        ScaleType::Lydian,
        ScaleType::Mixolydian,
        ScaleType::Locrian,
        ScaleType::HarmonicMinor,
        ScaleType::MelodicMinor,
        ScaleType::WholeTone,
        ScaleType::Chromatic,
        ScaleType::PentatonicMajor,
        ScaleType::PentatonicMinor,
        ScaleType::Blues,
        ScaleType::Diminished,
    ];

    /// Semitone offsets from the root
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ScaleType::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleType::Minor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleType::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleType::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            ScaleType::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            ScaleType::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            ScaleType::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            ScaleType::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            ScaleType::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            ScaleType::WholeTone => &[0, 2, 4, 6, 8, 10],
            ScaleType::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
            ScaleType::PentatonicMajor => &[0, 2, 4, 7, 9],
            ScaleType::PentatonicMinor => &[0, 3, 5, 7, 10],
            ScaleType::Blues => &[0, 3, 5, 6, 7, 10],
            ScaleType::Diminished => &[0, 2, 3, 5, 6, 8, 9, 11],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScaleType::Major => "major",
            ScaleType::Minor => "minor",
            ScaleType::Dorian => "dorian",
            ScaleType::Phrygian => "phrygian",
            ScaleType::Lydian => "lydian",
            ScaleType::Mixolydian => "mixolydian",
            ScaleType::Locrian => "locrian",
            ScaleType::HarmonicMinor => "harmonic_minor",
            ScaleType::MelodicMinor => "melodic_minor",
            ScaleType::WholeTone => "whole_tone",
            ScaleType::Chromatic => "chromatic",
            ScaleType::PentatonicMajor => "pentatonic_major",
            ScaleType::PentatonicMinor => "pentatonic_minor",
            ScaleType::Blues => "blues",
            ScaleType::Diminished => "diminished",
        }
    }
}

impl fmt::Display for ScaleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScaleType {
    type Err = Error;

    /// Accepts `harmonic_minor`, `Harmonic Minor`, `harmonic-minor`...
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        ScaleType::ALL
            .into_iter()
            .find(|scale_type| scale_type.name() == normalized)
            .ok_or_else(|| Error::UnknownScaleType(s.to_string()))
    }
}

/// Root note names. Octave 0 of A sits at MIDI 21.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteName {
    A,
    ASharp,
    B,
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
}

impl NoteName {
    const NAMES: [(&'static str, NoteName); 12] = [
        ("A", NoteName::A),
        ("A#", NoteName::ASharp),
        ("B", NoteName::B),
        ("C", NoteName::C),
        ("C#", NoteName::CSharp),
        ("D", NoteName::D),
        ("D#", NoteName::DSharp),
        ("E", NoteName::E),
        ("F", NoteName::F),
        ("F#", NoteName::FSharp),
        ("G", NoteName::G),
        ("G#", NoteName::GSharp),
    ];

    pub fn base_midi(self) -> i32 {
        21 + self as i32
    }
}

impl FromStr for NoteName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|&(_, note)| note)
            .ok_or_else(|| Error::UnknownRootNote(s.to_string()))
    }
}

/// Notes available in each octave, keyed by octave number.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scale {
    octaves: BTreeMap<i32, Vec<u8>>,
}

impl Scale {
    /// Build every octave from `start_octave` to `end_octave` inclusive.
    /// Notes outside 0..=127 are dropped, and so are octaves left empty.
    pub fn generate(
        root: NoteName,
        scale_type: ScaleType,
        start_octave: i32,
        end_octave: i32,
    ) -> Self {
        let mut octaves = BTreeMap::new();
        for octave in start_octave..=end_octave {
            let base_note = root.base_midi() + octave * 12;
            let notes: Vec<u8> = scale_type
                .intervals()
                .iter()
                .map(|&interval| base_note + interval as i32)
                .filter(|note| (0..=127).contains(note))
                .map(|note| note as u8)
                .collect();
            if !notes.is_empty() {
                octaves.insert(octave, notes);
            }
        }
        Self { octaves }
    }

    /// Convenience wrapper taking names, e.g. `("C", "minor")`.
    pub fn from_names(root: &str, scale_type: &str, start_octave: i32, end_octave: i32) -> Result<Self> {
        Ok(Self::generate(
            root.parse()?,
            scale_type.parse()?,
            start_octave,
            end_octave,
        ))
    }

    pub fn from_octaves(octaves: BTreeMap<i32, Vec<u8>>) -> Result<Self> {
        if let Some(&note) = octaves.values().flatten().find(|&&note| note > 127) {
            return Err(Error::NoteOutOfRange(note));
        }
        Ok(Self { octaves })
    }

    pub fn lowest_octave(&self) -> Option<i32> {
        self.octaves.keys().next().copied()
    }

    pub fn octaves(&self) -> impl Iterator<Item = i32> + '_ {
        self.octaves.keys().copied()
    }

    pub fn octave_count(&self) -> usize {
        self.octaves.len()
    }

    pub fn notes(&self, octave: i32) -> Option<&[u8]> {
        self.octaves.get(&octave).map(Vec::as_slice)
    }

    /// True when no octave holds a note to play.
    pub fn is_empty(&self) -> bool {
        self.octaves.values().all(Vec::is_empty)
    }
}
