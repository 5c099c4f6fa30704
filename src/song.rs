// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! High-level description of a vocal score that can be turned into audio.
//!
//! All times on this level are measured in milliseconds at the 125 bpm base tempo,
//! i.e. a beat always spans 480ms. The actual tempo only comes into play when talking
//! to the external tools.

use crate::key::Key;
use crate::pitch::PitchCurve;
use crate::voicebank::Voicebank;

/// The tempo all note positions and durations are expressed in.
pub const BASE_TEMPO: f64 = 125.0;

/// A complete song: the notes, sung by one voicebank.
#[derive(Debug, Clone)]
pub struct Song {
    /// The speed of the song measured in beats per minute.
    pub tempo: f64,
    /// Resampler flags applied to every note without flags of its own.
    pub flags: String,
    pub voicebank: Voicebank,
    /// The notes in the order of their start positions.
    notes: Vec<Note>,
}

/// A single sung syllable on the score.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// Absolute position in the song.
    pub position: i64,
    /// How long the note is held.
    pub duration: i64,
    /// Which key is sung.
    pub key: Key,
    /// The lyric as typed into the score.
    pub lyric: String,
    /// The voicebank alias the lyric resolved to, filled in while rendering.
    pub true_lyric: Option<String>,
    /// Overrides the voicebank's preutterance if set.
    pub preutter: Option<f64>,
    /// Overrides the voicebank's overlap if set.
    pub overlap: Option<f64>,
    /// Consonant velocity in percent.
    pub velocity: f64,
    /// Offset into the rendered snippet where playback starts.
    pub start_point: f64,
    /// Volume in percent.
    pub intensity: i32,
    pub modulation: i32,
    /// Per-note resampler flags, the song flags are used if empty.
    pub flags: String,
    pub envelope: Envelope,
    pub pitchbend: PitchbendSpec,
}

/// The loudness envelope of a note, five widths in ms and five heights in percent.
///
/// Widths `p1`, `p2`, `p3` and `p5` are measured from the start of the note,
/// `p4` from its end. `p1` doubles as the fade-in of the note.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub widths: [f64; 5],
    pub heights: [f64; 5],
}

/// Pitch bend description of one note, in the form stored by the score.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchbendSpec {
    /// Start of the first portamento segment relative to the note start, in ms.
    pub start: f64,
    /// Width of every portamento segment, in ms.
    pub widths: Vec<f64>,
    /// Pitch at the end of every segment but the last, in tenths of a semitone
    /// relative to the note's key. The last segment always ends on the key itself.
    pub shifts: Vec<f64>,
    /// Shape code of every segment: `""`, `"s"`, `"r"` or `"j"`.
    pub shapes: Vec<String>,
    /// Vibrato parameters: depth %, cycle ms, amplitude cents, phase-in %, phase-out %,
    /// phase offset %, pitch shift, unused, frequency slope, unused.
    pub vibrato: [i32; 10],
}

/// A window of the song to render, in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRegion {
    pub min_ms: i64,
    pub max_ms: i64,
}

impl RenderRegion {
    pub const WHOLE_SONG: RenderRegion = RenderRegion {
        min_ms: 0,
        max_ms: i64::MAX,
    };

    pub fn new(min_ms: i64, max_ms: i64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Whether any part of `[start, end]` lies inside the region.
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        start <= self.max_ms && end >= self.min_ms
    }
}

impl Envelope {
    /// Build an envelope from possibly incomplete width and height lists.
    /// Missing widths default to 0, missing heights to 100.
    ///
    /// # Examples
    ///
    /// ```
    /// use utau_render::song::Envelope;
    ///
    /// let env = Envelope::new(&[5.0, 1.0], &[80.0]);
    /// assert_eq!(env.widths, [5.0, 1.0, 0.0, 0.0, 0.0]);
    /// assert_eq!(env.heights, [80.0, 100.0, 100.0, 100.0, 100.0]);
    /// ```
    pub fn new(widths: &[f64], heights: &[f64]) -> Self {
        let mut env = Envelope {
            widths: [0.0; 5],
            heights: [100.0; 5],
        };
        for (target, value) in env.widths.iter_mut().zip(widths) {
            *target = *value;
        }
        for (target, value) in env.heights.iter_mut().zip(heights) {
            *target = *value;
        }
        env
    }

    pub fn fade_in(&self) -> f64 {
        self.widths[0]
    }

    pub fn set_fade_in(&mut self, fade_in: f64) {
        self.widths[0] = fade_in;
    }

    pub fn fade_out(&self) -> f64 {
        self.widths[3]
    }

    pub fn set_fade_out(&mut self, fade_out: f64) {
        self.widths[3] = fade_out;
    }

    /// The eleven envelope fields in the order the wavtool expects them:
    /// `p1 p2 p3 v1 v2 v3 v4 overlap p4 p5 v5`.
    pub fn wavtool_fields(&self, overlap: f64) -> [String; 11] {
        let w = &self.widths;
        let h = &self.heights;
        [
            w[0].to_string(),
            w[1].to_string(),
            w[2].to_string(),
            h[0].to_string(),
            h[1].to_string(),
            h[2].to_string(),
            h[3].to_string(),
            overlap.to_string(),
            w[3].to_string(),
            w[4].to_string(),
            h[4].to_string(),
        ]
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope {
            widths: [5.0, 1.0, 1.0, 35.0, 1.0],
            heights: [100.0; 5],
        }
    }
}

impl PitchbendSpec {
    /// A pitch bend without any portamento or vibrato.
    pub fn flat() -> Self {
        PitchbendSpec {
            start: 0.0,
            widths: Vec::new(),
            shifts: Vec::new(),
            shapes: Vec::new(),
            vibrato: [0; 10],
        }
    }

    /// Whether the widths and shifts line up, i.e. the last segment ends on the note's key.
    pub fn is_well_formed(&self) -> bool {
        self.widths.is_empty() || self.widths.len() == self.shifts.len() + 1
    }

    pub fn vibrato_depth(&self) -> i32 {
        self.vibrato[0]
    }
}

impl Default for PitchbendSpec {
    /// The default glide from the previous note: 80ms, starting 40ms before the note.
    fn default() -> Self {
        PitchbendSpec {
            start: -40.0,
            widths: vec![80.0],
            shifts: Vec::new(),
            shapes: Vec::new(),
            vibrato: [0; 10],
        }
    }
}

impl Note {
    pub fn new(position: i64, duration: i64, key: Key, lyric: &str) -> Self {
        Note {
            position,
            duration,
            key,
            lyric: lyric.to_owned(),
            true_lyric: None,
            preutter: None,
            overlap: None,
            velocity: 100.0,
            start_point: 0.0,
            intensity: 100,
            modulation: 0,
            flags: String::new(),
            envelope: Envelope::default(),
            pitchbend: PitchbendSpec::default(),
        }
    }

    pub fn end(&self) -> i64 {
        self.position + self.duration
    }
}

impl Song {
    pub fn new(tempo: f64, voicebank: Voicebank) -> Self {
        Song {
            tempo,
            flags: String::new(),
            voicebank,
            notes: Vec::new(),
        }
    }

    /// Insert a note, keeping the notes ordered by their start positions.
    /// Notes starting at the same position keep their insertion order.
    pub fn add_note(&mut self, note: Note) {
        let index = self
            .notes
            .iter()
            .position(|n| n.position > note.position)
            .unwrap_or_else(|| self.notes.len());
        self.notes.insert(index, note);
    }

    /// Remove the first note starting at `position`, if any.
    pub fn remove_note(&mut self, position: i64) -> Option<Note> {
        let index = self.notes.iter().position(|n| n.position == position)?;
        Some(self.notes.remove(index))
    }

    /// Iterate all notes in the order they are sung.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub(crate) fn notes_mut(&mut self) -> &mut [Note] {
        &mut self.notes
    }

    /// The span of the note at `index` until the next note starts.
    /// The last note spans exactly its own duration.
    pub fn note_length(&self, index: usize) -> i64 {
        note_length(&self.notes, index)
    }

    /// Multiply a length on the song level with this to get the length at the actual tempo.
    pub fn tempo_scale(&self) -> f64 {
        BASE_TEMPO / self.tempo
    }

    /// Build the pitch curve of the whole song from scratch.
    pub fn pitch_curve(&self) -> PitchCurve {
        let mut curve = PitchCurve::new();
        for (i, note) in self.notes.iter().enumerate() {
            let prev_key = if i > 0 { self.notes[i - 1].key } else { note.key };
            curve.add_pitchbends(
                note.position,
                note.duration,
                &note.pitchbend,
                prev_key,
                note.key,
            );
        }
        curve
    }
}

pub(crate) fn note_length(notes: &[Note], index: usize) -> i64 {
    match notes.get(index + 1) {
        Some(next) => next.position - notes[index].position,
        None => notes[index].duration,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn c4() -> Key {
        Key::from_midi(60)
    }

    #[test]
    fn notes_stay_ordered() {
        let mut song = Song::new(120.0, Voicebank::new());
        song.add_note(Note::new(960, 480, c4(), "c"));
        song.add_note(Note::new(0, 480, c4(), "a"));
        song.add_note(Note::new(480, 480, c4(), "b"));
        let lyrics: Vec<_> = song.notes().iter().map(|n| n.lyric.as_str()).collect();
        assert_eq!(lyrics, vec!["a", "b", "c"]);
        assert_eq!(song.note_length(0), 480);
        assert_eq!(song.note_length(2), 480);

        assert_eq!(song.remove_note(480).map(|n| n.lyric), Some("b".to_owned()));
        assert_eq!(song.note_length(0), 960);
    }

    #[test]
    fn envelope_fields() {
        let env = Envelope::default();
        let fields = env.wavtool_fields(12.5);
        assert_eq!(
            fields,
            ["5", "1", "1", "100", "100", "100", "100", "12.5", "35", "1", "100"]
        );
    }

    #[test]
    fn short_envelope_defaults() {
        let env = Envelope::new(&[], &[]);
        assert_eq!(env.widths, [0.0; 5]);
        assert_eq!(env.heights, [100.0; 5]);
    }

    #[test]
    fn region() {
        assert!(RenderRegion::WHOLE_SONG.intersects(0, 10));
        let region = RenderRegion::new(100, 200);
        assert!(!region.intersects(0, 50));
        assert!(region.intersects(150, 300));
        assert!(!region.intersects(250, 300));
    }
}
