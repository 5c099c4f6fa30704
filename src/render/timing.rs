// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! How long each note is actually rendered, and how it blends with its neighbours.
//!
//! A sample usually starts before the note it sings (the preutterance) and fades in over
//! the end of the previous note (the overlap). Both are cut back when the previous note
//! is too short to make room, and the rendered length of a note is adjusted so that it
//! ends where the next note's sample starts fading in.

use crate::song::{note_length, Envelope, Note};
use crate::voicebank::{LyricConfig, Voicebank};

/// Previous lyrics further away than this (in ms) do not influence alias lookup.
const NEARBY_MS: i64 = 240;

/// Fade-out of a note that nothing crossfades with.
const DEFAULT_FADE_OUT: f64 = 35.0;

/// The render timing of a single note. All values in song level ms.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteTiming {
    /// The sample the note is sung with, `None` if the lyric could not be resolved.
    pub config: Option<LyricConfig>,
    pub preutter: f64,
    pub overlap: f64,
    /// Length of the rendered snippet.
    pub duration: f64,
    /// Added to the note's start point to skip the part of the sample that was cut off.
    pub auto_start_point: f64,
    pub envelope: Envelope,
}

impl NoteTiming {
    fn unresolved(note: &Note) -> Self {
        NoteTiming {
            config: None,
            preutter: 0.0,
            overlap: 0.0,
            duration: note.duration as f64,
            auto_start_point: 0.0,
            envelope: note.envelope.clone(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.config.is_some()
    }
}

/// Whether a note acoustically runs into its successor, i.e. the successor's sample
/// starts before the note is over.
///
/// `duration` is how long the note is held and `length` the time until the successor
/// starts.
///
/// # Examples
///
/// ```
/// use utau_render::render::touching;
///
/// assert!(touching(480, 480, true, 60.0));
/// assert!(!touching(400, 480, true, 60.0));
/// assert!(!touching(480, 480, false, 60.0));
/// ```
pub fn touching(duration: i64, length: i64, resolved: bool, next_preutter: f64) -> bool {
    resolved && next_preutter.min(length as f64) + duration as f64 >= length as f64
}

/// The lyric of the previous note if it ends close enough to the note at `index`.
pub fn nearby_prev_lyric(notes: &[Note], index: usize) -> Option<&str> {
    let prev_index = index.checked_sub(1)?;
    let prev = &notes[prev_index];
    if note_length(notes, prev_index) - prev.duration < NEARBY_MS {
        Some(&prev.lyric)
    } else {
        None
    }
}

/// Find the sample for the note at `index`. A previously resolved alias is reused while
/// it still exists in the voicebank.
pub fn resolve<'v>(notes: &[Note], index: usize, voicebank: &'v Voicebank) -> Option<&'v LyricConfig> {
    let note = &notes[index];
    note.true_lyric
        .as_deref()
        .and_then(|alias| voicebank.config(alias))
        .or_else(|| voicebank.lookup(nearby_prev_lyric(notes, index), &note.lyric, &note.key.name()))
}

/// Compute the timing of every note, one entry per note.
pub fn standardize(notes: &[Note], voicebank: &Voicebank) -> Vec<NoteTiming> {
    // Each note depends on the finished timing of its successor.
    let mut timings: Vec<NoteTiming> = Vec::with_capacity(notes.len());
    for index in (0..notes.len()).rev() {
        let config = resolve(notes, index, voicebank).cloned();
        let timing = standardize_note(notes, index, config, timings.last_mut());
        timings.push(timing);
    }
    timings.reverse();
    timings
}

fn standardize_note(
    notes: &[Note],
    index: usize,
    config: Option<LyricConfig>,
    next: Option<&mut NoteTiming>,
) -> NoteTiming {
    let note = &notes[index];
    let config = match config {
        Some(config) => config,
        None => return NoteTiming::unresolved(note),
    };
    let own_duration = note.duration as f64;
    let length = note_length(notes, index);

    let mut preutter = note.preutter.unwrap_or(config.preutterance);
    let mut overlap = note.overlap.unwrap_or(config.overlap);
    let mut auto_start_point = 0.0;
    if let Some(prev_index) = index.checked_sub(1) {
        let prev = &notes[prev_index];
        let delta = note_length(notes, prev_index) as f64;
        preutter = preutter.min(delta);

        // The sample may reach at most halfway back into the previous note.
        let max_len = delta - prev.duration as f64 / 2.0;
        let reach = preutter - overlap;
        if reach > 0.0 && reach > max_len {
            let factor = (max_len / reach).max(0.0);
            let corrected = preutter * factor;
            auto_start_point = preutter - corrected;
            preutter = corrected;
            overlap *= factor;
        }
    }

    let mut duration = own_duration + preutter;
    let mut envelope = note.envelope.clone();
    match next.filter(|next| next.is_resolved() && touching(note.duration, length, true, next.preutter)) {
        Some(next) => {
            duration -= next.preutter + own_duration - length as f64;
            let next_overlap = next.config.as_ref().map_or(0.0, |c| c.overlap);
            duration += next_overlap
                .min(next.envelope.fade_in())
                .max(0.0)
                .min(next.duration);
            if next.envelope.fade_in() > duration {
                next.envelope.set_fade_in(duration);
            }
            envelope.set_fade_out(next.envelope.fade_in());
        }
        None => envelope.set_fade_out(DEFAULT_FADE_OUT.min(duration)),
    }

    let widths = &mut envelope.widths;
    let envelope_len = overlap + widths[1] + widths[2] + widths[4];
    let room = duration - widths[3];
    if envelope_len > 0.0 && envelope_len > room {
        let factor = room.abs() / envelope_len;
        overlap *= factor;
        widths[1] *= factor;
        widths[2] *= factor;
        widths[4] *= factor;
    }
    envelope.set_fade_in(overlap);

    NoteTiming {
        config: Some(config),
        preutter,
        overlap,
        duration,
        auto_start_point,
        envelope,
    }
}
