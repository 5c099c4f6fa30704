// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! The pitch of a whole song, sampled in fixed steps.

use std::collections::BTreeMap;

use log::{debug, warn};

use super::shape::{Portamento, Vibrato};
use super::wire;
use crate::key::Key;
use crate::song::PitchbendSpec;

/// Width of a pitch step in ms, independent of the tempo.
pub const STEP_MS: f64 = 5.0;

/// First pitch step at or after `position_ms`.
pub fn next_step(position_ms: f64) -> i64 {
    (position_ms / STEP_MS).ceil() as i64
}

/// Last pitch step strictly before `position_ms`.
pub fn prev_step(position_ms: f64) -> i64 {
    let step = (position_ms / STEP_MS).floor() as i64;
    if step == next_step(position_ms) {
        step - 1
    } else {
        step
    }
}

/// Everything that bends the pitch at one step. Both portamento and vibrato are keyed by
/// the start of the note that registered them.
#[derive(Debug, Clone, Default)]
struct PitchStep {
    portamento: BTreeMap<i64, Portamento>,
    vibrato: BTreeMap<i64, Vibrato>,
}

impl PitchStep {
    /// The portamento of the latest note covering this step wins.
    fn portamento(&self) -> Option<&Portamento> {
        self.portamento.values().next_back()
    }

    fn vibrato(&self) -> Option<&Vibrato> {
        self.vibrato.values().next_back()
    }

    fn is_empty(&self) -> bool {
        self.portamento.is_empty() && self.vibrato.is_empty()
    }
}

/// Sparse map from pitch step to the pitch bends active there.
#[derive(Debug, Clone, Default)]
pub struct PitchCurve {
    steps: BTreeMap<i64, PitchStep>,
}

impl PitchCurve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no note contributes anything to the curve.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Register the pitch bends of the note starting at `note_start`.
    ///
    /// The first portamento segment starts at the pitch of `prev_key`, the last one ends at
    /// `cur_key`. Registering the same note twice replaces the earlier registration.
    pub fn add_pitchbends(
        &mut self,
        note_start: i64,
        note_duration: i64,
        spec: &PitchbendSpec,
        prev_key: Key,
        cur_key: Key,
    ) {
        if !spec.is_well_formed() {
            warn!(
                "note at {}ms has {} pitch bend widths but {} shifts",
                note_start,
                spec.widths.len(),
                spec.shifts.len()
            );
        }
        let mut start_pitch = prev_key.tenths();
        for (i, (start_ms, end_ms)) in segment_spans(note_start, spec).enumerate() {
            let end_pitch = if i + 1 < spec.widths.len() {
                cur_key.tenths() + spec.shifts.get(i).copied().unwrap_or(0.0)
            } else {
                cur_key.tenths()
            };
            let shape = spec.shapes.get(i).map(String::as_str).unwrap_or("");
            let portamento = Portamento::from_code(start_ms, start_pitch, end_ms, end_pitch, shape);
            for step in next_step(start_ms)..=prev_step(end_ms) {
                let replaced = self
                    .steps
                    .entry(step)
                    .or_default()
                    .portamento
                    .insert(note_start, portamento);
                if replaced.is_some() {
                    debug!("step {} already had a portamento of note {}", step, note_start);
                }
            }
            start_pitch = end_pitch;
        }

        if let Some((start_ms, end_ms)) = vibrato_span(note_start, note_duration, spec) {
            let vibrato = Vibrato::new(start_ms, end_ms, &spec.vibrato);
            for step in next_step(start_ms)..prev_step(end_ms) {
                self.steps
                    .entry(step)
                    .or_default()
                    .vibrato
                    .insert(note_start, vibrato);
            }
        }
    }

    /// Undo [`add_pitchbends`](Self::add_pitchbends) for the same note.
    pub fn remove_pitchbends(&mut self, note_start: i64, note_duration: i64, spec: &PitchbendSpec) {
        for (start_ms, end_ms) in segment_spans(note_start, spec) {
            self.remove_range(next_step(start_ms), prev_step(end_ms), |step| {
                step.portamento.remove(&note_start);
            });
        }
        if let Some((start_ms, end_ms)) = vibrato_span(note_start, note_duration, spec) {
            self.remove_range(next_step(start_ms), prev_step(end_ms) - 1, |step| {
                step.vibrato.remove(&note_start);
            });
        }
    }

    fn remove_range<F: FnMut(&mut PitchStep)>(&mut self, first: i64, last: i64, mut remove: F) {
        for step in first..=last {
            if let Some(pitch_step) = self.steps.get_mut(&step) {
                remove(pitch_step);
                if pitch_step.is_empty() {
                    self.steps.remove(&step);
                }
            }
        }
    }

    /// Pitch offsets relative to `key`, one per step in `first..=last`, in tenths of tenths
    /// of a semitone clamped to the wire range.
    pub fn sample_pitchbends(&self, first_step: i64, last_step: i64, key: Key) -> Vec<i32> {
        let key_pitch = key.tenths();
        // Until a portamento is reached, hold the pitch it starts from.
        let mut baseline = self
            .steps
            .range(first_step..=last_step)
            .find_map(|(_, step)| step.portamento())
            .map_or(key_pitch, Portamento::start_pitch);

        let mut samples = Vec::with_capacity((last_step - first_step + 1).max(0) as usize);
        for step in first_step..=last_step {
            let pitch = match self.steps.get(&step) {
                Some(pitch_step) => {
                    let position_ms = step as f64 * STEP_MS;
                    let vibrato = pitch_step.vibrato().map_or(0.0, |v| v.apply(position_ms));
                    match pitch_step.portamento() {
                        Some(portamento) => {
                            let pitch = portamento.apply(position_ms) + vibrato;
                            baseline = portamento.end_pitch();
                            pitch
                        }
                        None => baseline + vibrato,
                    }
                }
                None => baseline,
            };
            samples.push(wire::clamp_12bit(((pitch - key_pitch) * 10.0) as i64));
        }
        samples
    }

    /// Serialize the pitch bends of `first..=last` into the resampler's wire format.
    pub fn render_pitchbends(&self, first_step: i64, last_step: i64, key: Key) -> String {
        wire::encode_pitchbends(&self.sample_pitchbends(first_step, last_step, key))
    }
}

/// Absolute start and end of each portamento segment. Segments follow each other even
/// when a width is negative.
fn segment_spans<'a>(note_start: i64, spec: &'a PitchbendSpec) -> impl Iterator<Item = (f64, f64)> + 'a {
    spec.widths.iter().scan(note_start as f64 + spec.start, |start_ms, width| {
        let span = (*start_ms, *start_ms + width);
        *start_ms = span.1;
        Some(span)
    })
}

/// Absolute span of the note's vibrato, if it has one.
fn vibrato_span(note_start: i64, note_duration: i64, spec: &PitchbendSpec) -> Option<(f64, f64)> {
    let depth = spec.vibrato_depth();
    if depth <= 0 {
        return None;
    }
    let end_ms = (note_start + note_duration) as f64;
    let length = note_duration as f64 * depth as f64 / 100.0;
    Some((end_ms - length, end_ms))
}
