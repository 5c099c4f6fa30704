// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Appending snippets to the output file with the wavtool.
//!
//! The wavtool has no notion of where it is in the song, it simply appends. We keep
//! track of how much audio was written so far (`total_delta`, in ms at the actual tempo)
//! and compare it against where the next snippet is supposed to start.

use std::path::{Path, PathBuf};

use log::{debug, info};

use super::process::{ProcessError, ProcessRunner};
use crate::song::{Envelope, BASE_TEMPO};

/// Passed with the final snippet, telling the wavtool to finish the file.
pub const LAST_NOTE: &str = "LAST_NOTE";

/// Positions closer than this (in ms) count as equal.
const DRIFT_EPSILON: f64 = 0.01;

/// A rendered note about to be appended. Lengths and positions are song level ms.
#[derive(Debug, Clone)]
pub struct NoteSnippet<'a> {
    /// The resampler output.
    pub input: &'a Path,
    pub envelope: &'a Envelope,
    /// Where playback starts inside the snippet, at the actual tempo.
    pub start_point: f64,
    /// Length of the snippet.
    pub length: f64,
    /// Where in the song the snippet should start.
    pub expected_delta: f64,
    /// Whether the snippet crossfades with what was appended before.
    pub include_overlap: bool,
    pub is_last: bool,
}

pub struct Wavtool<'a> {
    exe: PathBuf,
    runner: &'a dyn ProcessRunner,
    output: PathBuf,
    scale: f64,
    total_delta: f64,
    correct_note_drift: bool,
}

impl<'a> Wavtool<'a> {
    /// Appends to `output` by running `exe` through `runner`.
    ///
    /// Lagging notes are only logged unless `correct_note_drift` is set, in which case
    /// their overlap is shortened like it is done for silence.
    pub fn new(exe: &Path, runner: &'a dyn ProcessRunner, output: &Path, correct_note_drift: bool) -> Self {
        Wavtool {
            exe: exe.to_path_buf(),
            runner,
            output: output.to_path_buf(),
            scale: 1.0,
            total_delta: 0.0,
            correct_note_drift,
        }
    }

    /// Reset the accumulated length for a render starting at `start_delta` (song level ms)
    /// of a song with the given tempo.
    pub fn start_render(&mut self, start_delta: f64, tempo: f64) {
        self.scale = BASE_TEMPO / tempo;
        self.total_delta = start_delta * self.scale;
    }

    /// How much audio was appended so far, in ms at the actual tempo.
    pub fn total_delta(&self) -> f64 {
        self.total_delta
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// How far the output lags behind `expected` (actual tempo), if noticeably.
    fn lag(&self, expected: f64) -> Option<f64> {
        let diff = expected - self.total_delta;
        if diff > DRIFT_EPSILON {
            Some(diff)
        } else {
            None
        }
    }

    pub fn add_note(&mut self, note: &NoteSnippet) -> Result<(), ProcessError> {
        let length = note.length * self.scale;
        let mut overlap = if note.include_overlap {
            note.envelope.fade_in().max(0.0).min(note.length) * self.scale
        } else {
            0.0
        };

        if let Some(diff) = self.lag(note.expected_delta * self.scale) {
            if self.correct_note_drift && overlap > diff {
                overlap -= diff;
                info!("note starts {:.2}ms late, reduced overlap to {:.2}ms", diff, overlap);
            } else {
                info!("note starts {:.2}ms late", diff);
            }
        }

        let mut args = vec![
            self.exe.to_string_lossy().into_owned(),
            self.output.to_string_lossy().into_owned(),
            note.input.to_string_lossy().into_owned(),
            note.start_point.to_string(),
            length.to_string(),
        ];
        args.extend_from_slice(&note.envelope.wavtool_fields(overlap));
        args.push(terminal(note.is_last));
        self.runner.run(&args)?;

        self.total_delta += length - overlap;
        debug!("appended note, output now {:.2}ms", self.total_delta);
        Ok(())
    }

    /// Append `duration` ms of silence rendered into `input`, expected at `expected_delta`
    /// (both song level). Lagging output is caught up by lengthening the silence.
    pub fn add_silence(
        &mut self,
        duration: f64,
        expected_delta: f64,
        input: &Path,
        is_last: bool,
    ) -> Result<(), ProcessError> {
        let mut duration = duration * self.scale;
        if let Some(diff) = self.lag(expected_delta * self.scale) {
            duration += diff;
            info!("silence starts {:.2}ms late, extended it to {:.2}ms", diff, duration);
        }

        let mut args = vec![
            self.exe.to_string_lossy().into_owned(),
            self.output.to_string_lossy().into_owned(),
            input.to_string_lossy().into_owned(),
            "0".to_owned(),
            duration.to_string(),
        ];
        args.extend(std::iter::repeat("0".to_owned()).take(11));
        args.push(terminal(is_last));
        self.runner.run(&args)?;

        self.total_delta += duration;
        debug!("appended silence, output now {:.2}ms", self.total_delta);
        Ok(())
    }
}

fn terminal(is_last: bool) -> String {
    let token = if is_last { LAST_NOTE } else { "" };
    token.to_owned()
}
