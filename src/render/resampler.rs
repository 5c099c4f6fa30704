// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Turning a single note (or a stretch of silence) into a snippet with the resampler.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use snafu::ResultExt;

use super::cache::{cache_key, SnippetCache, OUTPUT_ARG};
use super::process::{ProcessError, ProcessRunner};
use super::timing::NoteTiming;
use super::{RenderError, Resample, Snippet};
use crate::song::{Note, Song, BASE_TEMPO};
use crate::voicebank::LyricConfig;

/// Passed instead of an empty flag string, resamplers choke on empty arguments.
pub const NO_FLAGS: &str = "?";

/// Pitch silence is rendered at.
const SILENCE_PITCH: &str = "C4";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Command line rendering `note` with `config`. The output path is left empty.
pub fn note_args(
    resampler: &Path,
    song: &Song,
    note: &Note,
    timing: &NoteTiming,
    config: &LyricConfig,
    pitchbends: &str,
) -> Vec<String> {
    let flags = if !note.flags.is_empty() {
        note.flags.as_str()
    } else if !song.flags.is_empty() {
        song.flags.as_str()
    } else {
        NO_FLAGS
    };
    let start_point = note.start_point + timing.auto_start_point;
    let length = timing.duration * song.tempo_scale() + start_point + 1.0;
    vec![
        path_arg(resampler),
        path_arg(&config.path),
        String::new(),
        note.key.name(),
        (note.velocity * song.tempo / BASE_TEMPO).to_string(),
        flags.to_owned(),
        config.offset.to_string(),
        length.to_string(),
        config.consonant.to_string(),
        config.cutoff.to_string(),
        note.intensity.to_string(),
        note.modulation.to_string(),
        format!("T{}", song.tempo),
        pitchbends.to_owned(),
    ]
}

/// Command line rendering `duration` ms (at the actual tempo) of silence.
pub fn silence_args(resampler: &Path, silence_sample: &Path, duration: f64) -> Vec<String> {
    vec![
        path_arg(resampler),
        path_arg(silence_sample),
        String::new(),
        SILENCE_PITCH.to_owned(),
        "100".to_owned(),
        NO_FLAGS.to_owned(),
        "0".to_owned(),
        (duration + 1.0).to_string(),
        "0".to_owned(),
        "0".to_owned(),
        "100".to_owned(),
        "0".to_owned(),
    ]
}

/// Runs the resampler, serving repeated command lines from the cache.
pub struct Resampler<'a> {
    runner: &'a dyn ProcessRunner,
    cache: &'a dyn SnippetCache,
}

impl<'a> Resampler<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, cache: &'a dyn SnippetCache) -> Self {
        Resampler { runner, cache }
    }

    /// Render the snippet for `args` unless an identical one exists already.
    /// `what` names the snippet in errors.
    pub fn resample(&self, args: &[String], what: &str) -> Result<PathBuf, RenderError> {
        let key = cache_key(args);
        if let Some(path) = self.cache.lookup(&key) {
            debug!("{}: cached as {}", what, path.display());
            return Ok(path);
        }

        let staged = self.cache.stage().context(Snippet)?;
        let mut args = args.to_vec();
        if let Some(output) = args.get_mut(OUTPUT_ARG) {
            *output = path_arg(staged.path());
        }
        self.runner.run(&args).context(Resample { what })?;

        let written = fs::metadata(staged.path()).map_or(false, |m| m.len() > 0);
        if !written {
            return Err(ProcessError::MissingOutput {
                program: args[0].clone(),
                output: path_arg(staged.path()),
            })
            .context(Resample { what });
        }
        self.cache.store(&key, staged).context(Snippet)
    }
}
