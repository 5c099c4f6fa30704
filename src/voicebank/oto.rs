// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Reading voicebanks from disk.
//!
//! A voicebank is a directory tree containing `oto.ini` (or `oto_ini.txt`) files with one
//! line per alias:
//!
//! ```text
//! ka.wav=- ka,10,120,-200,80,30
//! ```
//!
//! plus an optional `character.txt` and `prefix.map` at its root.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use encoding_rs::SHIFT_JIS;
use log::{debug, info, warn};
use snafu::{ensure, ResultExt, Snafu};
use walkdir::WalkDir;

use super::{LyricConfig, LyricConversions, PitchMap, Voicebank};
use crate::key::looks_like_pitch;

const OTO_FILES: [&str; 2] = ["oto.ini", "oto_ini.txt"];
const PITCH_MAP_FILES: [&str; 2] = ["prefixmap", "prefix.map"];
const MAX_DEPTH: usize = 10;

#[derive(Debug, Snafu)]
pub enum VoicebankError {
    #[snafu(display("Voicebank directory {} does not exist", path.display()))]
    MissingDirectory { path: PathBuf },
    #[snafu(display("Could not scan voicebank directory {}: {}", path.display(), source))]
    ScanDirectory {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[snafu(display("Could not read {}: {}", path.display(), source))]
    ReadConfig { path: PathBuf, source: io::Error },
}

/// Load the voicebank rooted at `path`. If `path` is a file, its directory is used.
pub fn load_voicebank(path: &Path) -> Result<Voicebank, VoicebankError> {
    ensure!(path.exists(), MissingDirectory { path });
    let root = if path.is_dir() {
        path.to_path_buf()
    } else {
        path.parent().map_or_else(PathBuf::new, Path::to_path_buf)
    };

    let mut bank = Voicebank::new();
    bank.path = root.clone();
    if let Some(character) = read_optional(&root.join("character.txt"))? {
        bank.name = parse_character_name(&character).unwrap_or_default();
    }

    let walker = WalkDir::new(&root)
        .follow_links(true)
        .max_depth(MAX_DEPTH)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));
    for entry in walker {
        let entry = entry.context(ScanDirectory { path: &root })?;
        let is_oto = entry
            .file_name()
            .to_str()
            .map_or(false, |name| OTO_FILES.contains(&name));
        if !entry.file_type().is_file() || !is_oto {
            continue;
        }
        let dir = entry.path().parent().unwrap_or(&root);
        let text = read_text(entry.path())?;
        let mut added = 0;
        for config in parse_oto(&text, dir) {
            if !config.path.exists() {
                debug!("skipping {:?}, {} is missing", config.alias, config.path.display());
                continue;
            }
            if bank.add_config(config) {
                added += 1;
            }
        }
        debug!("loaded {} aliases from {}", added, entry.path().display());
    }

    for name in PITCH_MAP_FILES.iter() {
        if let Some(text) = read_optional(&root.join(name))? {
            parse_pitch_map(&text, bank.pitch_map_mut());
        }
    }

    info!(
        "loaded voicebank {:?} with {} aliases from {}",
        bank.name,
        bank.len(),
        root.display()
    );
    Ok(bank)
}

/// Load lyric conversion groups, one comma separated group per line.
pub fn load_conversions(path: &Path) -> Result<LyricConversions, VoicebankError> {
    Ok(LyricConversions::parse(&read_text(path)?))
}

/// Parse the lines of an oto.ini file. Sample paths are resolved relative to `dir`.
/// Malformed lines are skipped with a warning.
pub fn parse_oto(text: &str, dir: &Path) -> Vec<LyricConfig> {
    let mut configs = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_oto_line(line, dir) {
            Some(config) => configs.push(config),
            None => warn!("malformed oto.ini line {}: {:?}", number + 1, line),
        }
    }
    configs
}

fn parse_oto_line(line: &str, dir: &Path) -> Option<LyricConfig> {
    let separator = line.find(".wav=")?;
    let (file, rest) = line.split_at(separator + ".wav".len());
    let mut fields = rest[1..].split(',');
    let alias = fields.next()?.trim();
    let values = fields
        .map(|v| {
            let v = v.trim();
            if v.is_empty() {
                Some(0.0)
            } else {
                v.parse::<f64>().ok()
            }
        })
        .collect::<Option<Vec<_>>>()?;
    if values.len() != 5 {
        return None;
    }
    let alias = if alias.is_empty() {
        // The sample's own name serves as alias.
        file.trim_end_matches(".wav").rsplit('/').next().unwrap_or(file)
    } else {
        alias
    };
    Some(LyricConfig {
        path: dir.join(file),
        alias: alias.to_owned(),
        offset: values[0],
        consonant: values[1],
        cutoff: values[2],
        preutterance: values[3],
        overlap: values[4],
    })
}

/// Parse a tab separated `prefix.map`: pitch, prefix, suffix.
pub fn parse_pitch_map(text: &str, map: &mut PitchMap) {
    for line in text.lines() {
        let mut fields = line.trim_end_matches('\r').split('\t');
        let pitch = match fields.next() {
            Some(pitch) if looks_like_pitch(pitch) => pitch,
            _ => continue,
        };
        let prefix = fields.next().unwrap_or("");
        let suffix = fields.next().unwrap_or("");
        if !prefix.is_empty() {
            map.set_prefix(pitch, prefix);
        }
        if !suffix.is_empty() {
            map.set_suffix(pitch, suffix);
        }
    }
}

fn parse_character_name(text: &str) -> Option<String> {
    text.lines().map(str::trim).find_map(|line| {
        line.strip_prefix("name=")
            .or_else(|| line.strip_prefix("名前："))
            .map(str::to_owned)
    })
}

/// Read a text file. Voicebanks that are not UTF-8 are usually Shift-JIS.
fn read_text(path: &Path) -> Result<String, VoicebankError> {
    let bytes = fs::read(path).context(ReadConfig { path })?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            let (text, _, had_errors) = SHIFT_JIS.decode(err.as_bytes());
            if had_errors {
                warn!("{} is neither UTF-8 nor Shift-JIS, some characters are lost", path.display());
            } else {
                debug!("reading {} as Shift-JIS", path.display());
            }
            Ok(text.into_owned())
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, VoicebankError> {
    if path.is_file() {
        read_text(path).map(Some)
    } else {
        Ok(None)
    }
}
