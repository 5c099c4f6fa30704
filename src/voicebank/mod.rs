// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Voicebanks: the recorded samples a song is sung with, and how lyrics map onto them.

mod conversion;
mod oto;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::key::split_pitch_markers;

pub use self::conversion::LyricConversions;
pub use self::oto::{load_conversions, load_voicebank, parse_oto, parse_pitch_map, VoicebankError};

/// How one sample file is consumed when singing an alias. All values in ms.
#[derive(Debug, Clone, PartialEq)]
pub struct LyricConfig {
    /// The sample file.
    pub path: PathBuf,
    /// The name the lyric is looked up by, i.e. the true lyric.
    pub alias: String,
    /// Time in the sample before the note starts.
    pub offset: f64,
    /// Time in the sample before the consonant ends.
    pub consonant: f64,
    /// Time before the end of the sample where it is cut off.
    pub cutoff: f64,
    /// Time of the sample sung before the note starts.
    pub preutterance: f64,
    /// Time of the sample that crossfades with the previous note.
    pub overlap: f64,
}

/// Prefixes and suffixes appended to lyrics depending on the pitch they are sung at.
#[derive(Debug, Clone, Default)]
pub struct PitchMap {
    prefixes: HashMap<String, String>,
    suffixes: HashMap<String, String>,
}

impl PitchMap {
    pub fn prefix(&self, pitch: &str) -> &str {
        self.prefixes.get(pitch).map_or("", String::as_str)
    }

    pub fn suffix(&self, pitch: &str) -> &str {
        self.suffixes.get(pitch).map_or("", String::as_str)
    }

    pub fn set_prefix(&mut self, pitch: &str, prefix: &str) {
        self.prefixes.insert(pitch.to_owned(), prefix.to_owned());
    }

    pub fn set_suffix(&mut self, pitch: &str, suffix: &str) {
        self.suffixes.insert(pitch.to_owned(), suffix.to_owned());
    }
}

#[derive(Debug, Clone)]
pub struct Voicebank {
    /// Root directory of the voicebank.
    pub path: PathBuf,
    /// Display name from `character.txt`, if any.
    pub name: String,
    /// Whether lookups may try prefixes, suffixes and conversions, or only exact aliases.
    pub guess_alias: bool,
    configs: HashMap<String, LyricConfig>,
    pitch_map: PitchMap,
    conversions: LyricConversions,
}

impl Default for Voicebank {
    fn default() -> Self {
        Voicebank {
            path: PathBuf::new(),
            name: String::new(),
            guess_alias: true,
            configs: HashMap::new(),
            pitch_map: PitchMap::default(),
            conversions: LyricConversions::new(),
        }
    }
}

impl Voicebank {
    /// An empty voicebank, useful for building one up in code.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias. The first config registered for an alias is kept.
    /// Returns whether the config was added.
    pub fn add_config(&mut self, config: LyricConfig) -> bool {
        if self.configs.contains_key(&config.alias) {
            return false;
        }
        self.configs.insert(config.alias.clone(), config);
        true
    }

    pub fn config(&self, alias: &str) -> Option<&LyricConfig> {
        self.configs.get(alias)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn pitch_map(&self) -> &PitchMap {
        &self.pitch_map
    }

    pub fn pitch_map_mut(&mut self) -> &mut PitchMap {
        &mut self.pitch_map
    }

    pub fn conversions(&self) -> &LyricConversions {
        &self.conversions
    }

    pub fn set_conversions(&mut self, conversions: LyricConversions) {
        self.conversions = conversions;
    }

    /// Find the config singing `lyric` at `pitch` (e.g. `"C4"`), after `prev_lyric`.
    ///
    /// Tries the lyric with the pitch prefix, a VCV prefix formed from the vowel of the
    /// previous lyric, and the pitch suffix, from the most specific combination to the bare
    /// lyric. Failing that, all spellings of the lyric from the conversion groups are tried
    /// and the alphabetically first matching alias wins.
    pub fn lookup(&self, prev_lyric: Option<&str>, lyric: &str, pitch: &str) -> Option<&LyricConfig> {
        if !self.guess_alias {
            return self.config(lyric);
        }
        let vcv_prefix = format!("{} ", self.vowel(prev_lyric));
        let prefix = self.pitch_map.prefix(pitch);
        let suffix = self.pitch_map.suffix(pitch);

        let found = combinations(prefix, &vcv_prefix, lyric, suffix)
            .iter()
            .find_map(|candidate| self.config(candidate));
        if found.is_some() {
            return found;
        }

        let (start_pitch, bare_lyric, end_pitch) = split_pitch_markers(lyric);
        self.conversions
            .group(bare_lyric)
            .into_iter()
            .map(|spelling| format!("{}{}{}", start_pitch, spelling, end_pitch))
            .filter(|converted| converted != lyric)
            .flat_map(|converted| {
                combinations(prefix, &vcv_prefix, &converted, suffix)
                    .iter()
                    .filter_map(|candidate| self.config(candidate))
                    .collect::<Vec<_>>()
            })
            .min_by(|a, b| a.alias.cmp(&b.alias))
    }

    /// The vowel the previous lyric ends in, as used in VCV aliases like `"a ka"`.
    fn vowel(&self, prev_lyric: Option<&str>) -> char {
        let prev = match prev_lyric {
            Some(prev) if !prev.is_empty() => prev,
            _ => return '-',
        };
        let (_, bare, _) = split_pitch_markers(prev);
        let group = self.conversions.group(bare);
        let spellings = if group.is_empty() { vec![bare] } else { group };
        spellings
            .iter()
            .find(|s| s.is_ascii() && !s.is_empty())
            .and_then(|s| s.chars().last())
            .map_or(' ', |c| c.to_ascii_lowercase())
    }
}

/// Candidate aliases from most to least specific.
fn combinations(prefix: &str, vcv_prefix: &str, lyric: &str, suffix: &str) -> [String; 8] {
    [
        format!("{}{}{}{}", prefix, vcv_prefix, lyric, suffix),
        format!("{}{}{}", prefix, vcv_prefix, lyric),
        format!("{}{}{}", vcv_prefix, lyric, suffix),
        format!("{}{}{}", prefix, lyric, suffix),
        format!("{}{}", lyric, suffix),
        format!("{}{}", prefix, lyric),
        format!("{}{}", vcv_prefix, lyric),
        lyric.to_owned(),
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    fn config(alias: &str) -> LyricConfig {
        LyricConfig {
            path: PathBuf::from(format!("{}.wav", alias)),
            alias: alias.to_owned(),
            offset: 0.0,
            consonant: 100.0,
            cutoff: -200.0,
            preutterance: 60.0,
            overlap: 20.0,
        }
    }

    fn bank(aliases: &[&str]) -> Voicebank {
        let mut bank = Voicebank::new();
        for alias in aliases {
            bank.add_config(config(alias));
        }
        bank
    }

    fn alias<'a>(found: Option<&'a LyricConfig>) -> Option<&'a str> {
        found.map(|c| c.alias.as_str())
    }

    #[test]
    fn first_config_wins() {
        let mut bank = bank(&["a"]);
        let mut other = config("a");
        other.offset = 50.0;
        assert!(!bank.add_config(other));
        assert_eq!(bank.config("a").map(|c| c.offset), Some(0.0));
    }

    #[test]
    fn exact_and_suffixed() {
        let mut bank = bank(&["ka", "kaC5", "- ka"]);
        bank.pitch_map_mut().set_suffix("C5", "C5");
        assert_eq!(alias(bank.lookup(None, "ka", "C4")), Some("- ka"));
        assert_eq!(alias(bank.lookup(Some("a"), "ka", "C4")), Some("ka"));
        assert_eq!(alias(bank.lookup(Some("a"), "ka", "C5")), Some("kaC5"));
        assert_eq!(alias(bank.lookup(Some("a"), "sa", "C5")), None);
    }

    #[test]
    fn vcv_prefix() {
        let mut bank = bank(&["a ka", "ka"]);
        bank.set_conversions(LyricConversions::parse("a,あ\nka,か\n"));
        assert_eq!(alias(bank.lookup(Some("あ"), "ka", "C4")), Some("a ka"));
        assert_eq!(alias(bank.lookup(Some("あ"), "か", "C4")), Some("a ka"));
        assert_eq!(alias(bank.lookup(Some("ka"), "ka", "C4")), Some("a ka"));
    }

    #[test]
    fn conversions_pick_first_alias() {
        let mut bank = bank(&["カ", "か"]);
        bank.set_conversions(LyricConversions::parse("ka,か,カ\n"));
        assert_eq!(alias(bank.lookup(None, "ka", "C4")), Some("か"));
    }

    #[test]
    fn conversions_keep_pitch_markers() {
        let mut bank = bank(&["かC4"]);
        bank.set_conversions(LyricConversions::parse("ka,か\n"));
        assert_eq!(alias(bank.lookup(None, "kaC4", "D4")), Some("かC4"));
    }

    #[test]
    fn exact_only() {
        let mut bank = bank(&["- ka"]);
        bank.guess_alias = false;
        assert_eq!(alias(bank.lookup(None, "ka", "C4")), None);
        assert_eq!(alias(bank.lookup(None, "- ka", "C4")), Some("- ka"));
    }
}
