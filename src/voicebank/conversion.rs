// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Groups of lyrics that sound the same, e.g. the romaji, hiragana and katakana
//! spellings of one syllable.

use std::collections::{BTreeSet, HashMap};

/// A disjoint set of lyric spellings. Adding a group that shares a member with an
/// existing group merges the two.
#[derive(Debug, Clone, Default)]
pub struct LyricConversions {
    groups: Vec<BTreeSet<String>>,
    group_of: HashMap<String, usize>,
}

impl LyricConversions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one comma separated group per line. Blank entries are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use utau_render::voicebank::LyricConversions;
    ///
    /// let conversions = LyricConversions::parse("a,あ,ア\nka,か,カ\n");
    /// assert_eq!(conversions.group("あ"), vec!["a", "ア", "あ"]);
    /// assert!(conversions.group("sa").is_empty());
    /// ```
    pub fn parse(text: &str) -> Self {
        let mut conversions = Self::new();
        for line in text.lines() {
            conversions.add_group(line.split(','));
        }
        conversions
    }

    pub fn add_group<'a, I: IntoIterator<Item = &'a str>>(&mut self, members: I) {
        let mut merged = BTreeSet::new();
        for member in members.into_iter().map(str::trim).filter(|m| !m.is_empty()) {
            match self.group_of.get(member) {
                Some(&id) => merged.append(&mut self.groups[id]),
                None => {
                    merged.insert(member.to_owned());
                }
            }
        }
        if merged.is_empty() {
            return;
        }
        let id = self.groups.len();
        for member in &merged {
            self.group_of.insert(member.clone(), id);
        }
        self.groups.push(merged);
    }

    /// All spellings in the group of `member`, including `member` itself, in sorted order.
    /// Returns an empty list for unknown lyrics.
    pub fn group(&self, member: &str) -> Vec<&str> {
        match self.group_of.get(member) {
            Some(&id) => self.groups[id].iter().map(String::as_str).collect(),
            None => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.group_of.is_empty()
    }
}
