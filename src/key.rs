// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Definitions of what a key on the keyboard is, and how it is named.

use std::fmt;

/// Names of the twelve keys in an octave, as expected by resamplers and voicebank pitch maps.
const KEY_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A "key" is just an index on the keyboard.
/// This definition follows the MIDI standard where C4 corresponds to index 60.
///
/// Key indices range from 0 to 127.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Key(u8);

/// The name of a key in standard notation.
pub enum KeyName {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

/// Any offset applied to a key in standard notation.
pub enum KeyOffset {
    /// The key is a half-tone lower then indicated by its name.
    Flat,
    /// The key is left unchanged.
    Base,
    /// The key is a half-tone higher then indicated by its name.
    Sharp,
}

impl Key {
    /// Convert a key from standard notation to a MIDI index.
    /// Returns `None` if the key is not representable in the MIDI system.
    ///
    /// # Examples
    ///
    /// ```
    /// use utau_render::key::*;
    ///
    /// assert_eq!(Key::try_named(KeyName::A, KeyOffset::Base, 4), Some(Key::from_midi(69)));
    /// assert_eq!(Key::try_named(KeyName::C, KeyOffset::Sharp, 6), Some(Key::from_midi(85)));
    /// assert_eq!(Key::try_named(KeyName::G, KeyOffset::Flat, 2), Some(Key::from_midi(42)));
    /// ```
    pub fn try_named(name: KeyName, offset: KeyOffset, octave: i32) -> Option<Key> {
        let name_index = match name {
            KeyName::C => 0,
            KeyName::D => 2,
            KeyName::E => 4,
            KeyName::F => 5,
            KeyName::G => 7,
            KeyName::A => 9,
            KeyName::B => 11,
        };
        let offset_index = match offset {
            KeyOffset::Base => 0,
            KeyOffset::Flat => -1,
            KeyOffset::Sharp => 1,
        };
        // C4 is MIDI key number 60
        let normalize_index = 60 - 4 * 12;
        let key_index = octave * 12 + name_index + offset_index + normalize_index;
        Key::try_from_midi(key_index as i64)
    }

    /// Parse a name string of the format `<letter><offset><octave>`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use utau_render::key::*;
    ///
    /// assert_eq!(Key::named_str("A4"), Some(Key::from_midi(69)));
    /// assert_eq!(Key::named_str("a4"), Some(Key::from_midi(69)));
    /// assert_eq!(Key::named_str("C#6"), Some(Key::from_midi(85)));
    /// assert_eq!(Key::named_str("Gb2"), Some(Key::from_midi(42)));
    /// assert_eq!(Key::named_str("H2"), None);
    /// ```
    pub fn named_str(name_str: &str) -> Option<Key> {
        let mut name_chars = name_str.chars();
        let name_ch = name_chars.next()?;
        let name = match name_ch.to_ascii_uppercase() {
            'A' => KeyName::A,
            'B' => KeyName::B,
            'C' => KeyName::C,
            'D' => KeyName::D,
            'E' => KeyName::E,
            'F' => KeyName::F,
            'G' => KeyName::G,
            _ => return None,
        };

        let offset_str = name_chars
            .as_str()
            .trim_end_matches(|ch: char| ch.is_ascii_digit());
        let offset = match offset_str {
            "sharp" | "♯" | "#" => KeyOffset::Sharp,
            "flat" | "♭" | "b" => KeyOffset::Flat,
            "" => KeyOffset::Base,
            _ => return None,
        };

        let octave_str = &name_chars.as_str()[offset_str.len()..];
        let octave = octave_str.parse().ok()?;
        Key::try_named(name, offset, octave)
    }

    /// # Panics
    ///
    /// - If `midi_key` is outside of 0 - 127.
    pub fn from_midi(midi_key: u8) -> Key {
        assert!(midi_key < 128, "MIDI only has keys 0 - 127");
        Key(midi_key)
    }

    pub fn try_from_midi(midi_key: i64) -> Option<Key> {
        if midi_key >= 0 && midi_key < 128 {
            Some(Key(midi_key as u8))
        } else {
            None
        }
    }

    pub fn to_midi(self) -> u8 {
        self.0
    }

    /// Return the key index in a signed type, convenient for further calculations.
    pub fn index(self) -> i32 {
        self.0 as i32
    }

    /// The pitch name resamplers and pitch maps use, always spelled with sharps.
    ///
    /// # Examples
    ///
    /// ```
    /// # use utau_render::key::*;
    ///
    /// assert_eq!(Key::from_midi(60).name(), "C4");
    /// assert_eq!(Key::from_midi(66).name(), "F#4");
    /// assert_eq!(Key::from_midi(24).name(), "C1");
    /// ```
    pub fn name(self) -> String {
        let octave = self.index() / 12 - 1;
        format!("{}{}", KEY_NAMES[self.0 as usize % 12], octave)
    }

    /// The pitch of this key in tenths of a semitone, the unit of all pitch curves.
    pub fn tenths(self) -> f64 {
        self.index() as f64 * 10.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Returns `true` if `s` looks like a pitch marker that may be embedded in a lyric,
/// e.g. `C4` or `A#3` (octaves 1 to 7, sharps only).
pub fn looks_like_pitch(s: &str) -> bool {
    if s.len() < 2 || s.len() > 3 || !s.is_ascii() {
        return false;
    }
    let (key, octave) = s.split_at(s.len() - 1);
    let key = key.to_ascii_uppercase();
    KEY_NAMES.contains(&key.as_str()) && matches!(octave, "1" | "2" | "3" | "4" | "5" | "6" | "7")
}

/// Splits a lyric into a leading pitch marker, the bare lyric and a trailing pitch marker.
///
/// # Examples
///
/// ```
/// # use utau_render::key::split_pitch_markers;
///
/// assert_eq!(split_pitch_markers("C4ka"), ("C4", "ka", ""));
/// assert_eq!(split_pitch_markers("kaA#3"), ("", "ka", "A#3"));
/// assert_eq!(split_pitch_markers("ka"), ("", "ka", ""));
/// ```
pub fn split_pitch_markers(lyric: &str) -> (&str, &str, &str) {
    if !lyric.is_ascii() && lyric.chars().count() < 3 {
        return ("", lyric, "");
    }
    let start_len = [3, 2]
        .iter()
        .copied()
        .find(|&n| lyric.len() > n && lyric.is_char_boundary(n) && looks_like_pitch(&lyric[..n]))
        .unwrap_or(0);
    let rest = &lyric[start_len..];
    let end_len = [3, 2]
        .iter()
        .copied()
        .find(|&n| {
            rest.len() > n
                && rest.is_char_boundary(rest.len() - n)
                && looks_like_pitch(&rest[rest.len() - n..])
        })
        .unwrap_or(0);
    (
        &lyric[..start_len],
        &rest[..rest.len() - end_len],
        &rest[rest.len() - end_len..],
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names_round_trip() {
        for (name, midi) in &[("C0", 12), ("C#0", 13), ("C1", 24), ("F#4", 66), ("B7", 107)] {
            let key = Key::from_midi(*midi);
            assert_eq!(key.name(), *name);
            assert_eq!(Key::named_str(name), Some(key));
        }
    }

    #[test]
    fn out_of_range() {
        assert_eq!(Key::named_str("C10"), None);
        assert_eq!(Key::try_from_midi(128), None);
        assert_eq!(Key::try_from_midi(-1), None);
    }

    #[test]
    fn pitch_markers() {
        assert!(looks_like_pitch("C4"));
        assert!(looks_like_pitch("g#7"));
        assert!(!looks_like_pitch("C8"));
        assert!(!looks_like_pitch("ka"));
        assert_eq!(split_pitch_markers("あ"), ("", "あ", ""));
        assert_eq!(split_pitch_markers("C#4あD5"), ("C#4", "あ", "D5"));
    }
}
