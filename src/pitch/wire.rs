// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! The textual pitch bend format understood by resamplers.
//!
//! Every sample is a 12 bit two's complement number written as two base64 digits,
//! runs of equal samples are written once followed by `#<repeats>#`.

use snafu::{ensure, OptionExt, ResultExt, Snafu};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

pub const MIN_SAMPLE: i32 = -2048;
pub const MAX_SAMPLE: i32 = 2047;

#[derive(Debug, Snafu)]
pub enum WireError {
    #[snafu(display("Invalid pitch bend digit {:?} at offset {}", digit, offset))]
    InvalidDigit { digit: char, offset: usize },
    #[snafu(display("Pitch bend ends in the middle of a sample"))]
    TruncatedSample,
    #[snafu(display("Repeat count at offset {} is not terminated", offset))]
    UnterminatedRepeat { offset: usize },
    #[snafu(display("Invalid repeat count {:?} at offset {}: {}", count, offset, source))]
    InvalidRepeat {
        count: String,
        offset: usize,
        source: std::num::ParseIntError,
    },
    #[snafu(display("Repeat count at offset {} has nothing to repeat", offset))]
    RepeatWithoutSample { offset: usize },
}

pub fn clamp_12bit(value: i64) -> i32 {
    value.max(MIN_SAMPLE as i64).min(MAX_SAMPLE as i64) as i32
}

/// Encode a single sample, clamping it into the 12 bit range first.
///
/// # Examples
///
/// ```
/// use utau_render::pitch::encode_12bit;
///
/// assert_eq!(encode_12bit(0), "AA");
/// assert_eq!(encode_12bit(-1), "//");
/// assert_eq!(encode_12bit(2047), "f/");
/// assert_eq!(encode_12bit(-2048), "gA");
/// ```
pub fn encode_12bit(value: i32) -> String {
    let mut unsigned = clamp_12bit(value as i64);
    if unsigned < 0 {
        unsigned += 4096;
    }
    let high = ALPHABET[(unsigned / 64) as usize] as char;
    let low = ALPHABET[(unsigned % 64) as usize] as char;
    let mut token = String::with_capacity(2);
    token.push(high);
    token.push(low);
    token
}

/// Encode a sequence of samples, compressing runs of equal samples.
pub fn encode_pitchbends(samples: &[i32]) -> String {
    let mut encoded = String::new();
    let mut rest = samples;
    while let Some(&first) = rest.first() {
        let run = rest.iter().take_while(|&&s| s == first).count();
        encoded.push_str(&encode_12bit(first));
        if run > 1 {
            encoded.push('#');
            encoded.push_str(&(run - 1).to_string());
            encoded.push('#');
        }
        rest = &rest[run..];
    }
    encoded
}

fn digit_value(digit: u8) -> Option<i32> {
    ALPHABET.iter().position(|&d| d == digit).map(|v| v as i32)
}

/// Decode the output of [`encode_pitchbends`] back into samples.
///
/// # Examples
///
/// ```
/// use utau_render::pitch::decode_pitchbends;
///
/// assert_eq!(decode_pitchbends("AA#2#//").unwrap(), vec![0, 0, 0, -1]);
/// assert!(decode_pitchbends("A").is_err());
/// ```
pub fn decode_pitchbends(encoded: &str) -> Result<Vec<i32>, WireError> {
    let bytes = encoded.as_bytes();
    let mut samples: Vec<i32> = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        if bytes[offset] == b'#' {
            let count_start = offset + 1;
            let count_len = bytes[count_start..]
                .iter()
                .position(|&b| b == b'#')
                .context(UnterminatedRepeat { offset })?;
            let count_str = &encoded[count_start..count_start + count_len];
            let count: usize = count_str.parse().context(InvalidRepeat {
                count: count_str,
                offset,
            })?;
            let last = *samples.last().context(RepeatWithoutSample { offset })?;
            samples.extend(std::iter::repeat(last).take(count));
            offset = count_start + count_len + 1;
        } else {
            ensure!(offset + 1 < bytes.len(), TruncatedSample);
            let mut unsigned = 0;
            for i in offset..offset + 2 {
                let value = digit_value(bytes[i]).with_context(|| InvalidDigit {
                    digit: encoded[i..].chars().next().unwrap_or('?'),
                    offset: i,
                })?;
                unsigned = unsigned * 64 + value;
            }
            samples.push(if unsigned > MAX_SAMPLE {
                unsigned - 4096
            } else {
                unsigned
            });
            offset += 2;
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokens() {
        assert_eq!(encode_12bit(-1), "//");
        assert_eq!(encode_12bit(64), "BA");
        assert_eq!(encode_12bit(5000), encode_12bit(2047));
        assert_eq!(encode_12bit(-5000), encode_12bit(-2048));
    }

    #[test]
    fn runs() {
        assert_eq!(encode_pitchbends(&[0; 5]), "AA#4#");
        assert_eq!(encode_pitchbends(&[0, 0, -1, 0]), "AA#1#//AA");
        assert_eq!(encode_pitchbends(&[]), "");
    }

    #[test]
    fn decodes_what_was_encoded() {
        let samples: Vec<i32> = vec![-2048, -2048, -100, -1, 0, 0, 0, 1, 63, 64, 2047, 2047];
        let encoded = encode_pitchbends(&samples);
        assert_eq!(decode_pitchbends(&encoded).unwrap(), samples);
    }

    #[test]
    fn malformed_input() {
        assert!(matches!(
            decode_pitchbends("A!"),
            Err(WireError::InvalidDigit { digit: '!', offset: 1 })
        ));
        assert!(matches!(decode_pitchbends("AAB"), Err(WireError::TruncatedSample)));
        assert!(matches!(
            decode_pitchbends("AA#3"),
            Err(WireError::UnterminatedRepeat { offset: 2 })
        ));
        assert!(matches!(
            decode_pitchbends("AA#x#"),
            Err(WireError::InvalidRepeat { .. })
        ));
        assert!(matches!(
            decode_pitchbends("#2#"),
            Err(WireError::RepeatWithoutSample { offset: 0 })
        ));
    }
}
