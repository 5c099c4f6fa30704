// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! The curves a pitch can take between two points, and vibrato on top of them.
//!
//! Positions are absolute milliseconds, pitches are tenths of a semitone.

use std::f64::consts::PI;

use log::warn;

/// Width substituted for portamento segments that have no extent.
pub const MIN_SEGMENT_WIDTH: f64 = 0.1;

/// The easing of a portamento segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// Straight line, shape code `"s"`.
    Linear,
    /// S-shaped logistic curve, shape code `""`.
    Logistic,
    /// Rises quickly, then flattens out, shape code `"r"`.
    LogEase,
    /// Starts flat, then rises quickly, shape code `"j"`.
    QuadEase,
}

impl Curve {
    /// Resolve a shape code, ignoring case.
    ///
    /// # Examples
    ///
    /// ```
    /// use utau_render::pitch::Curve;
    ///
    /// assert_eq!(Curve::from_code(""), Some(Curve::Logistic));
    /// assert_eq!(Curve::from_code("S"), Some(Curve::Linear));
    /// assert_eq!(Curve::from_code("j"), Some(Curve::QuadEase));
    /// assert_eq!(Curve::from_code("x"), None);
    /// ```
    pub fn from_code(code: &str) -> Option<Curve> {
        match code.to_ascii_lowercase().as_str() {
            "" => Some(Curve::Logistic),
            "s" => Some(Curve::Linear),
            "r" => Some(Curve::LogEase),
            "j" => Some(Curve::QuadEase),
            _ => None,
        }
    }

    /// Progress along the curve at `t` in `[0, 1]`, mapping 0 to 0 and 1 to 1.
    fn ease(self, t: f64) -> f64 {
        match self {
            Curve::Linear => t,
            Curve::Logistic => {
                // Steepness 5 / half-width, centered on the midpoint, rescaled to hit the ends.
                let sigmoid = |t: f64| 1.0 / (1.0 + (-10.0 * (t - 0.5)).exp());
                let low = sigmoid(0.0);
                let high = sigmoid(1.0);
                (sigmoid(t) - low) / (high - low)
            }
            // ln(20t) / 6 + 1/2 reaches 0.9993 at t = 1, so cap both ends.
            Curve::LogEase => ((LOG_EASE_STRETCH * t).ln() / 6.0 + 0.5).max(0.0).min(1.0),
            Curve::QuadEase => t * t,
        }
    }
}

const LOG_EASE_STRETCH: f64 = 20.0;

/// A glide from `(x1, y1)` to `(x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Portamento {
    curve: Curve,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

impl Portamento {
    /// Build a portamento from a shape code.
    ///
    /// Flat segments are always linear. Segments without extent become a
    /// minimal-width linear segment, unknown shape codes fall back to the logistic curve;
    /// both are reported as warnings.
    pub fn from_code(x1: f64, y1: f64, x2: f64, y2: f64, code: &str) -> Portamento {
        if y1 == y2 {
            return Portamento::new(Curve::Linear, x1, y1, x2, y2);
        }
        if !(x1 < x2) {
            warn!(
                "portamento from {}ms to {}ms has no width, using a {}ms linear segment",
                x1, x2, MIN_SEGMENT_WIDTH
            );
            return Portamento::new(Curve::Linear, x1, y1, x1 + MIN_SEGMENT_WIDTH, y2);
        }
        let curve = Curve::from_code(code).unwrap_or_else(|| {
            warn!("unrecognized portamento shape {:?}, using the default", code);
            Curve::Logistic
        });
        Portamento::new(curve, x1, y1, x2, y2)
    }

    fn new(curve: Curve, x1: f64, y1: f64, x2: f64, y2: f64) -> Portamento {
        Portamento {
            curve,
            x1,
            y1,
            x2,
            y2,
        }
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn start_pitch(&self) -> f64 {
        self.y1
    }

    pub fn end_pitch(&self) -> f64 {
        self.y2
    }

    /// Evaluate the pitch at `position_ms`. Positions outside the segment are clamped
    /// onto its ends.
    pub fn apply(&self, position_ms: f64) -> f64 {
        if !(position_ms > self.x1) {
            return self.y1;
        }
        if position_ms >= self.x2 {
            return self.y2;
        }
        let t = (position_ms - self.x1) / (self.x2 - self.x1);
        self.y1 + (self.y2 - self.y1) * self.curve.ease(t)
    }
}

/// A sinusoidal vibrato that fades in and out, centered on zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vibrato {
    start_ms: f64,
    end_ms: f64,
    phase_in_ms: f64,
    phase_out_ms: f64,
    /// Peak deviation in tenths.
    amplitude: f64,
    /// Shift of the wave, in ms.
    phase_offset_ms: f64,
    /// Constant offset in tenths, faded together with the wave.
    pitch_shift: f64,
    /// Angular frequency at the start and the end, in radians per ms.
    start_freq: f64,
    end_freq: f64,
}

impl Vibrato {
    /// Build a vibrato spanning `[start_ms, end_ms]` from the score's vibrato parameters
    /// (see [`PitchbendSpec::vibrato`](crate::song::PitchbendSpec)).
    pub fn new(start_ms: f64, end_ms: f64, params: &[i32; 10]) -> Vibrato {
        let length = (end_ms - start_ms).max(0.0);
        let cycle_ms = params[1] as f64;
        let base_freq = if cycle_ms > 0.0 { 2.0 * PI / cycle_ms } else { 0.0 };
        // A slope of +-100 changes the frequency by +-50% over the vibrato.
        let slope = params[8] as f64 / 200.0;
        Vibrato {
            start_ms,
            end_ms,
            phase_in_ms: params[3] as f64 / 100.0 * length,
            phase_out_ms: params[4] as f64 / 100.0 * length,
            amplitude: params[2] as f64 / 10.0,
            phase_offset_ms: cycle_ms * params[5] as f64 / 100.0,
            pitch_shift: params[6] as f64 / 20.0,
            start_freq: base_freq * (1.0 + slope),
            end_freq: base_freq * (1.0 - slope),
        }
    }

    pub fn start_ms(&self) -> f64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> f64 {
        self.end_ms
    }

    fn envelope(&self, position_ms: f64) -> f64 {
        let since_start = position_ms - self.start_ms;
        let until_end = self.end_ms - position_ms;
        let fade_in = if since_start < self.phase_in_ms {
            since_start / self.phase_in_ms
        } else {
            1.0
        };
        let fade_out = if until_end < self.phase_out_ms {
            until_end / self.phase_out_ms
        } else {
            1.0
        };
        fade_in.min(fade_out).max(0.0)
    }

    fn frequency(&self, position_ms: f64) -> f64 {
        let length = self.end_ms - self.start_ms;
        if length <= 0.0 {
            return self.start_freq;
        }
        let t = (position_ms - self.start_ms) / length;
        self.start_freq + (self.end_freq - self.start_freq) * t
    }

    /// Pitch deviation at `position_ms`, exactly zero outside of the vibrato.
    pub fn apply(&self, position_ms: f64) -> f64 {
        if position_ms < self.start_ms || position_ms > self.end_ms {
            return 0.0;
        }
        let envelope = self.envelope(position_ms);
        let phase = (position_ms - self.start_ms - self.phase_offset_ms) * self.frequency(position_ms);
        envelope * (self.amplitude * phase.sin() + self.pitch_shift)
    }
}
