// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Pitch bends: portamento and vibrato shapes, the song-wide pitch curve,
//! and its serialization for resamplers.

mod curve;
mod shape;
mod wire;

pub use self::curve::{next_step, prev_step, PitchCurve, STEP_MS};
pub use self::shape::{Curve, Portamento, Vibrato, MIN_SEGMENT_WIDTH};
pub use self::wire::{
    clamp_12bit, decode_pitchbends, encode_12bit, encode_pitchbends, WireError, MAX_SAMPLE,
    MIN_SAMPLE,
};
