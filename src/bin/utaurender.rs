// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! `utaurender` - sings a sequence of notes with a voicebank, using an UTAU resampler
//! and wavtool.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use log::info;
use simple_logger;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use structopt::StructOpt;

use utau_render::key::Key;
use utau_render::output::Playback;
use utau_render::render::{CacheMode, CancelFlag, Engine, RenderConfig, RenderError};
use utau_render::song::{Note, RenderRegion, Song};
use utau_render::voicebank::{self, VoicebankError};

/// Lyric of a rest.
const REST: &str = "R";

#[derive(Debug, StructOpt)]
#[structopt(name = "utaurender", about = "Singing notes with an UTAU voicebank")]
struct Opt {
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    /// Directory containing the voicebank's oto.ini.
    #[structopt(long, parse(from_os_str))]
    voicebank: PathBuf,

    /// The resampler executable.
    #[structopt(long, default_value = "resampler", parse(from_os_str))]
    resampler: PathBuf,

    /// The wavtool executable.
    #[structopt(long, default_value = "wavtool", parse(from_os_str))]
    wavtool: PathBuf,

    /// Where rendered notes are cached. Defaults to a directory in the system's temp dir.
    #[structopt(long, parse(from_os_str))]
    cache_dir: Option<PathBuf>,

    /// Render every note afresh.
    #[structopt(long)]
    no_cache: bool,

    /// Beats per minute. Note durations are given at 125 bpm regardless.
    #[structopt(long, default_value = "125")]
    tempo: f64,

    /// Resampler flags for all notes.
    #[structopt(long, default_value = "")]
    flags: String,

    /// Number of resampler processes running at once. Defaults to one per CPU.
    #[structopt(short, long)]
    jobs: Option<usize>,

    /// Silent sample used for pauses. Generated if not given.
    #[structopt(long, parse(from_os_str))]
    silence: Option<PathBuf>,

    /// Lyric conversion table, one group of equivalent spellings per line.
    #[structopt(long, parse(from_os_str))]
    conversions: Option<PathBuf>,

    /// Seconds after which a resampler or wavtool process is killed.
    #[structopt(long)]
    timeout: Option<f64>,

    /// Also shorten the overlap of notes that start late.
    #[structopt(long)]
    correct_note_drift: bool,

    /// Output wav file. The song is played directly if not given.
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,

    /// The notes as `lyric:pitch:duration`, e.g. `ka:C4:480`. A lyric of `R` is a rest.
    notes: Vec<String>,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("Invalid note {:?}: {}", token, reason))]
    InvalidNote { token: String, reason: String },
    #[snafu(display("Tempo must be positive, got {}", tempo))]
    InvalidTempo { tempo: f64 },
    #[snafu(display("{}", source))]
    LoadVoicebank { source: VoicebankError },
    #[snafu(display("{}", source))]
    Render { source: RenderError },
    #[snafu(display("Could not play the song: {}", source))]
    Play { source: io::Error },
}

/// One parsed command line note.
#[derive(Debug, PartialEq)]
struct NoteToken {
    lyric: String,
    /// `None` for rests.
    key: Option<Key>,
    duration: i64,
}

fn parse_note(token: &str) -> Result<NoteToken, CliError> {
    let mut parts = token.rsplitn(3, ':');
    let duration = parts.next().unwrap_or_default();
    let pitch = parts.next().context(InvalidNote {
        token,
        reason: "expected lyric:pitch:duration",
    })?;
    let lyric = parts.next().unwrap_or_default();

    let duration: i64 = duration.parse().ok().filter(|&d| d > 0).context(InvalidNote {
        token,
        reason: "duration must be a positive number of ms",
    })?;
    if lyric == REST {
        return Ok(NoteToken {
            lyric: lyric.to_owned(),
            key: None,
            duration,
        });
    }
    let key = Key::named_str(pitch).context(InvalidNote {
        token,
        reason: format!("unknown pitch {:?}", pitch),
    })?;
    Ok(NoteToken {
        lyric: lyric.to_owned(),
        key: Some(key),
        duration,
    })
}

fn build_song(opt: &Opt) -> Result<Song, CliError> {
    ensure!(opt.tempo > 0.0, InvalidTempo { tempo: opt.tempo });
    let mut bank = voicebank::load_voicebank(&opt.voicebank).context(LoadVoicebank)?;
    if let Some(path) = &opt.conversions {
        bank.set_conversions(voicebank::load_conversions(path).context(LoadVoicebank)?);
    }

    let mut song = Song::new(opt.tempo, bank);
    song.flags = opt.flags.clone();
    let mut position = 0;
    for token in &opt.notes {
        let parsed = parse_note(token)?;
        if let Some(key) = parsed.key {
            song.add_note(Note::new(position, parsed.duration, key, &parsed.lyric));
        }
        position += parsed.duration;
    }
    Ok(song)
}

fn render_config(opt: &Opt) -> RenderConfig {
    let cache_dir = opt
        .cache_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("utaurender-cache"));
    RenderConfig {
        resampler: opt.resampler.clone(),
        wavtool: opt.wavtool.clone(),
        cache_dir: Some(cache_dir),
        cache: if opt.no_cache {
            CacheMode::Disabled
        } else {
            CacheMode::Enabled
        },
        silence: opt.silence.clone(),
        workers: opt.jobs.unwrap_or(0),
        timeout: opt.timeout.filter(|t| *t > 0.0).map(Duration::from_secs_f64),
        correct_note_drift: opt.correct_note_drift,
    }
}

fn main() -> Result<(), CliError> {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level).unwrap();

    let mut song = build_song(&opt)?;
    let engine = Engine::new(render_config(&opt)).context(Render)?;
    let cancel = CancelFlag::new();

    match &opt.output {
        Some(dest) => {
            if engine
                .render_to(&mut song, RenderRegion::WHOLE_SONG, dest, &cancel)
                .context(Render)?
            {
                info!("wrote {}", dest.display());
            } else {
                info!("no notes to render");
            }
        }
        None => match engine
            .render(&mut song, RenderRegion::WHOLE_SONG, &cancel)
            .context(Render)?
        {
            Some(rendered) => {
                let mut playback = Playback::start(rendered.path()).context(Play)?;
                playback.wait().context(Play)?;
            }
            None => info!("no notes to render"),
        },
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn notes() {
        assert_eq!(
            parse_note("ka:C4:480").unwrap(),
            NoteToken {
                lyric: "ka".to_owned(),
                key: Key::named_str("C4"),
                duration: 480,
            }
        );
        assert_eq!(parse_note("a:ka:F#4:240").unwrap().lyric, "a:ka");
        assert_eq!(parse_note("R::960").unwrap().key, None);
    }

    #[test]
    fn invalid_notes() {
        assert!(parse_note("ka").is_err());
        assert!(parse_note("ka:C4:-5").is_err());
        assert!(parse_note("ka:H4:480").is_err());
        assert!(parse_note("ka:C4:long").is_err());
    }
}
