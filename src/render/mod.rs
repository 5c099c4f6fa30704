// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! The glue responsible for turning a song into an actual waveform.
//!
//! Rendering happens in two stages. First every note (and every stretch of silence) is
//! turned into a snippet by the resampler, in parallel and served from the cache where
//! possible. Then the snippets are handed to the wavtool one after another, which
//! appends them to a private working file. Only a completed render is moved to its
//! destination.

pub mod cache;
#[cfg(test)]
pub(crate) mod fake;
pub mod process;
pub mod resampler;
pub mod timing;
pub mod wavtool;

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use rayon::prelude::*;
use snafu::{ensure, ResultExt, Snafu};
use tempfile::{NamedTempFile, TempDir};

use crate::pitch::STEP_MS;
use crate::song::{note_length, Envelope, RenderRegion, Song};

pub use self::cache::{cache_key, open_cache, silence_sample, DirCache, NoCache, SnippetCache};
pub use self::process::{CancelFlag, ExternalProcess, ProcessError, ProcessRunner};
pub use self::resampler::{note_args, silence_args, Resampler};
pub use self::timing::{standardize, touching, NoteTiming};
pub use self::wavtool::{NoteSnippet, Wavtool};

const WORKING_FILE: &str = "render.wav";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RenderError {
    #[snafu(display("Could not render {}: {}", what, source))]
    Resample { what: String, source: ProcessError },
    #[snafu(display("Wavtool failed: {}", source))]
    Append { source: ProcessError },
    #[snafu(display("Could not store snippet: {}", source))]
    Snippet { source: io::Error },
    #[snafu(display("Could not write silence sample: {}", source))]
    SilenceSample { source: hound::Error },
    #[snafu(display("Could not create working file: {}", source))]
    WorkingFile { source: io::Error },
    #[snafu(display("Could not write {}: {}", path.display(), source))]
    Output { path: PathBuf, source: io::Error },
    #[snafu(display("Could not start resampler workers: {}", source))]
    WorkerPool { source: rayon::ThreadPoolBuildError },
    #[snafu(display("Could not set up snippet storage: {}", source))]
    Cache { source: io::Error },
    #[snafu(display("Render was cancelled"))]
    Cancelled,
    #[snafu(display("Render thread panicked"))]
    RenderThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Reuse snippets across renders and processes.
    Enabled,
    /// Render every snippet afresh into a temporary directory.
    Disabled,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub resampler: PathBuf,
    pub wavtool: PathBuf,
    /// Where snippets are cached. Without one, snippets are not reused.
    pub cache_dir: Option<PathBuf>,
    pub cache: CacheMode,
    /// A silent sample to render pauses from. One is generated if not given.
    pub silence: Option<PathBuf>,
    /// Number of resampler processes running at once, 0 for one per CPU.
    pub workers: usize,
    /// External processes running longer than this are killed.
    pub timeout: Option<Duration>,
    /// Shorten the overlap of notes that start late, not only lengthen late silence.
    pub correct_note_drift: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            resampler: PathBuf::from("resampler"),
            wavtool: PathBuf::from("wavtool"),
            cache_dir: None,
            cache: CacheMode::Enabled,
            silence: None,
            workers: 0,
            timeout: None,
            correct_note_drift: false,
        }
    }
}

/// Receives messages meant for the person rendering, as opposed to the log.
pub trait StatusSink: Send + Sync {
    /// Something is off with the song, but rendering continues.
    fn warn(&self, message: &str);

    /// The fraction of snippets appended so far.
    fn progress(&self, _fraction: f64) {}
}

/// Forwards status messages to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn warn(&self, message: &str) {
        warn!("{}", message);
    }

    fn progress(&self, fraction: f64) {
        debug!("rendered {:.0}%", fraction * 100.0);
    }
}

/// A finished render, living in a temporary directory until it is persisted or dropped.
#[derive(Debug)]
pub struct RenderedSong {
    dir: TempDir,
    path: PathBuf,
}

impl RenderedSong {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the render to `dest`. The file is written next to `dest` first and renamed
    /// into place, so `dest` is never seen half written.
    pub fn persist(&self, dest: &Path) -> Result<(), RenderError> {
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(parent).context(Output { path: dest })?;
        let mut source = File::open(&self.path).context(Output { path: dest })?;
        io::copy(&mut source, staged.as_file_mut()).context(Output { path: dest })?;
        staged
            .persist(dest)
            .map_err(|e| e.error)
            .context(Output { path: dest })?;
        debug!("moved render from {} to {}", self.dir.path().display(), dest.display());
        Ok(())
    }
}

/// What is appended after a snippet was rendered.
#[derive(Debug)]
enum Step<'s> {
    Note {
        envelope: &'s Envelope,
        start_point: f64,
        length: f64,
        expected_delta: f64,
        include_overlap: bool,
        is_last: bool,
    },
    Silence {
        duration: f64,
        expected_delta: f64,
        is_last: bool,
    },
}

/// One resampler call and the wavtool call consuming its snippet.
#[derive(Debug)]
struct Job<'s> {
    what: String,
    args: Vec<String>,
    step: Step<'s>,
}

/// Renders songs with one resampler and wavtool, sharing a snippet cache between renders.
pub struct Engine {
    config: RenderConfig,
    runner: Option<Arc<dyn ProcessRunner>>,
    status: Arc<dyn StatusSink>,
    cache: Box<dyn SnippetCache>,
    silence: PathBuf,
}

impl Engine {
    /// An engine running the configured tools as external processes.
    pub fn new(config: RenderConfig) -> Result<Self, RenderError> {
        Self::build(config, None)
    }

    /// An engine running all commands through `runner`.
    pub fn with_runner(config: RenderConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self, RenderError> {
        Self::build(config, Some(runner))
    }

    fn build(config: RenderConfig, runner: Option<Arc<dyn ProcessRunner>>) -> Result<Self, RenderError> {
        let cache = match config.cache {
            CacheMode::Enabled => open_cache(config.cache_dir.as_deref()),
            CacheMode::Disabled => NoCache::new().map(|c| Box::new(c) as Box<dyn SnippetCache>),
        }
        .context(Cache)?;
        let silence = match &config.silence {
            Some(silence) => silence.clone(),
            None => silence_sample(cache.dir()).context(SilenceSample)?,
        };
        Ok(Engine {
            config,
            runner,
            status: Arc::new(LogStatus),
            cache,
            silence,
        })
    }

    /// Send warnings and progress to `status` instead of the log.
    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render the notes of `song` intersecting `region`. Returns `None` if there are no
    /// such notes.
    ///
    /// The aliases the lyrics resolved to are remembered in the notes.
    pub fn render(
        &self,
        song: &mut Song,
        region: RenderRegion,
        cancel: &CancelFlag,
    ) -> Result<Option<RenderedSong>, RenderError> {
        let timings = standardize(song.notes(), &song.voicebank);
        for (note, timing) in song.notes_mut().iter_mut().zip(&timings) {
            if let Some(config) = &timing.config {
                note.true_lyric = Some(config.alias.clone());
            }
        }
        let song: &Song = song;

        let jobs = self.plan(song, &timings, region);
        if jobs.is_empty() {
            info!("nothing to render");
            return Ok(None);
        }

        let external;
        let runner: &dyn ProcessRunner = match &self.runner {
            Some(runner) => runner.as_ref(),
            None => {
                external = ExternalProcess::new(self.config.timeout, cancel.clone());
                &external
            }
        };

        let snippets = self.resample_all(runner, &jobs, cancel)?;

        let dir = tempfile::Builder::new()
            .prefix("utaurender-")
            .tempdir()
            .context(WorkingFile)?;
        let path = dir.path().join(WORKING_FILE);
        let mut wavtool = Wavtool::new(&self.config.wavtool, runner, &path, self.config.correct_note_drift);
        wavtool.start_render(region.min_ms as f64, song.tempo);

        for (done, (job, snippet)) in jobs.iter().zip(&snippets).enumerate() {
            ensure!(!cancel.is_cancelled(), Cancelled);
            let appended = match job.step {
                Step::Note {
                    envelope,
                    start_point,
                    length,
                    expected_delta,
                    include_overlap,
                    is_last,
                } => wavtool.add_note(&NoteSnippet {
                    input: snippet,
                    envelope,
                    start_point,
                    length,
                    expected_delta,
                    include_overlap,
                    is_last,
                }),
                Step::Silence {
                    duration,
                    expected_delta,
                    is_last,
                } => wavtool.add_silence(duration, expected_delta, snippet, is_last),
            };
            if let Err(err) = appended {
                ensure!(!cancel.is_cancelled(), Cancelled);
                return Err(err).context(Append);
            }
            self.status.progress((done + 1) as f64 / jobs.len() as f64);
        }

        info!("rendered {} snippets into {}", jobs.len(), wavtool.output().display());
        Ok(Some(RenderedSong { dir, path }))
    }

    /// Render and move the result to `dest`. Returns whether anything was rendered,
    /// `dest` is left alone otherwise.
    pub fn render_to(
        &self,
        song: &mut Song,
        region: RenderRegion,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> Result<bool, RenderError> {
        match self.render(song, region, cancel)? {
            Some(rendered) => {
                rendered.persist(dest)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Render on a separate thread. The song is handed back when the render is done.
    pub fn spawn_render(self: Arc<Self>, mut song: Song, region: RenderRegion, dest: PathBuf) -> RenderHandle {
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let thread = thread::spawn(move || -> Result<(Song, bool), RenderError> {
            let rendered = self.render_to(&mut song, region, &dest, &flag)?;
            Ok((song, rendered))
        });
        RenderHandle { cancel, thread }
    }

    /// The notes a render of `region` covers: from the first note intersecting it up to
    /// the next note that does not.
    fn region_notes(song: &Song, region: RenderRegion) -> Range<usize> {
        let notes = song.notes();
        let start = notes
            .iter()
            .position(|n| region.intersects(n.position, n.end()))
            .unwrap_or_else(|| notes.len());
        let end = notes[start..]
            .iter()
            .position(|n| !region.intersects(n.position, n.end()))
            .map_or(notes.len(), |offset| start + offset);
        start..end
    }

    fn plan<'s>(&self, song: &'s Song, timings: &'s [NoteTiming], region: RenderRegion) -> Vec<Job<'s>> {
        let notes = song.notes();
        let range = Self::region_notes(song, region);
        let curve = song.pitch_curve();
        let mut jobs = Vec::new();

        for i in range.clone() {
            let note = &notes[i];
            let timing = &timings[i];
            let total = note.position as f64;
            let length = note_length(notes, i);
            let next = if i + 1 < range.end { Some(&timings[i + 1]) } else { None };

            if i == range.start {
                let gap = total - timing.preutter - region.min_ms as f64;
                if gap > 0.0 {
                    self.push_silence(&mut jobs, song, gap, region.min_ms as f64, false);
                }
            }

            let config = match &timing.config {
                Some(config) => config,
                None => {
                    self.status.warn(&format!(
                        "No sample found for lyric {:?} at {}ms, singing silence instead",
                        note.lyric, note.position
                    ));
                    match next {
                        Some(next) => self.push_silence(&mut jobs, song, length as f64 - next.preutter, total, false),
                        None => self.push_silence(&mut jobs, song, length.max(0) as f64, total, true),
                    }
                    continue;
                }
            };

            let start = total - timing.preutter;
            let first_step = (start / STEP_MS).ceil() as i64;
            let last_step = ((start + timing.duration) / STEP_MS).floor() as i64;
            let pitchbends = curve.render_pitchbends(first_step, last_step, note.key);
            let include_overlap = i > range.start
                && touching(
                    notes[i - 1].duration,
                    note_length(notes, i - 1),
                    timings[i - 1].is_resolved(),
                    timing.preutter,
                );

            jobs.push(Job {
                what: format!("note {:?} at {}ms", note.lyric, note.position),
                args: note_args(&self.config.resampler, song, note, timing, config, &pitchbends),
                step: Step::Note {
                    envelope: &timing.envelope,
                    start_point: note.start_point + timing.auto_start_point,
                    length: timing.duration,
                    expected_delta: start,
                    include_overlap,
                    is_last: next.is_none(),
                },
            });

            if let Some(next) = next {
                if !touching(note.duration, length, true, next.preutter) {
                    let gap = (length - note.duration) as f64 - next.preutter;
                    self.push_silence(&mut jobs, song, gap, total + note.duration as f64, false);
                }
            }
        }
        jobs
    }

    /// Queue `duration` ms of silence. Empty pauses are skipped unless they end the song.
    fn push_silence(&self, jobs: &mut Vec<Job>, song: &Song, duration: f64, expected_delta: f64, is_last: bool) {
        if duration <= 0.0 && !is_last {
            return;
        }
        jobs.push(Job {
            what: format!("{}ms of silence at {}ms", duration, expected_delta),
            args: silence_args(&self.config.resampler, &self.silence, duration * song.tempo_scale()),
            step: Step::Silence {
                duration,
                expected_delta,
                is_last,
            },
        });
    }

    /// Run the resampler for all jobs on a worker pool, keeping the job order. Jobs with
    /// identical command lines share one resampler run.
    fn resample_all(
        &self,
        runner: &dyn ProcessRunner,
        jobs: &[Job],
        cancel: &CancelFlag,
    ) -> Result<Vec<PathBuf>, RenderError> {
        let mut unique: Vec<&Job> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        let job_slots: Vec<usize> = jobs
            .iter()
            .map(|job| {
                *slots.entry(cache_key(&job.args)).or_insert_with(|| {
                    unique.push(job);
                    unique.len() - 1
                })
            })
            .collect();
        debug!("{} snippets, {} distinct", jobs.len(), unique.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .context(WorkerPool)?;
        let resampler = Resampler::new(runner, self.cache.as_ref());
        let failed = AtomicBool::new(false);

        let results: Vec<Result<PathBuf, RenderError>> = pool.install(|| {
            unique
                .par_iter()
                .map(|job| {
                    if failed.load(Ordering::SeqCst) || cancel.is_cancelled() {
                        return Cancelled.fail();
                    }
                    let result = resampler.resample(&job.args, &job.what);
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    result
                })
                .collect()
        });

        ensure!(!cancel.is_cancelled(), Cancelled);
        let mut snippets = Vec::with_capacity(results.len());
        let mut skipped = false;
        for result in results {
            match result {
                Ok(snippet) => snippets.push(snippet),
                Err(RenderError::Cancelled) => skipped = true,
                Err(err) => return Err(err),
            }
        }
        ensure!(!skipped, Cancelled);
        Ok(job_slots.into_iter().map(|slot| snippets[slot].clone()).collect())
    }
}

/// A render running in the background.
#[derive(Debug)]
pub struct RenderHandle {
    cancel: CancelFlag,
    thread: JoinHandle<Result<(Song, bool), RenderError>>,
}

impl RenderHandle {
    /// Ask the render to stop. Running processes are killed and the destination is left
    /// untouched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Wait for the render to finish, returning the song and whether anything was rendered.
    pub fn join(self) -> Result<(Song, bool), RenderError> {
        self.thread.join().map_err(|_| RenderError::RenderThread)?
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Key;
    use crate::render::fake::{FakeRunner, RESAMPLER, WAVTOOL};
    use crate::song::Note;
    use crate::voicebank::{LyricConfig, Voicebank};
    use std::fs;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStatus {
        warnings: Mutex<Vec<String>>,
        progress: Mutex<Vec<f64>>,
    }

    impl StatusSink for RecordingStatus {
        fn warn(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_owned());
        }

        fn progress(&self, fraction: f64) {
            self.progress.lock().unwrap().push(fraction);
        }
    }

    fn bank() -> Voicebank {
        let mut bank = Voicebank::new();
        for alias in &["a", "ka"] {
            bank.add_config(LyricConfig {
                path: PathBuf::from(format!("{}.wav", alias)),
                alias: alias.to_string(),
                offset: 0.0,
                consonant: 100.0,
                cutoff: 0.0,
                preutterance: 60.0,
                overlap: 20.0,
            });
        }
        bank
    }

    fn song(notes: &[(i64, i64, &str)]) -> Song {
        let mut song = Song::new(125.0, bank());
        for &(position, duration, lyric) in notes {
            song.add_note(Note::new(position, duration, Key::from_midi(60), lyric));
        }
        song
    }

    fn config(cache_dir: Option<&Path>) -> RenderConfig {
        RenderConfig {
            resampler: PathBuf::from(RESAMPLER),
            wavtool: PathBuf::from(WAVTOOL),
            cache_dir: cache_dir.map(Path::to_path_buf),
            silence: Some(PathBuf::from("silence.wav")),
            workers: 1,
            ..RenderConfig::default()
        }
    }

    fn engine(runner: &Arc<FakeRunner>, cache_dir: Option<&Path>) -> Engine {
        Engine::with_runner(config(cache_dir), runner.clone()).unwrap()
    }

    #[test]
    fn touching_notes_crossfade() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let engine = engine(&runner, None);
        let mut song = song(&[(0, 480, "a"), (480, 480, "ka")]);
        let dest = dir.path().join("song.wav");

        assert!(engine
            .render_to(&mut song, RenderRegion::WHOLE_SONG, &dest, &CancelFlag::new())
            .unwrap());

        assert_eq!(runner.calls(RESAMPLER), 2);
        let appends = runner.calls_of(WAVTOOL);
        assert_eq!(appends.len(), 2);
        assert_eq!(appends[0][4], "500");
        assert_eq!(appends[0][12], "0");
        assert_eq!(appends[0][16], "");
        assert_eq!(appends[1][4], "540");
        assert_eq!(appends[1][12], "20");
        assert_eq!(appends[1][16], "LAST_NOTE");
        assert!(dest.is_file());

        let lyrics: Vec<_> = song.notes().iter().map(|n| n.true_lyric.clone()).collect();
        assert_eq!(lyrics, vec![Some("a".to_owned()), Some("ka".to_owned())]);
    }

    #[test]
    fn cached_render_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        let runner = Arc::new(FakeRunner::new());
        let engine = engine(&runner, Some(&cache));
        let mut song = song(&[(0, 480, "a"), (720, 480, "ka"), (1200, 240, "a")]);

        let first = dir.path().join("first.wav");
        engine
            .render_to(&mut song, RenderRegion::WHOLE_SONG, &first, &CancelFlag::new())
            .unwrap();
        let resampled = runner.calls(RESAMPLER);
        assert!(resampled > 0);

        // a fresh engine only shares the directory
        let engine = self::engine(&runner, Some(&cache));
        let second = dir.path().join("second.wav");
        engine
            .render_to(&mut song, RenderRegion::WHOLE_SONG, &second, &CancelFlag::new())
            .unwrap();
        assert_eq!(runner.calls(RESAMPLER), resampled);
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn repeated_snippets_render_once() {
        let runner = Arc::new(FakeRunner::new());
        runner.slow_down(Duration::from_millis(50));
        let config = RenderConfig {
            workers: 8,
            ..config(None)
        };
        let engine = Engine::with_runner(config, runner.clone()).unwrap();
        let notes: Vec<_> = (0..6).map(|i| (i * 480, 240, "a")).collect();
        let mut song = song(&notes);

        engine
            .render(&mut song, RenderRegion::WHOLE_SONG, &CancelFlag::new())
            .unwrap();
        // one note and one pause, each used six and five times
        let resampled = runner.calls_of(RESAMPLER);
        assert_eq!(resampled.len(), 2);
        assert_ne!(resampled[0], resampled[1]);
        let appends = runner.calls_of(WAVTOOL);
        assert_eq!(appends.len(), 11);
        assert_eq!(appends[0][2], appends[2][2]);
        assert_eq!(appends[1][2], appends[3][2]);
        assert_eq!(appends[10][16], "LAST_NOTE");
    }

    #[test]
    fn unknown_lyric_sings_silence() {
        let runner = Arc::new(FakeRunner::new());
        let status = Arc::new(RecordingStatus::default());
        let engine = engine(&runner, None).with_status(status.clone());
        let mut song = song(&[(0, 480, "a"), (480, 480, "zz")]);

        let rendered = engine
            .render(&mut song, RenderRegion::WHOLE_SONG, &CancelFlag::new())
            .unwrap();
        assert!(rendered.is_some());

        let resampled = runner.calls_of(RESAMPLER);
        assert_eq!(resampled.len(), 2);
        assert!(resampled.iter().any(|args| args[1] == "a.wav"));
        let silence: Vec<_> = resampled.iter().filter(|args| args[1] == "silence.wav").collect();
        assert_eq!(silence.len(), 1);
        assert_eq!(silence[0][7], "481");
        assert_eq!(runner.calls_of(WAVTOOL)[1][16], "LAST_NOTE");

        assert_eq!(status.warnings.lock().unwrap().len(), 1);
        assert_eq!(status.progress.lock().unwrap().last(), Some(&1.0));
        assert_eq!(song.notes()[1].true_lyric, None);
    }

    #[test]
    fn pauses_are_filled() {
        let runner = Arc::new(FakeRunner::new());
        let engine = engine(&runner, None);
        let mut song = song(&[(1000, 240, "a"), (1480, 480, "ka")]);
        engine
            .render(&mut song, RenderRegion::WHOLE_SONG, &CancelFlag::new())
            .unwrap();

        let resampled = runner.calls_of(RESAMPLER);
        assert_eq!(resampled.len(), 4);
        // up to the first preutterance, then from the end of the first note up to the
        // second preutterance
        let mut silence: Vec<_> = resampled
            .iter()
            .filter(|args| args[1] == "silence.wav")
            .map(|args| args[7].clone())
            .collect();
        silence.sort();
        assert_eq!(silence, vec!["181", "941"]);

        let appends = runner.calls_of(WAVTOOL);
        assert_eq!(appends[0][4], "940");
        assert_eq!(appends[3][12], "0");
    }

    #[test]
    fn regions_select_notes() {
        let runner = Arc::new(FakeRunner::new());
        let engine = engine(&runner, None);
        let mut song = song(&[(0, 480, "a"), (480, 480, "ka"), (960, 480, "a")]);

        let region = RenderRegion::new(500, 700);
        engine.render(&mut song, region, &CancelFlag::new()).unwrap();
        // only the second note lies inside, and it starts the render
        let resampled = runner.calls_of(RESAMPLER);
        assert_eq!(resampled.len(), 1);
        assert_eq!(resampled[0][1], "ka.wav");
        let appends = runner.calls_of(WAVTOOL);
        assert_eq!(appends[0][12], "0");
        assert_eq!(appends[0][16], "LAST_NOTE");

        let nothing = engine
            .render(&mut song, RenderRegion::new(5000, 6000), &CancelFlag::new())
            .unwrap();
        assert!(nothing.is_none());
    }

    #[test]
    fn failures_abort() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("song.wav");
        let runner = Arc::new(FakeRunner::new());
        runner.fail(RESAMPLER);
        let engine = engine(&runner, None);
        let mut song = song(&[(0, 480, "a"), (480, 480, "ka")]);

        let result = engine.render_to(&mut song, RenderRegion::WHOLE_SONG, &dest, &CancelFlag::new());
        assert!(matches!(result, Err(RenderError::Resample { .. })));
        assert_eq!(runner.calls(WAVTOOL), 0);
        assert!(!dest.exists());
    }

    #[test]
    fn wavtool_failures_abort() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail(WAVTOOL);
        let engine = engine(&runner, None);
        let mut song = song(&[(0, 480, "a"), (480, 480, "ka")]);

        let result = engine.render(&mut song, RenderRegion::WHOLE_SONG, &CancelFlag::new());
        assert!(matches!(result, Err(RenderError::Append { .. })));
        assert_eq!(runner.calls(WAVTOOL), 1);
    }

    #[test]
    fn cancelling_leaves_destination_alone() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("song.wav");
        fs::write(&dest, b"previous").unwrap();

        let runner = Arc::new(FakeRunner::new());
        let cancel = CancelFlag::new();
        runner.cancel_on(WAVTOOL, 1, cancel.clone());
        let engine = engine(&runner, None);
        let mut song = song(&[(0, 480, "a"), (480, 480, "ka")]);

        let result = engine.render_to(&mut song, RenderRegion::WHOLE_SONG, &dest, &cancel);
        assert!(matches!(result, Err(RenderError::Cancelled)));
        assert_eq!(runner.calls(WAVTOOL), 1);
        assert_eq!(fs::read(&dest).unwrap(), b"previous");
    }

    #[test]
    fn background_render() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("song.wav");
        let runner = Arc::new(FakeRunner::new());
        let engine = Arc::new(engine(&runner, None));

        let handle = engine.spawn_render(song(&[(0, 480, "a")]), RenderRegion::WHOLE_SONG, dest.clone());
        let (song, rendered) = handle.join().unwrap();
        assert!(rendered);
        assert!(dest.is_file());
        assert_eq!(song.notes()[0].true_lyric, Some("a".to_owned()));
    }

    #[test]
    fn silence_sample_is_generated() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let config = RenderConfig {
            silence: None,
            ..config(Some(dir.path()))
        };
        let engine = Engine::with_runner(config, runner.clone()).unwrap();
        let mut song = song(&[(500, 480, "a")]);
        engine
            .render(&mut song, RenderRegion::WHOLE_SONG, &CancelFlag::new())
            .unwrap();
        let silence = dir.path().join("silence.wav");
        assert!(silence.is_file());
        assert!(runner
            .calls_of(RESAMPLER)
            .iter()
            .any(|args| args[1] == silence.to_string_lossy()));
    }
}
