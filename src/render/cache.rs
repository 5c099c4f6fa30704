// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Content addressed storage for rendered snippets.
//!
//! Snippets are keyed by the resampler command line that produced them. Files are first
//! written to a staging file in the cache directory and only renamed to their final
//! `note-<hash>.wav` name once complete, so a half written snippet is never served.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use tempfile::{NamedTempFile, TempDir};

/// Index of the output path in a resampler command line. It does not take part in the key.
pub const OUTPUT_ARG: usize = 2;

const SILENCE_FILE: &str = "silence.wav";
const SILENCE_RATE: u32 = 44_100;

/// Hash of a resampler command line, ignoring the output path.
///
/// # Examples
///
/// ```
/// use utau_render::render::cache_key;
///
/// let args = |out: &str| vec!["resampler".to_owned(), "a.wav".to_owned(), out.to_owned()];
/// assert_eq!(cache_key(&args("x.wav")), cache_key(&args("y.wav")));
/// assert_eq!(cache_key(&args("x.wav")).len(), 64);
/// ```
pub fn cache_key(args: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (i, arg) in args.iter().enumerate() {
        if i == OUTPUT_ARG {
            continue;
        }
        hasher.update(arg.as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex().to_string()
}

pub fn snippet_file_name(key: &str) -> String {
    format!("note-{}.wav", key)
}

/// Storage of rendered snippets, shared by all resampler workers of a render.
pub trait SnippetCache: Send + Sync {
    /// Directory staging files and snippets live in.
    fn dir(&self) -> &Path;

    /// The snippet stored under `key`, if any.
    fn lookup(&self, key: &str) -> Option<PathBuf>;

    /// A fresh file a snippet can be rendered into before it is stored.
    fn stage(&self) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(".staging-")
            .suffix(".wav")
            .tempfile_in(self.dir())
    }

    /// Move a completely rendered staging file to its place and return the final path.
    fn store(&self, key: &str, staged: NamedTempFile) -> io::Result<PathBuf>;
}

/// A cache directory that outlives the process, fronted by an in-memory index.
#[derive(Debug)]
pub struct DirCache {
    dir: PathBuf,
    known: Mutex<HashMap<String, PathBuf>>,
}

impl DirCache {
    /// Open the cache at `dir`, creating it if necessary. Fails if the directory is not
    /// writable.
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        // Probe for write access right away rather than on the first snippet.
        NamedTempFile::new_in(dir)?;
        Ok(DirCache {
            dir: dir.to_path_buf(),
            known: Mutex::new(HashMap::new()),
        })
    }
}

impl SnippetCache for DirCache {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn lookup(&self, key: &str) -> Option<PathBuf> {
        let mut known = self.known.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = known.get(key) {
            if path.is_file() {
                return Some(path.clone());
            }
        }
        let path = self.dir.join(snippet_file_name(key));
        let complete = fs::metadata(&path).map_or(false, |m| m.is_file() && m.len() > 0);
        if complete {
            known.insert(key.to_owned(), path.clone());
            Some(path)
        } else {
            known.remove(key);
            None
        }
    }

    fn store(&self, key: &str, staged: NamedTempFile) -> io::Result<PathBuf> {
        let path = self.dir.join(snippet_file_name(key));
        staged.persist(&path).map_err(|e| e.error)?;
        self.known
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_owned(), path.clone());
        Ok(path)
    }
}

/// Snippets live in a private temporary directory and are never reused.
#[derive(Debug)]
pub struct NoCache {
    dir: TempDir,
}

impl NoCache {
    pub fn new() -> io::Result<Self> {
        Ok(NoCache {
            dir: tempfile::Builder::new().prefix("utaurender-").tempdir()?,
        })
    }
}

impl SnippetCache for NoCache {
    fn dir(&self) -> &Path {
        self.dir.path()
    }

    fn lookup(&self, _key: &str) -> Option<PathBuf> {
        None
    }

    fn store(&self, _key: &str, staged: NamedTempFile) -> io::Result<PathBuf> {
        let (_, path) = staged.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

/// Open the cache directory, degrading to an uncached render if that fails.
pub fn open_cache(dir: Option<&Path>) -> io::Result<Box<dyn SnippetCache>> {
    if let Some(dir) = dir {
        match DirCache::open(dir) {
            Ok(cache) => {
                debug!("caching snippets in {}", dir.display());
                return Ok(Box::new(cache));
            }
            Err(err) => warn!(
                "cache directory {} is not usable, rendering without cache: {}",
                dir.display(),
                err
            ),
        }
    }
    Ok(Box::new(NoCache::new()?))
}

/// Path of a one second silent sample in `dir`, written on first use.
pub fn silence_sample(dir: &Path) -> Result<PathBuf, hound::Error> {
    let path = dir.join(SILENCE_FILE);
    if path.is_file() {
        return Ok(path);
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SILENCE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    {
        let mut writer = hound::WavWriter::new(BufWriter::new(staged.as_file_mut()), spec)?;
        for _ in 0..SILENCE_RATE {
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;
    }
    staged.persist(&path).map_err(|e| e.error)?;
    Ok(path)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn args(out: &str, pitch: &str) -> Vec<String> {
        ["resampler", "a.wav", out, pitch]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn key_ignores_output_only() {
        assert_eq!(cache_key(&args("1.wav", "C4")), cache_key(&args("2.wav", "C4")));
        assert_ne!(cache_key(&args("1.wav", "C4")), cache_key(&args("1.wav", "D4")));
        // argument boundaries matter
        let joined = vec!["ab".to_owned(), "c".to_owned()];
        let split = vec!["a".to_owned(), "bc".to_owned()];
        assert_ne!(cache_key(&joined), cache_key(&split));
    }

    #[test]
    fn store_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirCache::open(&dir.path().join("cache")).unwrap();
        assert_eq!(cache.lookup("abc"), None);

        let mut staged = cache.stage().unwrap();
        staged.write_all(b"RIFF").unwrap();
        let stored = cache.store("abc", staged).unwrap();
        assert_eq!(stored, dir.path().join("cache").join("note-abc.wav"));
        assert_eq!(cache.lookup("abc"), Some(stored.clone()));

        // a fresh handle finds it on disk
        let reopened = DirCache::open(&dir.path().join("cache")).unwrap();
        assert_eq!(reopened.lookup("abc"), Some(stored));
    }

    #[test]
    fn empty_snippets_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(snippet_file_name("abc")), b"").unwrap();
        let cache = DirCache::open(dir.path()).unwrap();
        assert_eq!(cache.lookup("abc"), None);
    }

    #[test]
    fn uncached_never_hits() {
        let cache = NoCache::new().unwrap();
        let mut staged = cache.stage().unwrap();
        staged.write_all(b"RIFF").unwrap();
        let path = cache.store("abc", staged).unwrap();
        assert!(path.is_file());
        assert_eq!(cache.lookup("abc"), None);
    }

    #[cfg(unix)]
    #[test]
    fn unusable_dir_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let cache = open_cache(Some(&blocker.join("cache"))).unwrap();
        assert!(!cache.dir().starts_with(&blocker));
    }

    #[test]
    fn silence_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = silence_sample(dir.path()).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), SILENCE_RATE);
        assert_eq!(silence_sample(dir.path()).unwrap(), path);
    }
}
