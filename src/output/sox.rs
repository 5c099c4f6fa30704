// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Easy interface for playing a wav file using a sox subprocess.
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use log::{debug, info};

/// The sox binary that plays files on the default audio device.
pub const PLAY: &str = "play";

/// A file being played. Playback stops when the handle is dropped.
#[derive(Debug)]
pub struct Playback {
    player: Child,
    path: PathBuf,
}

impl Playback {
    /// Start playing `path` with sox.
    pub fn start(path: &Path) -> io::Result<Playback> {
        Self::start_with(PLAY, path)
    }

    /// Start playing `path` with a `play` compatible `program`.
    pub fn start_with(program: &str, path: &Path) -> io::Result<Playback> {
        info!("playing {}", path.display());
        let player = Command::new(program)
            .arg("--no-show-progress")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()?;
        Ok(Playback {
            player,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_playing(&mut self) -> io::Result<bool> {
        Ok(self.player.try_wait()?.is_none())
    }

    /// Block until the whole file was played.
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.player.wait()
    }

    /// Stop playing right away.
    pub fn stop(&mut self) -> io::Result<()> {
        if self.is_playing()? {
            debug!("stopping playback of {}", self.path.display());
            self.player.kill()?;
            self.player.wait()?;
        }
        Ok(())
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
