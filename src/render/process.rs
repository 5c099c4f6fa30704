// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Running the external resampler and wavtool.

use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};
use snafu::{OptionExt, ResultExt, Snafu};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProcessError {
    #[snafu(display("No program given"))]
    EmptyCommand,
    #[snafu(display("Could not start {}: {}", program, source))]
    Spawn { program: String, source: io::Error },
    #[snafu(display("Lost track of {}: {}", program, source))]
    Wait { program: String, source: io::Error },
    #[snafu(display("{} failed with {}: {}", program, status, stderr.trim()))]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[snafu(display("{} did not finish within {:?}", program, timeout))]
    Timeout { program: String, timeout: Duration },
    #[snafu(display("{} was cancelled", program))]
    Cancelled { program: String },
    #[snafu(display("{} did not produce {}", program, output))]
    MissingOutput { program: String, output: String },
}

/// Shared flag telling running renders to stop as soon as possible.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something that can execute a command line, blocking until it is done.
///
/// The first argument is the program, the rest are passed to it unchanged.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, args: &[String]) -> Result<(), ProcessError>;
}

/// Runs commands as child processes of this one.
#[derive(Debug, Clone)]
pub struct ExternalProcess {
    timeout: Option<Duration>,
    cancel: CancelFlag,
}

impl ExternalProcess {
    /// Processes are killed once they run longer than `timeout` or `cancel` is raised.
    pub fn new(timeout: Option<Duration>, cancel: CancelFlag) -> Self {
        ExternalProcess { timeout, cancel }
    }
}

impl ProcessRunner for ExternalProcess {
    fn run(&self, args: &[String]) -> Result<(), ProcessError> {
        let (program, rest) = args.split_first().context(EmptyCommand)?;
        if self.cancel.is_cancelled() {
            return Cancelled { program }.fail();
        }
        debug!("running {:?}", args);
        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context(Spawn { program })?;

        // Drain stderr concurrently so a chatty tool cannot block on a full pipe.
        let stderr_reader = child.stderr.take().map(|stderr| {
            let name = program.clone();
            thread::spawn(move || {
                let mut collected = String::new();
                for line in BufReader::new(stderr).lines() {
                    match line {
                        Ok(line) => {
                            trace!("{}: {}", name, line);
                            collected.push_str(&line);
                            collected.push('\n');
                        }
                        Err(_) => break,
                    }
                }
                collected
            })
        });

        // A killed tool may leave grandchildren holding stderr open, so the reader is
        // only joined after a regular exit.
        let status = self.wait(&mut child, program)?;
        let stderr = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Failed {
                program,
                status,
                stderr,
            }
            .fail()
        }
    }
}

impl ExternalProcess {
    fn wait(&self, child: &mut Child, program: &str) -> Result<ExitStatus, ProcessError> {
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait().context(Wait { program })? {
                return Ok(status);
            }
            if self.cancel.is_cancelled() {
                kill(child);
                return Cancelled { program }.fail();
            }
            if let Some(timeout) = self.timeout {
                if start.elapsed() > timeout {
                    kill(child);
                    return Timeout { program, timeout }.fail();
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
    }

    #[test]
    fn success() {
        let runner = ExternalProcess::new(None, CancelFlag::new());
        runner.run(&sh("exit 0")).unwrap();
    }

    #[test]
    fn failure_keeps_stderr() {
        let runner = ExternalProcess::new(None, CancelFlag::new());
        match runner.run(&sh("echo broken sample >&2; exit 3")) {
            Err(ProcessError::Failed { stderr, status, .. }) => {
                assert_eq!(status.code(), Some(3));
                assert!(stderr.contains("broken sample"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn missing_program() {
        let runner = ExternalProcess::new(None, CancelFlag::new());
        let args = vec!["/nonexistent/resampler".to_owned()];
        assert!(matches!(runner.run(&args), Err(ProcessError::Spawn { .. })));
        assert!(matches!(runner.run(&[]), Err(ProcessError::EmptyCommand)));
    }

    #[test]
    fn timeout_kills() {
        let runner = ExternalProcess::new(Some(Duration::from_millis(50)), CancelFlag::new());
        let start = Instant::now();
        assert!(matches!(
            runner.run(&sh("sleep 10")),
            Err(ProcessError::Timeout { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn cancel_kills() {
        let cancel = CancelFlag::new();
        let runner = ExternalProcess::new(None, cancel.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });
        assert!(matches!(
            runner.run(&sh("sleep 10")),
            Err(ProcessError::Cancelled { .. })
        ));
        canceller.join().unwrap();
        // nothing new starts after cancelling
        assert!(matches!(
            runner.run(&sh("exit 0")),
            Err(ProcessError::Cancelled { .. })
        ));
    }
}
