// utau-render -- sings UTAU songs through a resampler and wavtool
// Copyright (C) 2020  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation.
//
// A copy of the license can be found in the LICENSE file in the root of
// this repository.

//! Stand-in for the external tools in tests.
//!
//! The program called `wavtool` appends its input file to its output file, every other
//! program behaves like a resampler and writes its command line into the output path.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use super::cache::OUTPUT_ARG;
use super::process::{CancelFlag, ProcessError};
use super::ProcessRunner;

pub(crate) const WAVTOOL: &str = "wavtool";
pub(crate) const RESAMPLER: &str = "resampler";

#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: Mutex<Vec<Vec<String>>>,
    failing: Mutex<HashSet<String>>,
    silent: Mutex<HashSet<String>>,
    cancel_on: Mutex<Option<(String, usize, CancelFlag)>>,
    resample_time: Mutex<Duration>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call of `program` exits with an error.
    pub fn fail(&self, program: &str) {
        self.failing.lock().unwrap().insert(program.to_owned());
    }

    /// Calls of `program` succeed without writing anything.
    pub fn write_nothing(&self, program: &str) {
        self.silent.lock().unwrap().insert(program.to_owned());
    }

    /// Resampler calls take `time` to finish.
    pub fn slow_down(&self, time: Duration) {
        *self.resample_time.lock().unwrap() = time;
    }

    /// Raise `flag` during the `nth` call (counting from 1) of `program`.
    pub fn cancel_on(&self, program: &str, nth: usize, flag: CancelFlag) {
        *self.cancel_on.lock().unwrap() = Some((program.to_owned(), nth, flag));
    }

    pub fn calls_of(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args[0] == program)
            .cloned()
            .collect()
    }

    pub fn calls(&self, program: &str) -> usize {
        self.calls_of(program).len()
    }

    fn should_cancel(&self, program: &str) -> bool {
        match &*self.cancel_on.lock().unwrap() {
            Some((target, nth, flag)) if target == program => {
                if self.calls(program) >= *nth {
                    flag.cancel();
                }
                flag.is_cancelled()
            }
            Some((_, _, flag)) => flag.is_cancelled(),
            None => false,
        }
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, args: &[String]) -> Result<(), ProcessError> {
        let program = match args.first() {
            Some(program) => program.clone(),
            None => return Err(ProcessError::EmptyCommand),
        };
        self.calls.lock().unwrap().push(args.to_vec());

        if self.should_cancel(&program) {
            return Err(ProcessError::Cancelled { program });
        }
        if self.failing.lock().unwrap().contains(&program) {
            return Err(ProcessError::MissingOutput {
                program,
                output: "nothing".to_owned(),
            });
        }
        if self.silent.lock().unwrap().contains(&program) {
            return Ok(());
        }

        if program == WAVTOOL {
            let input = fs::read(&args[2]).unwrap();
            let mut output = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&args[1])
                .unwrap();
            output.write_all(&input).unwrap();
        } else {
            thread::sleep(*self.resample_time.lock().unwrap());
            let mut content = args.to_vec();
            content.remove(OUTPUT_ARG);
            fs::write(&args[OUTPUT_ARG], format!("{:?}\n", content)).unwrap();
        }
        Ok(())
    }
}
