// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The line-by-line trace scan.
//!
//! Leading lines that do not begin with whitespace or `=` are file metadata;
//! the first line that does ends the metadata phase for good. Data lines then
//! drive a two-state machine: `AwaitingHeader` decodes an event header plus
//! its arguments, and switches to `CapturingStack` when the event's decoder
//! signals stack capture. A captured stack attaches to the most recently
//! appended record; the line that terminated it is retried as a fresh header.
//!
//! The scan is fail-fast: any structural decode error aborts with the 1-based
//! line number and the raw line text attached to the error.

use crate::args::DecoderRegistry;
use crate::record::{self, LineOutcome, StackFrame, TraceRecord};
use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::mem;
use std::path::Path;

/// Lines between progress callback invocations.
pub const PROGRESS_INTERVAL: usize = 1000;

/// The decoded trace: records in file order plus the leading metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceLog {
    pub header: BTreeMap<String, String>,
    pub records: Vec<TraceRecord>,
}

enum ScanState {
    AwaitingHeader,
    CapturingStack(Vec<StackFrame>),
}

/// Drives the scan. Owns the decoder registry; an optional progress callback
/// fires every [`PROGRESS_INTERVAL`] successfully processed lines and once at
/// end of scan, and never influences parsing.
pub struct TraceLoader<'a> {
    registry: DecoderRegistry,
    progress: Option<Box<dyn FnMut(usize) + 'a>>,
}

impl<'a> TraceLoader<'a> {
    pub fn new(registry: DecoderRegistry) -> Self {
        Self {
            registry,
            progress: None,
        }
    }

    pub fn on_progress(mut self, cb: impl FnMut(usize) + 'a) -> Self {
        self.progress = Some(Box::new(cb));
        self
    }

    pub fn load_path(&mut self, path: &Path) -> Result<TraceLog> {
        let file =
            File::open(path).with_context(|| format!("failed to open trace file {:?}", path))?;
        self.load(BufReader::new(file))
    }

    /// Scans the whole input into a [`TraceLog`].
    pub fn load(&mut self, reader: impl BufRead) -> Result<TraceLog> {
        let mut log = TraceLog::default();
        let mut state = ScanState::AwaitingHeader;
        // Index of the last appended record; a finished stack attaches here.
        let mut prev: Option<usize> = None;
        let mut in_metadata = true;
        let mut pos = 0usize;
        let mut last_ts = f64::NEG_INFINITY;
        let mut ts_regressions = 0usize;

        for line in reader.lines() {
            let line = line.context("failed to read trace line")?;
            pos += 1;

            if in_metadata {
                if is_metadata_line(&line) {
                    // Only a clean two-way split contributes a pair; banner
                    // lines and anything else are consumed and ignored.
                    let parts: Vec<&str> = line.split('=').collect();
                    if let [key, val] = parts[..] {
                        log.header
                            .insert(key.trim().to_string(), val.trim().to_string());
                    }
                    self.maybe_progress(pos);
                    continue;
                }
                in_metadata = false;
            }

            let appended = self
                .scan_data_line(&line, pos, &mut state, &mut prev, &mut log)
                .with_context(|| format!("in line {}: {}", pos, line.trim_end()))?;
            if appended {
                if let Some(rec) = log.records.last() {
                    if rec.header.ts < last_ts {
                        ts_regressions += 1;
                    }
                    last_ts = rec.header.ts;
                }
            }
            self.maybe_progress(pos);
        }

        // Input ended mid-capture: attach the pending stack as if a
        // terminating line had followed.
        if let ScanState::CapturingStack(frames) = state {
            attach_stack(&mut log, &mut prev, frames);
        }

        if ts_regressions > 0 {
            warn!(
                "{} timestamp regressions across {} records; calibration matching may be off",
                ts_regressions,
                log.records.len()
            );
        }
        debug!("parsed {} records from {} lines", log.records.len(), pos);

        if let Some(cb) = self.progress.as_mut() {
            cb(pos);
        }
        Ok(log)
    }

    /// Feeds one data line through the state machine, retrying the line after
    /// a rejection. Returns whether a record was appended.
    fn scan_data_line(
        &self,
        line: &str,
        pos: usize,
        state: &mut ScanState,
        prev: &mut Option<usize>,
        log: &mut TraceLog,
    ) -> Result<bool> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        loop {
            match self.feed(&tokens, pos, state)? {
                LineOutcome::Continuation => return Ok(false),
                LineOutcome::Complete(rec) => {
                    log.records.push(rec);
                    *prev = Some(log.records.len() - 1);
                    return Ok(true);
                }
                LineOutcome::Rejected => {
                    // Only stack capture rejects lines: finish the stack and
                    // retry the same line against a fresh record.
                    let frames = match mem::replace(state, ScanState::AwaitingHeader) {
                        ScanState::CapturingStack(frames) => frames,
                        ScanState::AwaitingHeader => unreachable!("header decode never rejects"),
                    };
                    attach_stack(log, prev, frames);
                }
            }
        }
    }

    fn feed(&self, tokens: &[&str], pos: usize, state: &mut ScanState) -> Result<LineOutcome> {
        match state {
            ScanState::CapturingStack(frames) => match record::decode_stack_frame(tokens, pos)? {
                Some(frame) => {
                    frames.push(frame);
                    Ok(LineOutcome::Continuation)
                }
                None => Ok(LineOutcome::Rejected),
            },
            ScanState::AwaitingHeader => {
                let header = record::decode_header(tokens)?;
                let decoded = self.registry.resolve(&header.event)(&tokens[4..])?;
                if decoded.capture_stack {
                    *state = ScanState::CapturingStack(Vec::new());
                    Ok(LineOutcome::Continuation)
                } else {
                    Ok(LineOutcome::Complete(TraceRecord {
                        header,
                        args: decoded.values,
                        stack: None,
                        pos,
                    }))
                }
            }
        }
    }

    fn maybe_progress(&mut self, pos: usize) {
        if pos % PROGRESS_INTERVAL == 0 {
            if let Some(cb) = self.progress.as_mut() {
                cb(pos);
            }
        }
    }
}

/// A stack attaches to the nearest preceding non-stack record, at most once;
/// with no such record it is silently dropped.
fn attach_stack(log: &mut TraceLog, prev: &mut Option<usize>, frames: Vec<StackFrame>) {
    match prev.take() {
        Some(idx) => log.records[idx].stack = Some(frames),
        None => debug!("dropping unattached stack of {} frames", frames.len()),
    }
}

/// Metadata lines are the leading lines whose first byte is neither
/// whitespace nor `=`.
fn is_metadata_line(line: &str) -> bool {
    match line.chars().next() {
        Some(c) => !c.is_whitespace() && c != '=',
        None => true,
    }
}
