// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Decoding of individual trace lines: event headers and stack frames.

use crate::args::{parse_hex, ArgSet};
use anyhow::{bail, Context, Result};
use sscanf::sscanf;
use std::fmt;

/// The tracer prints this in place of a process name it could not resolve.
const ANON_PROC: &str = "<...>";

/// Identity fields of one event line.
#[derive(Debug, Clone, PartialEq)]
pub struct EventHeader {
    /// Process name; empty for the tracer's anonymous-process sentinel.
    pub proc_name: String,
    pub pid: i32,
    pub cpu: usize,
    /// Timestamp in seconds. Monotonic per CPU but not guaranteed sorted
    /// across the whole file.
    pub ts: f64,
    pub event: String,
}

/// One frame of a captured kernel stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    /// Symbol name; empty for address-only frames.
    pub symbol: String,
    pub addr: u64,
    /// 1-based line number the frame came from.
    pub pos: usize,
}

/// A fully decoded event record.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    pub header: EventHeader,
    pub args: ArgSet,
    /// Present only when a stack-trace continuation attached to this record.
    pub stack: Option<Vec<StackFrame>>,
    /// 1-based line number of the header line; strictly increasing across
    /// the log and stable as a record identifier.
    pub pos: usize,
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {} {} {} {} {}",
            self.header.ts,
            self.header.cpu,
            self.header.proc_name,
            self.header.pid,
            self.header.event,
            self.args
        )?;
        match &self.stack {
            Some(frames) => {
                write!(f, " [")?;
                for (i, frame) in frames.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}@{:x}", frame.symbol, frame.addr)?;
                }
                write!(f, "]")
            }
            None => write!(f, " -"),
        }
    }
}

/// Outcome of feeding one line to the record in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Line consumed; more lines expected (stack capture in progress).
    Continuation,
    /// Line consumed; the record is finished.
    Complete(TraceRecord),
    /// Line not consumed; retry it against a fresh record.
    Rejected,
}

/// Decodes the four leading header tokens:
/// `<process>-<pid>  [<cpu>]  <timestamp>:  <event>:`.
pub fn decode_header(tokens: &[&str]) -> Result<EventHeader> {
    if tokens.len() < 4 {
        bail!("corrupted event header ({} tokens)", tokens.len());
    }
    let (proc_tok, cpu_tok, ts_tok, evt_tok) = (tokens[0], tokens[1], tokens[2], tokens[3]);

    // The process name itself may contain '-'; the pid is the part after
    // the last one.
    let (name, pid_tok) = match proc_tok.rsplit_once('-') {
        Some((name, pid)) => (name, pid),
        None => ("", proc_tok),
    };
    let proc_name = if name == ANON_PROC {
        String::new()
    } else {
        name.to_string()
    };
    let pid = pid_tok
        .parse::<i32>()
        .with_context(|| format!("malformed pid in process field '{}'", proc_tok))?;

    let cpu = match sscanf!(cpu_tok, "[{usize}]") {
        Ok(cpu) => cpu,
        Err(_) => bail!("malformed cpu field '{}'", cpu_tok),
    };

    let ts = ts_tok
        .strip_suffix(':')
        .unwrap_or(ts_tok)
        .parse::<f64>()
        .with_context(|| format!("malformed timestamp '{}'", ts_tok))?;

    let event = evt_tok.strip_suffix(':').unwrap_or(evt_tok).to_string();

    Ok(EventHeader {
        proc_name,
        pid,
        cpu,
        ts,
        event,
    })
}

/// Decodes one stack continuation line. Returns `None` when the line does
/// not start with the `=>` frame marker (the line is not consumed). A frame
/// is either `=> <hex-address>` or `=> <symbol> [<hex-address>]`; any other
/// shape is a fatal decode error.
pub fn decode_stack_frame(tokens: &[&str], pos: usize) -> Result<Option<StackFrame>> {
    if tokens.first().copied() != Some("=>") {
        return Ok(None);
    }
    match tokens.len() {
        2 if tokens[1].starts_with(|c: char| c.is_ascii_digit()) => Ok(Some(StackFrame {
            symbol: String::new(),
            addr: parse_hex(tokens[1])?,
            pos,
        })),
        3 => {
            // The address is wrapped in a single-character bracket pair.
            let mut inner = tokens[2].chars();
            inner.next();
            inner.next_back();
            Ok(Some(StackFrame {
                symbol: tokens[1].to_string(),
                addr: parse_hex(inner.as_str())
                    .with_context(|| format!("malformed stack address '{}'", tokens[2]))?,
                pos,
            }))
        }
        _ => bail!("unrecognized stack trace format"),
    }
}
