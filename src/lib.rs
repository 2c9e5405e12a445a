// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # mmtrace
//!
//! Parses the textual dump format of the kernel function tracer into
//! structured event records and derives memory-pressure time series from
//! them: swap-daemon (kswapd) activity, low-memory-killer invocations, and a
//! running free-page counter calibrated against the killer's free-memory
//! readings.
//!
//! The whole log is parsed in one forward pass ([`TraceLoader`]) before any
//! analysis runs; the report builders in [`report`] are independent read-only
//! passes over the decoded records, and [`calibrate_free_pages`] reconciles
//! the free-page counter's arbitrary baseline afterwards.

pub mod args;
pub mod calibrate;
pub mod cli;
pub mod persist;
pub mod record;
pub mod report;
pub mod trace;

pub use args::{
    decode_default_args, decode_lmk_args, decode_stack_args, ArgDecoder, ArgSet, ArgValue,
    DecodedArgs, DecoderRegistry, STACK_EVENT,
};
pub use calibrate::{calibrate_free_pages, MATCH_WINDOW_SECS};
pub use cli::Opts;
pub use record::{EventHeader, LineOutcome, StackFrame, TraceRecord};
pub use report::{
    report_free_pages, report_kswapd, report_lmk, report_page_history, FreePagesSample,
    KswapdSample, LmkSample, PageEvent, KSWAPD_EVENT_PREFIX, LMK_EVENT, PAGE_EVENT_PREFIX,
};
pub use trace::{TraceLoader, TraceLog, PROGRESS_INTERVAL};
