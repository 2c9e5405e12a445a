// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Memory-pressure reports derived from a decoded trace.
//!
//! Each builder is an independent read-only pass over the record sequence.
//! Samples reference their source record by index into
//! [`TraceLog::records`](crate::trace::TraceLog) and carry copies of the
//! values the writers need. Missing argument keys are recoverable: the record
//! is skipped from that report with a diagnostic and processing continues.

use crate::args::ArgValue;
use crate::record::TraceRecord;
use crate::trace::TraceLog;
use log::{info, warn};
use std::collections::BTreeMap;

/// Swap-daemon activity events share this prefix; the next character
/// distinguishes wake from sleep.
pub const KSWAPD_EVENT_PREFIX: &str = "mm_vmscan_kswapd_";

/// The low-memory killer's shrink event.
pub const LMK_EVENT: &str = "lmk_shrink";

/// Page-allocator events share this prefix.
pub const PAGE_EVENT_PREFIX: &str = "mm_page_";

/// One swap-daemon transition: awake or asleep at a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct KswapdSample {
    pub rec: usize,
    pub ts: f64,
    pub awake: bool,
}

/// One low-memory-killer invocation with its free-memory context.
#[derive(Debug, Clone, PartialEq)]
pub struct LmkSample {
    pub rec: usize,
    pub ts: f64,
    /// Pages the shrinker was asked to scan.
    pub nr: i64,
    /// Free pages reported by the killer; authoritative for calibration.
    pub free_pages: i64,
    /// Reclaimable cache pages.
    pub vfs_cache_pages: i64,
    pub oom_adj: i64,
}

/// One step of the running free-page counter.
#[derive(Debug, Clone, PartialEq)]
pub struct FreePagesSample {
    pub rec: usize,
    pub ts: f64,
    pub free_pages: i64,
}

/// One entry in a page's diagnostic event history.
#[derive(Debug, Clone, PartialEq)]
pub struct PageEvent {
    pub rec: usize,
    pub pos: usize,
    pub event: String,
    /// `2^order` pages touched by the event.
    pub pages: i64,
}

/// Extracts swap-daemon wake/sleep transitions.
pub fn report_kswapd(log: &TraceLog) -> Vec<KswapdSample> {
    let mut samples = Vec::new();
    for (idx, rec) in log.records.iter().enumerate() {
        let Some(suffix) = rec.header.event.strip_prefix(KSWAPD_EVENT_PREFIX) else {
            continue;
        };
        let awake = match suffix.chars().next() {
            Some('w') => true,
            Some('s') => false,
            _ => {
                warn!(
                    "line {}: ignoring unrecognized kswapd event '{}'",
                    rec.pos, rec.header.event
                );
                continue;
            }
        };
        samples.push(KswapdSample {
            rec: idx,
            ts: rec.header.ts,
            awake,
        });
    }
    info!("kswapd report: {} samples", samples.len());
    samples
}

/// Extracts low-memory-killer invocations.
pub fn report_lmk(log: &TraceLog) -> Vec<LmkSample> {
    let mut samples = Vec::new();
    for (idx, rec) in log.records.iter().enumerate() {
        if rec.header.event != LMK_EVENT {
            continue;
        }
        let (Some(nr), Some(free_pages), Some(vfs_cache_pages), Some(oom_adj)) = (
            rec.args.get_int("nr"),
            rec.args.get_int("ofree"),
            rec.args.get_int("vfs_cache"),
            rec.args.get_int("oom_adj"),
        ) else {
            warn!(
                "line {}: {} record missing expected arguments",
                rec.pos, LMK_EVENT
            );
            continue;
        };
        samples.push(LmkSample {
            rec: idx,
            ts: rec.header.ts,
            nr,
            free_pages,
            vfs_cache_pages,
            oom_adj,
        });
    }
    info!("lmk report: {} samples", samples.len());
    samples
}

fn page_order(rec: &TraceRecord) -> Option<i64> {
    rec.args
        .get_int("order")
        .or_else(|| rec.args.get_int("alloc_order"))
        .filter(|order| (0..=62).contains(order))
}

/// Builds the running free-page counter from an arbitrary `initial` baseline.
///
/// Allocation-class events subtract `2^order` pages and free-class events add
/// them, but only on an actual state transition of the page address: a
/// duplicate alloc (or free) at the same address is a no-op, which keeps
/// nested and retried allocator trace points from double counting. Address 0
/// is the shared bucket for `(nil)` and otherwise unparsable page references.
pub fn report_free_pages(log: &TraceLog, initial: i64) -> Vec<FreePagesSample> {
    let mut samples = Vec::new();
    let mut pages: BTreeMap<u64, bool> = BTreeMap::new();
    let mut free = initial;
    for (idx, rec) in log.records.iter().enumerate() {
        let Some(kind) = rec.header.event.strip_prefix(PAGE_EVENT_PREFIX) else {
            continue;
        };
        let addr = match rec.args.get("page") {
            Some(ArgValue::Int(v)) => *v as u64,
            Some(ArgValue::Str(_)) => 0,
            None => {
                warn!(
                    "line {}: {} record without a page address",
                    rec.pos, rec.header.event
                );
                continue;
            }
        };
        let delta = match kind {
            "alloc" | "alloc_extfrag" | "alloc_zone_locked" => {
                if pages.get(&addr).copied().unwrap_or(false) {
                    0
                } else {
                    pages.insert(addr, true);
                    -1
                }
            }
            "free" | "free_batched" | "pcpu_drain" => {
                if !pages.get(&addr).copied().unwrap_or(true) {
                    0
                } else {
                    pages.insert(addr, false);
                    1
                }
            }
            _ => 0,
        };
        if delta == 0 {
            continue;
        }
        let Some(order) = page_order(rec) else {
            warn!("unknown alloc order on page {:08X}, line {}", addr, rec.pos);
            continue;
        };
        free += (1i64 << order) * delta;
        samples.push(FreePagesSample {
            rec: idx,
            ts: rec.header.ts,
            free_pages: free,
        });
    }
    info!(
        "free-page report: {} samples over {} pages",
        samples.len(),
        pages.len()
    );
    samples
}

/// Builds the per-page diagnostic history: every page-allocator event is
/// appended to its address's list, duplicates included.
pub fn report_page_history(log: &TraceLog) -> BTreeMap<u64, Vec<PageEvent>> {
    let mut pages: BTreeMap<u64, Vec<PageEvent>> = BTreeMap::new();
    for (idx, rec) in log.records.iter().enumerate() {
        if !rec.header.event.starts_with(PAGE_EVENT_PREFIX) {
            continue;
        }
        let addr = match rec.args.get("page") {
            Some(ArgValue::Int(v)) => *v as u64,
            Some(ArgValue::Str(_)) => 0,
            None => {
                warn!(
                    "line {}: {} record without a page address",
                    rec.pos, rec.header.event
                );
                continue;
            }
        };
        let Some(order) = page_order(rec) else {
            warn!("unknown alloc order on page {:08X}, line {}", addr, rec.pos);
            continue;
        };
        pages.entry(addr).or_default().push(PageEvent {
            rec: idx,
            pos: rec.pos,
            event: rec.header.event.clone(),
            pages: 1i64 << order,
        });
    }
    pages
}
