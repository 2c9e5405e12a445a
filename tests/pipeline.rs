// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! End-to-end pipeline over an inline trace dump: parse, build every report,
//! calibrate, persist.

use mmtrace::{
    calibrate_free_pages, decode_lmk_args, persist, report_free_pages, report_kswapd, report_lmk,
    report_page_history, DecoderRegistry, TraceLoader, LMK_EVENT,
};

const TRACE: &str = "\
version = 6
# tracer: nop
cpus=8
   kswapd0-30   [000]   123.456000: mm_vmscan_kswapd_wake: nid=0 order=0
   kswapd0-30   [000]   123.856000: mm_vmscan_kswapd_sleep: nid=0
   <...>-512    [001]   124.000000: mm_page_alloc: page=0x2a0 order=2 migratetype=0
   <...>-512    [001]   124.000100: kernel_stack: <stack trace>
=> __alloc_pages_nodemask [0x1000]
=> 0x2000
   lowmemkiller-88 [002]   124.000500: lmk_shrink: nr=7, gfp=250, ofree 1024 3200, adj -5
   <...>-512    [001]   124.200000: mm_page_free: page=0x2a0 order=2
";

fn registry() -> DecoderRegistry {
    let mut registry = DecoderRegistry::new();
    registry.register(LMK_EVENT, decode_lmk_args);
    registry
}

#[test]
fn test_full_pipeline() {
    let log = TraceLoader::new(registry()).load(TRACE.as_bytes()).unwrap();

    // Metadata and record accounting: the stack continuation block produces
    // no record of its own.
    assert_eq!(log.header.get("version").map(String::as_str), Some("6"));
    assert_eq!(log.header.get("cpus").map(String::as_str), Some("8"));
    assert_eq!(log.records.len(), 5);

    // Anonymous-process sentinel decodes to an empty name.
    let alloc = &log.records[2];
    assert_eq!(alloc.header.proc_name, "");
    assert_eq!(alloc.header.pid, 512);
    assert_eq!(alloc.header.cpu, 1);
    assert_eq!(alloc.pos, 6);

    // The stack attached to the preceding non-stack record, frames in file
    // order, and the terminating line became the lmk record.
    let stack = alloc.stack.as_ref().unwrap();
    assert_eq!(stack.len(), 2);
    assert_eq!(stack[0].symbol, "__alloc_pages_nodemask");
    assert_eq!(stack[0].addr, 0x1000);
    assert_eq!(stack[0].pos, 8);
    assert_eq!(stack[1].addr, 0x2000);
    assert_eq!(log.records[3].header.event, LMK_EVENT);

    // Source positions are strictly increasing.
    for pair in log.records.windows(2) {
        assert!(pair[0].pos < pair[1].pos);
    }

    let kswapd = report_kswapd(&log);
    assert_eq!(kswapd.len(), 2);
    assert_eq!(kswapd[0].ts, 123.456);
    assert!(kswapd[0].awake);
    assert!(!kswapd[1].awake);

    let lmk = report_lmk(&log);
    assert_eq!(lmk.len(), 1);
    assert_eq!(lmk[0].nr, 7);
    assert_eq!(lmk[0].free_pages, 1024);
    assert_eq!(lmk[0].vfs_cache_pages, 3200);
    assert_eq!(lmk[0].oom_adj, -5);

    let mut free_pages = report_free_pages(&log, 0);
    let counts: Vec<i64> = free_pages.iter().map(|s| s.free_pages).collect();
    assert_eq!(counts, vec![-4, 0]);

    // One LMK match at 0.5ms distance: correction is 1024 - (-4).
    let adj = calibrate_free_pages(&mut free_pages, &lmk, 10, 15000);
    assert_eq!(adj, 1028);
    let counts: Vec<i64> = free_pages.iter().map(|s| s.free_pages).collect();
    assert_eq!(counts, vec![1024, 1028]);

    let pages = report_page_history(&log);
    let hist = &pages[&0x2a0];
    assert_eq!(hist.len(), 2);
    assert_eq!(hist[0].event, "mm_page_alloc");
    assert_eq!(hist[0].pos, 6);
    assert_eq!(hist[1].event, "mm_page_free");
    assert_eq!(hist[1].pos, 11);
}

#[test]
fn test_pipeline_outputs() {
    let log = TraceLoader::new(registry()).load(TRACE.as_bytes()).unwrap();
    let kswapd = report_kswapd(&log);
    let lmk = report_lmk(&log);
    let mut free_pages = report_free_pages(&log, 0);
    calibrate_free_pages(&mut free_pages, &lmk, 10, 15000);

    let dir = tempfile::tempdir().unwrap();
    let kswapd_path = dir.path().join("t_kswapd.csv");
    let lmk_path = dir.path().join("t_lmk.csv");
    let ofree_path = dir.path().join("t_ofree.csv");
    persist::save_kswapd(&kswapd, &kswapd_path).unwrap();
    persist::save_lmk(&lmk, &lmk_path).unwrap();
    persist::save_free_pages(&free_pages, &ofree_path).unwrap();

    assert_eq!(
        std::fs::read_to_string(&kswapd_path).unwrap(),
        "123.456000, 1\n123.856000, 0\n"
    );
    assert_eq!(
        std::fs::read_to_string(&lmk_path).unwrap(),
        "124.000500, 7, 1024, 3200, -5\n"
    );
    assert_eq!(
        std::fs::read_to_string(&ofree_path).unwrap(),
        "124.000000, 1024\n124.200000, 1028\n"
    );
}

#[test]
fn test_reparse_is_deterministic() {
    let first = TraceLoader::new(registry()).load(TRACE.as_bytes()).unwrap();
    let second = TraceLoader::new(registry()).load(TRACE.as_bytes()).unwrap();
    assert_eq!(first, second);
}
