// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Report writers: plain CSV time series plus two diagnostic dumps.

use crate::report::{FreePagesSample, KswapdSample, LmkSample, PageEvent};
use crate::trace::TraceLog;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create output file {:?}", path))?;
    Ok(BufWriter::new(file))
}

/// `<ts>, <0|1>` per swap-daemon transition.
pub fn save_kswapd(samples: &[KswapdSample], path: &Path) -> Result<()> {
    let mut w = create(path)?;
    for s in samples {
        writeln!(w, "{:.6}, {}", s.ts, s.awake as i32)?;
    }
    w.flush()?;
    Ok(())
}

/// `<ts>, <nr>, <free>, <vfs_cache>, <oom_adj>` per killer invocation.
pub fn save_lmk(samples: &[LmkSample], path: &Path) -> Result<()> {
    let mut w = create(path)?;
    for s in samples {
        writeln!(
            w,
            "{:.6}, {}, {}, {}, {}",
            s.ts, s.nr, s.free_pages, s.vfs_cache_pages, s.oom_adj
        )?;
    }
    w.flush()?;
    Ok(())
}

/// `<ts>, <free-page-count>` per counter step.
pub fn save_free_pages(samples: &[FreePagesSample], path: &Path) -> Result<()> {
    let mut w = create(path)?;
    for s in samples {
        writeln!(w, "{:.6}, {}", s.ts, s.free_pages)?;
    }
    w.flush()?;
    Ok(())
}

/// One line per page address, sorted, with its full event history.
pub fn save_page_history(pages: &BTreeMap<u64, Vec<PageEvent>>, path: &Path) -> Result<()> {
    let mut w = create(path)?;
    for (addr, hist) in pages {
        let entries: Vec<String> = hist
            .iter()
            .map(|e| format!("({}, {}, {})", e.event, e.pos, e.pages))
            .collect();
        writeln!(w, "{:08X}: {}", addr, entries.join(","))?;
    }
    w.flush()?;
    Ok(())
}

/// One `Display`-formatted record per line, for eyeballing a parse.
pub fn dump_records(log: &TraceLog, path: &Path) -> Result<()> {
    let mut w = create(path)?;
    for rec in &log.records {
        writeln!(w, "{}", rec)?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_kswapd_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kswapd.csv");
        let samples = vec![
            KswapdSample {
                rec: 0,
                ts: 123.456,
                awake: true,
            },
            KswapdSample {
                rec: 1,
                ts: 123.856,
                awake: false,
            },
        ];
        save_kswapd(&samples, &path).unwrap();
        let out = std::fs::read_to_string(&path).unwrap();
        assert_eq!(out, "123.456000, 1\n123.856000, 0\n");
    }

    #[test]
    fn test_save_lmk_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lmk.csv");
        let samples = vec![LmkSample {
            rec: 0,
            ts: 2.0,
            nr: 7,
            free_pages: 1024,
            vfs_cache_pages: 3200,
            oom_adj: -5,
        }];
        save_lmk(&samples, &path).unwrap();
        let out = std::fs::read_to_string(&path).unwrap();
        assert_eq!(out, "2.000000, 7, 1024, 3200, -5\n");
    }

    #[test]
    fn test_save_free_pages_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ofree.csv");
        let samples = vec![FreePagesSample {
            rec: 0,
            ts: 1.5,
            free_pages: -4,
        }];
        save_free_pages(&samples, &path).unwrap();
        let out = std::fs::read_to_string(&path).unwrap();
        assert_eq!(out, "1.500000, -4\n");
    }

    #[test]
    fn test_save_page_history_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist.log");
        let mut pages = BTreeMap::new();
        pages.insert(
            0x2a0u64,
            vec![
                PageEvent {
                    rec: 0,
                    pos: 1,
                    event: "mm_page_alloc".to_string(),
                    pages: 4,
                },
                PageEvent {
                    rec: 2,
                    pos: 3,
                    event: "mm_page_free".to_string(),
                    pages: 4,
                },
            ],
        );
        save_page_history(&pages, &path).unwrap();
        let out = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            out,
            "000002A0: (mm_page_alloc, 1, 4),(mm_page_free, 3, 4)\n"
        );
    }
}
