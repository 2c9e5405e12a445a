// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Calibration of the running free-page counter.
//!
//! The counter starts from an arbitrary baseline, but low-memory-killer
//! records carry an authoritative free-page reading at their timestamp.
//! Matching the two by nearest timestamp yields an additive correction. The
//! trace format provides no synchronized clock, so this stays a deliberate
//! approximation bounded by the match window.

use crate::report::{FreePagesSample, LmkSample};
use log::info;

/// A counter sample must lie strictly within this window of an LMK sample's
/// timestamp to be considered a match.
pub const MATCH_WINDOW_SECS: f64 = 0.001;

/// Computes and applies the additive correction to `samples`, in place.
///
/// Up to `max_points` earliest LMK samples are examined (clamped to what is
/// available, minimum one when any exist). Each is matched to the counter
/// sample with the smallest timestamp difference inside
/// [`MATCH_WINDOW_SECS`]; on equal differences the earlier candidate is kept.
/// The correction is the truncated-toward-zero mean of
/// `lmk_free - counter_free` over the matched pairs, or `default_offset`
/// when nothing matched. Returns the applied correction.
pub fn calibrate_free_pages(
    samples: &mut [FreePagesSample],
    lmk: &[LmkSample],
    max_points: usize,
    default_offset: i64,
) -> i64 {
    let points = if lmk.is_empty() {
        0
    } else {
        max_points.max(1).min(lmk.len())
    };
    info!(
        "calibrating free pages against up to {} lmk samples",
        points
    );

    let mut sum = 0i64;
    let mut matched = 0i64;
    for lmk_sample in lmk.iter().take(points) {
        let mut best: Option<(f64, i64)> = None;
        for sample in samples.iter() {
            let diff = (sample.ts - lmk_sample.ts).abs();
            if diff >= MATCH_WINDOW_SECS {
                continue;
            }
            match best {
                Some((delta, _)) if diff >= delta => {}
                _ => best = Some((diff, sample.free_pages)),
            }
        }
        if let Some((_, counter)) = best {
            sum += lmk_sample.free_pages - counter;
            matched += 1;
        }
    }

    let adj = if matched > 0 {
        let adj = sum / matched;
        info!("applying calibration adjustment: {}", adj);
        adj
    } else {
        info!("no lmk matches; using default adjustment: {}", default_offset);
        default_offset
    };

    for sample in samples.iter_mut() {
        sample.free_pages += adj;
    }
    adj
}
