// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(name = "mmtrace", about = "Memory pressure analyzer for ftrace text dumps")]
pub struct Opts {
    /// Trace dump to analyze.
    #[clap(default_value = "trace.dat.txt")]
    pub input: PathBuf,

    /// Output file prefix. Defaults to the input path up to its first '.'.
    #[clap(short, long)]
    pub prefix: Option<String>,

    /// Also write the per-page event history log (<prefix>_mm_hist.log).
    #[clap(long)]
    pub hist: bool,

    /// Also write a dump of every parsed record (<prefix>_raw.log).
    #[clap(long)]
    pub dump: bool,

    /// Skip the CSV reports and free-page calibration.
    #[clap(long)]
    pub no_csv: bool,

    /// Maximum number of LMK samples used for free-page calibration.
    #[clap(long, default_value_t = 10)]
    pub calib_samples: usize,

    /// Free-page adjustment applied when no LMK sample matches.
    #[clap(long, default_value_t = 15000)]
    pub default_offset: i64,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Opts {
    pub fn output_prefix(&self) -> String {
        match &self.prefix {
            Some(prefix) => prefix.clone(),
            None => {
                let input = self.input.to_string_lossy();
                input.split('.').next().unwrap_or("trace").to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefix_from_input() {
        let opts = Opts::parse_from(["mmtrace", "run3.dat.txt"]);
        assert_eq!(opts.output_prefix(), "run3");
    }

    #[test]
    fn test_explicit_prefix_wins() {
        let opts = Opts::parse_from(["mmtrace", "-p", "out/run", "run3.dat.txt"]);
        assert_eq!(opts.output_prefix(), "out/run");
    }

    #[test]
    fn test_defaults() {
        let opts = Opts::parse_from(["mmtrace"]);
        assert_eq!(opts.input, PathBuf::from("trace.dat.txt"));
        assert_eq!(opts.calib_samples, 10);
        assert_eq!(opts.default_offset, 15000);
        assert!(!opts.hist && !opts.dump && !opts.no_csv);
    }
}
