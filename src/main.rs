// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use anyhow::Result;
use clap::Parser;
use log::info;
use mmtrace::{
    calibrate_free_pages, decode_lmk_args, persist, report_free_pages, report_kswapd, report_lmk,
    report_page_history, DecoderRegistry, Opts, TraceLoader, LMK_EVENT,
};
use std::io::Write;
use std::path::PathBuf;

fn init_logger(verbose: u8) -> Result<()> {
    let llv = match verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logger(opts.verbose)?;

    let prefix = opts.output_prefix();
    info!("processing {:?}", opts.input);

    let mut registry = DecoderRegistry::new();
    registry.register(LMK_EVENT, decode_lmk_args);

    let mut loader = TraceLoader::new(registry).on_progress(|lines| {
        eprint!("\rparsed {:12} lines", lines);
        let _ = std::io::stderr().flush();
    });
    let log = loader.load_path(&opts.input)?;
    eprintln!();
    info!(
        "{} records, {} header entries",
        log.records.len(),
        log.header.len()
    );

    if opts.dump {
        let path = PathBuf::from(format!("{}_raw.log", prefix));
        info!("dumping parsed records to {:?}", path);
        persist::dump_records(&log, &path)?;
    }

    if !opts.no_csv {
        let kswapd = report_kswapd(&log);
        let lmk = report_lmk(&log);
        let mut free_pages = report_free_pages(&log, 0);
        calibrate_free_pages(
            &mut free_pages,
            &lmk,
            opts.calib_samples,
            opts.default_offset,
        );

        persist::save_kswapd(&kswapd, &PathBuf::from(format!("{}_kswapd.csv", prefix)))?;
        persist::save_lmk(&lmk, &PathBuf::from(format!("{}_lmk.csv", prefix)))?;
        persist::save_free_pages(&free_pages, &PathBuf::from(format!("{}_ofree.csv", prefix)))?;
    }

    if opts.hist {
        let pages = report_page_history(&log);
        persist::save_page_history(&pages, &PathBuf::from(format!("{}_mm_hist.log", prefix)))?;
    }

    info!("done");
    Ok(())
}
