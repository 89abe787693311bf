// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! radiod daemon entry point.

use clap::Parser;
use log::{error, info};
use radiod::config::{ConfigError, ConfigFile, EX_NOINPUT, EX_USAGE};
use radiod::Engine;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "radiod",
    version = radiod::VERSION,
    about = "Multichannel software-defined radio engine"
)]
struct Args {
    /// Config file, directory, or base name of a .d directory
    config: PathBuf,

    /// Raise log verbosity (overrides RUST_LOG)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    info!("radiod {} starting, config {}", radiod::VERSION, args.config.display());

    let config = match ConfigFile::load(&args.config) {
        Ok(c) => c,
        Err(e @ (ConfigError::NotFound(_) | ConfigError::Io(..) | ConfigError::EmptyDir(_))) => {
            error!("{e}");
            return ExitCode::from(EX_NOINPUT as u8);
        }
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EX_USAGE as u8);
        }
    };

    let instance = args
        .config
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("radiod")
        .to_string();
    // systemd-style instance names: radiod@hf.conf -> "hf"
    let instance = instance
        .strip_prefix("radiod@")
        .unwrap_or(&instance)
        .to_string();

    let mut engine = match Engine::from_config(config, &instance) {
        Ok(e) => e,
        Err(e) => {
            error!("startup failed: {e}");
            return ExitCode::from(exit_code_for(&e) as u8);
        }
    };
    let channels = engine.start();
    info!("{channels} static channels started");

    // Runs until SIGTERM kills the process; systemd handles restarts
    engine.run();
    ExitCode::SUCCESS
}

fn exit_code_for(e: &radiod::engine::EngineError) -> i32 {
    use radiod::engine::EngineError;
    match e {
        EngineError::Config(_) => EX_USAGE,
        EngineError::Presets(_) => radiod::config::EX_UNAVAILABLE,
        EngineError::Frontend(_) => EX_NOINPUT,
        EngineError::Multicast(_) => radiod::config::EX_NOHOST,
    }
}
