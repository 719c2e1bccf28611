// src/bin/ofcompile.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use oftools_compile::{
    CancellationToken,
    cli::Cli,
    constants::{EXIT_FATAL, EXIT_INTERRUPT, EXIT_PROFILE_ERROR, EXIT_QUIT},
    core::{driver::Driver, profile_loader::ProfileError},
    system::{logging, shell::ExecutionError},
};
use signal_hook::consts::{SIGINT, SIGQUIT};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Entry point: sets up logging and signal handling, runs the driver, and
/// performs centralized error handling with the documented exit codes.
fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level.into());
    log::debug!("CLI args parsed: {:?}", cli);

    let cancellation_token: CancellationToken = Arc::new(AtomicBool::new(false));
    install_signal_handlers(&cancellation_token);

    match run(cli, cancellation_token) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // --- Centralized Error Handling ---
            if let Some(exec_err) = e.downcast_ref::<ExecutionError>() {
                if matches!(exec_err, ExecutionError::Interrupted(_)) {
                    eprintln!("\n{}", "Interrupted.".yellow());
                    std::process::exit(EXIT_INTERRUPT);
                }
            }
            if e.downcast_ref::<ProfileError>().is_some() {
                eprintln!("\n{}: {}", "Profile error".red().bold(), e);
                std::process::exit(EXIT_PROFILE_ERROR);
            }
            eprintln!("\n{}: {}", "Error".red().bold(), e);
            std::process::exit(EXIT_FATAL);
        }
    }
}

/// SIGINT requests a graceful stop: the running tool is killed and the run
/// winds down with a partial report. SIGQUIT exits on the spot.
fn install_signal_handlers(token: &CancellationToken) {
    let token = Arc::clone(token);
    let mut signals = match Signals::new([SIGINT, SIGQUIT]) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Could not install signal handlers: {}", e);
            return;
        }
    };
    std::thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT => {
                    log::warn!("Interrupt received; stopping after the current command.");
                    token.store(true, Ordering::Relaxed);
                }
                SIGQUIT => std::process::exit(EXIT_QUIT),
                _ => {}
            }
        }
    });
}

fn run(cli: Cli, cancellation_token: CancellationToken) -> Result<i32> {
    let mut driver = Driver::new(
        cli.profiles,
        cli.sources,
        cli.tag.as_deref(),
        cli.clear,
        cli.grouping,
        cli.force,
        cancellation_token,
    )?;
    driver.run()
}
