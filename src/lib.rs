// src/lib.rs

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared flag raised by the SIGINT handler; checked by the shell runner's
/// wait loop and by the driver between sections.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
