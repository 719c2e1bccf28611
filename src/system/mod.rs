// src/system/mod.rs

pub mod fs_utils;
pub mod logging;
pub mod shell;
