// src/core/mod.rs

pub mod compile_job;
pub mod context;
pub mod deploy_job;
pub mod driver;
pub mod grouping;
pub mod job;
pub mod profile_loader;
pub mod report;
pub mod setup_job;
