//! # Apiary Config
//!
//! Configuration management for Apiary.
//! Supports layered configuration from files and environment variables,
//! plus the per-queue `bee` section consumed by the job runtime.

mod app_config;
mod loader;
mod queue_settings;

pub use app_config::*;
pub use loader::*;
pub use queue_settings::*;
