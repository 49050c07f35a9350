//! CareWave Host-Page Library
//!
//! This crate provides the page-side surface around the service worker:
//! environment-based API URL construction and the two-tier storage shim.

pub mod config;
pub mod storage;

pub use config::{AppConfig, Environment};
pub use storage::Storage;
