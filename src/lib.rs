// Kura: disk-backed HTTP response cache storage engine

pub mod cache;
pub mod config;
pub mod constants;
pub mod logging;
