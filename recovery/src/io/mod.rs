//! Side-effecting adapters: processes, scratch directories, config and logs.

pub mod build;
pub mod build_log;
pub mod config;
pub mod fix_service;
pub mod process;
pub mod scratch;
