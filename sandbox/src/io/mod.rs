//! I/O helpers for sandbox commands.

pub mod call_log;
pub mod catalog;
pub mod config;
pub mod process;
pub mod responses;
