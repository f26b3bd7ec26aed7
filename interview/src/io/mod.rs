//! I/O helpers for the interview engine.

pub mod config;
pub mod flow_store;
pub mod process;
pub mod session_store;
