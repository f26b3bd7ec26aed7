//! Deterministic, pure logic shared by the interview engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! slots, flows, and transcripts and return deterministic outputs suitable for
//! tests.

pub mod advancer;
pub mod clarify;
pub mod intent;
pub mod invariants;
pub mod loop_guard;
pub mod path;
pub mod template;
