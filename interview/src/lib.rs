//! Data-driven interview flow engine.
//!
//! A flow is a graph of stages loaded from JSON. The engine runs one turn at a
//! time over a serializable [`session::SessionState`]: it ingests the user's
//! answer into slots, walks non-interactive stages, guards against repeated
//! prompts, and renders the next question. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (paths, templates, intent
//!   heuristics, transitions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, flow files, session
//!   files, child processes).
//!
//! [`turn`] runs a single turn; [`interview`] drives turns against a
//! [`interview::Responder`]. Actions invoked by flows live in [`actions`].

pub mod actions;
pub mod core;
pub mod exit_codes;
pub mod flow;
pub mod interview;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod turn;
