//! Parley Service Library Crate
//!
//! Configuration, startup prompts, and the wiring that turns a
//! [`prompt::Startup`] into a running call. The `parley` binary is a thin
//! wrapper around this library.

pub mod call;
pub mod config;
pub mod prompt;
