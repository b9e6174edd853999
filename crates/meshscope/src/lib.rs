//! meshscope service wiring
//!
//! The binary in `main.rs` composes the library pieces; the HTTP API and the
//! configuration loader live here so they can be exercised by integration
//! tests.

pub mod api;
pub mod config;
