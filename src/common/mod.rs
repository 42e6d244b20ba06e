//! Common utilities and shared functionality
//!
//! Shared primitives and configuration loading used by every engine.

pub mod types;
pub mod config;
