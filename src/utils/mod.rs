//! The `utils` module provides the shared pieces used across `membroker`:
//! the crate error type and the logging bootstrap.
//!
//! Keeping them here lets the broker and config modules report failures and
//! emit diagnostics the same way.

pub mod error;
pub mod logging;

pub use error::{BrokerError, HandlerError, Result};

#[cfg(test)]
mod tests;
