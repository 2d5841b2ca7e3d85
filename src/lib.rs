//! Pylonmon: telemetry monitor for Pylontech battery stacks
//!
//! The controller speaks a line-oriented text console over a serial port.
//! This crate sends console commands, decodes the replies into a typed
//! battery stack model, aggregates stack-level values and keeps a fixed-size
//! history of cell balance samples that survives restarts.
//!
//! Text decoding lives in the `pylonmon_protocol` package and is re-exported
//! through [`protocol`]. The serializable views in [`api`] are what the CLI
//! prints and what other frontends are expected to consume.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;

pub use api::*;
