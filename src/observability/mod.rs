//! Observability: structured logging setup.
//!
//! Log output is configurable between pretty, compact, and JSON formats, with
//! `RUST_LOG` taking precedence over the configured filter.

mod tracing_init;

pub use tracing_init::*;
