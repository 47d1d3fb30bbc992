//! Logging setup shared by the vibe-git binaries.
//!
//! Human-readable and JSON output via `tracing-subscriber`, both written to
//! stderr so command output on stdout stays machine-readable.

pub mod logging;

pub use logging::{init, init_logging, init_logging_json, LogFormat};
