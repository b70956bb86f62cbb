//! Tracing/logging setup shared by siprems binaries.

mod logging;

pub use logging::{init, init_with, LogFormat};
