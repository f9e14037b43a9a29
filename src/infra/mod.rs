//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod process;
pub mod telemetry;
pub mod workspace;
