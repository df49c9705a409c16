//! Shared tracing setup for the Pulse binaries.

mod tracing;

pub use crate::tracing::{LogFormat, init};
