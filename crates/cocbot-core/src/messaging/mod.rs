//! Chat-platform abstractions used by the clash consumers.

pub mod port;
pub mod throttled;
pub mod types;
