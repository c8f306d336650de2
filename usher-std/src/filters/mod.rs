//! Standard filter implementations.

pub mod logging;
