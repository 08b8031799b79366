//! I/O adapters used by the repair loop.

pub mod artifact;
pub mod config;
pub mod executor;
pub mod model;
pub mod process;
pub mod prompt;
pub mod transcript;
