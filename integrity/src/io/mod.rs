//! I/O helpers: configuration, markers, executor processes, journal sinks.

pub mod config;
pub mod executor;
pub mod journal;
pub mod markers;
pub mod process;
