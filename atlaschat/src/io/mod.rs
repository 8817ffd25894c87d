//! I/O adapters for the coordinator and the engine.

pub mod config;
pub mod fs;
pub mod indicator;
pub mod paths;
pub mod store;
pub mod store_watch;
