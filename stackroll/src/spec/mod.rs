//! Stack specification loading and validation

pub mod loader;
