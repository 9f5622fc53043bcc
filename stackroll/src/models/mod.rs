//! Data model shared by every controller component

pub mod attempt;
pub mod health;
pub mod service;
pub mod spec;
