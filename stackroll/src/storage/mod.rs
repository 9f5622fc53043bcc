//! Persistent controller state

pub mod attempts;
pub mod layout;
pub mod lock;
pub mod settings;
