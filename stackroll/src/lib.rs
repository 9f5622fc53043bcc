//! stackroll library
//!
//! Stack rollout controller: validates a stack specification, snapshots the
//! running images, submits the stack, waits for convergence, verifies health,
//! and reverts to the snapshot when convergence or health fails.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod retry;
pub mod schedule;
pub mod spec;
pub mod storage;
pub mod utils;
