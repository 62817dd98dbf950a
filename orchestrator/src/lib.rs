//! deployd library
//!
//! Deployment orchestration: approval gating, build and deploy execution on
//! local or ssh hosts, progress reporting and rollback.

pub mod app;
pub mod authz;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod notify;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
