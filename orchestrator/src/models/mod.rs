//! Data models

pub mod approval;
pub mod deployment;
pub mod host;
pub mod project;
