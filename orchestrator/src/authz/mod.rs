//! Caller identity, permissions and the approver directory

pub mod caller;
pub mod directory;
