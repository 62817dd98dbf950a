//! Deployment orchestration: lifecycle, approvals, execution and rollback

pub mod approval;
pub mod controller;
pub mod executor;
pub mod fsm;
pub mod journal;
pub mod queue;
pub mod rollback;
pub mod runner;
pub mod runs;
pub mod ssh;
pub mod stage;
