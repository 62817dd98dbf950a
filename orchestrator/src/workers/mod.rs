//! Background workers

pub mod dispatcher;
pub mod host_probe;
pub mod scheduler;
