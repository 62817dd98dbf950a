//! Request and response models of the deployd HTTP API

pub mod models;
