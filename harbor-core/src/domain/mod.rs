//! Core domain types
//!
//! These types represent the entities owned by the state store. The server
//! never caches them beyond a single request or stream; every read goes back
//! to the store.

pub mod config;
pub mod job;
pub mod log;
pub mod ondemand;
pub mod operation;
pub mod project;
pub mod runner;
pub mod status;
pub mod task;
