//! Data Transfer Objects
//!
//! Requests, responses and stream frames exchanged between the server,
//! runners and clients.

pub mod job;
pub mod runner;
pub mod task;
