//! Harbor Core
//!
//! Core types shared by the Harbor control plane and its clients.
//!
//! This crate contains:
//! - Domain types: Jobs, Tasks, Runners, Projects and on-demand runner profiles
//! - DTOs: Queue requests and the frames exchanged on streaming endpoints

pub mod domain;
pub mod dto;
