//! I/O adapters for the loop engine.

pub mod action_log;
pub mod config;
pub mod generator;
pub mod orchestrator;
pub mod process;
pub mod skills;
