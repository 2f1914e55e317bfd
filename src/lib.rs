// ABOUTME: Library crate for machine-box exposing the machine runtime API for the CLI and tests

pub mod config;
pub mod docker;
pub mod logs;
pub mod transport;
