//! upkit library - exposes the binary's modules for integration tests

pub mod app;
pub mod cli;
pub mod cli_output;
