// Library root for the nnwatch binary: configuration, operator commands,
// and status reporting around the core sync engine.

pub mod commands;
pub mod config;
pub mod status;
