//! Command implementations for the quire CLI.

pub mod classify;
pub mod config;
pub mod generate;
pub mod show;

pub use generate::GenerateArgs;
