pub mod commands;
pub mod runtime;
pub mod catalog;
pub mod exploit;
pub mod batch;

pub use commands::{Cli, Commands};
