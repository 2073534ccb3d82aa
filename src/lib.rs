pub mod errors;
pub mod config;
pub mod catalog;
pub mod backend;
pub mod session;
pub mod batch;
pub mod wizard;
pub mod events;
pub mod render;
pub mod utils;
#[cfg(feature = "cli")]
pub mod cli;

pub use errors::BreachlineError;
