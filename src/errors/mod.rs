pub mod types;
pub mod classification;

pub use types::BreachlineError;
pub use classification::ErrorClassification;
