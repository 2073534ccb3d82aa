pub mod step;
pub mod controller;

pub use step::WizardStep;
pub use controller::{ExploitWizard, WizardSnapshot};
