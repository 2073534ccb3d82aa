use std::fmt;
use serde::{Deserialize, Serialize};

/// The three screens of the exploitation workflow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    /// Step 1: review the discovered services
    #[default]
    Review,
    /// Step 2: choose targets
    Select,
    /// Step 3: execute and monitor
    Execute,
}

impl WizardStep {
    pub fn number(&self) -> u8 {
        match self {
            Self::Review => 1,
            Self::Select => 2,
            Self::Execute => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Review),
            2 => Some(Self::Select),
            3 => Some(Self::Execute),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Review => "Review catalog",
            Self::Select => "Select services",
            Self::Execute => "Execute & monitor",
        }
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.number(), self.title())
    }
}
