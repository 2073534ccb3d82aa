pub mod provider;
pub mod http;
pub mod simulated;
pub mod router;

pub use provider::ExploitBackend;
pub use http::HttpBackend;
pub use simulated::{SimulatedBackend, SimulationSettings};
pub use router::create_backend;
