pub mod renderer;
pub mod progress;

pub use progress::BatchProgress;
