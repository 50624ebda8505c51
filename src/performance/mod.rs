//! Adaptive processing resolution and frame skipping.

mod controller;
mod fps;


pub use controller::{PerformanceSummary, ResolutionController};
pub use fps::FpsCounter;
