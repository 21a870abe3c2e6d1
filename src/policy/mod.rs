pub mod config;
pub mod engine;
pub mod point;

pub use config::PointPolicy;
pub use engine::{evaluate, SkipReason, Verdict};
pub use point::{PointRepository, PointState, TrackedPoint};
