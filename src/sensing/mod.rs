pub mod capture;
pub mod controller;
pub mod loop_worker;
pub mod scoring;

pub use capture::{CaptureDevice, CaptureSource, DeviceSlot, RawFrame, TestPatternSource};
pub use controller::SamplerController;
pub use loop_worker::CycleOutcome;
pub use scoring::{compute_focus_score, placeholder_score, RawMetrics, ScoringMode};
