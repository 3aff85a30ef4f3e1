pub mod sample;
pub mod session;

pub use sample::MetricSample;
pub use session::{Session, SessionStatus};
