pub mod controller;
pub mod state;

pub use controller::{ControllerConfig, FocusController, SessionReport};
pub use state::{
    format_clock, validate_minutes, FinishedSession, ScoreTarget, SessionSnapshot, SessionState,
    TickOutcome, MAX_DURATION_MINUTES, MIN_DURATION_MINUTES,
};
