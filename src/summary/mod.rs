mod chart;
mod session;

pub use chart::{ChartPoint, SummaryChart};
pub use session::SessionSummary;
