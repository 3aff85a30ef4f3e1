pub mod daily_stats;
pub mod session_record;

pub use daily_stats::{DailyStats, SessionCredit, DEFAULT_WEEKLY_GOAL_HOURS};
pub use session_record::{RecordStatus, SessionRecord};
