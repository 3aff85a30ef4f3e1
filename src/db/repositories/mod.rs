mod daily_stats;
mod sessions;
