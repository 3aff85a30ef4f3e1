mod db;
pub mod events;
pub mod metrics;
pub mod models;
pub mod remote;
pub mod sensing;
pub mod settings;
pub mod summary;
pub mod timer;
mod utils;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};

pub use db::{DailyStats, Database, RecordStatus, SessionCredit, SessionRecord};
pub use events::FocusEvent;
pub use remote::{FrameScorer, HttpCollector, RemoteSync, UserContext};
pub use sensing::{CaptureSource, TestPatternSource};
pub use settings::{FocusSettings, SettingsStore};
pub use summary::{SessionSummary, SummaryChart};
pub use timer::{ControllerConfig, FocusController, SessionReport, SessionSnapshot};

const DB_FILE_NAME: &str = "focusfy.sqlite3";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Everything a host needs after startup.
pub struct AppState {
    pub db: Database,
    pub settings: SettingsStore,
    pub controller: FocusController,
}

/// `info` by default; `RUST_LOG` takes precedence.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

/// Opens storage under `data_dir`, finalizes sessions a previous run left
/// running, and wires a controller against the HTTP collector.
pub async fn bootstrap(
    data_dir: &Path,
    user: UserContext,
    capture: Arc<dyn CaptureSource>,
) -> Result<AppState> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let database = Database::new(data_dir.join(DB_FILE_NAME))?;

    let recovered = database
        .mark_incomplete_sessions_interrupted(Utc::now())
        .await?;
    if recovered > 0 {
        warn!("Recovered {recovered} incomplete session(s); marked as Interrupted");
    }

    let settings_store = SettingsStore::new(data_dir.join(SETTINGS_FILE_NAME))?;
    let settings = settings_store.current().with_env_overrides();

    let user = UserContext {
        token: user.token.or_else(settings::token_from_env),
        ..user
    };
    let collector = Arc::new(HttpCollector::new(settings.api_base_url.clone(), &user)?);
    info!("Collector at {}", collector.base_url());

    let config = ControllerConfig::from_settings(&settings, settings::debug_mode_from_env());
    let controller = FocusController::new(
        database.clone(),
        user,
        config,
        collector.clone(),
        collector,
        capture,
    );

    Ok(AppState {
        db: database,
        settings: settings_store,
        controller,
    })
}
