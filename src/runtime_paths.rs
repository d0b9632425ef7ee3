use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

const APP_NAME: &str = "reminder-bot";
const STORE_FILE_NAME: &str = "reminders.json";

/// Points the data root somewhere else without touching the config file.
pub const HOME_ENV_VAR: &str = "REMINDER_BOT_HOME";

static ROOT_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

fn root_override() -> MutexGuard<'static, Option<PathBuf>> {
    ROOT_OVERRIDE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Redirects every derived path below `path`. Takes precedence over
/// `REMINDER_BOT_HOME`; pass `None` to go back to normal resolution.
pub fn set_debug_app_root_override(path: Option<PathBuf>) {
    *root_override() = path;
}

pub fn app_root() -> PathBuf {
    if let Some(path) = root_override().clone() {
        return path;
    }
    if let Some(home) = std::env::var_os(HOME_ENV_VAR).filter(|value| !value.is_empty()) {
        return PathBuf::from(home);
    }

    ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .or_else(|| BaseDirs::new().map(|dirs| dirs.data_local_dir().join(APP_NAME)))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

pub fn data_dir() -> PathBuf {
    app_root().join("data")
}

pub fn default_store_path() -> String {
    data_dir().join(STORE_FILE_NAME).to_string_lossy().into_owned()
}
