use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, project_dirs};

const LOG_ENV: &str = "YPW_LOG";
const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// Installs a JSON subscriber writing to `<state dir>/ypw.log`.
///
/// Logging is best effort: when no state directory can be resolved or the
/// file cannot be opened the command runs without a subscriber.
pub(crate) fn init_logging(config: &AppConfig) {
    let Some(log_path) = log_path() else {
        return;
    };
    if let Some(parent) = log_path.parent()
        && std::fs::create_dir_all(parent).is_err()
    {
        return;
    }
    let _ = rotate_log_if_needed(&log_path);

    let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) else {
        return;
    };
    let _ = ypw_storage::set_secure_permissions(&log_path);

    let filter = log_filter(std::env::var(LOG_ENV).ok().as_deref(), &config.logging.level);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init();
}

fn log_path() -> Option<PathBuf> {
    let dirs = project_dirs()?;
    let state_dir = dirs
        .state_dir()
        .unwrap_or_else(|| dirs.data_local_dir())
        .to_path_buf();
    Some(state_dir.join("ypw.log"))
}

/// `YPW_LOG` wins over the configured level; anything unparsable falls back
/// to `info`.
fn log_filter(from_env: Option<&str>, configured: &str) -> EnvFilter {
    from_env
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(configured).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn rotate_log_if_needed(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::metadata(path) {
        Ok(value) => value,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };
    if metadata.len() < LOG_ROTATE_BYTES {
        return Ok(());
    }

    let rotated = path.with_extension("log.1");
    if rotated.exists() {
        let _ = std::fs::remove_file(&rotated);
    }
    std::fs::rename(path, rotated)
}
