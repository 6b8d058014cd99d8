use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn log_path(dir: &Path, n: usize) -> PathBuf {
    dir.join(format!("{}-{n}.log", quarry_config::LOG_FILE_BASE))
}

/// Shifts `quarry-N.log` to `quarry-(N+1).log`, dropping the oldest, and returns the
/// path for the fresh log.
pub fn rotate_logs(dir: &Path) -> io::Result<PathBuf> {
    let count = quarry_config::LOG_FILE_COUNT;
    for n in (0..count.saturating_sub(1)).rev() {
        let from = log_path(dir, n);
        if !from.exists() {
            continue;
        }
        let to = log_path(dir, n + 1);
        if to.exists() {
            fs::remove_file(&to)?;
        }
        fs::rename(&from, &to)?;
    }
    Ok(log_path(dir, 0))
}

/// Logs to stderr and to a fresh rotated file in `data_dir`.
pub fn init(data_dir: &Path, verbose: bool) -> anyhow::Result<PathBuf> {
    let path = rotate_logs(data_dir).context("Failed to rotate log files")?;
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("Failed to install log subscriber")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_keeps_a_bounded_history() {
        let tmp = tempfile::tempdir().unwrap();
        for n in 0..quarry_config::LOG_FILE_COUNT {
            fs::write(log_path(tmp.path(), n), format!("run {n}")).unwrap();
        }

        let fresh = rotate_logs(tmp.path()).unwrap();
        assert_eq!(fresh, log_path(tmp.path(), 0));
        assert!(!fresh.exists());
        assert_eq!(fs::read_to_string(log_path(tmp.path(), 1)).unwrap(), "run 0");
        let last = quarry_config::LOG_FILE_COUNT - 1;
        assert_eq!(
            fs::read_to_string(log_path(tmp.path(), last)).unwrap(),
            format!("run {}", last - 1)
        );
        assert!(!log_path(tmp.path(), last + 1).exists());
    }

    #[test]
    fn rotation_of_an_empty_dir_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let fresh = rotate_logs(tmp.path()).unwrap();
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert!(fresh.ends_with("quarry-0.log"));
    }
}
