//! Engine configuration.
//!
//! Read once from the environment at startup. Unset or malformed variables
//! fall back to defaults with a warning; values are clamped to sane bounds
//! rather than rejected.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Block size in bytes.
pub const ENV_BLOCK_SIZE: &str = "TERRIER_BLOCK_SIZE";
/// WAL flush period in milliseconds.
pub const ENV_WAL_FLUSH_MS: &str = "TERRIER_WAL_FLUSH_MS";
/// Directory holding checkpoint files.
pub const ENV_CHECKPOINT_DIR: &str = "TERRIER_CHECKPOINT_DIR";

const DEFAULT_BLOCK_SIZE: u32 = 1 << 20;
const MIN_BLOCK_SIZE: u32 = 4096;
const DEFAULT_WAL_FLUSH_MS: u64 = 10;

/// Process-wide storage engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Size of every storage block in bytes.
    pub block_size: u32,
    /// Period at which the log flusher drains its queue.
    pub wal_flush_interval: Duration,
    /// Directory where checkpoint files are created.
    pub checkpoint_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            wal_flush_interval: Duration::from_millis(DEFAULT_WAL_FLUSH_MS),
            checkpoint_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Build a config from the `TERRIER_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(raw) = env::var_os(ENV_BLOCK_SIZE) {
            match raw.to_string_lossy().parse::<u32>() {
                Ok(size) => config.block_size = size,
                Err(_) => warn!(
                    var = ENV_BLOCK_SIZE,
                    "unparseable block size, using default"
                ),
            }
        }
        if let Some(raw) = env::var_os(ENV_WAL_FLUSH_MS) {
            match raw.to_string_lossy().parse::<u64>() {
                Ok(ms) => config.wal_flush_interval = Duration::from_millis(ms),
                Err(_) => warn!(
                    var = ENV_WAL_FLUSH_MS,
                    "unparseable flush period, using default"
                ),
            }
        }
        if let Some(raw) = env::var_os(ENV_CHECKPOINT_DIR) {
            config.checkpoint_dir = PathBuf::from(raw);
        }
        config.validated()
    }

    /// Clamp values to operational bounds.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.block_size < MIN_BLOCK_SIZE {
            warn!(
                block_size = self.block_size,
                min = MIN_BLOCK_SIZE,
                "block size below minimum, clamping"
            );
            self.block_size = MIN_BLOCK_SIZE;
        }
        if self.wal_flush_interval.is_zero() {
            self.wal_flush_interval = Duration::from_millis(1);
        }
        self
    }
}
