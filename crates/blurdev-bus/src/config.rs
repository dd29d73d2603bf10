//! Bus configuration: environment first, builder overrides after.

use std::path::PathBuf;
use std::time::Duration;

use crate::host::ToolIndex;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CORE_NAME: &str = "blurdev";

/// Log file written by the protocol entry point.
pub const PROTOCOL_LOG_FILE: &str = "blurdev_protocol.log";

pub const ENV_POLL_INTERVAL_MS: &str = "BLURDEV_POLL_INTERVAL_MS";
pub const ENV_SPAWN_TIMEOUT_MS: &str = "BLURDEV_SPAWN_TIMEOUT_MS";
pub const ENV_CHILD_EXE: &str = "BLURDEV_CHILD_EXE";
pub const ENV_CORE_NAME: &str = "BLURDEV_CORE_NAME";
pub const ENV_TOOLS: &str = "BLURDEV_TOOLS";
pub const ENV_LOG_DIR: &str = "BLURDEV_LOG_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key} ({value:?}): {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to read tool index {}: {source}", path.display())]
    ReadTools {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse tool index {}: {source}", path.display())]
    ParseTools {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Dispatcher tick period.
    pub poll_interval: Duration,
    /// How long `ensure_child` waits for the child's ready frame.
    pub spawn_timeout: Duration,
    /// Explicit child executable; resolved from the environment when unset.
    pub child_executable: Option<PathBuf>,
    /// Identifier of this process's host application, passed to the child.
    pub core_name: String,
    /// Native window handle the child may parent its windows to.
    pub window_handle: Option<u64>,
    pub tools_file: Option<PathBuf>,
    pub log_dir: PathBuf,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            spawn_timeout: DEFAULT_SPAWN_TIMEOUT,
            child_executable: None,
            core_name: DEFAULT_CORE_NAME.to_string(),
            window_handle: None,
            tools_file: None,
            log_dir: std::env::temp_dir(),
        }
    }
}

impl BusConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (unset or empty values keep defaults).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(raw) = get(ENV_POLL_INTERVAL_MS) {
            config.poll_interval = parse_millis(ENV_POLL_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_SPAWN_TIMEOUT_MS) {
            config.spawn_timeout = parse_millis(ENV_SPAWN_TIMEOUT_MS, &raw)?;
        }
        if let Some(exe) = get(ENV_CHILD_EXE) {
            config.child_executable = Some(PathBuf::from(exe));
        }
        if let Some(core) = get(ENV_CORE_NAME) {
            config.core_name = core;
        }
        if let Some(tools) = get(ENV_TOOLS) {
            config.tools_file = Some(PathBuf::from(tools));
        }
        if let Some(dir) = get(ENV_LOG_DIR) {
            config.log_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn with_child_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.child_executable = Some(path.into());
        self
    }

    pub fn with_core_name(mut self, name: impl Into<String>) -> Self {
        self.core_name = name.into();
        self
    }

    pub fn with_window_handle(mut self, handle: Option<u64>) -> Self {
        self.window_handle = handle;
        self
    }

    pub fn with_tools_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tools_file = Some(path.into());
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn protocol_log_path(&self) -> PathBuf {
        self.log_dir.join(PROTOCOL_LOG_FILE)
    }

    /// The configured tool index, or an empty one.
    pub fn load_tools(&self) -> Result<ToolIndex, ConfigError> {
        match &self.tools_file {
            Some(path) => ToolIndex::load(path),
            None => Ok(ToolIndex::default()),
        }
    }
}

fn parse_millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let millis: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
        ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        }
    })?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_millis(millis))
}
