use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use trellis_process::Escalator;

/// Harness configuration loaded from file and/or environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Time a process gets to exit after the graceful request.
    pub grace: Duration,
    /// Interval between exit checks.
    pub poll_interval: Duration,
    /// Delay between spawning a worker and the first signal.
    pub settle: Duration,
    /// Deadline for an adapter invocation before escalation starts.
    pub invoke_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(50),
            settle: Duration::from_millis(250),
            invoke_timeout: Duration::from_millis(30_000),
        }
    }
}

/// Raw TOML file structure for `~/.config/trellis/harness.toml`.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    grace_ms: Option<u64>,
    poll_ms: Option<u64>,
    settle_ms: Option<u64>,
    invoke_timeout_ms: Option<u64>,
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("trellis").join("harness.toml"))
}

impl HarnessConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Priority: environment variables override file values, which override
    /// the built-in defaults. An explicit `config_path` must exist; the
    /// default location is optional.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file_config = match config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file not found: {}", path.display());
                }
                read_config_file(path)?
            }
            None => match default_config_path() {
                Some(path) if path.exists() => read_config_file(&path)?,
                _ => ConfigFile::default(),
            },
        };

        Self::from_file_and_env(file_config, |key| std::env::var(key).ok())
    }

    /// Build config from parsed file values and an environment lookup.
    fn from_file_and_env<F>(file_config: ConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let resolve = |var: &str, file_value: Option<u64>, default: Duration| -> Result<Duration> {
            let from_env = match env(var) {
                Some(raw) if !raw.trim().is_empty() => Some(
                    raw.trim()
                        .parse::<u64>()
                        .with_context(|| format!("{} must be a whole number of milliseconds, got '{}'", var, raw))?,
                ),
                _ => None,
            };
            Ok(from_env
                .or(file_value)
                .map(Duration::from_millis)
                .unwrap_or(default))
        };

        let config = Self {
            grace: resolve("TRELLIS_GRACE_MS", file_config.grace_ms, defaults.grace)?,
            poll_interval: resolve("TRELLIS_POLL_MS", file_config.poll_ms, defaults.poll_interval)?,
            settle: resolve("TRELLIS_SETTLE_MS", file_config.settle_ms, defaults.settle)?,
            invoke_timeout: resolve(
                "TRELLIS_INVOKE_TIMEOUT_MS",
                file_config.invoke_timeout_ms,
                defaults.invoke_timeout,
            )?,
        };

        if config.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        Ok(config)
    }

    pub fn escalator(&self) -> Escalator {
        Escalator::new(self.grace).with_poll_interval(self.poll_interval)
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    toml::from_str::<ConfigFile>(&content)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}
