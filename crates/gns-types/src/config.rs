// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Executor configuration, loadable from a toml file

use std::{fs, path::Path, time::Duration};

use snafu::{ResultExt, Snafu};

use crate::constants::{
    DEFAULT_RESTART_PERIOD, MAX_KEY_REFRESH_ATTEMPTS, MAX_TASKS, MIN_RESTART_PERIOD,
    TOO_MANY_TASKS_CHECK_PERIOD,
};

/// Errors loading an [`ExecutorConfig`]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// The config file could not be read
    #[snafu(display("could not read config file {path}: {source}"))]
    Io {
        /// path of the file
        path: String,
        /// originating io error
        source: std::io::Error,
    },
    /// The config file is not valid toml for this schema
    #[snafu(display("could not parse executor config: {source}"))]
    Parse {
        /// originating toml error
        source: toml::de::Error,
    },
    /// A field holds a value the executor cannot run with
    #[snafu(display("invalid value for `{field}`: {reason}"))]
    InvalidValue {
        /// offending field
        field: &'static str,
        /// why it was rejected
        reason: &'static str,
    },
}

/// Runtime configuration of a `ProtocolExecutor`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// period used by `schedule` when the task does not name one
    pub default_restart_period: Duration,
    /// shorter periods are accepted but logged as a warning
    pub min_restart_period: Duration,
    /// registry size above which the watchdog warns
    pub max_tasks: usize,
    /// how often the watchdog looks at the registry
    pub watchdog_period: Duration,
    /// how often a colliding task is asked for a fresh key before it is dropped
    pub max_key_refresh_attempts: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_restart_period: DEFAULT_RESTART_PERIOD,
            min_restart_period: MIN_RESTART_PERIOD,
            max_tasks: MAX_TASKS,
            watchdog_period: TOO_MANY_TASKS_CHECK_PERIOD,
            max_key_refresh_attempts: MAX_KEY_REFRESH_ATTEMPTS,
        }
    }
}

/// On-disk form of [`ExecutorConfig`]; durations are in milliseconds.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfigFile {
    /// see [`ExecutorConfig::default_restart_period`]
    #[serde(default = "default_restart_period_ms")]
    pub default_restart_period_ms: u64,
    /// see [`ExecutorConfig::min_restart_period`]
    #[serde(default = "min_restart_period_ms")]
    pub min_restart_period_ms: u64,
    /// see [`ExecutorConfig::max_tasks`]
    #[serde(default = "max_tasks")]
    pub max_tasks: usize,
    /// see [`ExecutorConfig::watchdog_period`]
    #[serde(default = "watchdog_period_ms")]
    pub watchdog_period_ms: u64,
    /// see [`ExecutorConfig::max_key_refresh_attempts`]
    #[serde(default = "max_key_refresh_attempts")]
    pub max_key_refresh_attempts: usize,
}

impl Default for ExecutorConfigFile {
    fn default() -> Self {
        ExecutorConfig::default().into()
    }
}

// serde has no `default = <literal>`, so every default needs a function
/// default for `default_restart_period_ms`
fn default_restart_period_ms() -> u64 {
    duration_ms(DEFAULT_RESTART_PERIOD)
}
/// default for `min_restart_period_ms`
fn min_restart_period_ms() -> u64 {
    duration_ms(MIN_RESTART_PERIOD)
}
/// default for `max_tasks`
fn max_tasks() -> usize {
    MAX_TASKS
}
/// default for `watchdog_period_ms`
fn watchdog_period_ms() -> u64 {
    duration_ms(TOO_MANY_TASKS_CHECK_PERIOD)
}
/// default for `max_key_refresh_attempts`
fn max_key_refresh_attempts() -> usize {
    MAX_KEY_REFRESH_ATTEMPTS
}

/// whole milliseconds of `d`, saturating
fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl From<ExecutorConfig> for ExecutorConfigFile {
    fn from(val: ExecutorConfig) -> Self {
        Self {
            default_restart_period_ms: duration_ms(val.default_restart_period),
            min_restart_period_ms: duration_ms(val.min_restart_period),
            max_tasks: val.max_tasks,
            watchdog_period_ms: duration_ms(val.watchdog_period),
            max_key_refresh_attempts: val.max_key_refresh_attempts,
        }
    }
}

impl TryFrom<ExecutorConfigFile> for ExecutorConfig {
    type Error = ConfigError;

    fn try_from(val: ExecutorConfigFile) -> Result<Self, Self::Error> {
        if val.default_restart_period_ms == 0 {
            return InvalidValueSnafu {
                field: "default_restart_period_ms",
                reason: "a zero period would spin",
            }
            .fail();
        }
        if val.watchdog_period_ms == 0 {
            return InvalidValueSnafu {
                field: "watchdog_period_ms",
                reason: "a zero period would spin",
            }
            .fail();
        }
        if val.max_key_refresh_attempts == 0 {
            return InvalidValueSnafu {
                field: "max_key_refresh_attempts",
                reason: "at least one attempt is needed to insert a task",
            }
            .fail();
        }
        Ok(Self {
            default_restart_period: Duration::from_millis(val.default_restart_period_ms),
            min_restart_period: Duration::from_millis(val.min_restart_period_ms),
            max_tasks: val.max_tasks,
            watchdog_period: Duration::from_millis(val.watchdog_period_ms),
            max_key_refresh_attempts: val.max_key_refresh_attempts,
        })
    }
}

impl ExecutorConfig {
    /// Parse a config from toml text. Missing fields take their defaults.
    ///
    /// # Errors
    /// Fails on malformed toml, unknown fields, or unusable values.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ExecutorConfigFile = toml::from_str(contents).context(ParseSnafu)?;
        file.try_into()
    }

    /// Read and parse a toml config file.
    ///
    /// # Errors
    /// Fails if the file cannot be read, or for any reason [`Self::from_toml_str`] fails.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::from_toml_str(&contents)
    }
}
