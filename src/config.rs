//! Configuration types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How a task run is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Execution {
    /// Awaited in the scheduler's own flow.
    Inline,
    /// Spawned on the scheduler's runtime.
    #[default]
    Cooperative,
    /// Run on a dedicated OS thread.
    Thread,
    /// Run as a child process.
    Process,
}

impl Execution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Cooperative => "cooperative",
            Self::Thread => "thread",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Execution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "main" => Ok(Self::Inline),
            "cooperative" | "async" => Ok(Self::Cooperative),
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            other => Err(format!("unknown execution '{other}'")),
        }
    }
}

/// What a scheduler restart does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Exec the current program over this process (Unix), else `Relaunch`.
    Replace,
    /// Spawn the current program with the same arguments and return.
    Relaunch,
    /// Like `Relaunch` but detached from this process's stdio.
    Fresh,
    /// Serve again in the same process.
    #[default]
    Recall,
}

impl FromStr for RestartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "relaunch" => Ok(Self::Relaunch),
            "fresh" => Ok(Self::Fresh),
            "recall" => Ok(Self::Recall),
            other => Err(format!("unknown restart policy '{other}'")),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Execution for tasks that don't set their own.
    pub execution: Execution,
    /// Sleep between scheduler cycles.
    pub cycle_sleep: Duration,
    /// Timeout for tasks that don't set their own.
    pub default_timeout: Option<Duration>,
    /// Maximum number of concurrent process runs.
    pub max_process_count: usize,
    /// Treat failing start/end conditions as false instead of crashing.
    pub silence_cond_check: bool,
    /// Log setup errors instead of raising them.
    pub silence_task_prerun: bool,
    /// Log repository failures instead of raising them.
    pub silence_task_logging: bool,
    /// Conditions query the repository instead of the status cache.
    pub force_status_from_logs: bool,
    /// Terminate live runs at shutdown instead of waiting for them.
    pub instant_shutdown: bool,
    /// Upper bound on waiting for live runs at shutdown.
    pub shutdown_grace: Duration,
    /// How long a process launch waits for its `run` record.
    pub process_start_timeout: Duration,
    pub restarting: RestartPolicy,
    pub task_logger_basename: String,
    pub scheduler_logger_basename: String,
    /// Environment name observed by `env '<name>'` conditions.
    pub env: Option<String>,
    /// Session timezone as seconds east of UTC; local time when unset.
    pub utc_offset_secs: Option<i32>,
    /// Shut down gracefully on Ctrl-C.
    pub handle_signals: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            execution: Execution::Cooperative,
            cycle_sleep: Duration::from_millis(100),
            default_timeout: None,
            max_process_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            silence_cond_check: false,
            silence_task_prerun: true,
            silence_task_logging: true,
            force_status_from_logs: false,
            instant_shutdown: false,
            shutdown_grace: Duration::from_secs(30),
            process_start_timeout: Duration::from_secs(10),
            restarting: RestartPolicy::Recall,
            task_logger_basename: "tickwork.task".to_string(),
            scheduler_logger_basename: "tickwork.scheduler".to_string(),
            env: None,
            utc_offset_secs: None,
            handle_signals: false,
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with `TICKWORK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by the
    /// `TICKWORK_*` variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse::<Execution>(&lookup, "TICKWORK_EXECUTION")? {
            config.execution = v;
        }
        if let Some(ms) = parse::<u64>(&lookup, "TICKWORK_CYCLE_SLEEP_MS")? {
            config.cycle_sleep = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, "TICKWORK_DEFAULT_TIMEOUT_SECS")? {
            config.default_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(n) = parse::<usize>(&lookup, "TICKWORK_MAX_PROCESS_COUNT")? {
            if n == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "TICKWORK_MAX_PROCESS_COUNT".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.max_process_count = n;
        }
        for (key, field) in [
            ("TICKWORK_SILENCE_COND_CHECK", &mut config.silence_cond_check),
            ("TICKWORK_SILENCE_TASK_PRERUN", &mut config.silence_task_prerun),
            ("TICKWORK_SILENCE_TASK_LOGGING", &mut config.silence_task_logging),
            ("TICKWORK_FORCE_STATUS_FROM_LOGS", &mut config.force_status_from_logs),
            ("TICKWORK_INSTANT_SHUTDOWN", &mut config.instant_shutdown),
            ("TICKWORK_HANDLE_SIGNALS", &mut config.handle_signals),
        ] {
            if let Some(v) = parse_bool(&lookup, key)? {
                *field = v;
            }
        }
        if let Some(v) = parse::<RestartPolicy>(&lookup, "TICKWORK_RESTARTING")? {
            config.restarting = v;
        }
        if let Some(env) = lookup("TICKWORK_ENV").filter(|s| !s.trim().is_empty()) {
            config.env = Some(env.trim().to_string());
        }
        if let Some(offset) = parse::<i32>(&lookup, "TICKWORK_UTC_OFFSET_SECS")? {
            if offset.abs() >= 86_400 {
                return Err(ConfigError::InvalidValue {
                    key: "TICKWORK_UTC_OFFSET_SECS".to_string(),
                    message: "must be within one day".to_string(),
                });
            }
            config.utc_offset_secs = Some(offset);
        }

        Ok(config)
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.execution, Execution::Cooperative);
        assert_eq!(config.cycle_sleep, Duration::from_millis(100));
        assert!(config.silence_task_prerun);
        assert!(config.silence_task_logging);
        assert!(!config.silence_cond_check);
        assert_eq!(config.restarting, RestartPolicy::Recall);
        assert!(config.max_process_count >= 1);
    }

    #[test]
    fn overlays_environment_values() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("TICKWORK_EXECUTION", "thread"),
            ("TICKWORK_CYCLE_SLEEP_MS", "5"),
            ("TICKWORK_DEFAULT_TIMEOUT_SECS", "60"),
            ("TICKWORK_INSTANT_SHUTDOWN", "yes"),
            ("TICKWORK_RESTARTING", "fresh"),
            ("TICKWORK_ENV", "prod"),
        ]))
        .unwrap();
        assert_eq!(config.execution, Execution::Thread);
        assert_eq!(config.cycle_sleep, Duration::from_millis(5));
        assert_eq!(config.default_timeout, Some(Duration::from_secs(60)));
        assert!(config.instant_shutdown);
        assert_eq!(config.restarting, RestartPolicy::Fresh);
        assert_eq!(config.env.as_deref(), Some("prod"));
    }

    #[test]
    fn rejects_malformed_values() {
        let err = SessionConfig::from_lookup(lookup(&[("TICKWORK_CYCLE_SLEEP_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "TICKWORK_CYCLE_SLEEP_MS"
        ));

        for (key, value) in [
            ("TICKWORK_SILENCE_COND_CHECK", "maybe"),
            ("TICKWORK_MAX_PROCESS_COUNT", "0"),
            ("TICKWORK_EXECUTION", "fiber"),
        ] {
            assert!(SessionConfig::from_lookup(lookup(&[(key, value)])).is_err(), "{key}");
        }
    }

    #[test]
    fn json_keeps_defaults_for_missing_fields() {
        let config = SessionConfig::from_json(r#"{"execution": "inline", "env": "test"}"#).unwrap();
        assert_eq!(config.execution, Execution::Inline);
        assert_eq!(config.env.as_deref(), Some("test"));
        assert_eq!(config.shutdown_grace, Duration::from_secs(30));
    }
}
