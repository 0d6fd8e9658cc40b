use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;

use crate::controller::DashboardConfig;
use crate::countdown::{CountdownEngine, DEFAULT_CRITICAL_SECS};
use crate::database::Database;
use crate::penalty::{PenaltyPolicy, DEFAULT_PENALTY_RATE};

pub struct ConfigKey {
    pub name: &'static str,
    pub default: Option<&'static str>,
    pub description: &'static str,
}

pub const CONFIG_KEYS: &[ConfigKey] = &[
    ConfigKey {
        name: "backend",
        default: Some("local"),
        description: "Task store: 'local' (sqlite) or 'remote' (REST)",
    },
    ConfigKey {
        name: "api_url",
        default: None,
        description: "Base URL of the remote store",
    },
    ConfigKey {
        name: "api_key",
        default: None,
        description: "API key sent to the remote store",
    },
    ConfigKey {
        name: "worker_id",
        default: None,
        description: "Worker whose tasks are shown",
    },
    ConfigKey {
        name: "timezone",
        default: Some("Europe/Moscow"),
        description: "Reference timezone for deadlines and calendar days",
    },
    ConfigKey {
        name: "tick_ms",
        default: Some("1000"),
        description: "Countdown refresh interval in milliseconds",
    },
    ConfigKey {
        name: "poll_secs",
        default: Some("30"),
        description: "Task refetch interval in seconds",
    },
    ConfigKey {
        name: "penalty_rate",
        default: Some("0.9"),
        description: "Share of the payout kept when a task is late",
    },
    ConfigKey {
        name: "critical_secs",
        default: Some("3600"),
        description: "Seconds before the deadline a task turns critical",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub worker_id: Option<String>,
    pub timezone: Tz,
    pub tick: Duration,
    pub poll: Duration,
    pub penalty_rate: f64,
    pub critical_secs: i64,
}

pub fn find_key(name: &str) -> Option<&'static ConfigKey> {
    CONFIG_KEYS.iter().find(|k| k.name == name)
}

fn env_name(key: &str) -> String {
    format!("WORKER_DASH_{}", key.to_uppercase())
}

fn positive<T: std::str::FromStr + PartialOrd + Default>(key: &str, value: &str) -> Result<T> {
    let parsed: T = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("'{}' must be a number, got '{}'", key, value))?;
    if parsed <= T::default() {
        bail!("'{}' must be greater than zero", key);
    }
    Ok(parsed)
}

/// Rejects values that would not load. Unknown keys are refused too.
pub fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        "backend" => parse_backend(value).map(|_| ()),
        "timezone" => parse_timezone(value).map(|_| ()),
        "tick_ms" | "poll_secs" => positive::<u64>(key, value).map(|_| ()),
        "critical_secs" => positive::<i64>(key, value).map(|_| ()),
        "penalty_rate" => {
            let rate: f64 = positive(key, value)?;
            if !rate.is_finite() {
                bail!("'penalty_rate' must be a finite number");
            }
            if rate > 1.0 {
                bail!("'penalty_rate' must be at most 1.0");
            }
            Ok(())
        }
        "api_url" | "api_key" | "worker_id" => {
            if value.trim().is_empty() {
                bail!("'{}' cannot be empty", key);
            }
            Ok(())
        }
        _ => bail!("Unknown config key '{}'", key),
    }
}

fn parse_backend(value: &str) -> Result<BackendKind> {
    match value.trim() {
        "local" => Ok(BackendKind::Local),
        "remote" => Ok(BackendKind::Remote),
        other => bail!("backend must be 'local' or 'remote', got '{}'", other),
    }
}

fn parse_timezone(value: &str) -> Result<Tz> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("Unknown timezone '{}': {}", value, e))
}

impl AppConfig {
    /// Stored settings, overridden by `WORKER_DASH_<KEY>` environment variables.
    pub fn load(db: &Database) -> Result<Self> {
        let mut stored = Vec::new();
        for key in CONFIG_KEYS {
            stored.push((key.name, db.get_config(key.name)?));
        }
        Self::from_lookup(|key| {
            std::env::var(env_name(key)).ok().or_else(|| {
                stored
                    .iter()
                    .find(|(name, _)| *name == key)
                    .and_then(|(_, value)| value.clone())
            })
        })
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| -> Option<String> {
            lookup(key).or_else(|| find_key(key).and_then(|k| k.default).map(str::to_string))
        };
        let required = |key: &str| -> Result<String> {
            let value = get(key).ok_or_else(|| anyhow!("missing default for '{}'", key))?;
            validate(key, &value).with_context(|| format!("Invalid config value for '{}'", key))?;
            Ok(value)
        };

        Ok(AppConfig {
            backend: parse_backend(&required("backend")?)?,
            api_url: get("api_url"),
            api_key: get("api_key"),
            worker_id: get("worker_id"),
            timezone: parse_timezone(&required("timezone")?)?,
            tick: Duration::from_millis(positive("tick_ms", &required("tick_ms")?)?),
            poll: Duration::from_secs(positive("poll_secs", &required("poll_secs")?)?),
            penalty_rate: positive("penalty_rate", &required("penalty_rate")?)?,
            critical_secs: positive("critical_secs", &required("critical_secs")?)?,
        })
    }

    pub fn worker_id(&self) -> Result<&str> {
        self.worker_id.as_deref().ok_or_else(|| {
            anyhow!("No worker configured. Run `worker-dash set worker_id <ID>` or set WORKER_DASH_WORKER_ID")
        })
    }

    pub fn countdown(&self) -> CountdownEngine {
        CountdownEngine::new(self.timezone, self.critical_secs)
    }

    pub fn penalty(&self) -> PenaltyPolicy {
        PenaltyPolicy::new(self.penalty_rate)
    }

    pub fn dashboard_config(&self) -> Result<DashboardConfig> {
        Ok(DashboardConfig {
            worker_id: self.worker_id()?.to_string(),
            tick: self.tick,
            countdown: self.countdown(),
            penalty: self.penalty(),
        })
    }

    pub fn remote_endpoint(&self) -> Result<(&str, &str)> {
        let url = self
            .api_url
            .as_deref()
            .ok_or_else(|| anyhow!("Remote backend needs 'api_url'"))?;
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Remote backend needs 'api_key'"))?;
        Ok((url, key))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            backend: BackendKind::Local,
            api_url: None,
            api_key: None,
            worker_id: None,
            timezone: chrono_tz::Europe::Moscow,
            tick: Duration::from_secs(1),
            poll: Duration::from_secs(30),
            penalty_rate: DEFAULT_PENALTY_RATE,
            critical_secs: DEFAULT_CRITICAL_SECS,
        }
    }
}
