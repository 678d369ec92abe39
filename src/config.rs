use std::path::PathBuf;
use std::str::FromStr;

/// Business windows enforced on guest input before the core sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Longest stay, in nights.
    pub max_stay_nights: u32,
    /// Arrival must be at least this many days after today.
    pub min_days_ahead: u32,
    /// Departure may be at most this many months after today.
    pub max_months_ahead: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            max_stay_nights: 3,
            min_days_ahead: 1,
            max_months_ahead: 1,
        }
    }
}

/// Server settings, read from `CAMPSITE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends between automatic compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub update_attempts: u32,
    pub policy: BookingPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            update_attempts: 3,
            policy: BookingPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparsable values fall back
    /// to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let policy = BookingPolicy {
            max_stay_nights: parsed(&lookup, "CAMPSITE_MAX_STAY_NIGHTS")
                .unwrap_or(defaults.policy.max_stay_nights),
            min_days_ahead: parsed(&lookup, "CAMPSITE_MIN_DAYS_AHEAD")
                .unwrap_or(defaults.policy.min_days_ahead),
            max_months_ahead: parsed(&lookup, "CAMPSITE_MAX_MONTHS_AHEAD")
                .unwrap_or(defaults.policy.max_months_ahead),
        };
        Self {
            bind: lookup("CAMPSITE_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "CAMPSITE_PORT").unwrap_or(defaults.port),
            data_dir: lookup("CAMPSITE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections: parsed(&lookup, "CAMPSITE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "CAMPSITE_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "CAMPSITE_METRICS_PORT"),
            update_attempts: parsed(&lookup, "CAMPSITE_UPDATE_ATTEMPTS")
                .unwrap_or(defaults.update_attempts),
            policy,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparsable {key}={raw:?}, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.addr(), "0.0.0.0:5433");
        assert_eq!(config.policy, BookingPolicy::default());
        assert_eq!(config.update_attempts, 3);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.wal_path(), PathBuf::from("./data/reservations.wal"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("CAMPSITE_PORT", "6000"),
            ("CAMPSITE_DATA_DIR", "/var/lib/campsite"),
            ("CAMPSITE_METRICS_PORT", "9000"),
            ("CAMPSITE_MAX_STAY_NIGHTS", "7"),
            ("CAMPSITE_UPDATE_ATTEMPTS", "5"),
        ]));
        assert_eq!(config.port, 6000);
        assert_eq!(config.metrics_port, Some(9000));
        assert_eq!(config.policy.max_stay_nights, 7);
        assert_eq!(config.policy.min_days_ahead, 1);
        assert_eq!(config.update_attempts, 5);
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/campsite/reservations.wal"));
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let config = Config::from_lookup(lookup_from(&[("CAMPSITE_PORT", "not-a-port")]));
        assert_eq!(config.port, 5433);
    }
}
