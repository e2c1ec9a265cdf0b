use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::{Ms, DAY_MS};

/// Booking rules applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    /// How long an unpaid pending reservation holds its window.
    pub hold_ttl_ms: Ms,
    /// How far past the requested start alternative windows are searched.
    pub suggestion_horizon_days: i64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            hold_ttl_ms: DAY_MS,
            suggestion_horizon_days: 30,
        }
    }
}

/// TTLs for the validation cache, per attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub resource_exists: Duration,
    pub resource_status: Duration,
    pub requester: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            resource_exists: Duration::from_secs(300),
            resource_status: Duration::from_secs(120),
            requester: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationSettings {
    /// Upper bound on the whole `validate_draft` fan-out.
    pub deadline: Duration,
    /// Upper bound on one availability probe.
    pub probe_timeout: Duration,
    pub cache_ttls: CacheTtls,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(150),
            cache_ttls: CacheTtls::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub catalog_seed: Option<PathBuf>,
    pub policy: BookingPolicy,
    pub validation: ValidationSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            sweep_interval: Duration::from_secs(60),
            compact_threshold: 1000,
            catalog_seed: None,
            policy: BookingPolicy::default(),
            validation: ValidationSettings::default(),
        }
    }
}

impl Config {
    /// Read `SLOTGUARD_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            data_dir: get("SLOTGUARD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            metrics_port: parse_key(&get, "SLOTGUARD_METRICS_PORT"),
            sweep_interval: parse_key(&get, "SLOTGUARD_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            compact_threshold: parse_key(&get, "SLOTGUARD_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            catalog_seed: get("SLOTGUARD_CATALOG").map(PathBuf::from),
            policy: BookingPolicy {
                hold_ttl_ms: parse_key::<u64>(&get, "SLOTGUARD_HOLD_TTL_SECS")
                    .and_then(|s| Ms::try_from(s.saturating_mul(1000)).ok())
                    .unwrap_or(defaults.policy.hold_ttl_ms),
                suggestion_horizon_days: parse_key(&get, "SLOTGUARD_SUGGESTION_HORIZON_DAYS")
                    .unwrap_or(defaults.policy.suggestion_horizon_days),
            },
            validation: ValidationSettings {
                deadline: parse_key(&get, "SLOTGUARD_VALIDATION_DEADLINE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.validation.deadline),
                probe_timeout: parse_key(&get, "SLOTGUARD_PROBE_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.validation.probe_timeout),
                cache_ttls: CacheTtls {
                    resource_exists: parse_key(&get, "SLOTGUARD_CACHE_RESOURCE_EXISTS_SECS")
                        .map(Duration::from_secs)
                        .unwrap_or(defaults.validation.cache_ttls.resource_exists),
                    resource_status: parse_key(&get, "SLOTGUARD_CACHE_RESOURCE_STATUS_SECS")
                        .map(Duration::from_secs)
                        .unwrap_or(defaults.validation.cache_ttls.resource_status),
                    requester: parse_key(&get, "SLOTGUARD_CACHE_REQUESTER_SECS")
                        .map(Duration::from_secs)
                        .unwrap_or(defaults.validation.cache_ttls.requester),
                },
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn parse_key<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparseable {key}={raw:?}");
            None
        }
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
    fn defaults_match_policy_constants() {
        let cfg = Config::from_lookup(|_| None);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.policy.hold_ttl_ms, 24 * 3_600_000);
        assert_eq!(cfg.validation.probe_timeout, Duration::from_millis(150));
        assert_eq!(cfg.validation.deadline, Duration::from_secs(2));
        assert_eq!(cfg.validation.cache_ttls.resource_exists, Duration::from_secs(300));
        assert_eq!(cfg.validation.cache_ttls.resource_status, Duration::from_secs(120));
        assert_eq!(cfg.validation.cache_ttls.requester, Duration::from_secs(60));
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/reservations.wal"));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = Config::from_lookup(lookup(&[
            ("SLOTGUARD_DATA_DIR", "/var/lib/slotguard"),
            ("SLOTGUARD_METRICS_PORT", "9100"),
            ("SLOTGUARD_HOLD_TTL_SECS", "3600"),
            ("SLOTGUARD_VALIDATION_DEADLINE_MS", "500"),
            ("SLOTGUARD_SUGGESTION_HORIZON_DAYS", "14"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/slotguard"));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.policy.hold_ttl_ms, 3_600_000);
        assert_eq!(cfg.validation.deadline, Duration::from_millis(500));
        assert_eq!(cfg.policy.suggestion_horizon_days, 14);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = Config::from_lookup(lookup(&[
            ("SLOTGUARD_METRICS_PORT", "not-a-port"),
            ("SLOTGUARD_COMPACT_THRESHOLD", ""),
        ]));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.compact_threshold, 1000);
    }
}
