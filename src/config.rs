//! Configuration management for Pacer.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{PacerError, Result};
use crate::ratelimit::{Limiter, RateConstraint, StoreKind, TimeWindow, TimestampPolicy};

/// Prefix for environment variable overrides, e.g. `PACER_DRIVER__CALLS=500`.
const ENV_PREFIX: &str = "PACER";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for Pacer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Burst driver configuration
    #[serde(default)]
    pub driver: DriverConfig,
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Rate constraints, all enforced together
    #[serde(default = "default_constraints")]
    pub constraints: Vec<ConstraintConfig>,

    /// Timestamp store backend
    #[serde(default)]
    pub store: StoreKind,

    /// Which instant is recorded after a wait
    #[serde(default)]
    pub timestamp_policy: TimestampPolicy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            constraints: default_constraints(),
            store: StoreKind::default(),
            timestamp_policy: TimestampPolicy::default(),
        }
    }
}

/// A single configured constraint.
///
/// The window is given either as `period_ms` or as a `unit`
/// (`second`, `minute`, `hour`, `day`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    /// Maximum admissions per window
    pub max_actions: u64,
    /// Window length in milliseconds
    #[serde(default)]
    pub period_ms: Option<u64>,
    /// Window length as a standard unit
    #[serde(default)]
    pub unit: Option<TimeWindow>,
    /// Optional name for logs
    #[serde(default)]
    pub name: Option<String>,
}

impl ConstraintConfig {
    /// Validate and convert into a [`RateConstraint`].
    pub fn to_constraint(&self) -> Result<RateConstraint> {
        let period = match (self.period_ms, self.unit) {
            (Some(ms), None) => Duration::from_millis(ms),
            (None, Some(unit)) => unit.duration(),
            (Some(_), Some(_)) => {
                return Err(PacerError::InvalidConfiguration(
                    "constraint sets both period_ms and unit".to_string(),
                ))
            }
            (None, None) => {
                return Err(PacerError::InvalidConfiguration(
                    "constraint needs period_ms or unit".to_string(),
                ))
            }
        };

        let constraint = RateConstraint::new(period, self.max_actions)?;
        Ok(match &self.name {
            Some(name) => constraint.with_name(name.clone()),
            None => constraint,
        })
    }
}

fn default_constraints() -> Vec<ConstraintConfig> {
    [
        (TimeWindow::Second, 10, "per-second"),
        (TimeWindow::Minute, 100, "per-minute"),
        (TimeWindow::Day, 1000, "per-day"),
    ]
    .into_iter()
    .map(|(unit, max_actions, name)| ConstraintConfig {
        max_actions,
        period_ms: None,
        unit: Some(unit),
        name: Some(name.to_string()),
    })
    .collect()
}

impl LimiterConfig {
    /// Validate every configured constraint.
    pub fn constraints(&self) -> Result<Vec<RateConstraint>> {
        self.constraints.iter().map(|c| c.to_constraint()).collect()
    }

    /// Build a limiter around `action` from this configuration.
    pub fn build_limiter<F>(&self, action: F) -> Result<Limiter<F>> {
        Limiter::builder()
            .constraints(self.constraints()?)
            .store(self.store)
            .timestamp_policy(self.timestamp_policy)
            .build(action)
    }
}

/// Burst driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Number of calls to fire
    #[serde(default = "default_calls")]
    pub calls: usize,

    /// Upper bound on calls in flight; unbounded when absent
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Random delay in `[0, jitter_ms)` before each call is issued
    #[serde(default)]
    pub jitter_ms: u64,

    /// Log progress every N completed calls
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            calls: default_calls(),
            concurrency: None,
            jitter_ms: 0,
            progress_every: default_progress_every(),
        }
    }
}

fn default_calls() -> usize {
    9999
}

fn default_progress_every() -> usize {
    100
}

impl PacerConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| PacerError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file, then apply `PACER_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PacerConfig::default();
        let constraints = config.limiter.constraints().unwrap();

        assert_eq!(constraints.len(), 3);
        assert_eq!(constraints[0].period(), Duration::from_secs(1));
        assert_eq!(constraints[0].max_actions(), 10);
        assert_eq!(constraints[2].period(), Duration::from_secs(86400));
        assert_eq!(config.limiter.store, StoreKind::Queue);
        assert_eq!(config.limiter.timestamp_policy, TimestampPolicy::PostWait);
        assert_eq!(config.driver.calls, 9999);
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
limiter:
  store: expiring
  timestamp_policy: pre_wait
  constraints:
    - max_actions: 1
      period_ms: 100
    - max_actions: 50
      unit: minute
      name: api
driver:
  calls: 20
  concurrency: 4
"#;
        let config = PacerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.store, StoreKind::Expiring);
        assert_eq!(config.limiter.timestamp_policy, TimestampPolicy::PreWait);
        assert_eq!(config.driver.calls, 20);
        assert_eq!(config.driver.concurrency, Some(4));
        assert_eq!(config.driver.progress_every, 100);

        let constraints = config.limiter.constraints().unwrap();
        assert_eq!(constraints[0].period(), Duration::from_millis(100));
        assert_eq!(constraints[1].name(), Some("api"));
    }

    #[test]
    fn test_constraint_needs_exactly_one_period() {
        let both = ConstraintConfig {
            max_actions: 1,
            period_ms: Some(10),
            unit: Some(TimeWindow::Second),
            name: None,
        };
        assert!(matches!(both.to_constraint(), Err(PacerError::InvalidConfiguration(_))));

        let neither = ConstraintConfig {
            unit: None,
            period_ms: None,
            ..both
        };
        assert!(matches!(neither.to_constraint(), Err(PacerError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_build_limiter_rejects_zero_max_actions() {
        let yaml = r#"
limiter:
  constraints:
    - max_actions: 0
      unit: second
"#;
        let config = PacerConfig::from_yaml(yaml).unwrap();
        let result = config
            .limiter
            .build_limiter(|_: ()| async { Ok::<_, std::convert::Infallible>(()) });
        assert!(matches!(result, Err(PacerError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_build_limiter_rejects_empty_constraints() {
        let config = PacerConfig::from_yaml("limiter:\n  constraints: []\n").unwrap();
        let result = config
            .limiter
            .build_limiter(|_: ()| async { Ok::<_, std::convert::Infallible>(()) });
        assert!(matches!(result, Err(PacerError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("pacer-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "limiter:\n  constraints:\n    - max_actions: 3\n      period_ms: 250\n",
        )
        .unwrap();

        let config = PacerConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        let constraints = config.limiter.constraints().unwrap();
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].period(), Duration::from_millis(250));
        assert_eq!(config.driver.calls, 9999);
    }
}
