//! Rate constraint value type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{PacerError, Result};

/// Common window lengths for constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// One second
    Second,
    /// One minute
    Minute,
    /// One hour
    Hour,
    /// One day
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }
}

/// No more than `max_actions` admissions may fall inside any trailing
/// window of length `period`.
///
/// Constraints are immutable and compared by value. Several constraints may
/// share a period.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateConstraint {
    period: Duration,
    max_actions: u64,
    name: Option<String>,
}

impl RateConstraint {
    /// Create a constraint, rejecting a zero period or a zero count.
    pub fn new(period: Duration, max_actions: u64) -> Result<Self> {
        if period.is_zero() {
            return Err(PacerError::InvalidConfiguration(
                "constraint period must be greater than zero".to_string(),
            ));
        }
        if max_actions == 0 {
            return Err(PacerError::InvalidConfiguration(
                "constraint max_actions must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            period,
            max_actions,
            name: None,
        })
    }

    /// Create a constraint over one of the standard windows.
    pub fn per(window: TimeWindow, max_actions: u64) -> Result<Self> {
        Self::new(window.duration(), max_actions)
    }

    /// At most `max_actions` per second.
    pub fn per_second(max_actions: u64) -> Result<Self> {
        Self::per(TimeWindow::Second, max_actions)
    }

    /// At most `max_actions` per minute.
    pub fn per_minute(max_actions: u64) -> Result<Self> {
        Self::per(TimeWindow::Minute, max_actions)
    }

    /// At most `max_actions` per hour.
    pub fn per_hour(max_actions: u64) -> Result<Self> {
        Self::per(TimeWindow::Hour, max_actions)
    }

    /// At most `max_actions` per day.
    pub fn per_day(max_actions: u64) -> Result<Self> {
        Self::per(TimeWindow::Day, max_actions)
    }

    /// Attach a diagnostic name, shown in logs and throttle events.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Length of the trailing window.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Maximum admissions inside one window.
    pub fn max_actions(&self) -> u64 {
        self.max_actions
    }

    /// Diagnostic name, if one was attached.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for RateConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}/{:?})", name, self.max_actions, self.period),
            None => write!(f, "{}/{:?}", self.max_actions, self.period),
        }
    }
}
