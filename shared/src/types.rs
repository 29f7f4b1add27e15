use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which resolution paths a service may be reached through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStrategy {
    /// Only direct requests to the configured addresses.
    #[default]
    Direct,
    /// Only requests relayed through the configured intermediaries.
    #[serde(alias = "cors")]
    Intermediated,
    /// Direct first, then each intermediary, per address.
    Mixed,
}

impl CheckStrategy {
    pub fn allows_direct(self) -> bool {
        matches!(self, CheckStrategy::Direct | CheckStrategy::Mixed)
    }

    pub fn allows_intermediaries(self) -> bool {
        matches!(self, CheckStrategy::Intermediated | CheckStrategy::Mixed)
    }
}

/// A monitored service, loaded once from configuration and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    /// Unique name, used as the status store key
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Candidate endpoint URIs, tried in order. Never empty.
    pub addresses: Vec<String>,

    #[serde(default)]
    pub check_strategy: CheckStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    #[default]
    Unknown,
    Up,
    Slow,
    Down,
}

impl StatusState {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusState::Unknown => "unknown",
            StatusState::Up => "up",
            StatusState::Slow => "slow",
            StatusState::Down => "down",
        }
    }
}

impl std::fmt::Display for StatusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest probe outcome for one service. Replaced wholesale on every probe;
/// use the constructors so the fields always agree with `state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub state: StatusState,

    /// Elapsed probe time; set only for `up` and `slow`
    pub response_time_millis: Option<u64>,

    /// None until the first probe completes
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Terminal failure cause; set only for `down`
    pub error_detail: Option<String>,

    /// The address that answered
    pub resolved_address: Option<String>,

    /// True when the answer came through an intermediary
    pub via_fallback: bool,

    /// The intermediary that relayed the answer, if any
    pub intermediary: Option<String>,
}

impl StatusRecord {
    /// Initial record for a service that has never been probed.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// A successful probe. `state` must be `Up` or `Slow`.
    pub fn reachable(
        state: StatusState,
        response_time_millis: u64,
        checked_at: DateTime<Utc>,
        resolved_address: String,
        intermediary: Option<String>,
    ) -> Self {
        debug_assert!(matches!(state, StatusState::Up | StatusState::Slow));
        Self {
            state,
            response_time_millis: Some(response_time_millis),
            last_checked_at: Some(checked_at),
            error_detail: None,
            resolved_address: Some(resolved_address),
            via_fallback: intermediary.is_some(),
            intermediary,
        }
    }

    /// A probe that exhausted every address and path.
    pub fn down(error_detail: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            state: StatusState::Down,
            response_time_millis: None,
            last_checked_at: Some(checked_at),
            error_detail: Some(error_detail.into()),
            resolved_address: None,
            via_fallback: false,
            intermediary: None,
        }
    }

    /// Whether the optional fields agree with `state`.
    pub fn is_consistent(&self) -> bool {
        match self.state {
            StatusState::Unknown => {
                self.response_time_millis.is_none()
                    && self.last_checked_at.is_none()
                    && self.error_detail.is_none()
                    && self.resolved_address.is_none()
                    && !self.via_fallback
            }
            StatusState::Up | StatusState::Slow => {
                self.response_time_millis.is_some()
                    && self.error_detail.is_none()
                    && self.resolved_address.is_some()
                    && self.via_fallback == self.intermediary.is_some()
            }
            StatusState::Down => {
                self.response_time_millis.is_none()
                    && self.error_detail.is_some()
                    && self.resolved_address.is_none()
                    && !self.via_fallback
            }
        }
    }
}

/// One service joined with its current status, as served to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub definition: ServiceDefinition,

    #[serde(flatten)]
    pub status: StatusRecord,
}

/// Per-state service counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub up: usize,
    pub slow: usize,
    pub down: usize,
    pub unknown: usize,
}

impl StatusSummary {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a StatusRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            match record.state {
                StatusState::Up => summary.up += 1,
                StatusState::Slow => summary.slow += 1,
                StatusState::Down => summary.down += 1,
                StatusState::Unknown => summary.unknown += 1,
            }
        }
        summary
    }
}

/// Point-in-time view of every configured service. Built per read, never retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSnapshot {
    /// Services in configuration order
    pub services: Vec<ServiceStatus>,

    pub summary: StatusSummary,

    pub generated_at: DateTime<Utc>,

    pub last_sweep_completed_at: Option<DateTime<Utc>>,

    pub check_interval_millis: u64,
}
