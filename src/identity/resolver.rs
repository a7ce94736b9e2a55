//! Role resolution: remote procedure with bounded retry, then the legacy profile field,
//! with a one-way sync of a legacy hit into the central mapping.
//!
//! The retry exists because a freshly signed-in user's central mapping row may not be
//! visible yet. It is a small fixed budget, not a general retry policy. Neither an empty
//! answer nor a failed call is an error here: both feed the same retry/fallback path.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::principal::Identity;
use super::role::Role;
use crate::backend::{text_field, BackendClient, Row, RowFilter};

/// Attempts and backoff for the role procedure. Delay after attempt `n` (0-based) is
/// `base_delay + n² * step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step: Duration,
}

impl RetryPolicy {
    /// 4 attempts; waits of 50, 100, 250 and 500 ms.
    pub const DEFAULT: RetryPolicy = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(50),
        step: Duration::from_millis(50),
    };

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay + self.step * attempt.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::DEFAULT }
}

/// Names of the backend objects holding roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendNames {
    /// Server-side function returning the caller's own role.
    pub role_procedure: String,
    pub central_table: String,
    pub central_key: String,
    pub central_role: String,
    pub legacy_table: String,
    pub legacy_key: String,
    pub legacy_role: String,
}

impl Default for BackendNames {
    fn default() -> Self {
        Self {
            role_procedure: "get_my_role".into(),
            central_table: "user_roles".into(),
            central_key: "user_id".into(),
            central_role: "role".into(),
            legacy_table: "profiles".into(),
            legacy_key: "id".into(),
            legacy_role: "role".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Role),
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSource {
    Procedure,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolution: Resolution,
    /// Procedure attempts consumed.
    pub attempts: u32,
    pub source: Option<RoleSource>,
}

impl ResolutionReport {
    pub fn role(&self) -> Option<Role> {
        match self.resolution {
            Resolution::Resolved(r) => Some(r),
            Resolution::Unresolved => None,
        }
    }
}

/// Parses a stored role value; anything that is not one of the roles counts as empty.
fn parse_stored(raw: Option<&str>, source: &str, identity: &Identity) -> Option<Role> {
    let raw = raw?;
    match raw.parse::<Role>() {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(target: "role", "ignoring {} value for {}: {}", source, identity, e);
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleResolver {
    policy: RetryPolicy,
    names: BackendNames,
}

impl RoleResolver {
    pub fn new(policy: RetryPolicy, names: BackendNames) -> Self { Self { policy, names } }

    pub fn names(&self) -> &BackendNames { &self.names }

    pub async fn resolve(&self, backend: &dyn BackendClient, identity: &Identity) -> ResolutionReport {
        let mut attempts = 0u32;
        for attempt in 0..self.policy.max_attempts {
            attempts += 1;
            if let Some(role) = self.lookup_procedure(backend, identity, attempt).await {
                debug!(target: "role", "resolved {} as {} on attempt {}", identity, role, attempts);
                return ResolutionReport { resolution: Resolution::Resolved(role), attempts, source: Some(RoleSource::Procedure) };
            }
            tokio::time::sleep(self.policy.delay_for(attempt)).await;
        }

        let Some(role) = self.lookup_legacy(backend, identity).await else {
            info!(target: "role", "no role for {} after {} attempts and legacy fallback", identity, attempts);
            return ResolutionReport { resolution: Resolution::Unresolved, attempts, source: None };
        };
        self.write_back(backend, identity, role).await;
        ResolutionReport { resolution: Resolution::Resolved(role), attempts, source: Some(RoleSource::Legacy) }
    }

    async fn lookup_procedure(&self, backend: &dyn BackendClient, identity: &Identity, attempt: u32) -> Option<Role> {
        match backend.call_procedure(&self.names.role_procedure).await {
            Ok(raw) => parse_stored(raw.as_deref(), "procedure", identity),
            Err(e) => {
                warn!(target: "role", "role procedure failed for {} (attempt {}): {}", identity, attempt + 1, e);
                None
            }
        }
    }

    async fn lookup_legacy(&self, backend: &dyn BackendClient, identity: &Identity) -> Option<Role> {
        let n = &self.names;
        let filter = RowFilter::eq(n.legacy_key.clone(), identity.as_str());
        match backend.read_row(&n.legacy_table, &filter).await {
            Ok(Some(row)) => parse_stored(text_field(&row, &n.legacy_role), "legacy", identity),
            Ok(None) => None,
            Err(e) => {
                warn!(target: "role", "legacy role read failed for {}: {}", identity, e);
                None
            }
        }
    }

    /// Best effort: the legacy role still wins for this resolution if the write fails.
    async fn write_back(&self, backend: &dyn BackendClient, identity: &Identity, role: Role) {
        let n = &self.names;
        let mut row = Row::new();
        row.insert(n.central_key.clone(), identity.as_str().into());
        row.insert(n.central_role.clone(), role.as_str().into());
        match backend.upsert_row(&n.central_table, row, &n.central_key).await {
            Ok(()) => info!(target: "role", "synced legacy role {} for {} into {}", role, identity, n.central_table),
            Err(e) => warn!(target: "role", "failed to sync legacy role for {}: {}", identity, e),
        }
    }
}
