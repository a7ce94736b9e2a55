//! Route guard: admits a signed-in user whose role is on the page's allow-list, otherwise
//! redirects exactly once. Reads the central mapping directly (no retry, no legacy fallback).

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::mount::Liveness;
use super::principal::Identity;
use super::resolver::BackendNames;
use super::role::Role;
use super::session::current_identity;
use super::view::{Navigator, View};
use crate::backend::{text_field, BackendClient, RowFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Checking,
    Allowed(Role),
    DeniedRedirected(View),
    UnauthenticatedRedirected,
}

impl GuardState {
    pub fn is_terminal(&self) -> bool { !matches!(self, GuardState::Checking) }

    pub fn redirect_target(&self) -> Option<View> {
        match self {
            GuardState::DeniedRedirected(v) => Some(*v),
            GuardState::UnauthenticatedRedirected => Some(View::Login),
            _ => None,
        }
    }
}

/// One mount of a guarded page. A new mount starts over in `Checking`.
pub struct RouteGuard {
    allow: Vec<Role>,
    names: BackendNames,
    state: Mutex<GuardState>,
    liveness: Liveness,
}

impl RouteGuard {
    pub fn new(allow: &[Role], names: BackendNames) -> Self {
        Self { allow: allow.to_vec(), names, state: Mutex::new(GuardState::Checking), liveness: Liveness::default() }
    }

    pub fn state(&self) -> GuardState { *self.state.lock() }

    pub fn allows(&self, role: Role) -> bool { self.allow.contains(&role) }

    pub fn unmount(&self) { self.liveness.unmount(); }

    /// Runs the check once; later calls return the settled state without side effects.
    pub async fn check(&self, backend: &dyn BackendClient, nav: &dyn Navigator) -> GuardState {
        let current = self.state();
        if current.is_terminal() {
            return current;
        }
        let next = match current_identity(backend).await {
            None => GuardState::UnauthenticatedRedirected,
            Some(identity) => {
                let found = self.read_role(backend, &identity).await;
                let effective = found.unwrap_or(Role::Staff);
                if self.allows(effective) {
                    GuardState::Allowed(effective)
                } else {
                    debug!(target: "guard", "{} with role {} not admitted (allow={:?})", identity, effective, self.allow);
                    GuardState::DeniedRedirected(Role::denied_fallback(found))
                }
            }
        };
        self.settle(next, nav)
    }

    async fn read_role(&self, backend: &dyn BackendClient, identity: &Identity) -> Option<Role> {
        let n = &self.names;
        let filter = RowFilter::eq(n.central_key.clone(), identity.as_str());
        match backend.read_row(&n.central_table, &filter).await {
            Ok(row) => row.as_ref().and_then(|r| text_field(r, &n.central_role)).and_then(|s| s.parse().ok()),
            Err(e) => {
                warn!(target: "guard", "role read failed for {}: {}", identity, e);
                None
            }
        }
    }

    fn settle(&self, next: GuardState, nav: &dyn Navigator) -> GuardState {
        if !self.liveness.is_alive() {
            debug!(target: "guard", "unmounted before check finished; dropping {:?}", next);
            return self.state();
        }
        let mut state = self.state.lock();
        if state.is_terminal() {
            return *state;
        }
        *state = next;
        if let Some(view) = next.redirect_target() {
            nav.redirect(view);
        }
        next
    }
}
