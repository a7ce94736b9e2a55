use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::mount::Liveness;
use super::resolver::RoleResolver;
use super::session::current_identity;
use super::view::{Navigator, View};
use crate::backend::BackendClient;

/// Post-login router: resolves the role and sends the user to that role's dashboard.
///
/// Dispatch happens at most once per instance. Overlapping calls (a re-render while the first
/// resolution is still in flight) return `None` without navigating.
pub struct DashboardRedirector {
    resolver: Arc<RoleResolver>,
    dispatched: AtomicBool,
    liveness: Liveness,
}

impl DashboardRedirector {
    pub fn new(resolver: Arc<RoleResolver>) -> Self {
        Self { resolver, dispatched: AtomicBool::new(false), liveness: Liveness::default() }
    }

    pub fn has_dispatched(&self) -> bool { self.dispatched.load(Ordering::Acquire) }

    pub fn unmount(&self) { self.liveness.unmount(); }

    /// Returns the view navigated to, or `None` when this call did not navigate.
    pub async fn dispatch(&self, backend: &dyn BackendClient, nav: &dyn Navigator) -> Option<View> {
        if self.dispatched.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            debug!(target: "role", "dashboard dispatch already claimed");
            return None;
        }
        let target = match current_identity(backend).await {
            None => View::Login,
            Some(identity) => {
                let report = self.resolver.resolve(backend, &identity).await;
                match report.role() {
                    Some(role) => {
                        info!(target: "role", "dashboard for {}: role={} attempts={}", identity, role, report.attempts);
                        role.dashboard_view()
                    }
                    None => View::Login,
                }
            }
        };
        if !self.liveness.is_alive() {
            debug!(target: "role", "unmounted before dispatch; dropping redirect to {}", target.path());
            return None;
        }
        nav.redirect(target);
        Some(target)
    }
}
