use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::resolver::RoleResolver;
use crate::backend::{AuthEvent, BackendConnector};

/// Follows the backend's auth change feed. Each sign-in triggers a background resolution
/// so a legacy-only role is copied into the central mapping before the first page visit.
pub fn spawn_role_warmup(connector: Arc<dyn BackendConnector>, resolver: Arc<RoleResolver>) -> JoinHandle<()> {
    let mut events = connector.connect(None).on_auth_state_change();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AuthEvent::SignedIn(session)) => {
                    let client = connector.connect(Some(&session.access_token));
                    let resolver = resolver.clone();
                    tokio::spawn(async move {
                        let report = resolver.resolve(client.as_ref(), &session.identity).await;
                        debug!(target: "auth", "warmup for {}: {:?}", session.identity, report);
                    });
                }
                Ok(AuthEvent::SignedOut(identity)) => info!(target: "auth", "signed out {}", identity),
                Err(RecvError::Lagged(n)) => warn!(target: "auth", "auth feed lagged, skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
