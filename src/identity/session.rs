use tracing::warn;

use super::principal::Identity;
use crate::backend::BackendClient;

/// Session accessor: the identity behind the client's token, or `None`.
/// A failed session lookup is logged and reported as signed out.
pub async fn current_identity(backend: &dyn BackendClient) -> Option<Identity> {
    match backend.get_session().await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(target: "auth", "session lookup failed, treating as signed out: {}", e);
            None
        }
    }
}
