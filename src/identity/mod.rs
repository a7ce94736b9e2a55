//! Identity, role resolution and session guards.
//! Keep the public surface thin and split implementation across sub-modules.

mod guard;
mod mount;
mod principal;
mod redirector;
mod resolver;
mod role;
mod session;
mod view;
mod watcher;

pub use guard::{GuardState, RouteGuard};
pub use mount::Liveness;
pub use principal::Identity;
pub use redirector::DashboardRedirector;
pub use resolver::{BackendNames, Resolution, ResolutionReport, RetryPolicy, RoleResolver, RoleSource};
pub use role::{Role, UnknownRole};
pub use session::current_identity;
pub use view::{Navigator, RecordingNavigator, View};
pub use watcher::spawn_role_warmup;
