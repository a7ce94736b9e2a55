use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness flag of a mounted component. Late async results check it before touching state.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Default for Liveness {
    fn default() -> Self { Self(Arc::new(AtomicBool::new(true))) }
}

impl Liveness {
    pub fn is_alive(&self) -> bool { self.0.load(Ordering::Acquire) }

    pub fn unmount(&self) { self.0.store(false, Ordering::Release); }
}
