use dashmap::DashMap;
use singura_core::Uuid;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-connection refresh serialization.
///
/// Callers acquire the connection's guard before deciding whether to hit
/// the upstream token endpoint, and re-read the store once they hold it.
/// In a burst of K concurrent callers on an expired credential the first
/// holder performs the refresh and persists; the remaining K-1 observe the
/// fresh credentials under the lock and return without an upstream call.
/// Only refresh attempts on the same connection contend; everything else
/// proceeds untouched.
#[derive(Default)]
pub struct RefreshFlights {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl RefreshFlights {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, connection_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(connection_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
