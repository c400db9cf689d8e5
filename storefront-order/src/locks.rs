use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-order async mutexes.
///
/// Callers working on the same order queue behind one another; different
/// orders never contend. Entries are dropped once nobody holds or waits on
/// them, so the registry does not grow with the order table.
#[derive(Clone, Default)]
pub struct OrderLocks {
    inner: Arc<Mutex<HashMap<Uuid, Weak<AsyncMutex<()>>>>>,
}

/// Held for the duration of one coordinator operation.
pub struct OrderGuard {
    order_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl OrderGuard {
    pub fn order_id(&self) -> Uuid {
        self.order_id
    }
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, order_id: Uuid) -> OrderGuard {
        let lock = {
            let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            registry.retain(|_, weak| weak.strong_count() > 0);
            match registry.get(&order_id).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    registry.insert(order_id, Arc::downgrade(&lock));
                    lock
                }
            }
        };

        OrderGuard {
            order_id,
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of orders currently locked or awaited.
    pub fn tracked(&self) -> usize {
        let registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        registry.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
