//! Fixed-capacity connection pool.
//!
//! The pool eagerly opens exactly `capacity` connections and then only lends
//! and reclaims them; it never opens a connection on demand.
//!
//! # Concurrency Safety
//!
//! - Idle/checked-out accounting lives behind one `std::sync::Mutex` that is
//!   never held across an await point.
//! - A `tokio::sync::Semaphore` carries one permit per idle connection. A
//!   caller must take a permit before popping from the idle set, so the idle
//!   set is never popped when empty and waiters are woken in FIFO order.
//! - Every connection is in exactly one of `idle` or `checked_out`; the sum of
//!   both is `capacity` minus the connections thrown away with
//!   [`PooledConnection::discard`].
//!
//! # Drop Behavior
//!
//! A [`PooledConnection`] dropped without [`ConnectionPool::release`] still
//! goes back to the pool it came from. Explicit release is preferred because
//! it reports [`DbError::InvalidRelease`] for foreign connections.

use crate::error::{DbError, DbResult};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// Default pool capacity.
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Default time `acquire` waits for an idle connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of the pool's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub capacity: usize,
    pub idle: usize,
    pub checked_out: usize,
    /// Connections taken out of service for good.
    pub discarded: usize,
}

struct Slot<C> {
    id: usize,
    conn: C,
}

struct PoolState<C> {
    idle: VecDeque<Slot<C>>,
    checked_out: HashSet<usize>,
    discarded: usize,
    closed: bool,
}

struct PoolInner<C> {
    id: u64,
    capacity: usize,
    acquire_timeout: Duration,
    state: Mutex<PoolState<C>>,
    /// One permit per idle connection.
    available: Semaphore,
}

impl<C> PoolInner<C> {
    fn state(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a connection from `checked_out` back to `idle`.
    fn put_back(&self, slot: usize, conn: C) {
        {
            let mut state = self.state();
            if !state.checked_out.remove(&slot) {
                warn!(pool = self.id, slot, "Returned slot was not checked out");
            }
            if state.closed {
                debug!(pool = self.id, slot, "Pool closed, discarding returned connection");
                return;
            }
            state.idle.push_back(Slot { id: slot, conn });
        }
        self.available.add_permits(1);
    }

    /// Drop a checked-out slot from the accounting without returning it.
    fn forget(&self, slot: usize) {
        let mut state = self.state();
        state.checked_out.remove(&slot);
        state.discarded += 1;
    }
}

/// A bounded set of live connections lent to one caller at a time.
pub struct ConnectionPool<C> {
    inner: Arc<PoolInner<C>>,
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("acquire_timeout", &self.inner.acquire_timeout)
            .finish()
    }
}

impl<C> ConnectionPool<C> {
    /// Open a pool by calling `connect` once per slot.
    ///
    /// Fails without building a pool if any single connect fails; connections
    /// opened before the failure are dropped.
    pub async fn open<F, Fut>(
        capacity: usize,
        acquire_timeout: Duration,
        mut connect: F,
    ) -> DbResult<Self>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = DbResult<C>>,
    {
        if capacity == 0 {
            return Err(DbError::config("pool capacity must be greater than 0"));
        }

        let mut connections = Vec::with_capacity(capacity);
        for slot in 0..capacity {
            match connect(slot).await {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    warn!(
                        slot,
                        capacity,
                        error = %e,
                        "Failed to open pooled connection, abandoning pool"
                    );
                    return Err(e);
                }
            }
        }

        Ok(Self::from_connections(connections, acquire_timeout))
    }

    /// Build a pool around already open connections.
    pub fn from_connections(connections: Vec<C>, acquire_timeout: Duration) -> Self {
        let capacity = connections.len();
        let idle = connections
            .into_iter()
            .enumerate()
            .map(|(id, conn)| Slot { id, conn })
            .collect();
        let inner = PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            acquire_timeout,
            state: Mutex::new(PoolState {
                idle,
                checked_out: HashSet::with_capacity(capacity),
                discarded: 0,
                closed: false,
            }),
            available: Semaphore::new(capacity),
        };

        info!(pool = inner.id, capacity, "Connection pool opened");
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Borrow an idle connection, waiting up to the acquire timeout.
    ///
    /// Fails with [`DbError::PoolExhausted`] if no connection was returned in
    /// time, or [`DbError::PoolClosed`] once the pool is closed.
    pub async fn acquire(&self) -> DbResult<PooledConnection<C>> {
        let start = Instant::now();
        match tokio::time::timeout(self.inner.acquire_timeout, self.inner.available.acquire())
            .await
        {
            Ok(Ok(permit)) => permit.forget(),
            Ok(Err(_)) => return Err(DbError::PoolClosed),
            Err(_) => {
                let waited_ms = start.elapsed().as_millis() as u64;
                warn!(
                    pool = self.inner.id,
                    capacity = self.inner.capacity,
                    waited_ms,
                    "Connection pool exhausted"
                );
                return Err(DbError::pool_exhausted(self.inner.capacity, waited_ms));
            }
        }
        self.checkout()
    }

    /// Borrow an idle connection without waiting.
    pub fn try_acquire(&self) -> DbResult<PooledConnection<C>> {
        match self.inner.available.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => {
                return Err(DbError::pool_exhausted(self.inner.capacity, 0));
            }
            Err(TryAcquireError::Closed) => return Err(DbError::PoolClosed),
        }
        self.checkout()
    }

    /// Pop an idle connection. Caller must already hold a (forgotten) permit.
    fn checkout(&self) -> DbResult<PooledConnection<C>> {
        let mut state = self.inner.state();
        let slot = state.idle.pop_front().ok_or(DbError::PoolClosed)?;
        state.checked_out.insert(slot.id);
        debug!(
            pool = self.inner.id,
            slot = slot.id,
            checked_out = state.checked_out.len(),
            "Connection checked out"
        );
        Ok(PooledConnection {
            slot: slot.id,
            conn: Some(slot.conn),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Return a connection to this pool.
    ///
    /// A connection borrowed from another pool is rejected with
    /// [`DbError::InvalidRelease`] and goes back to the pool it came from.
    pub fn release(&self, mut conn: PooledConnection<C>) -> DbResult<()> {
        if !Arc::ptr_eq(&conn.pool, &self.inner) {
            let err = DbError::InvalidRelease {
                origin_pool: conn.pool.id,
                target_pool: self.inner.id,
            };
            warn!(error = %err, "Rejected foreign connection");
            return Err(err);
        }
        conn.return_to_pool();
        Ok(())
    }

    /// Current accounting snapshot.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        PoolStatus {
            capacity: self.inner.capacity,
            idle: state.idle.len(),
            checked_out: state.checked_out.len(),
            discarded: state.discarded,
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of idle connections.
    pub fn size(&self) -> usize {
        self.inner.state().idle.len()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }

    /// Close the pool and hand back its idle connections for shutdown.
    ///
    /// Connections still checked out are discarded when they come back.
    pub fn close(&self) -> Vec<C> {
        let drained: Vec<C> = {
            let mut state = self.inner.state();
            state.closed = true;
            state.idle.drain(..).map(|slot| slot.conn).collect()
        };
        self.inner.available.close();
        info!(
            pool = self.inner.id,
            drained = drained.len(),
            "Connection pool closed"
        );
        drained
    }
}

/// A connection lent out by a [`ConnectionPool`].
pub struct PooledConnection<C> {
    slot: usize,
    conn: Option<C>,
    pool: Arc<PoolInner<C>>,
}

impl<C> PooledConnection<C> {
    /// Slot index inside the originating pool.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Id of the originating pool.
    pub fn pool_id(&self) -> u64 {
        self.pool.id
    }

    /// Close this connection out of the pool instead of returning it, for a
    /// connection whose session state can no longer be trusted. The pool
    /// runs one connection short afterwards.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.forget(self.slot);
            warn!(pool = self.pool.id, slot = self.slot, "Connection discarded");
            drop(conn);
        }
    }

    fn return_to_pool(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(self.slot, conn);
            debug!(pool = self.pool.id, slot = self.slot, "Connection released");
        }
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // Only empty after return_to_pool, which consumes the handle.
        self.conn.as_ref().expect("pooled connection already returned")
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("pooled connection already returned")
    }
}

impl<C> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.id)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn numbered_pool(capacity: usize) -> ConnectionPool<usize> {
        ConnectionPool::open(capacity, Duration::from_millis(50), |slot| async move {
            Ok(slot)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_fills_to_capacity() {
        let pool = numbered_pool(4).await;
        assert_eq!(
            pool.status(),
            PoolStatus {
                capacity: 4,
                idle: 4,
                checked_out: 0,
                discarded: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_open_zero_capacity_rejected() {
        let result = ConnectionPool::open(0, DEFAULT_ACQUIRE_TIMEOUT, |slot| async move {
            Ok::<_, DbError>(slot)
        })
        .await;
        assert!(matches!(result, Err(DbError::Config { .. })));
    }

    #[tokio::test]
    async fn test_open_failure_builds_no_pool() {
        let result = ConnectionPool::open(5, DEFAULT_ACQUIRE_TIMEOUT, |slot| async move {
            if slot == 3 {
                Err(DbError::connection("refused", "start the server"))
            } else {
                Ok(slot)
            }
        })
        .await;
        assert!(matches!(result, Err(DbError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_acquire_and_release_roundtrip() {
        let pool = numbered_pool(2).await;
        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.status().checked_out, 1);
        assert_eq!(pool.size(), 1);
        assert_eq!(*conn, conn.slot());

        pool.release(conn).unwrap();
        assert_eq!(pool.status().checked_out, 0);
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test]
    async fn test_try_acquire_exhausted() {
        let pool = numbered_pool(1).await;
        let held = pool.try_acquire().unwrap();
        let result = pool.try_acquire();
        assert!(matches!(
            result,
            Err(DbError::PoolExhausted { capacity: 1, .. })
        ));
        pool.release(held).unwrap();
        assert!(pool.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = numbered_pool(1).await;
        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(DbError::PoolExhausted { .. })));
        assert_eq!(pool.status().checked_out, 1);
    }

    #[tokio::test]
    async fn test_waiting_acquire_wakes_on_release() {
        let pool = ConnectionPool::open(1, Duration::from_secs(5), |slot| async move {
            Ok::<_, DbError>(slot)
        })
        .await
        .unwrap();
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| c.slot()) })
        };
        tokio::task::yield_now().await;
        pool.release(held).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_to_foreign_pool_rejected() {
        let a = numbered_pool(1).await;
        let b = numbered_pool(1).await;

        let conn = a.acquire().await.unwrap();
        let result = b.release(conn);
        assert!(matches!(result, Err(DbError::InvalidRelease { .. })));

        // The rejected connection went home, and b was untouched.
        assert_eq!(a.status().idle, 1);
        assert_eq!(a.status().checked_out, 0);
        assert_eq!(b.status().idle, 1);
    }

    #[tokio::test]
    async fn test_drop_returns_connection() {
        let pool = numbered_pool(1).await;
        {
            let _conn = pool.acquire().await.unwrap();
            assert_eq!(pool.size(), 0);
        }
        assert_eq!(pool.size(), 1);
        assert!(pool.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_close_drains_idle_and_rejects_acquire() {
        let pool = numbered_pool(3).await;
        let held = pool.acquire().await.unwrap();

        let drained = pool.close();
        assert_eq!(drained.len(), 2);
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire().await, Err(DbError::PoolClosed)));

        drop(held);
        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().checked_out, 0);
    }

    #[tokio::test]
    async fn test_pool_ids_are_distinct() {
        let a = numbered_pool(1).await;
        let b = numbered_pool(1).await;
        assert_ne!(a.id(), b.id());
        let conn = a.acquire().await.unwrap();
        assert_eq!(conn.pool_id(), a.id());
    }

    #[tokio::test]
    async fn test_discard_shrinks_pool() {
        let pool = numbered_pool(2).await;
        let conn = pool.acquire().await.unwrap();
        conn.discard();

        let status = pool.status();
        assert_eq!(status.checked_out, 0);
        assert_eq!(status.idle, 1);
        assert_eq!(status.discarded, 1);

        let _last = pool.acquire().await.unwrap();
        assert!(matches!(pool.try_acquire(), Err(DbError::PoolExhausted { .. })));
    }

    #[test]
    fn test_debug_for_non_send_connections() {
        let pool = ConnectionPool::from_connections(
            vec![std::rc::Rc::new(1_u8), std::rc::Rc::new(2_u8)],
            DEFAULT_ACQUIRE_TIMEOUT,
        );
        let _held = pool.try_acquire().unwrap();
        let rendered = format!("{pool:?}");
        assert!(rendered.contains("checked_out: 1"));
        assert!(rendered.contains("idle: 1"));
    }
}
