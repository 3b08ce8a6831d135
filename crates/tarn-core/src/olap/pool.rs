//! Bounded access to the engine for metadata and analytical work.
//!
//! Two independent limiters keep introspection from starving behind
//! analytical load: a small FIFO one for metadata queries and a priority
//! ordered one for OLAP queries. Long-running statements also take a slot
//! from a third limiter before queueing for an OLAP slot.
//!
//! A connection bound with [`ConnectionPool::with_connection`] is visible to
//! everything awaited inside that scope; nested acquisitions reuse it rather
//! than taking another slot.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::priority::{PriorityPermit, PrioritySemaphore};
use crate::error::OlapError;

tokio::task_local! {
    static CURRENT_CONN: ();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Meta,
    Olap,
    /// Reuses the connection already bound to the current task.
    Ambient,
}

/// A held connection slot. Dropping it releases every permit it holds.
#[derive(Debug)]
pub struct Conn {
    kind: ConnKind,
    wait: Duration,
    _meta: Option<OwnedSemaphorePermit>,
    _olap: Option<PriorityPermit>,
    _long_running: Option<OwnedSemaphorePermit>,
}

impl Conn {
    pub fn kind(&self) -> ConnKind {
        self.kind
    }

    /// Time spent queueing for this connection.
    pub fn wait(&self) -> Duration {
        self.wait
    }

    fn ambient() -> Self {
        Self {
            kind: ConnKind::Ambient,
            wait: Duration::ZERO,
            _meta: None,
            _olap: None,
            _long_running: None,
        }
    }
}

pub struct ConnectionPool {
    meta: Arc<Semaphore>,
    olap: Arc<PrioritySemaphore>,
    long_running: Option<Arc<Semaphore>>,
}

impl ConnectionPool {
    /// `long_running_slots == 0` disables the long-running limiter.
    pub fn new(meta_slots: usize, olap_slots: usize, long_running_slots: usize) -> Self {
        Self {
            meta: Arc::new(Semaphore::new(meta_slots)),
            olap: Arc::new(PrioritySemaphore::new(olap_slots)),
            long_running: (long_running_slots > 0)
                .then(|| Arc::new(Semaphore::new(long_running_slots))),
        }
    }

    /// Whether the current task already holds a bound connection.
    pub fn in_scope() -> bool {
        CURRENT_CONN.try_with(|_| ()).is_ok()
    }

    pub async fn acquire_meta_conn(&self) -> Result<Conn, OlapError> {
        if Self::in_scope() {
            return Ok(Conn::ambient());
        }
        let start = Instant::now();
        let permit = Arc::clone(&self.meta)
            .acquire_owned()
            .await
            .map_err(|_| OlapError::Closed)?;
        Ok(Conn {
            kind: ConnKind::Meta,
            wait: start.elapsed(),
            _meta: Some(permit),
            _olap: None,
            _long_running: None,
        })
    }

    pub async fn acquire_olap_conn(
        &self,
        priority: i32,
        long_running: bool,
    ) -> Result<Conn, OlapError> {
        if Self::in_scope() {
            return Ok(Conn::ambient());
        }
        let start = Instant::now();
        let long = match (&self.long_running, long_running) {
            (Some(sem), true) => Some(
                Arc::clone(sem)
                    .acquire_owned()
                    .await
                    .map_err(|_| OlapError::Closed)?,
            ),
            _ => None,
        };
        let permit = self.olap.acquire(priority).await;
        Ok(Conn {
            kind: ConnKind::Olap,
            wait: start.elapsed(),
            _meta: None,
            _olap: Some(permit),
            _long_running: long,
        })
    }

    /// Run `fut` with an OLAP connection bound to the current task.
    pub async fn with_connection<F, T>(
        &self,
        priority: i32,
        long_running: bool,
        fut: F,
    ) -> Result<T, OlapError>
    where
        F: Future<Output = T>,
    {
        if Self::in_scope() {
            return Ok(fut.await);
        }
        let conn = self.acquire_olap_conn(priority, long_running).await?;
        let out = CURRENT_CONN.scope((), fut).await;
        drop(conn);
        Ok(out)
    }

    pub fn olap_available(&self) -> usize {
        self.olap.available()
    }

    pub fn meta_available(&self) -> usize {
        self.meta.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn meta_and_olap_limits_are_independent() {
        let pool = ConnectionPool::new(1, 1, 0);
        let _olap = pool.acquire_olap_conn(0, false).await.unwrap();
        let meta = tokio::time::timeout(Duration::from_millis(100), pool.acquire_meta_conn())
            .await
            .expect("meta must not wait on olap")
            .unwrap();
        assert_eq!(meta.kind(), ConnKind::Meta);
    }

    #[tokio::test]
    async fn nested_acquisition_reuses_bound_connection() {
        let pool = Arc::new(ConnectionPool::new(1, 1, 0));
        let inner = Arc::clone(&pool);
        let kinds = pool
            .with_connection(0, false, async move {
                // With a single slot, a real acquisition here would deadlock.
                let a = inner.acquire_olap_conn(0, false).await.unwrap();
                let b = inner.acquire_meta_conn().await.unwrap();
                let nested = inner
                    .with_connection(0, false, async { ConnectionPool::in_scope() })
                    .await
                    .unwrap();
                (a.kind(), b.kind(), nested)
            })
            .await
            .unwrap();
        assert_eq!(kinds, (ConnKind::Ambient, ConnKind::Ambient, true));
        assert_eq!(pool.olap_available(), 1);
        assert!(!ConnectionPool::in_scope());
    }

    #[tokio::test]
    async fn slot_released_on_drop() {
        let pool = ConnectionPool::new(1, 2, 0);
        {
            let _a = pool.acquire_olap_conn(0, false).await.unwrap();
            let _b = pool.acquire_olap_conn(0, false).await.unwrap();
            assert_eq!(pool.olap_available(), 0);
        }
        assert_eq!(pool.olap_available(), 2);
    }

    #[tokio::test]
    async fn long_running_statements_are_limited_separately() {
        let pool = Arc::new(ConnectionPool::new(1, 4, 1));
        let first = pool.acquire_olap_conn(0, true).await.unwrap();

        let p = Arc::clone(&pool);
        let second = tokio::spawn(async move { p.acquire_olap_conn(0, true).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        // Short statements still get through.
        let _short = pool.acquire_olap_conn(0, false).await.unwrap();

        drop(first);
        let conn = second.await.unwrap().unwrap();
        assert_eq!(conn.kind(), ConnKind::Olap);
    }

    #[tokio::test]
    async fn panicking_scope_releases_slot() {
        let pool = Arc::new(ConnectionPool::new(1, 1, 0));
        let p = Arc::clone(&pool);
        let res = tokio::spawn(async move {
            p.with_connection(0, false, async { panic!("boom") })
                .await
                .map(|()| ())
        })
        .await;
        assert!(res.is_err());
        assert_eq!(pool.olap_available(), 1);
    }
}
