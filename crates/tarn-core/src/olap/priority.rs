//! Counting semaphore that admits waiters by priority.
//!
//! Higher priority values are admitted first; equal priorities are admitted
//! in arrival order. Dropping an acquisition future that is still queued
//! never leaks a permit.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

struct Waiter {
    priority: i32,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State {
    available: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

pub struct PrioritySemaphore {
    state: Mutex<State>,
}

/// Releases its slot when dropped.
pub struct PriorityPermit {
    sem: Arc<PrioritySemaphore>,
}

impl Drop for PriorityPermit {
    fn drop(&mut self) {
        self.sem.release();
    }
}

impl std::fmt::Debug for PriorityPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityPermit").finish()
    }
}

/// A queued acquisition. If dropped before it was granted, a permit that
/// raced in is handed back.
struct Pending<'a> {
    sem: &'a PrioritySemaphore,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.sem.release();
        }
    }
}

impl PrioritySemaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                available: permits,
                next_seq: 0,
                waiters: BinaryHeap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Permits free right now.
    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// Acquisitions currently queued, including ones about to be cancelled.
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    pub async fn acquire(self: &Arc<Self>, priority: i32) -> PriorityPermit {
        loop {
            let rx = {
                let mut st = self.lock();
                if st.available > 0 && st.waiters.is_empty() {
                    st.available -= 1;
                    return PriorityPermit {
                        sem: Arc::clone(self),
                    };
                }
                let (tx, rx) = oneshot::channel();
                let seq = st.next_seq;
                st.next_seq += 1;
                st.waiters.push(Waiter { priority, seq, tx });
                rx
            };

            let mut pending = Pending {
                sem: self,
                rx,
                granted: false,
            };
            if (&mut pending.rx).await.is_ok() {
                pending.granted = true;
                return PriorityPermit {
                    sem: Arc::clone(self),
                };
            }
        }
    }

    fn release(&self) {
        let mut st = self.lock();
        while let Some(waiter) = st.waiters.pop() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        st.available += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn admits_up_to_capacity() {
        let sem = Arc::new(PrioritySemaphore::new(2));
        let a = sem.acquire(0).await;
        let _b = sem.acquire(0).await;
        assert_eq!(sem.available(), 0);

        let sem2 = Arc::clone(&sem);
        let waiter = tokio::spawn(async move { sem2.acquire(0).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(a);
        let _c = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sem.available(), 0);
    }

    #[tokio::test]
    async fn higher_priority_first_then_fifo() {
        let sem = Arc::new(PrioritySemaphore::new(1));
        let held = sem.acquire(0).await;
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (label, prio) in [("low", 0), ("high-1", 10), ("mid", 5), ("high-2", 10)] {
            let sem = Arc::clone(&sem);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _p = sem.acquire(prio).await;
                order.lock().unwrap().push(label);
            }));
            // Fix arrival order.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sem.queued(), 4);

        drop(held);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(
            *order.lock().unwrap(),
            vec!["high-1", "high-2", "mid", "low"]
        );
        assert_eq!(sem.available(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_permit() {
        let sem = Arc::new(PrioritySemaphore::new(1));
        let held = sem.acquire(0).await;

        let cancelled = tokio::time::timeout(Duration::from_millis(20), sem.acquire(5)).await;
        assert!(cancelled.is_err());

        drop(held);
        assert_eq!(sem.available(), 1);
        let _again = sem.acquire(0).await;
        assert_eq!(sem.available(), 0);
    }
}
