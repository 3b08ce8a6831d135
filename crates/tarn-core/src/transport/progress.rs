use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::iterator::ProgressUnit;

/// Transfer progress shared between a transporter and whoever watches it.
#[derive(Debug, Default)]
pub struct Progress {
    bytes: AtomicU64,
    records: AtomicU64,
    target: Mutex<Option<(u64, ProgressUnit)>>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected total, when the source can tell.
    pub fn set_target(&self, value: u64, unit: ProgressUnit) {
        *self.target.lock().unwrap_or_else(|e| e.into_inner()) = Some((value, unit));
    }

    pub fn target(&self) -> Option<(u64, ProgressUnit)> {
        *self.target.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn observe(&self, amount: u64, unit: ProgressUnit) {
        match unit {
            ProgressUnit::Bytes => self.bytes.fetch_add(amount, Ordering::Relaxed),
            ProgressUnit::Records => self.records.fetch_add(amount, Ordering::Relaxed),
        };
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}
