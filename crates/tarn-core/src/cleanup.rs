//! Side channel for failures during cleanup.
//!
//! Cleanup runs on every exit path, so its errors must never mask the
//! primary outcome. They are collected here and logged.

use std::fmt::Display;

use tracing::warn;

#[derive(Debug, Default)]
pub struct CleanupReport {
    failures: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one cleanup step.
    pub fn record<E: Display>(&mut self, step: impl Into<String>, result: Result<(), E>) {
        if let Err(e) = result {
            self.failures.push((step.into(), e.to_string()));
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[(String, String)] {
        &self.failures
    }

    pub fn log(&self) {
        for (step, error) in &self.failures {
            warn!("Cleanup step '{}' failed: {}", step, error);
        }
    }
}
