//! Keeps one migrator per open engine across reconcile passes, so staging
//! table timestamps keep increasing for as long as the engine lives.

use std::sync::Arc;

use tarn_core::OlapEngine;
use tarn_migrator::SourceMigrator;
use tracing::debug;

#[derive(Default)]
pub struct MigratorSlot {
    current: Option<Arc<SourceMigrator>>,
}

impl MigratorSlot {
    /// The migrator bound to `engine`, built with `build` the first time the
    /// engine is seen (or after the previous one was evicted and reopened).
    pub fn get_or_build<F>(&mut self, engine: Arc<OlapEngine>, build: F) -> Arc<SourceMigrator>
    where
        F: FnOnce(Arc<OlapEngine>) -> SourceMigrator,
    {
        if let Some(current) = &self.current {
            if Arc::ptr_eq(current.engine(), &engine) {
                return current.clone();
            }
            debug!("Engine was reopened, building a new migrator");
        }
        let migrator = Arc::new(build(engine));
        self.current = Some(migrator.clone());
        migrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_connectors::default_registry;
    use tarn_core::metrics::noop_sink;
    use tarn_core::OlapConfig;
    use tarn_migrator::MigratorConfig;

    async fn engine() -> Arc<OlapEngine> {
        Arc::new(OlapEngine::open(OlapConfig::default(), noop_sink()).await.unwrap())
    }

    fn build(engine: Arc<OlapEngine>) -> SourceMigrator {
        SourceMigrator::new(
            engine,
            Arc::new(default_registry()),
            MigratorConfig::default(),
            noop_sink(),
        )
    }

    #[tokio::test]
    async fn migrator_survives_passes_on_the_same_engine() {
        let mut slot = MigratorSlot::default();
        let first_engine = engine().await;

        let first = slot.get_or_build(first_engine.clone(), build);
        let again = slot.get_or_build(first_engine.clone(), |_| panic!("rebuilt for the same engine"));
        assert!(Arc::ptr_eq(&first, &again));

        let reopened = engine().await;
        let next = slot.get_or_build(reopened.clone(), build);
        assert!(!Arc::ptr_eq(&first, &next));
        assert!(Arc::ptr_eq(next.engine(), &reopened));
    }
}
