use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::SyncOutcome;
use super::batch::BatchCoordinator;
use crate::error::Result;
use crate::registry::DataSourceRegistry;

/// Periodically syncs every active source whose frequency has elapsed.
#[derive(Clone)]
pub struct DueSyncScheduler {
    registry: DataSourceRegistry,
    batch: BatchCoordinator,
    interval: Duration,
}

impl DueSyncScheduler {
    pub fn new(registry: DataSourceRegistry, batch: BatchCoordinator, interval: Duration) -> Self {
        Self {
            registry,
            batch,
            interval,
        }
    }

    /// One pass: find due sources and sync them.
    pub async fn tick(&self) -> Result<Vec<SyncOutcome>> {
        let due = self.registry.list_active_due(Utc::now().naive_utc()).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<_> = due.iter().map(|ds| ds.id).collect();
        tracing::info!(count = ids.len(), "syncing due data sources");
        Ok(self.batch.sync_many(&ids).await)
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                // a pass in progress is allowed to finish its runs
                match self.tick().await {
                    Ok(outcomes) => {
                        let failed = outcomes.iter().filter(|o| !o.success).count();
                        if failed > 0 {
                            tracing::warn!(failed, total = outcomes.len(), "scheduled syncs failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "due-sync pass failed"),
                }
            }
            tracing::info!("due-sync scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyContext;
    use crate::sync::tests::orchestrator;
    use crate::test_support::{TEST_KEY, create_source, setup_db};
    use crate::tester::ConnectionTester;

    fn scheduler(db: &sea_orm::DatabaseConnection, interval: Duration) -> DueSyncScheduler {
        let registry = DataSourceRegistry::new(db.clone(), TEST_KEY);
        let tester = ConnectionTester::new(
            registry.clone(),
            StrategyContext {
                db: db.clone(),
                http: reqwest::Client::new(),
                connect_timeout: Duration::from_secs(5),
            },
        );
        let batch = BatchCoordinator::new(orchestrator(db), tester, 2);
        DueSyncScheduler::new(registry, batch, interval)
    }

    #[tokio::test]
    async fn test_tick_syncs_only_due_sources() {
        let db = setup_db().await;
        let ds = create_source(&db, "due").await;
        let s = scheduler(&db, Duration::from_secs(60));

        let first = s.tick().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].data_source_id, ds.id);
        assert!(first[0].success);

        // last_sync is now stamped and the frequency is an hour
        assert!(s.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_cancel() {
        let db = setup_db().await;
        let cancel = CancellationToken::new();
        let handle = scheduler(&db, Duration::from_millis(10)).spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
