//! Fan-out of tests and syncs over many data sources on a bounded,
//! call-scoped task group.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::{SyncOptions, SyncOrchestrator, SyncOutcome};
use crate::tester::{ConnectionTestResult, ConnectionTester};

#[derive(Clone)]
pub struct BatchCoordinator {
    orchestrator: SyncOrchestrator,
    tester: ConnectionTester,
    concurrency: usize,
}

impl BatchCoordinator {
    pub fn new(orchestrator: SyncOrchestrator, tester: ConnectionTester, concurrency: usize) -> Self {
        Self {
            orchestrator,
            tester,
            concurrency: concurrency.max(1),
        }
    }

    /// One result per id, in input order.
    pub async fn test_many(&self, ids: &[Uuid]) -> Vec<ConnectionTestResult> {
        let tester = self.tester.clone();
        fan_out(
            ids,
            self.concurrency,
            move |id| {
                let tester = tester.clone();
                async move {
                    tester
                        .test(id)
                        .await
                        .unwrap_or_else(|e| ConnectionTestResult::failed(id, e.to_string()))
                }
            },
            |id, msg| ConnectionTestResult::failed(id, msg),
        )
        .await
    }

    /// One outcome per id, in input order. A bad id never affects its siblings.
    pub async fn sync_many(&self, ids: &[Uuid]) -> Vec<SyncOutcome> {
        let orchestrator = self.orchestrator.clone();
        fan_out(
            ids,
            self.concurrency,
            move |id| {
                let orchestrator = orchestrator.clone();
                async move {
                    orchestrator
                        .run(id, SyncOptions::default())
                        .await
                        .unwrap_or_else(|e| SyncOutcome::rejected(id, e.to_string()))
                }
            },
            |id, msg| SyncOutcome::rejected(id, msg),
        )
        .await
    }
}

/// Run `task` for every id with at most `limit` in flight. A task that
/// panics or is cancelled is reported through `failed`.
async fn fan_out<T, F, Fut>(
    ids: &[Uuid],
    limit: usize,
    task: F,
    failed: impl Fn(Uuid, String) -> T,
) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Uuid) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();

    for (index, &id) in ids.iter().enumerate() {
        let permits = permits.clone();
        let fut = task(id);
        set.spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            (index, fut.await)
        });
    }

    let mut slots: Vec<Option<T>> = ids.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => tracing::error!(error = %e, "batch task did not complete"),
        }
    }

    slots
        .into_iter()
        .zip(ids)
        .map(|(slot, &id)| slot.unwrap_or_else(|| failed(id, "task did not complete".to_string())))
        .collect()
}
