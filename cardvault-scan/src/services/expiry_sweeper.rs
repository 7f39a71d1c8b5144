//! Background removal of expired batches and unclaimed collections
//!
//! Reads already hide expired rows; the sweeper only keeps storage bounded.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::db::retry_on_lock;
use crate::services::batch_aggregator::BatchAggregator;
use crate::services::collection_store::CollectionStore;

const MAX_LOCK_WAIT_MS: u64 = 5000;

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub batches: u64,
    pub collections: u64,
}

pub struct ExpirySweeper {
    batches: Arc<BatchAggregator>,
    collections: Arc<CollectionStore>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        batches: Arc<BatchAggregator>,
        collections: Arc<CollectionStore>,
        interval: Duration,
    ) -> Self {
        Self {
            batches,
            collections,
            interval,
        }
    }

    /// Run one sweep; failures are logged and counted as zero
    pub async fn sweep_once(&self) -> SweepReport {
        let batches = retry_on_lock("sweep_batches", MAX_LOCK_WAIT_MS, || self.batches.purge_expired())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Expired batch sweep failed");
                0
            });

        let collections =
            retry_on_lock("sweep_collections", MAX_LOCK_WAIT_MS, || self.collections.purge_expired())
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Expired collection sweep failed");
                    0
                });

        let report = SweepReport { batches, collections };
        if report != SweepReport::default() {
            tracing::info!(
                batches = report.batches,
                collections = report.collections,
                "Expired records removed"
            );
        }
        report
    }

    /// Sweep every `interval` until the returned task is aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::services::batch_aggregator::BatchLifetimes;
    use cardvault_common::{CardEntry, ManualClock, UserId};
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_sweep_removes_only_expired_records() {
        let pool = init_memory_pool().await.unwrap();
        let clock = ManualClock::default();
        let batches = Arc::new(BatchAggregator::new(
            pool.clone(),
            Arc::new(clock.clone()),
            BatchLifetimes::default(),
        ));
        let collections = Arc::new(CollectionStore::new(
            pool,
            Arc::new(clock.clone()),
            batches.clone(),
            ChronoDuration::hours(24),
        ));
        let alice = UserId::new("alice");

        batches
            .append_batch("anon", None, vec![CardEntry::new("Raigeki", "Spell Card")])
            .await
            .unwrap();
        batches
            .append_batch("owned", Some(&alice), vec![CardEntry::new("Raigeki", "Spell Card")])
            .await
            .unwrap();
        collections.create(None, "Anonymous", "", vec![]).await.unwrap();
        collections.create(Some(&alice), "Owned", "", vec![]).await.unwrap();

        let sweeper = ExpirySweeper::new(batches.clone(), collections.clone(), Duration::from_secs(60));
        assert_eq!(sweeper.sweep_once().await, SweepReport::default());

        clock.advance(ChronoDuration::hours(6));
        assert_eq!(
            sweeper.sweep_once().await,
            SweepReport { batches: 1, collections: 0 }
        );

        clock.advance(ChronoDuration::hours(20));
        assert_eq!(
            sweeper.sweep_once().await,
            SweepReport { batches: 1, collections: 1 }
        );
        assert_eq!(collections.list(&alice).await.unwrap().len(), 1);
    }
}
