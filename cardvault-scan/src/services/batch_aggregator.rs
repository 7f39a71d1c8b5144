//! Batch aggregator
//!
//! Accumulates verified cards into one expiring batch per
//! `batch_group_id`. Appends to the same group are serialized (in-process
//! keyed mutex plus a SQLite transaction), so concurrent uploads never lose
//! cards. Expiry is checked on every read against the injected [`Clock`];
//! the background sweeper only reclaims storage.
//!
//! Ownership is exact: `None` only sees anonymous batches, a user only sees
//! their own. Anything else is reported as not found.

use cardvault_common::{Batch, CardEntry, Clock, Error, Result, UserId};
use chrono::Duration;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::db::{batches, begin_write};
use crate::services::keyed_lock::KeyedLocks;

/// Batch lifetimes, fixed at creation
#[derive(Debug, Clone, Copy)]
pub struct BatchLifetimes {
    pub anonymous: Duration,
    pub owned: Duration,
}

impl Default for BatchLifetimes {
    fn default() -> Self {
        Self {
            anonymous: Duration::hours(5),
            owned: Duration::hours(24),
        }
    }
}

impl BatchLifetimes {
    fn for_owner(&self, user_id: Option<&UserId>) -> Duration {
        match user_id {
            Some(_) => self.owned,
            None => self.anonymous,
        }
    }
}

/// A live batch removed from its group, not yet committed
///
/// The group stays locked and the removal stays invisible until
/// [`ConsumedBatch::commit`]. Dropping it rolls the removal back.
pub struct ConsumedBatch {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
    pub batch: Option<Batch>,
}

impl ConsumedBatch {
    /// Connection inside the removal's transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

pub struct BatchAggregator {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    lifetimes: BatchLifetimes,
    locks: KeyedLocks,
}

impl BatchAggregator {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>, lifetimes: BatchLifetimes) -> Self {
        Self {
            db,
            clock,
            lifetimes,
            locks: KeyedLocks::new(),
        }
    }

    /// Append cards to the group's live batch, creating it when absent
    ///
    /// Returns the stored batch and whether it was created by this call.
    pub async fn append_batch(
        &self,
        batch_group_id: &str,
        user_id: Option<&UserId>,
        cards: Vec<CardEntry>,
    ) -> Result<(Batch, bool)> {
        let batch_group_id = validate_group_id(batch_group_id)?;
        let _guard = self.locks.lock(batch_group_id).await;
        let now = self.clock.now();

        let mut tx = begin_write(&self.db).await?;

        let live = self.take_live_batch(&mut tx, batch_group_id).await?;

        let (batch, created) = match live {
            Some(mut batch) => {
                if !batch.is_owned_by(user_id) {
                    return Err(not_found(batch_group_id));
                }
                batch.cards.extend(cards);
                batches::update_cards(&mut tx, batch.id, &batch.cards).await?;
                (batch, false)
            }
            None => {
                let batch = Batch::new(
                    batch_group_id,
                    user_id.cloned(),
                    cards,
                    now,
                    self.lifetimes.for_owner(user_id),
                );
                batches::insert_batch(&mut tx, &batch).await?;
                (batch, true)
            }
        };

        tx.commit().await?;

        tracing::info!(
            batch_group_id = %batch_group_id,
            batch_id = %batch.id,
            created,
            total_cards = batch.cards.len(),
            "Batch updated"
        );

        Ok((batch, created))
    }

    /// Fail with not found when the group's live batch belongs to someone else
    ///
    /// Lets callers skip expensive work for an append that would be rejected.
    /// [`append_batch`](Self::append_batch) repeats the check under the lock.
    pub async fn check_appendable(&self, batch_group_id: &str, user_id: Option<&UserId>) -> Result<()> {
        let batch_group_id = validate_group_id(batch_group_id)?;
        let now = self.clock.now();
        let mut conn = self.db.acquire().await?;

        let live = batches::find_by_group(&mut conn, batch_group_id)
            .await?
            .into_iter()
            .find(|batch| !batch.is_expired(now));

        match live {
            Some(batch) if !batch.is_owned_by(user_id) => Err(not_found(batch_group_id)),
            _ => Ok(()),
        }
    }

    /// Remove the card at `index` from the caller's live batch
    pub async fn remove_card_at(
        &self,
        batch_group_id: &str,
        user_id: Option<&UserId>,
        index: usize,
    ) -> Result<Batch> {
        let batch_group_id = validate_group_id(batch_group_id)?;
        let _guard = self.locks.lock(batch_group_id).await;

        let mut tx = begin_write(&self.db).await?;

        let mut batch = self
            .take_live_batch(&mut tx, batch_group_id)
            .await?
            .filter(|batch| batch.is_owned_by(user_id))
            .ok_or_else(|| not_found(batch_group_id))?;

        let removed = batch.remove_card_at(index)?;
        batches::update_cards(&mut tx, batch.id, &batch.cards).await?;

        tx.commit().await?;

        tracing::info!(
            batch_group_id = %batch_group_id,
            index,
            card = %removed.name,
            remaining = batch.cards.len(),
            "Card removed from batch"
        );

        Ok(batch)
    }

    /// Live batches of the group visible to the caller, oldest first
    pub async fn list_by_group(
        &self,
        batch_group_id: &str,
        user_id: Option<&UserId>,
    ) -> Result<Vec<Batch>> {
        let batch_group_id = validate_group_id(batch_group_id)?;
        let now = self.clock.now();
        let mut conn = self.db.acquire().await?;

        let visible = batches::find_by_group(&mut conn, batch_group_id)
            .await?
            .into_iter()
            .filter(|batch| !batch.is_expired(now) && batch.is_owned_by(user_id))
            .collect();

        Ok(visible)
    }

    /// The caller's live batch for the group
    pub async fn get_batch(&self, batch_group_id: &str, user_id: Option<&UserId>) -> Result<Batch> {
        self.list_by_group(batch_group_id, user_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| not_found(batch_group_id))
    }

    /// Delete the caller's batches for the group; returns rows removed
    pub async fn delete_group(&self, batch_group_id: &str, user_id: Option<&UserId>) -> Result<u64> {
        let batch_group_id = validate_group_id(batch_group_id)?;
        let _guard = self.locks.lock(batch_group_id).await;
        let mut conn = self.db.acquire().await?;

        let deleted = batches::delete_group(&mut conn, batch_group_id, user_id).await?;

        tracing::info!(batch_group_id = %batch_group_id, deleted, "Batch group deleted");

        Ok(deleted)
    }

    /// Remove the caller's live batch for the group, holding the group until commit
    ///
    /// Appends to the group wait until the returned [`ConsumedBatch`] is
    /// committed or dropped, so every card lands either in the removed batch
    /// or in a batch created afterwards.
    pub async fn take_batch(
        &self,
        batch_group_id: &str,
        user_id: Option<&UserId>,
    ) -> Result<ConsumedBatch> {
        let batch_group_id = validate_group_id(batch_group_id)?;
        let guard = self.locks.lock(batch_group_id).await;

        let mut tx = begin_write(&self.db).await?;

        let batch = self
            .take_live_batch(&mut tx, batch_group_id)
            .await?
            .filter(|batch| batch.is_owned_by(user_id));

        if let Some(batch) = &batch {
            batches::delete_batch(&mut tx, batch.id).await?;
            tracing::info!(
                batch_group_id = %batch_group_id,
                batch_id = %batch.id,
                cards = batch.cards.len(),
                "Batch taken from group"
            );
        }

        Ok(ConsumedBatch {
            tx,
            _guard: guard,
            batch,
        })
    }

    /// Delete every expired batch; returns rows removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut conn = self.db.acquire().await?;
        batches::delete_expired(&mut conn, now).await
    }

    /// Live batch for the group, purging expired rows found along the way
    async fn take_live_batch(
        &self,
        conn: &mut SqliteConnection,
        batch_group_id: &str,
    ) -> Result<Option<Batch>> {
        let now = self.clock.now();
        let mut live = None;

        for batch in batches::find_by_group(conn, batch_group_id).await? {
            if batch.is_expired(now) {
                tracing::debug!(batch_group_id = %batch_group_id, batch_id = %batch.id, "Purging expired batch");
                batches::delete_batch(conn, batch.id).await?;
            } else if live.is_none() {
                live = Some(batch);
            }
        }

        Ok(live)
    }
}

fn validate_group_id(batch_group_id: &str) -> Result<&str> {
    let trimmed = batch_group_id.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("batch_group_id is required".to_string()));
    }
    Ok(trimmed)
}

fn not_found(batch_group_id: &str) -> Error {
    Error::NotFound(format!("Batch not found: {}", batch_group_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_database_pool, init_memory_pool, DATABASE_FILE};
    use cardvault_common::ManualClock;

    fn card(name: &str) -> CardEntry {
        CardEntry::new(name, "Normal Monster")
    }

    fn names(batch: &Batch) -> Vec<&str> {
        batch.cards.iter().map(|c| c.name.as_str()).collect()
    }

    async fn setup() -> (BatchAggregator, ManualClock) {
        let pool = init_memory_pool().await.unwrap();
        let clock = ManualClock::default();
        let aggregator =
            BatchAggregator::new(pool, Arc::new(clock.clone()), BatchLifetimes::default());
        (aggregator, clock)
    }

    #[tokio::test]
    async fn test_appends_accumulate_in_call_order() {
        let (aggregator, _clock) = setup().await;

        let (first, created) = aggregator
            .append_batch("g1", None, vec![card("A"), card("B")])
            .await
            .unwrap();
        assert!(created);

        let (second, created) = aggregator
            .append_batch("g1", None, vec![card("C")])
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(names(&second), vec!["A", "B", "C"]);

        let stored = aggregator.get_batch("g1", None).await.unwrap();
        assert_eq!(names(&stored), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_owner_isolation() {
        let (aggregator, _clock) = setup().await;
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        aggregator
            .append_batch("g1", Some(&alice), vec![card("A")])
            .await
            .unwrap();

        assert!(aggregator.list_by_group("g1", Some(&bob)).await.unwrap().is_empty());
        assert!(aggregator.list_by_group("g1", None).await.unwrap().is_empty());
        assert!(matches!(
            aggregator.get_batch("g1", Some(&bob)).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            aggregator.append_batch("g1", Some(&bob), vec![card("X")]).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            aggregator.remove_card_at("g1", None, 0).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(aggregator.delete_group("g1", Some(&bob)).await.unwrap(), 0);

        // Rejected writes leave alice's batch untouched
        let stored = aggregator.get_batch("g1", Some(&alice)).await.unwrap();
        assert_eq!(names(&stored), vec!["A"]);
    }

    #[tokio::test]
    async fn test_check_appendable() {
        let (aggregator, clock) = setup().await;
        let alice = UserId::new("alice");

        aggregator.check_appendable("g1", None).await.unwrap();
        aggregator
            .append_batch("g1", Some(&alice), vec![card("A")])
            .await
            .unwrap();

        aggregator.check_appendable("g1", Some(&alice)).await.unwrap();
        assert!(matches!(
            aggregator.check_appendable("g1", None).await,
            Err(Error::NotFound(_))
        ));

        clock.advance(Duration::hours(24));
        aggregator.check_appendable("g1", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_out_of_range_leaves_batch_unchanged() {
        let (aggregator, _clock) = setup().await;
        aggregator
            .append_batch("g1", None, vec![card("A"), card("B")])
            .await
            .unwrap();

        let err = aggregator.remove_card_at("g1", None, 2).await.unwrap_err();
        assert!(matches!(err, Error::BadIndex { index: 2, len: 2 }));
        let stored = aggregator.get_batch("g1", None).await.unwrap();
        assert_eq!(names(&stored), vec!["A", "B"]);

        let updated = aggregator.remove_card_at("g1", None, 0).await.unwrap();
        assert_eq!(names(&updated), vec!["B"]);
        let stored = aggregator.get_batch("g1", None).await.unwrap();
        assert_eq!(names(&stored), vec!["B"]);
    }

    #[tokio::test]
    async fn test_expired_batch_is_invisible_and_replaced() {
        let (aggregator, clock) = setup().await;
        let (original, _) = aggregator
            .append_batch("g1", None, vec![card("A")])
            .await
            .unwrap();
        assert_eq!(original.expires_at - original.created_at, Duration::hours(5));

        clock.advance(Duration::hours(5) - Duration::seconds(1));
        assert_eq!(aggregator.list_by_group("g1", None).await.unwrap().len(), 1);

        clock.advance(Duration::seconds(1));
        assert!(aggregator.list_by_group("g1", None).await.unwrap().is_empty());
        assert!(matches!(
            aggregator.remove_card_at("g1", None, 0).await,
            Err(Error::NotFound(_))
        ));

        let (fresh, created) = aggregator
            .append_batch("g1", None, vec![card("B")])
            .await
            .unwrap();
        assert!(created);
        assert_ne!(fresh.id, original.id);
        assert_eq!(names(&fresh), vec!["B"]);
        assert_eq!(fresh.expires_at, clock.now() + Duration::hours(5));
    }

    #[tokio::test]
    async fn test_appends_do_not_extend_expiry() {
        let (aggregator, clock) = setup().await;
        let (created, _) = aggregator
            .append_batch("g1", None, vec![card("A")])
            .await
            .unwrap();

        clock.advance(Duration::hours(4));
        let (appended, _) = aggregator
            .append_batch("g1", None, vec![card("B")])
            .await
            .unwrap();
        assert_eq!(appended.expires_at, created.expires_at);
    }

    #[tokio::test]
    async fn test_owned_batches_live_longer() {
        let (aggregator, clock) = setup().await;
        let alice = UserId::new("alice");
        aggregator
            .append_batch("g1", Some(&alice), vec![card("A")])
            .await
            .unwrap();

        clock.advance(Duration::hours(6));
        assert_eq!(aggregator.list_by_group("g1", Some(&alice)).await.unwrap().len(), 1);

        clock.advance(Duration::hours(18));
        assert!(aggregator.list_by_group("g1", Some(&alice)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let (aggregator, _clock) = setup().await;
        let aggregator = Arc::new(aggregator);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    aggregator
                        .append_batch("g1", None, vec![card(&format!("card-{}", i))])
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            let (_, was_created) = handle.await.unwrap().unwrap();
            if was_created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        let stored = aggregator.get_batch("g1", None).await.unwrap();
        assert_eq!(stored.cards.len(), 16);
    }

    #[tokio::test]
    async fn test_delete_group_and_purge() {
        let (aggregator, clock) = setup().await;
        aggregator.append_batch("g1", None, vec![card("A")]).await.unwrap();
        aggregator.append_batch("g2", None, vec![card("B")]).await.unwrap();

        assert_eq!(aggregator.delete_group("g1", None).await.unwrap(), 1);
        assert!(aggregator.list_by_group("g1", None).await.unwrap().is_empty());

        clock.advance(Duration::hours(5));
        assert_eq!(aggregator.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blank_group_id_rejected() {
        let (aggregator, _clock) = setup().await;
        assert!(matches!(
            aggregator.append_batch("  ", None, vec![card("A")]).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            aggregator.list_by_group("", None).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            aggregator.delete_group(" ", None).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_padded_group_id_reaches_same_batch() {
        let (aggregator, _clock) = setup().await;
        aggregator
            .append_batch(" g1 ", None, vec![card("A"), card("B")])
            .await
            .unwrap();

        assert_eq!(aggregator.list_by_group(" g1 ", None).await.unwrap().len(), 1);
        assert_eq!(aggregator.get_batch("g1", None).await.unwrap().batch_group_id, "g1");

        let updated = aggregator.remove_card_at(" g1 ", None, 0).await.unwrap();
        assert_eq!(names(&updated), vec!["B"]);

        assert_eq!(aggregator.delete_group(" g1 ", None).await.unwrap(), 1);
        assert!(aggregator.list_by_group("g1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_take_batch_commit_and_rollback() {
        let (aggregator, _clock) = setup().await;
        let alice = UserId::new("alice");
        aggregator
            .append_batch("g1", Some(&alice), vec![card("A")])
            .await
            .unwrap();

        // Someone else's batch is left alone
        let taken = aggregator.take_batch("g1", None).await.unwrap();
        assert!(taken.batch.is_none());
        taken.commit().await.unwrap();

        // Dropped without commit: the batch is still there
        let taken = aggregator.take_batch("g1", Some(&alice)).await.unwrap();
        assert_eq!(names(taken.batch.as_ref().unwrap()), vec!["A"]);
        drop(taken);
        assert_eq!(aggregator.list_by_group("g1", Some(&alice)).await.unwrap().len(), 1);

        let taken = aggregator.take_batch("g1", Some(&alice)).await.unwrap();
        assert!(taken.batch.is_some());
        taken.commit().await.unwrap();
        assert!(aggregator.list_by_group("g1", Some(&alice)).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_to_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join(DATABASE_FILE)).await.unwrap();
        let aggregator = Arc::new(BatchAggregator::new(
            pool,
            Arc::new(ManualClock::default()),
            BatchLifetimes::default(),
        ));

        for round in 0..3 {
            let handles: Vec<_> = (0..32)
                .map(|i| {
                    let aggregator = aggregator.clone();
                    tokio::spawn(async move {
                        aggregator
                            .append_batch(&format!("g{}", i), None, vec![card(&format!("card-{}", round))])
                            .await
                    })
                })
                .collect();

            for handle in handles {
                handle.await.unwrap().unwrap();
            }
        }

        for i in 0..32 {
            let stored = aggregator.get_batch(&format!("g{}", i), None).await.unwrap();
            assert_eq!(names(&stored), vec!["card-0", "card-1", "card-2"]);
        }
    }
}
