//! Collection store
//!
//! Durable, named card collections. Collections are created directly or
//! promoted from a batch group, edited in place, and exported as CSV.
//! Mutations of one collection are serialized; ownership follows the same
//! exact-match rule as batches, with one addition: a live anonymous
//! collection can be claimed by a signed-in user.

use cardvault_common::{Batch, Clock, Collection, CollectionCard, Error, Result, UserId};
use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{begin_write, collections};
use crate::services::batch_aggregator::BatchAggregator;
use crate::services::keyed_lock::KeyedLocks;

/// CSV export header
pub const EXPORT_HEADER: [&str; 4] = ["#", "Card Name", "Card Type", "Quantity"];

/// Default lifetime of an unclaimed anonymous collection
pub const DEFAULT_ANONYMOUS_LIFETIME_HOURS: i64 = 24;

pub struct CollectionStore {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    batches: Arc<BatchAggregator>,
    anonymous_lifetime: Duration,
    locks: KeyedLocks,
}

impl CollectionStore {
    pub fn new(
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        batches: Arc<BatchAggregator>,
        anonymous_lifetime: Duration,
    ) -> Self {
        Self {
            db,
            clock,
            batches,
            anonymous_lifetime,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn create(
        &self,
        owner: Option<&UserId>,
        title: &str,
        description: &str,
        cards: Vec<CollectionCard>,
    ) -> Result<Collection> {
        validate_cards(&cards)?;
        let collection = self.new_collection(owner, title, description, cards)?;

        let mut conn = self.db.acquire().await?;
        collections::save_collection(&mut conn, &collection).await?;

        log_created(&collection);
        Ok(collection)
    }

    /// Create a collection from the caller's live batch for `batch_group_id`
    ///
    /// A missing batch yields an empty collection. With `consume` the batch
    /// is removed in the same transaction that stores the collection, while
    /// appends to the group are held off.
    pub async fn create_from_batch(
        &self,
        owner: Option<&UserId>,
        title: &str,
        description: &str,
        batch_group_id: &str,
        consume: bool,
    ) -> Result<Collection> {
        // Reject a bad title before touching the batch
        required_title(title)?;

        if !consume {
            let cards = match self.batches.get_batch(batch_group_id, owner).await {
                Ok(batch) => batch_cards(batch),
                Err(Error::NotFound(_)) => {
                    tracing::info!(batch_group_id = %batch_group_id, "No live batch, creating empty collection");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            return self.create(owner, title, description, cards).await;
        }

        let mut taken = self.batches.take_batch(batch_group_id, owner).await?;
        let cards = match taken.batch.take() {
            Some(batch) => batch_cards(batch),
            None => {
                tracing::info!(batch_group_id = %batch_group_id, "No live batch, creating empty collection");
                Vec::new()
            }
        };

        let collection = self.new_collection(owner, title, description, cards)?;
        collections::save_collection(taken.conn(), &collection).await?;
        taken.commit().await?;

        log_created(&collection);
        Ok(collection)
    }

    fn new_collection(
        &self,
        owner: Option<&UserId>,
        title: &str,
        description: &str,
        cards: Vec<CollectionCard>,
    ) -> Result<Collection> {
        Ok(Collection::new(
            owner.cloned(),
            required_title(title)?,
            description.trim(),
            cards,
            self.clock.now(),
            self.anonymous_lifetime,
        ))
    }

    /// Collections owned by `owner`, oldest first
    pub async fn list(&self, owner: &UserId) -> Result<Vec<Collection>> {
        let mut conn = self.db.acquire().await?;
        collections::list_by_owner(&mut conn, owner).await
    }

    pub async fn get(&self, id: Uuid, owner: Option<&UserId>) -> Result<Collection> {
        let mut conn = self.db.acquire().await?;
        let now = self.clock.now();

        collections::load_collection(&mut conn, id)
            .await?
            .filter(|c| !c.is_expired(now) && c.is_owned_by(owner))
            .ok_or_else(|| not_found(id))
    }

    /// Replace title and/or description; blank or absent values keep the old one
    pub async fn update_details(
        &self,
        id: Uuid,
        owner: Option<&UserId>,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Collection> {
        let title = non_blank(title);
        let description = non_blank(description);

        self.mutate(id, owner, |collection| {
            if let Some(title) = title {
                collection.title = title.to_string();
            }
            if let Some(description) = description {
                collection.description = description.to_string();
            }
            Ok(())
        })
        .await
    }

    pub async fn append_cards(
        &self,
        id: Uuid,
        owner: Option<&UserId>,
        cards: Vec<CollectionCard>,
    ) -> Result<Collection> {
        validate_cards(&cards)?;
        self.mutate(id, owner, |collection| {
            collection.cards.extend(cards);
            Ok(())
        })
        .await
    }

    pub async fn remove_card_at(
        &self,
        id: Uuid,
        owner: Option<&UserId>,
        index: usize,
    ) -> Result<Collection> {
        self.mutate(id, owner, |collection| collection.remove_card_at(index).map(|_| ()))
            .await
    }

    pub async fn delete(&self, id: Uuid, owner: Option<&UserId>) -> Result<()> {
        let _guard = self.locks.lock(&id.to_string()).await;

        // Ownership check first; a foreign collection reads as missing
        self.get(id, owner).await?;

        let mut conn = self.db.acquire().await?;
        collections::delete_collection(&mut conn, id).await?;

        tracing::info!(collection_id = %id, "Collection deleted");
        Ok(())
    }

    /// Give a live anonymous collection to `user`; it stops expiring
    pub async fn claim(&self, id: Uuid, user: &UserId) -> Result<Collection> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let now = self.clock.now();

        let mut tx = begin_write(&self.db).await?;
        let mut collection = collections::load_collection(&mut tx, id)
            .await?
            .filter(|c| !c.is_expired(now))
            .ok_or_else(|| not_found(id))?;

        collection.claim(user.clone(), now)?;
        collections::save_collection(&mut tx, &collection).await?;
        tx.commit().await?;

        tracing::info!(collection_id = %id, user_id = %user, "Collection claimed");
        Ok(collection)
    }

    /// CSV with one row per card, in collection order
    pub async fn export_csv(&self, id: Uuid, owner: Option<&UserId>) -> Result<String> {
        let collection = self.get(id, owner).await?;
        render_csv(&collection)
    }

    /// Delete unclaimed anonymous collections past their deadline
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut conn = self.db.acquire().await?;
        collections::delete_expired(&mut conn, now).await
    }

    async fn mutate<F>(&self, id: Uuid, owner: Option<&UserId>, apply: F) -> Result<Collection>
    where
        F: FnOnce(&mut Collection) -> Result<()>,
    {
        let _guard = self.locks.lock(&id.to_string()).await;
        let now = self.clock.now();

        let mut tx = begin_write(&self.db).await?;
        let mut collection = collections::load_collection(&mut tx, id)
            .await?
            .filter(|c| !c.is_expired(now) && c.is_owned_by(owner))
            .ok_or_else(|| not_found(id))?;

        apply(&mut collection)?;
        collection.updated_at = now;

        collections::save_collection(&mut tx, &collection).await?;
        tx.commit().await?;

        tracing::debug!(collection_id = %id, cards = collection.cards.len(), "Collection updated");
        Ok(collection)
    }
}

fn required_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("Collection title is required".to_string()));
    }
    Ok(title)
}

fn batch_cards(batch: Batch) -> Vec<CollectionCard> {
    batch.cards.into_iter().map(CollectionCard::from).collect()
}

fn log_created(collection: &Collection) {
    tracing::info!(
        collection_id = %collection.id,
        owned = collection.user_id.is_some(),
        cards = collection.cards.len(),
        "Collection created"
    );
}

/// Render a collection as CSV
pub fn render_csv(collection: &Collection) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer.write_record(EXPORT_HEADER).map_err(csv_error)?;
    for (i, card) in collection.cards.iter().enumerate() {
        writer
            .write_record([
                (i + 1).to_string(),
                card.name.clone(),
                card.card_type.clone(),
                card.quantity.to_string(),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("CSV export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Internal(format!("CSV export failed: {}", e)))
}

/// File name offered for a CSV download
pub fn export_filename(collection: &Collection) -> String {
    let stem: String = collection
        .title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_').to_lowercase();
    if stem.is_empty() {
        return "collection.csv".to_string();
    }
    format!("{}.csv", stem)
}

fn csv_error(e: csv::Error) -> Error {
    Error::Internal(format!("CSV export failed: {}", e))
}

fn validate_cards(cards: &[CollectionCard]) -> Result<()> {
    if let Some(card) = cards.iter().find(|c| c.name.trim().is_empty()) {
        return Err(Error::InvalidInput(format!(
            "Card name is required (type {:?})",
            card.card_type
        )));
    }
    if let Some(card) = cards.iter().find(|c| c.quantity == 0) {
        return Err(Error::InvalidInput(format!("Quantity must be at least 1: {}", card.name)));
    }
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn not_found(id: Uuid) -> Error {
    Error::NotFound(format!("Collection not found: {}", id))
}
