//! Card, batch and collection models
//!
//! A [`Batch`] is the short-lived staging area that scan uploads append to;
//! a [`Collection`] is the durable, named set a batch is promoted into.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Identity of an authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Minimal projection of a verified card: what batches store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub card_type: String,
}

impl CardEntry {
    pub fn new(name: impl Into<String>, card_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            card_type: card_type.into(),
        }
    }
}

/// Expiring, append-only group of resolved cards sharing one `batch_group_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub batch_group_id: String,
    /// `None` for anonymous uploads
    pub user_id: Option<UserId>,
    pub cards: Vec<CardEntry>,
    pub created_at: DateTime<Utc>,
    /// Fixed at creation; appends do not extend it
    pub expires_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(
        batch_group_id: impl Into<String>,
        user_id: Option<UserId>,
        cards: Vec<CardEntry>,
        created_at: DateTime<Utc>,
        lifetime: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_group_id: batch_group_id.into(),
            user_id,
            cards,
            created_at,
            expires_at: created_at + lifetime,
        }
    }

    /// A batch is gone once its deadline has been reached
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Exact owner match; anonymous only matches anonymous
    pub fn is_owned_by(&self, user_id: Option<&UserId>) -> bool {
        self.user_id.as_ref() == user_id
    }

    /// Remove the card at `index`, leaving the list untouched when out of range
    pub fn remove_card_at(&mut self, index: usize) -> Result<CardEntry> {
        if index >= self.cards.len() {
            return Err(Error::BadIndex {
                index,
                len: self.cards.len(),
            });
        }
        Ok(self.cards.remove(index))
    }
}

fn default_quantity() -> u32 {
    1
}

/// Card as stored in a collection; quantity only exists at this layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCard {
    pub name: String,
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

impl From<CardEntry> for CollectionCard {
    fn from(card: CardEntry) -> Self {
        Self {
            name: card.name,
            card_type: card.card_type,
            quantity: 1,
        }
    }
}

/// Durable, named set of cards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    /// `None` until an anonymous collection is claimed
    pub user_id: Option<UserId>,
    pub title: String,
    pub description: String,
    /// Insertion order; index-based removal addresses this list
    pub cards: Vec<CollectionCard>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Only anonymous collections expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl Collection {
    pub fn new(
        user_id: Option<UserId>,
        title: impl Into<String>,
        description: impl Into<String>,
        cards: Vec<CollectionCard>,
        created_at: DateTime<Utc>,
        anonymous_lifetime: Duration,
    ) -> Self {
        let expires_at = match user_id {
            Some(_) => None,
            None => Some(created_at + anonymous_lifetime),
        };

        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            description: description.into(),
            cards,
            created_at,
            updated_at: created_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|deadline| now >= deadline).unwrap_or(false)
    }

    pub fn is_owned_by(&self, user_id: Option<&UserId>) -> bool {
        self.user_id.as_ref() == user_id
    }

    pub fn remove_card_at(&mut self, index: usize) -> Result<CollectionCard> {
        if index >= self.cards.len() {
            return Err(Error::BadIndex {
                index,
                len: self.cards.len(),
            });
        }
        Ok(self.cards.remove(index))
    }

    /// Hand an anonymous collection to `user`; it stops expiring
    pub fn claim(&mut self, user: UserId, now: DateTime<Utc>) -> Result<()> {
        if self.user_id.is_some() {
            return Err(Error::NotFound(format!("Collection not found: {}", self.id)));
        }
        self.user_id = Some(user);
        self.expires_at = None;
        self.updated_at = now;
        Ok(())
    }
}
