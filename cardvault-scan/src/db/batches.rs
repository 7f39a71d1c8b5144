//! Batch table operations
//!
//! Row-level access only. Expiry and ownership rules are applied by
//! `services::batch_aggregator`; these functions accept any connection so
//! the aggregator can run them inside one transaction.

use cardvault_common::{Batch, CardEntry, Result, UserId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};

const SELECT_COLUMNS: &str =
    "SELECT id, batch_group_id, user_id, cards, created_at, expires_at FROM batches";

/// Insert a new batch row
pub async fn insert_batch(conn: &mut SqliteConnection, batch: &Batch) -> Result<()> {
    let cards = serde_json::to_string(&batch.cards)?;

    sqlx::query(
        r#"
        INSERT INTO batches (id, batch_group_id, user_id, cards, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(&batch.batch_group_id)
    .bind(batch.user_id.as_ref().map(UserId::as_str))
    .bind(cards)
    .bind(format_timestamp(batch.created_at))
    .bind(format_timestamp(batch.expires_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Replace the stored card list of a batch
pub async fn update_cards(conn: &mut SqliteConnection, id: Uuid, cards: &[CardEntry]) -> Result<()> {
    let cards = serde_json::to_string(cards)?;

    sqlx::query("UPDATE batches SET cards = ? WHERE id = ?")
        .bind(cards)
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Every stored batch for a group, oldest first (expired rows included)
pub async fn find_by_group(conn: &mut SqliteConnection, batch_group_id: &str) -> Result<Vec<Batch>> {
    let rows = sqlx::query(&format!(
        "{} WHERE batch_group_id = ? ORDER BY created_at ASC",
        SELECT_COLUMNS
    ))
    .bind(batch_group_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(batch_from_row).collect()
}

/// Delete one batch row
pub async fn delete_batch(conn: &mut SqliteConnection, id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM batches WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Delete the group's batches belonging to `user_id` (anonymous when `None`)
pub async fn delete_group(
    conn: &mut SqliteConnection,
    batch_group_id: &str,
    user_id: Option<&UserId>,
) -> Result<u64> {
    // `IS` so that NULL matches NULL
    let result = sqlx::query("DELETE FROM batches WHERE batch_group_id = ? AND user_id IS ?")
        .bind(batch_group_id)
        .bind(user_id.map(UserId::as_str))
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Delete every batch whose deadline has been reached
pub async fn delete_expired(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM batches WHERE expires_at <= ?")
        .bind(format_timestamp(now))
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let id: String = row.get("id");
    let user_id: Option<String> = row.get("user_id");
    let cards: String = row.get("cards");
    let created_at: String = row.get("created_at");
    let expires_at: String = row.get("expires_at");

    Ok(Batch {
        id: parse_uuid(&id)?,
        batch_group_id: row.get("batch_group_id"),
        user_id: user_id.map(UserId),
        cards: serde_json::from_str(&cards)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        expires_at: parse_timestamp("expires_at", &expires_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use chrono::Duration;

    fn batch(group: &str, user: Option<&str>, created_at: DateTime<Utc>) -> Batch {
        Batch::new(
            group,
            user.map(UserId::new),
            vec![CardEntry::new("Dark Magician", "Normal Monster")],
            created_at,
            Duration::hours(5),
        )
    }

    #[tokio::test]
    async fn test_insert_and_find_by_group() {
        let pool = init_memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();

        let later = batch("g1", Some("alice"), now + Duration::seconds(1));
        let earlier = batch("g1", None, now);
        insert_batch(&mut conn, &later).await.unwrap();
        insert_batch(&mut conn, &earlier).await.unwrap();
        insert_batch(&mut conn, &batch("g2", None, now)).await.unwrap();

        let found = find_by_group(&mut conn, "g1").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, earlier.id);
        assert_eq!(found[1].user_id, Some(UserId::new("alice")));
        assert_eq!(found[1].cards, later.cards);
        assert_eq!(found[1].expires_at, later.expires_at);
    }

    #[tokio::test]
    async fn test_update_cards() {
        let pool = init_memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let stored = batch("g1", None, Utc::now());
        insert_batch(&mut conn, &stored).await.unwrap();

        let cards = vec![
            CardEntry::new("Dark Magician", "Normal Monster"),
            CardEntry::new("Raigeki", "Spell Card"),
        ];
        update_cards(&mut conn, stored.id, &cards).await.unwrap();

        let found = find_by_group(&mut conn, "g1").await.unwrap();
        assert_eq!(found[0].cards, cards);
    }

    #[tokio::test]
    async fn test_delete_group_is_owner_scoped() {
        let pool = init_memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        insert_batch(&mut conn, &batch("g1", None, now)).await.unwrap();
        insert_batch(&mut conn, &batch("g1", Some("alice"), now)).await.unwrap();

        let alice = UserId::new("alice");
        assert_eq!(delete_group(&mut conn, "g1", Some(&UserId::new("bob"))).await.unwrap(), 0);
        assert_eq!(delete_group(&mut conn, "g1", Some(&alice)).await.unwrap(), 1);
        assert_eq!(delete_group(&mut conn, "g1", None).await.unwrap(), 1);
        assert!(find_by_group(&mut conn, "g1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let pool = init_memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let now = Utc::now();
        let old = batch("old", None, now - Duration::hours(6));
        let fresh = batch("fresh", None, now);
        insert_batch(&mut conn, &old).await.unwrap();
        insert_batch(&mut conn, &fresh).await.unwrap();

        assert_eq!(delete_expired(&mut conn, now).await.unwrap(), 1);
        assert!(find_by_group(&mut conn, "old").await.unwrap().is_empty());
        assert_eq!(find_by_group(&mut conn, "fresh").await.unwrap().len(), 1);
    }
}
