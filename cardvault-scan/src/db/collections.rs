//! Collection table operations

use cardvault_common::{Collection, Result, UserId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, parse_uuid};

const SELECT_COLUMNS: &str = "SELECT id, user_id, title, description, cards, created_at, \
     updated_at, expires_at FROM collections";

/// Insert or fully replace a collection row
pub async fn save_collection(conn: &mut SqliteConnection, collection: &Collection) -> Result<()> {
    let cards = serde_json::to_string(&collection.cards)?;

    sqlx::query(
        r#"
        INSERT INTO collections (
            id, user_id, title, description, cards, created_at, updated_at, expires_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            user_id = excluded.user_id,
            title = excluded.title,
            description = excluded.description,
            cards = excluded.cards,
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(collection.id.to_string())
    .bind(collection.user_id.as_ref().map(UserId::as_str))
    .bind(&collection.title)
    .bind(&collection.description)
    .bind(cards)
    .bind(format_timestamp(collection.created_at))
    .bind(format_timestamp(collection.updated_at))
    .bind(collection.expires_at.map(format_timestamp))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Load a collection by id (expired rows included)
pub async fn load_collection(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Collection>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(collection_from_row).transpose()
}

/// Collections owned by `user_id`, oldest first
pub async fn list_by_owner(conn: &mut SqliteConnection, user_id: &UserId) -> Result<Vec<Collection>> {
    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? ORDER BY created_at ASC",
        SELECT_COLUMNS
    ))
    .bind(user_id.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(collection_from_row).collect()
}

pub async fn delete_collection(conn: &mut SqliteConnection, id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM collections WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Delete unclaimed anonymous collections past their deadline
pub async fn delete_expired(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM collections WHERE expires_at IS NOT NULL AND expires_at <= ?",
    )
    .bind(format_timestamp(now))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn collection_from_row(row: &SqliteRow) -> Result<Collection> {
    let id: String = row.get("id");
    let user_id: Option<String> = row.get("user_id");
    let cards: String = row.get("cards");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let expires_at: Option<String> = row.get("expires_at");

    Ok(Collection {
        id: parse_uuid(&id)?,
        user_id: user_id.map(UserId),
        title: row.get("title"),
        description: row.get("description"),
        cards: serde_json::from_str(&cards)?,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        expires_at: expires_at
            .map(|s| parse_timestamp("expires_at", &s))
            .transpose()?,
    })
}
