//! Settings database operations
//!
//! Key-value accessors for the `settings` table.

use cardvault_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Settings key holding the Cloud Vision API key
pub const VISION_API_KEY: &str = "vision_api_key";

/// Get the Cloud Vision API key from the database
pub async fn get_vision_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, VISION_API_KEY).await
}

/// Store the Cloud Vision API key in the database
pub async fn set_vision_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, VISION_API_KEY, key).await
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_vision_api_key_not_set() {
        let pool = init_memory_pool().await.unwrap();
        assert_eq!(get_vision_api_key(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_vision_api_key_upsert() {
        let pool = init_memory_pool().await.unwrap();

        set_vision_api_key(&pool, "old_key".to_string()).await.unwrap();
        set_vision_api_key(&pool, "new_key".to_string()).await.unwrap();

        assert_eq!(get_vision_api_key(&pool).await.unwrap(), Some("new_key".to_string()));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings WHERE key = ?")
            .bind(VISION_API_KEY)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_typed_setting_parse_error() {
        let pool = init_memory_pool().await.unwrap();
        set_setting(&pool, "sweep_interval_secs", "not-a-number").await.unwrap();

        let result = get_setting::<u64>(&pool, "sweep_interval_secs").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
