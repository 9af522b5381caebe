//! Local cache database
//!
//! A small sqlite key-value store over envelope JSON, keyed by identity.
//! It caches the self envelope, org trees, and keyring envelopes between
//! requests. Plaintext secrets and the passphrase never touch it.

use std::ops::Deref;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use common::envelope::{Envelope, EnvelopeError};
use common::identity::{Id, ObjectType};
use common::primitive::Body;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("unable to open the cache database: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("cached object cannot be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS objects (
    id          TEXT PRIMARY KEY,
    type        INTEGER NOT NULL,
    body        TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS objects_type_idx ON objects (type);
"#;

#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Database(pool))
    }

    /// Upsert an envelope under its identity.
    pub async fn put<T: Body + Serialize>(
        &self,
        envelope: &Envelope<T>,
    ) -> Result<(), DatabaseError> {
        let body = serde_json::to_string(envelope)?;
        sqlx::query(
            r#"
            INSERT INTO objects (id, type, body, updated_at)
            VALUES ($1, $2, $3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            ON CONFLICT (id) DO UPDATE
            SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(envelope.id.to_string())
        .bind(envelope.id.object_type().tag() as i64)
        .bind(body)
        .execute(&self.0)
        .await?;
        Ok(())
    }

    pub async fn get<T>(&self, id: &Id) -> Result<Option<Envelope<T>>, DatabaseError>
    where
        T: Body + DeserializeOwned,
    {
        let row = sqlx::query("SELECT body FROM objects WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.0)
            .await?;

        row.map(|row| decode_row(row.get("body"))).transpose()
    }

    /// The most recently cached envelope of a type (e.g. the self envelope).
    pub async fn latest_of_type<T>(
        &self,
        object_type: ObjectType,
    ) -> Result<Option<Envelope<T>>, DatabaseError>
    where
        T: Body + DeserializeOwned,
    {
        let row = sqlx::query(
            "SELECT body FROM objects WHERE type = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(object_type.tag() as i64)
        .fetch_optional(&self.0)
        .await?;

        row.map(|row| decode_row(row.get("body"))).transpose()
    }

    pub async fn delete(&self, id: &Id) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM objects WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.0)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.0.close().await;
    }
}

fn decode_row<T>(body: String) -> Result<Envelope<T>, DatabaseError>
where
    T: Body + DeserializeOwned,
{
    let value: serde_json::Value = serde_json::from_str(&body)?;
    Ok(Envelope::from_json(value)?)
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::primitive::Org;
    use time::OffsetDateTime;

    async fn database() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("cache.db")).await.unwrap();
        (dir, db)
    }

    fn org() -> Envelope<Org> {
        Envelope {
            id: Id::new_mutable(ObjectType::Org),
            version: 1,
            body: Org {
                name: "knotty-buoy".to_string(),
                created_by: Id::new_mutable(ObjectType::User),
                created: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
            },
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, db) = database().await;
        let envelope = org();

        db.put(&envelope).await.unwrap();
        let back: Envelope<Org> = db.get(&envelope.id).await.unwrap().unwrap();
        assert_eq!(envelope, back);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_dir, db) = database().await;
        let missing: Option<Envelope<Org>> =
            db.get(&Id::new_mutable(ObjectType::Org)).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_put_is_upsert() {
        let (_dir, db) = database().await;
        let mut envelope = org();

        db.put(&envelope).await.unwrap();
        envelope.body.name = "renamed".to_string();
        db.put(&envelope).await.unwrap();

        let back: Envelope<Org> = db.get(&envelope.id).await.unwrap().unwrap();
        assert_eq!(back.body.name, "renamed");
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, db) = database().await;
        let envelope = org();

        db.put(&envelope).await.unwrap();
        db.delete(&envelope.id).await.unwrap();
        let gone: Option<Envelope<Org>> = db.get(&envelope.id).await.unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn test_latest_of_type() {
        let (_dir, db) = database().await;
        let first = org();
        let second = org();

        db.put(&first).await.unwrap();
        // sqlite timestamps have millisecond resolution
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.put(&second).await.unwrap();

        let latest: Envelope<Org> = db
            .latest_of_type(ObjectType::Org)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);
    }
}
