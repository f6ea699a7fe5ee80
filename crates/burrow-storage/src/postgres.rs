use async_trait::async_trait;
use burrow_core::error::{Result, StorageError};
use burrow_core::{Repository, ShortCode, Stats, UserId, UserUrl};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{debug, warn};

/// DDL for the tables this repository expects.
pub const SCHEMA: &str = include_str!("../ddl/postgres/schema.sql");

/// PostgreSQL implementation of the repository contract.
///
/// Records live in `url`, ownership edges in `user_url`. Identifiers come
/// from the `url_id_seq` sequence. Soft delete flips `url.deleted`; a partial
/// unique index keeps at most one live row per value.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the tables and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in schema_statements(SCHEMA) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }
}

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .collect()
}

fn to_db_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| StorageError::InvalidData(format!("id {id} exceeds BIGINT")))
}

fn from_db_id(id: i64) -> Result<u64> {
    u64::try_from(id).map_err(|_| StorageError::InvalidData(format!("negative id {id} in storage")))
}

fn user_param(user: UserId) -> Result<i64> {
    i64::try_from(user.get())
        .map_err(|_| StorageError::InvalidData(format!("user id {user} exceeds BIGINT")))
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

/// Reads the identifier `nextval` would hand out, without consuming it.
async fn peek_next_index(conn: &mut PgConnection) -> Result<u64> {
    let row = sqlx::query("SELECT last_value, is_called FROM url_id_seq")
        .fetch_one(conn)
        .await
        .map_err(map_sqlx_error)?;
    let last_value: i64 = row.try_get("last_value").map_err(map_sqlx_error)?;
    let is_called: bool = row.try_get("is_called").map_err(map_sqlx_error)?;

    let last_value = from_db_id(last_value)?;
    Ok(if is_called { last_value + 1 } else { last_value })
}

/// Finishes a batch transaction: commit on success, explicit rollback otherwise.
async fn finish_batch<T>(
    tx: Transaction<'_, Postgres>,
    outcome: Result<T>,
    operation: &str,
) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|err| StorageError::Batch(format!("{operation}: commit failed: {err}")))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(operation, error = %rollback_err, "rollback failed");
            }
            let reason = match err {
                stale @ StorageError::StaleIndex { .. } => return Err(stale),
                StorageError::Batch(reason) => reason,
                other => other.to_string(),
            };
            Err(StorageError::Batch(format!("{operation}: {reason}")))
        }
    }
}

async fn insert_block(
    conn: &mut PgConnection,
    values: &[String],
    start_index: u64,
    user: i64,
) -> Result<()> {
    // Blocks other writers, including the implicit nextval of insert_value,
    // until this transaction ends.
    sqlx::query("LOCK TABLE url IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    let next_index = peek_next_index(conn).await?;
    if start_index < next_index {
        return Err(StorageError::StaleIndex {
            start_index,
            next_index,
        });
    }

    for (value, id) in values.iter().zip(start_index..) {
        let id = to_db_id(id)?;
        sqlx::query("INSERT INTO url (id, value) VALUES ($1, $2)")
            .bind(id)
            .bind(value)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
        sqlx::query("INSERT INTO user_url (user_id, url_id) VALUES ($1, $2)")
            .bind(user)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;
    }

    // Explicit ids bypass the sequence; move it past the block, never back.
    sqlx::query(
        "SELECT setval('url_id_seq', GREATEST((SELECT MAX(id) FROM url), \
         (SELECT last_value FROM url_id_seq)))",
    )
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn soft_delete(conn: &mut PgConnection, ids: &[i64], user: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE url
        SET deleted = TRUE
        WHERE id = ANY($1)
          AND NOT deleted
          AND id IN (SELECT url_id FROM user_url WHERE user_id = $2)
        "#,
    )
    .bind(ids)
    .bind(user)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(result.rows_affected())
}

fn user_url_from_row(row: &PgRow, base_url: &str) -> Result<UserUrl> {
    let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
    let value: String = row.try_get("value").map_err(map_sqlx_error)?;
    Ok(UserUrl {
        short_url: ShortCode::from_id(from_db_id(id)?).to_url(base_url),
        original_url: value,
    })
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn get_next_index(&self) -> Result<u64> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        peek_next_index(&mut conn).await
    }

    async fn insert_value(&self, value: &str, user: UserId) -> Result<u64> {
        let user = user_param(user)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let inserted: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO url (value)
            VALUES ($1)
            ON CONFLICT (value) WHERE NOT deleted DO NOTHING
            RETURNING id
            "#,
        )
        .bind(value)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(id) = inserted else {
            let existing: i64 =
                sqlx::query_scalar("SELECT id FROM url WHERE value = $1 AND NOT deleted")
                    .bind(value)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
            tx.rollback().await.map_err(map_sqlx_error)?;
            debug!(id = existing, "value already stored");
            return Err(StorageError::Conflict {
                id: from_db_id(existing)?,
            });
        };

        sqlx::query("INSERT INTO user_url (user_id, url_id) VALUES ($1, $2)")
            .bind(user)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        from_db_id(id)
    }

    async fn insert_batch_values(
        &self,
        values: &[String],
        start_index: u64,
        user: UserId,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        if start_index == 0 {
            return Err(StorageError::Batch(
                "start index must be at least 1".to_string(),
            ));
        }
        let user = user_param(user)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let outcome = insert_block(&mut tx, values, start_index, user).await;
        finish_batch(tx, outcome, "batch insert").await?;

        debug!(start_index, count = values.len(), "inserted batch");
        Ok(())
    }

    async fn get_value(&self, id: u64, _user: UserId) -> Result<String> {
        let Ok(db_id) = i64::try_from(id) else {
            return Err(StorageError::NotFound(id));
        };

        let row = sqlx::query("SELECT value, deleted FROM url WHERE id = $1")
            .bind(db_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(id));
        };

        let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;
        if deleted {
            return Err(StorageError::Gone(id));
        }
        row.try_get("value").map_err(map_sqlx_error)
    }

    async fn get_user_urls(&self, user: UserId, base_url: &str) -> Result<Vec<UserUrl>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.value
            FROM user_url uu
            JOIN url u ON u.id = uu.url_id
            WHERE uu.user_id = $1
              AND NOT u.deleted
            ORDER BY uu.seq
            "#,
        )
        .bind(user_param(user)?)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if rows.is_empty() {
            return Err(StorageError::NoContent(user));
        }
        rows.iter()
            .map(|row| user_url_from_row(row, base_url))
            .collect()
    }

    async fn mark_batch_as_deleted(&self, ids: &[u64], user: UserId) -> Result<()> {
        // identifiers beyond BIGINT cannot exist, so they are skipped like any unknown id
        let ids: Vec<i64> = ids.iter().filter_map(|id| i64::try_from(*id).ok()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let user = user_param(user)?;

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let outcome = soft_delete(&mut tx, &ids, user).await;
        let deleted = finish_batch(tx, outcome, "batch delete").await?;

        debug!(deleted, requested = ids.len(), "marked batch as deleted");
        Ok(())
    }

    async fn get_stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            r#"
            SELECT
              (SELECT COUNT(*) FROM url WHERE NOT deleted) AS urls,
              (SELECT COUNT(DISTINCT user_id) FROM user_url) AS users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let urls: i64 = row.try_get("urls").map_err(map_sqlx_error)?;
        let users: i64 = row.try_get("users").map_err(map_sqlx_error)?;
        Ok(Stats {
            urls: from_db_id(urls)?,
            users: from_db_id(users)?,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
