use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    QueryBuilder, Sqlite, SqlitePool,
};

use super::{
    validate_field, Direction, Document, DocumentStore, Fields, StoreError, DEFAULT_IN_LIMIT,
};

const IN_MEMORY: &str = ":memory:";

/// Document store backed by a single SQLite table.
///
/// Each document is one row of `documents(collection, id, data)` with the
/// body kept as JSON text and queried through `json_extract`. No per-field
/// indexes are declared, matching the "no composite index" constraint the
/// catalog is written against.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
    in_limit: usize,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    data: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<Document, StoreError> {
        let data: Fields = serde_json::from_str(&self.data)?;
        Ok(Document::new(self.id, data))
    }
}

/// Map a sqlx error, recognising SQLite lock contention.
///
/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all mean
/// another process owns the database file.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    let message = err.to_string().to_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
    {
        return StoreError::InstanceLocked;
    }
    StoreError::Database(err)
}

fn json_path(field: &str) -> Result<String, StoreError> {
    validate_field(field)?;
    Ok(format!("$.{field}"))
}

/// Bind a scalar JSON value the way `json_extract` would return it.
fn push_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) -> Result<(), StoreError> {
    match value {
        Value::Bool(b) => {
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                builder.push_bind(i);
            } else if let Some(f) = n.as_f64() {
                builder.push_bind(f);
            } else {
                return Err(StoreError::UnsupportedValue(n.to_string()));
            }
        }
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        Value::Null | Value::Array(_) | Value::Object(_) => {
            return Err(StoreError::UnsupportedValue(value.to_string()));
        }
    }
    Ok(())
}

fn push_extract(builder: &mut QueryBuilder<'_, Sqlite>, path: &str) {
    builder.push("json_extract(data, ");
    builder.push_bind(path.to_string());
    builder.push(")");
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database on a single pinned
    /// connection, since every SQLite connection to `:memory:` is a separate
    /// database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InstanceLocked` if another process holds the
    /// database lock, `StoreError::Migration` if the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // SEC-010: Pre-create the database file user-only before SQLite does.
        #[cfg(unix)]
        if path != IN_MEMORY {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // SQLite reports the real error at connect time.
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(map_sqlx)?
            .pragma("busy_timeout", "5000");

        let pool_options = if path == IN_MEMORY {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        let store = Self {
            pool,
            in_limit: DEFAULT_IN_LIMIT,
        };
        store.migrate().await.map_err(|e| match e {
            StoreError::InstanceLocked => StoreError::InstanceLocked,
            other => StoreError::Migration(other.to_string()),
        })?;
        tracing::debug!(path = %path, "Opened SQLite document store");
        Ok(store)
    }

    /// Override the "in" cardinality limit (clamped to at least 1).
    pub fn with_in_limit(mut self, in_limit: usize) -> Self {
        self.in_limit = in_limit.max(1);
        self
    }

    /// Create the documents table. Idempotent.
    async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                UNIQUE(collection, id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        // Collection scans return insertion order.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_collection_seq ON documents(collection, seq)",
        )
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn fetch_rows(
        &self,
        mut builder: QueryBuilder<'_, Sqlite>,
    ) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<DocumentRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.into_iter().map(DocumentRow::into_document).collect()
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, data FROM documents WHERE collection = ? ORDER BY seq",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    async fn fetch_where_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let path = json_path(field)?;
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, data FROM documents WHERE collection = ");
        builder.push_bind(collection.to_string());
        builder.push(" AND ");
        push_extract(&mut builder, &path);
        if value.is_null() {
            builder.push(" IS NULL");
        } else {
            builder.push(" = ");
            push_value(&mut builder, value)?;
        }
        builder.push(" ORDER BY seq");

        self.fetch_rows(builder).await
    }

    async fn fetch_where_in(
        &self,
        collection: &str,
        field: &str,
        values: &[Value],
    ) -> Result<Vec<Document>, StoreError> {
        let path = json_path(field)?;
        if values.len() > self.in_limit {
            return Err(StoreError::InLimitExceeded {
                requested: values.len(),
                limit: self.in_limit,
            });
        }
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let (nulls, scalars): (Vec<&Value>, Vec<&Value>) = values.iter().partition(|v| v.is_null());

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, data FROM documents WHERE collection = ");
        builder.push_bind(collection.to_string());
        builder.push(" AND (");
        if !scalars.is_empty() {
            push_extract(&mut builder, &path);
            builder.push(" IN (");
            for (i, value) in scalars.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(&mut builder, value)?;
            }
            builder.push(")");
        }
        if !nulls.is_empty() {
            if !scalars.is_empty() {
                builder.push(" OR ");
            }
            push_extract(&mut builder, &path);
            builder.push(" IS NULL");
        }
        builder.push(") ORDER BY seq");

        tracing::debug!(collection, field, values = values.len(), "fetch_where_in");
        self.fetch_rows(builder).await
    }

    async fn fetch_ordered(
        &self,
        collection: &str,
        field: &str,
        direction: Direction,
        limit: usize,
        start_after: Option<&str>,
    ) -> Result<Vec<Document>, StoreError> {
        let path = json_path(field)?;
        let limit: i64 = limit.try_into().unwrap_or(i64::MAX);

        let cursor = match start_after {
            Some(id) => Some(
                self.get(collection, id)
                    .await?
                    .ok_or_else(|| StoreError::CursorNotFound(id.to_string()))?,
            ),
            None => None,
        };

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, data FROM documents WHERE collection = ");
        builder.push_bind(collection.to_string());

        // Rows strictly after the cursor in (value, id) order. NULL sorts
        // lowest, so it comes first ascending and last descending.
        if let Some(cursor) = &cursor {
            let value = cursor.field(field);
            let (cmp, id_cmp) = match direction {
                Direction::Ascending => (" > ", " > "),
                Direction::Descending => (" < ", " < "),
            };
            builder.push(" AND (");
            match (value.is_null(), direction) {
                (false, _) => {
                    push_extract(&mut builder, &path);
                    builder.push(cmp);
                    push_value(&mut builder, value)?;
                    builder.push(" OR (");
                    push_extract(&mut builder, &path);
                    builder.push(" = ");
                    push_value(&mut builder, value)?;
                    builder.push(" AND id");
                    builder.push(id_cmp);
                    builder.push_bind(cursor.id.clone());
                    builder.push(")");
                    if direction == Direction::Descending {
                        builder.push(" OR ");
                        push_extract(&mut builder, &path);
                        builder.push(" IS NULL");
                    }
                }
                (true, Direction::Ascending) => {
                    push_extract(&mut builder, &path);
                    builder.push(" IS NOT NULL OR id > ");
                    builder.push_bind(cursor.id.clone());
                }
                (true, Direction::Descending) => {
                    push_extract(&mut builder, &path);
                    builder.push(" IS NULL AND id < ");
                    builder.push_bind(cursor.id.clone());
                }
            }
            builder.push(")");
        }

        let order = match direction {
            Direction::Ascending => " ASC",
            Direction::Descending => " DESC",
        };
        builder.push(" ORDER BY ");
        push_extract(&mut builder, &path);
        builder.push(order);
        builder.push(", id");
        builder.push(order);
        builder.push(" LIMIT ");
        builder.push_bind(limit);

        tracing::debug!(collection, field, limit, cursor = ?start_after, "fetch_ordered");
        self.fetch_rows(builder).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT id, data FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;
        row.map(DocumentRow::into_document).transpose()
    }

    async fn insert(&self, collection: &str, data: Fields) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let body = serde_json::to_string(&data)?;
        sqlx::query("INSERT INTO documents (collection, id, data) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(&id)
            .bind(body)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Fields) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        let (body,) = row.ok_or_else(|| StoreError::not_found(collection, id))?;

        let mut data: Fields = serde_json::from_str(&body)?;
        data.extend(patch);

        sqlx::query("UPDATE documents SET data = ? WHERE collection = ? AND id = ?")
            .bind(serde_json::to_string(&data)?)
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection, id));
        }
        Ok(())
    }

    fn max_in_values(&self) -> usize {
        self.in_limit
    }
}
