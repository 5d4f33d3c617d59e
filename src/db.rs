use crate::constants::{DB_BUSY_TIMEOUT_MS, DB_MAX_CONNECTIONS};
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;

pub type DbPool = SqlitePool;

/// The conversation store collaborator. It owns every persisted record; the
/// relay only submits create and append mutations.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, new: NewConversation) -> Result<ConversationId>;

    /// Appends turns to a conversation owned by `user_id`. The title is left untouched.
    async fn append_turns(
        &self,
        id: &ConversationId,
        user_id: &UserId,
        turns: Vec<StoredTurn>,
    ) -> Result<()>;

    async fn find_conversation(
        &self,
        id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<PersistedConversation>>;

    /// Newest `updated_at` first.
    async fn list_conversations(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<ConversationSummary>>;

    /// Overwrites the turn list. Returns false when no owned record matched.
    async fn replace_turns(
        &self,
        id: &ConversationId,
        user_id: &UserId,
        turns: Vec<StoredTurn>,
    ) -> Result<bool>;

    async fn delete_conversation(&self, id: &ConversationId, user_id: &UserId) -> Result<bool>;

    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

pub async fn init_db<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let options = connect_options(path.as_ref());

    let pool = match SqlitePoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .connect_with(options)
        .await
    {
        Ok(p) => p,
        Err(e) => return Err(RelayError::Database(e).into()),
    };

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        return Err(RelayError::Internal(
            format!("Migration failed: {}", e),
            tracing_error::SpanTrace::capture(),
        )
        .into());
    }

    verify_schema_version(&pool).await;

    Ok(pool)
}

/// Pragmas are per connection, so they ride on the connect options and apply
/// to every pooled connection.
fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DB_BUSY_TIMEOUT_MS))
}

async fn verify_schema_version(pool: &DbPool) {
    let version_row: std::result::Result<(String,), sqlx::Error> =
        sqlx::query_as("SELECT value FROM schema_metadata WHERE key = 'schema_version'")
            .fetch_one(pool)
            .await;

    match version_row {
        Ok((version,)) => {
            tracing::info!("Database initialized. Schema version: {}", version);
        }
        Err(e) => {
            tracing::warn!("Could not verify schema version: {}", e);
        }
    }
}

fn to_db_time(t: &DateTime<Utc>) -> String {
    // Fixed-width UTC so lexical order matches time order.
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(t) => Ok(t.with_timezone(&Utc)),
        Err(e) => Err(RelayError::Internal(
            format!("Corrupt timestamp '{}': {}", s, e),
            tracing_error::SpanTrace::capture(),
        )
        .into()),
    }
}

fn role_from_db(s: &str) -> Result<Role> {
    match Role::from_wire(s) {
        Some(r) => Ok(r),
        None => Err(RelayError::Internal(
            format!("Corrupt role '{}'", s),
            tracing_error::SpanTrace::capture(),
        )
        .into()),
    }
}

#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: DbPool,
}

impl SqliteConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn insert_turns(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: &ConversationId,
        first_position: i64,
        turns: &[StoredTurn],
    ) -> Result<()> {
        for (offset, turn) in turns.iter().enumerate() {
            let content_json = serde_json::to_string(&turn.content)?;
            sqlx::query(
                "INSERT INTO conversation_turns (conversation_id, position, role, content_json, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&id.0)
            .bind(first_position + offset as i64)
            .bind(turn.role.as_str())
            .bind(content_json)
            .bind(to_db_time(&turn.created_at))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Ownership check that doubles as the transaction's first write.
    ///
    /// Must run before any read in the transaction: SQLite only honours
    /// `busy_timeout` when the write lock is taken up front, not on a
    /// read-to-write upgrade.
    async fn touch_owned(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: &ConversationId,
        user_id: &UserId,
    ) -> Result<bool> {
        let touched = sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(to_db_time(&Utc::now()))
            .bind(&id.0)
            .bind(&user_id.0)
            .execute(&mut **tx)
            .await?;
        Ok(touched.rows_affected() > 0)
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(&self, new: NewConversation) -> Result<ConversationId> {
        let id = ConversationId::new();
        let now = to_db_time(&Utc::now());

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(&new.user_id.0)
        .bind(&new.title)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        Self::insert_turns(&mut tx, &id, 0, &new.turns).await?;
        tx.commit().await?;

        tracing::debug!(
            "Created conversation [{}...] with {} turns",
            id.short(),
            new.turns.len()
        );
        Ok(id)
    }

    async fn append_turns(
        &self,
        id: &ConversationId,
        user_id: &UserId,
        turns: Vec<StoredTurn>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if !Self::touch_owned(&mut tx, id, user_id).await? {
            return Err(RelayError::NotFound(format!("Conversation {} not found", id)).into());
        }

        let (next_position,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM conversation_turns WHERE conversation_id = ?",
        )
        .bind(&id.0)
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_turns(&mut tx, id, next_position, &turns).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_conversation(
        &self,
        id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<PersistedConversation>> {
        let header = sqlx::query(
            "SELECT title, created_at, updated_at FROM conversations WHERE id = ? AND user_id = ?",
        )
        .bind(&id.0)
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let header = match header {
            Some(h) => h,
            None => return Ok(None),
        };

        let rows = sqlx::query(
            "SELECT role, content_json, created_at FROM conversation_turns WHERE conversation_id = ? ORDER BY position ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.get(0);
            let content_json: String = row.get(1);
            let created_at: String = row.get(2);
            turns.push(StoredTurn {
                role: role_from_db(&role)?,
                content: serde_json::from_str(&content_json)?,
                created_at: from_db_time(&created_at)?,
            });
        }

        let created_at: String = header.get(1);
        let updated_at: String = header.get(2);
        Ok(Some(PersistedConversation {
            id: id.clone(),
            user_id: user_id.clone(),
            title: header.get(0),
            turns,
            created_at: from_db_time(&created_at)?,
            updated_at: from_db_time(&updated_at)?,
        }))
    }

    async fn list_conversations(
        &self,
        user_id: &UserId,
        limit: i64,
    ) -> Result<Vec<ConversationSummary>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE user_id = ? ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(&user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (id, title, created_at, updated_at) in rows {
            summaries.push(ConversationSummary {
                id: ConversationId(id),
                title,
                created_at: from_db_time(&created_at)?,
                updated_at: from_db_time(&updated_at)?,
            });
        }
        Ok(summaries)
    }

    async fn replace_turns(
        &self,
        id: &ConversationId,
        user_id: &UserId,
        turns: Vec<StoredTurn>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        if !Self::touch_owned(&mut tx, id, user_id).await? {
            return Ok(false);
        }

        sqlx::query("DELETE FROM conversation_turns WHERE conversation_id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        Self::insert_turns(&mut tx, id, 0, &turns).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_conversation(&self, id: &ConversationId, user_id: &UserId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM conversations WHERE id = ? AND user_id = ?")
            .bind(&id.0)
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM conversation_turns WHERE conversation_id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_all_for_user(&self, user_id: &UserId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM conversation_turns WHERE conversation_id IN (SELECT id FROM conversations WHERE user_id = ?)",
        )
        .bind(&user_id.0)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM conversations WHERE user_id = ?")
            .bind(&user_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
