use std::{path::Path, time::Duration};

use {
    async_trait::async_trait,
    sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    tracing::{debug, warn},
    wagate_common::{EventSet, TenantId},
};

use crate::{
    record::{NewTenant, TenantRecord, TenantUpdate},
    store::{Result, TenantError, TenantStore},
};

/// SQLite-backed tenant store.
#[derive(Clone)]
pub struct SqliteTenantStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: i64,
    name: String,
    token: String,
    webhook: String,
    jid: String,
    qrcode: String,
    connected: i64,
    expiration: Option<i64>,
    events: String,
}

impl From<TenantRow> for TenantRecord {
    fn from(r: TenantRow) -> Self {
        let (events, unknown) = EventSet::from_column(&r.events);
        if !unknown.is_empty() {
            warn!(tenant = r.id, ?unknown, "ignoring unknown event types in subscription");
        }
        Self {
            id: r.id,
            name: r.name,
            token: r.token,
            webhook: non_empty(r.webhook),
            session_id: non_empty(r.jid),
            qrcode: non_empty(r.qrcode),
            connected: r.connected != 0,
            expiration: r.expiration,
            events,
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

fn map_write_err(e: sqlx::Error) -> TenantError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => TenantError::DuplicateToken,
        _ => TenantError::Unavailable(e),
    }
}

impl SqliteTenantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and bootstrap the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            return Err(TenantError::Unavailable(sqlx::Error::Io(e)));
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(3));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::init(&pool).await?;
        debug!(path = %path.display(), "tenant store opened");
        Ok(Self::new(pool))
    }

    /// Create the `users` table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id          INTEGER NOT NULL PRIMARY KEY,
                name        TEXT NOT NULL,
                token       TEXT NOT NULL UNIQUE,
                webhook     TEXT NOT NULL DEFAULT '',
                jid         TEXT NOT NULL DEFAULT '',
                qrcode      TEXT NOT NULL DEFAULT '',
                connected   INTEGER NOT NULL DEFAULT 0,
                expiration  INTEGER,
                events      TEXT NOT NULL DEFAULT 'All'
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_connected ON users (connected)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
    async fn get_by_id(&self, id: TenantId) -> Result<Option<TenantRecord>> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<TenantRecord>> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM users WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        let rows = sqlx::query_as::<_, TenantRow>("SELECT * FROM users ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_connected(&self) -> Result<Vec<TenantRecord>> {
        let rows = sqlx::query_as::<_, TenantRow>(
            "SELECT * FROM users WHERE connected = 1 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create(&self, tenant: NewTenant) -> Result<TenantRecord> {
        let token = tenant.resolved_token();
        let id = sqlx::query(
            r#"INSERT INTO users (name, token, webhook, expiration, events)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&tenant.name)
        .bind(&token)
        .bind(tenant.webhook.as_deref().unwrap_or(""))
        .bind(tenant.expiration)
        .bind(tenant.events.to_column())
        .execute(&self.pool)
        .await
        .map_err(map_write_err)?
        .last_insert_rowid();

        self.get_by_id(id).await?.ok_or(TenantError::NotFound(id))
    }

    async fn update(&self, id: TenantId, update: TenantUpdate) -> Result<TenantRecord> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(TenantError::NotFound(id))?;

        let mut record = TenantRecord::from(row);
        update.apply(&mut record);

        sqlx::query(
            "UPDATE users SET name = ?, webhook = ?, expiration = ?, events = ? WHERE id = ?",
        )
        .bind(&record.name)
        .bind(record.webhook.as_deref().unwrap_or(""))
        .bind(record.expiration)
        .bind(record.events.to_column())
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(map_write_err)?;
        tx.commit().await?;

        Ok(record)
    }

    async fn delete(&self, id: TenantId) -> Result<Option<TenantRecord>> {
        let existing = self.get_by_id(id).await?;
        if existing.is_some() {
            sqlx::query("DELETE FROM users WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(existing)
    }

    async fn set_connected(&self, id: TenantId, connected: bool) -> Result<()> {
        sqlx::query("UPDATE users SET connected = ? WHERE id = ?")
            .bind(i64::from(connected))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_session_id(&self, id: TenantId, session_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE users SET jid = ? WHERE id = ?")
            .bind(session_id.unwrap_or(""))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_qrcode(&self, id: TenantId, qrcode: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE users SET qrcode = ? WHERE id = ?")
            .bind(qrcode.unwrap_or(""))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
