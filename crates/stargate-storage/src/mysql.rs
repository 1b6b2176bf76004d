use crate::sharding::ShardRouter;
use crate::Result;
use async_trait::async_trait;
use jiff::Timestamp;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use stargate_core::error::StorageError;
use stargate_core::link::{GotoRecord, LinkRecord, ValidDate};
use stargate_core::repository::LinkRepository;
use stargate_core::shortcode::{FullShortUrl, ShortCode};
use tracing::{debug, trace};

const LINK_COLUMNS: &str = "id, domain, short_uri, full_short_url, origin_url, gid, favicon, \
     description, enable_status, valid_date_type, valid_date, total_pv, total_uv, total_uip, \
     create_time, update_time, del_time, del_flag";

/// MySQL implementation of the sharded link repository.
///
/// Every shard lives in the same database and shares one pool. Soft delete
/// sets `del_flag`; deleted rows stay in place so a full short URL is never
/// reissued.
#[derive(Debug, Clone)]
pub struct MySqlLinkRepository {
    pool: MySqlPool,
    router: ShardRouter,
}

impl MySqlLinkRepository {
    /// Creates a repository from an existing MySQL connection pool.
    pub fn new(pool: MySqlPool, router: ShardRouter) -> Self {
        Self { pool, router }
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn router(&self) -> ShardRouter {
        self.router
    }

    async fn find_link_in(
        &self,
        table: &str,
        gid: Option<&str>,
        full_short_url: &FullShortUrl,
    ) -> Result<Option<LinkRecord>> {
        let row = match gid {
            Some(gid) => {
                let sql = format!(
                    "SELECT {LINK_COLUMNS} FROM {table} WHERE gid = ? AND full_short_url = ? LIMIT 1"
                );
                sqlx::query(&sql)
                    .bind(gid)
                    .bind(full_short_url.as_str())
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                let sql =
                    format!("SELECT {LINK_COLUMNS} FROM {table} WHERE full_short_url = ? LIMIT 1");
                sqlx::query(&sql)
                    .bind(full_short_url.as_str())
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_error)?;

        row.as_ref().map(link_from_row).transpose()
    }
}

pub(crate) fn timestamp_from_seconds(column: &str, seconds: i64) -> Result<Timestamp> {
    Timestamp::from_second(seconds).map_err(|e| {
        StorageError::InvalidData(format!("invalid {column} timestamp '{seconds}': {e}"))
    })
}

fn counter(row: &MySqlRow, column: &str) -> Result<u64> {
    let value: i64 = row.try_get(column).map_err(map_sqlx_error)?;
    u64::try_from(value)
        .map_err(|_| StorageError::InvalidData(format!("negative {column} counter: {value}")))
}

fn link_from_row(row: &MySqlRow) -> Result<LinkRecord> {
    let valid_type: i8 = row.try_get("valid_date_type").map_err(map_sqlx_error)?;
    let valid_until: Option<i64> = row.try_get("valid_date").map_err(map_sqlx_error)?;
    let valid_until = valid_until
        .map(|seconds| timestamp_from_seconds("valid_date", seconds))
        .transpose()?;
    let valid_date = ValidDate::from_parts(valid_type as u8, valid_until)
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;

    let deleted_at: Option<i64> = row.try_get("del_time").map_err(map_sqlx_error)?;
    let enable_status: i8 = row.try_get("enable_status").map_err(map_sqlx_error)?;
    let del_flag: i8 = row.try_get("del_flag").map_err(map_sqlx_error)?;
    let short_uri: String = row.try_get("short_uri").map_err(map_sqlx_error)?;
    let full_short_url: String = row.try_get("full_short_url").map_err(map_sqlx_error)?;

    Ok(LinkRecord {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        gid: row.try_get("gid").map_err(map_sqlx_error)?,
        domain: row.try_get("domain").map_err(map_sqlx_error)?,
        short_code: ShortCode::new_unchecked(short_uri),
        full_short_url: FullShortUrl::from_raw(full_short_url),
        origin_url: row.try_get("origin_url").map_err(map_sqlx_error)?,
        favicon: row.try_get("favicon").map_err(map_sqlx_error)?,
        description: row.try_get("description").map_err(map_sqlx_error)?,
        disabled: enable_status != 0,
        deleted: del_flag != 0,
        deleted_at: deleted_at
            .map(|seconds| timestamp_from_seconds("del_time", seconds))
            .transpose()?,
        valid_date,
        total_pv: counter(row, "total_pv")?,
        total_uv: counter(row, "total_uv")?,
        total_uip: counter(row, "total_uip")?,
        created_at: timestamp_from_seconds(
            "create_time",
            row.try_get("create_time").map_err(map_sqlx_error)?,
        )?,
        updated_at: timestamp_from_seconds(
            "update_time",
            row.try_get("update_time").map_err(map_sqlx_error)?,
        )?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StorageError {
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

#[async_trait]
impl LinkRepository for MySqlLinkRepository {
    async fn insert(&self, link: &LinkRecord, goto: &GotoRecord) -> Result<()> {
        let goto_table = self.router.goto_table(goto.full_short_url.as_str());
        let link_table = self.router.link_table(&link.gid);
        trace!(full_short_url = %link.full_short_url, %goto_table, %link_table, "inserting link");

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let goto_sql =
            format!("INSERT INTO {goto_table} (id, full_short_url, gid) VALUES (?, ?, ?)");
        let result = sqlx::query(&goto_sql)
            .bind(goto.id)
            .bind(goto.full_short_url.as_str())
            .bind(&goto.gid)
            .execute(&mut *tx)
            .await;
        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StorageError::Conflict(link.full_short_url.to_string()))
            }
            Err(err) => return Err(map_sqlx_error(err)),
        }

        let link_sql = format!(
            "INSERT INTO {link_table} ({LINK_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let result = sqlx::query(&link_sql)
            .bind(link.id)
            .bind(&link.domain)
            .bind(link.short_code.as_str())
            .bind(link.full_short_url.as_str())
            .bind(&link.origin_url)
            .bind(&link.gid)
            .bind(link.favicon.as_deref())
            .bind(link.description.as_deref())
            .bind(i8::from(link.disabled))
            .bind(link.valid_date.type_code() as i8)
            .bind(link.valid_date.until().map(|ts| ts.as_second()))
            .bind(link.total_pv as i64)
            .bind(link.total_uv as i64)
            .bind(link.total_uip as i64)
            .bind(link.created_at.as_second())
            .bind(link.updated_at.as_second())
            .bind(link.deleted_at.map(|ts| ts.as_second()))
            .bind(i8::from(link.deleted))
            .execute(&mut *tx)
            .await;
        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StorageError::Conflict(link.full_short_url.to_string()))
            }
            Err(err) => return Err(map_sqlx_error(err)),
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(full_short_url = %link.full_short_url, gid = %link.gid, "link inserted");
        Ok(())
    }

    async fn find_goto(&self, full_short_url: &FullShortUrl) -> Result<Option<GotoRecord>> {
        let table = self.router.goto_table(full_short_url.as_str());
        let sql = format!("SELECT id, gid FROM {table} WHERE full_short_url = ? LIMIT 1");

        let row = sqlx::query(&sql)
            .bind(full_short_url.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(GotoRecord {
            id: row.try_get("id").map_err(map_sqlx_error)?,
            full_short_url: full_short_url.clone(),
            gid: row.try_get("gid").map_err(map_sqlx_error)?,
        }))
    }

    async fn find_link(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
    ) -> Result<Option<LinkRecord>> {
        let table = self.router.link_table(gid);
        self.find_link_in(&table, Some(gid), full_short_url).await
    }

    async fn exists(&self, full_short_url: &FullShortUrl) -> Result<bool> {
        Ok(self.find_goto(full_short_url).await?.is_some())
    }

    async fn set_disabled(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
        disabled: bool,
    ) -> Result<bool> {
        let table = self.router.link_table(gid);
        let sql = format!(
            "UPDATE {table} SET enable_status = ?, update_time = ? \
             WHERE gid = ? AND full_short_url = ? AND del_flag = 0"
        );

        let result = sqlx::query(&sql)
            .bind(i8::from(disabled))
            .bind(Timestamp::now().as_second())
            .bind(gid)
            .bind(full_short_url.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete(&self, gid: &str, full_short_url: &FullShortUrl) -> Result<bool> {
        let table = self.router.link_table(gid);
        let now = Timestamp::now().as_second();
        let sql = format!(
            "UPDATE {table} SET del_flag = 1, del_time = ?, update_time = ? \
             WHERE gid = ? AND full_short_url = ? AND del_flag = 0"
        );

        let result = sqlx::query(&sql)
            .bind(now)
            .bind(now)
            .bind(gid)
            .bind(full_short_url.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_link_unscoped(
        &self,
        full_short_url: &FullShortUrl,
    ) -> Result<Option<LinkRecord>> {
        for table in self.router.all_link_tables() {
            if let Some(link) = self.find_link_in(&table, None, full_short_url).await? {
                return Ok(Some(link));
            }
        }
        Ok(None)
    }

    async fn all_short_codes(&self) -> Result<Vec<ShortCode>> {
        let mut codes = Vec::new();
        for table in self.router.all_link_tables() {
            let sql = format!("SELECT short_uri FROM {table}");
            let rows = sqlx::query(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            for row in rows {
                let code: String = row.try_get("short_uri").map_err(map_sqlx_error)?;
                codes.push(ShortCode::new_unchecked(code));
            }
        }
        Ok(codes)
    }
}
