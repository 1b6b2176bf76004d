use crate::mysql::map_sqlx_error;
use crate::sharding::ShardRouter;
use async_trait::async_trait;
use jiff::civil::Date;
use jiff::Timestamp;
use sqlx::MySqlPool;
use stargate_core::error::StorageError;
use stargate_core::shortcode::FullShortUrl;
use stargate_core::stats::{Dimension, DimensionRow, FirstVisit, StatsEvent, StatsSink};
use tracing::trace;

type Result<T> = std::result::Result<T, StorageError>;

/// Writes click aggregates to MySQL.
///
/// Counter tables carry a unique key over `(full_short_url, date, value
/// columns)`, so each upsert is a single `INSERT ... ON DUPLICATE KEY
/// UPDATE` and concurrent consumers cannot lose increments.
#[derive(Debug, Clone)]
pub struct MySqlStatsSink {
    pool: MySqlPool,
    router: ShardRouter,
}

impl MySqlStatsSink {
    pub fn new(pool: MySqlPool, router: ShardRouter) -> Self {
        Self { pool, router }
    }

    /// Inserts a `(full_short_url, date, key columns)` row with `cnt = 1`,
    /// or increments `cnt` on the existing row.
    async fn upsert_counter(
        &self,
        table: &str,
        full_short_url: &FullShortUrl,
        date: Date,
        key_columns: &[&str],
        key_values: &[&str],
    ) -> Result<()> {
        let now = Timestamp::now().as_second();
        let columns = key_columns.join(", ");
        let placeholders = vec!["?"; key_columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table} (full_short_url, date, {columns}, cnt, create_time, update_time) \
             VALUES (?, ?, {placeholders}, 1, ?, ?) \
             ON DUPLICATE KEY UPDATE cnt = cnt + 1, update_time = ?"
        );

        let mut query = sqlx::query(&sql)
            .bind(full_short_url.as_str())
            .bind(date.to_string());
        for value in key_values {
            query = query.bind(*value);
        }
        query
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl StatsSink for MySqlStatsSink {
    async fn increment_link_totals(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
        first_visit: FirstVisit,
    ) -> Result<bool> {
        let table = self.router.link_table(gid);
        let sql = format!(
            "UPDATE {table} SET total_pv = total_pv + 1, total_uv = total_uv + ?, \
             total_uip = total_uip + ?, update_time = ? \
             WHERE gid = ? AND full_short_url = ? AND del_flag = 0"
        );

        let result = sqlx::query(&sql)
            .bind(i64::from(first_visit.by_visitor))
            .bind(i64::from(first_visit.by_ip))
            .bind(Timestamp::now().as_second())
            .bind(gid)
            .bind(full_short_url.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_today(
        &self,
        full_short_url: &FullShortUrl,
        date: Date,
        first_visit: FirstVisit,
    ) -> Result<()> {
        let now = Timestamp::now().as_second();
        let uv = i64::from(first_visit.by_visitor);
        let uip = i64::from(first_visit.by_ip);

        sqlx::query(
            r#"
            INSERT INTO t_link_stats_today
                (full_short_url, date, today_pv, today_uv, today_uip, create_time, update_time)
            VALUES (?, ?, 1, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                today_pv = today_pv + 1,
                today_uv = today_uv + ?,
                today_uip = today_uip + ?,
                update_time = ?
            "#,
        )
        .bind(full_short_url.as_str())
        .bind(date.to_string())
        .bind(uv)
        .bind(uip)
        .bind(now)
        .bind(now)
        .bind(uv)
        .bind(uip)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn upsert_dimension(&self, row: &DimensionRow) -> Result<()> {
        trace!(full_short_url = %row.full_short_url, kind = row.dimension.kind(), "upserting dimension");
        let url = &row.full_short_url;
        match &row.dimension {
            Dimension::Locale(locale) => {
                self.upsert_counter(
                    "t_link_locale_stats",
                    url,
                    row.date,
                    &["province", "city", "adcode"],
                    &[
                        locale.province.as_str(),
                        locale.city.as_str(),
                        locale.adcode.as_str(),
                    ],
                )
                .await
            }
            Dimension::Browser(browser) => {
                self.upsert_counter("t_link_browser_stats", url, row.date, &["browser"], &[browser.as_str()])
                    .await
            }
            Dimension::Os(os) => {
                self.upsert_counter("t_link_os_stats", url, row.date, &["os"], &[os.as_str()])
                    .await
            }
            Dimension::Device(device) => {
                self.upsert_counter("t_link_device_stats", url, row.date, &["device"], &[device.as_str()])
                    .await
            }
            Dimension::Network(network) => {
                self.upsert_counter(
                    "t_link_network_stats",
                    url,
                    row.date,
                    &["network"],
                    &[network.as_str()],
                )
                .await
            }
        }
    }

    async fn append_access_log(&self, event: &StatsEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO t_link_access_logs
                (full_short_url, gid, visitor, ip, browser, os, device, network, locale, create_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.full_short_url.as_str())
        .bind(&event.gid)
        .bind(&event.visitor_id)
        .bind(&event.ip)
        .bind(&event.browser)
        .bind(&event.os)
        .bind(&event.device)
        .bind(&event.network)
        .bind(&event.locale)
        .bind(event.event_time.as_second())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
