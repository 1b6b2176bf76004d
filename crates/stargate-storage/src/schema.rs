use crate::mysql::map_sqlx_error;
use crate::Result;
use sqlx::MySqlPool;
use tracing::info;

const LINK_TEMPLATE: &str = include_str!("../ddl/mysql/t_link.sql");
const GOTO_TEMPLATE: &str = include_str!("../ddl/mysql/t_link_goto.sql");
const STATS_DDL: &str = include_str!("../ddl/mysql/stats.sql");

/// Renders every `CREATE TABLE` statement for a deployment with
/// `shard_count` partitions, one statement per entry.
pub fn render(shard_count: usize) -> Vec<String> {
    let mut statements = Vec::with_capacity(shard_count * 2 + 7);
    for template in [LINK_TEMPLATE, GOTO_TEMPLATE] {
        for shard in 0..shard_count {
            statements.push(template.trim().replace("{shard}", &shard.to_string()));
        }
    }
    statements.extend(
        STATS_DDL
            .split(';')
            .map(str::trim)
            .filter(|statement| !statement.is_empty())
            .map(str::to_string),
    );
    statements
}

/// Creates any missing table. Safe to run on every start.
pub async fn apply(pool: &MySqlPool, shard_count: usize) -> Result<()> {
    let statements = render(shard_count);
    for statement in &statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
    }
    info!(shard_count, tables = statements.len(), "schema applied");
    Ok(())
}
