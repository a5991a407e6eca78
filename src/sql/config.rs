use indoc::indoc;
use sqlx::{query, query_as, query_scalar, SqliteExecutor};

use crate::errors::Result;

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", key = %key))]
pub async fn get_config_value<'e>(executor: impl SqliteExecutor<'e>, key: &str) -> Result<Option<String>> {
    let value = query_scalar("select value from config where key = ?1;")
        .bind(key)
        .fetch_optional(executor)
        .await?;

    Ok(value)
}

/// Values of the given keys that are present in the table.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite"))]
pub async fn get_config_values<'e>(
    executor: impl SqliteExecutor<'e>,
    keys: &[&str],
) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> = query_as("select key, value from config order by key;")
        .fetch_all(executor)
        .await?;

    Ok(rows
        .into_iter()
        .filter(|(key, _)| keys.contains(&key.as_str()))
        .collect())
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="sqlite", key = %key))]
pub async fn set_config_value<'e>(executor: impl SqliteExecutor<'e>, key: &str, value: &str) -> Result<()> {
    query(indoc! {r#"
        insert into config (key, value) values (?1, ?2)
            on conflict (key) do update set value = excluded.value;
    "#})
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;

    Ok(())
}
