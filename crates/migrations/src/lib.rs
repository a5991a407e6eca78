pub mod sql;
pub mod sqlite_version;

use indoc::indoc;
use sql::QUEUE_MIGRATIONS;
use sqlite_version::fetch_and_check_sqlite_version;
use sqlx::{query, query_as, FromRow, SqlitePool};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Error occured while parsing sqlite version '{0}'")]
    ParseVersionError(String),
    #[error("This version of queuectl requires SQLite v3.35.0 or greater (detected {0})")]
    IncompatibleVersion(String),
    #[error("Database is using queuectl schema revision {} which includes breaking migration {}, but the currently running worker only supports up to revision {}. It would be unsafe to continue; please upgrade queuectl.", .latest_migration, .latest_breaking_migration, .highest_migration)]
    IncompatbleRevision {
        latest_migration: i64,
        latest_breaking_migration: i64,
        highest_migration: u32,
    },
    #[error("Error occured while migrate: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Creates the bookkeeping table that records applied migrations.
async fn install_schema(pool: &SqlitePool) -> Result<(), MigrateError> {
    let version = fetch_and_check_sqlite_version(pool).await?;
    info!(sqlite_version = %version, "Installing queuectl schema");

    query(indoc! {r#"
        create table if not exists migrations (
            id integer primary key,
            ts text not null default (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            breaking integer not null default 0
        );
    "#})
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(FromRow, Default)]
pub struct LastMigration {
    id: Option<i64>,
    biggest_breaking_id: Option<i64>,
}

/// Returns the last migration that was run against the database.
/// It also installs the bookkeeping table if it doesn't exist.
async fn get_last_migration(pool: &SqlitePool) -> Result<LastMigration, MigrateError> {
    install_schema(pool).await?;

    let last_migration = query_as::<_, LastMigration>(indoc! {r#"
        select
            (select id from migrations order by id desc limit 1) as id,
            (select id from migrations where breaking = 1 order by id desc limit 1) as biggest_breaking_id;
    "#})
    .fetch_one(pool)
    .await?;

    Ok(last_migration)
}

impl LastMigration {
    fn is_before_number(&self, migration_number: u32) -> bool {
        self.id
            .map_or(true, |id| i64::from(migration_number) > id)
    }
}

/// Runs the migrations against the database.
///
/// Safe to call on every start: applied migrations are skipped and every
/// statement tolerates objects that already exist.
pub async fn migrate(pool: &SqlitePool) -> Result<(), MigrateError> {
    let last_migration = get_last_migration(pool).await?;
    let latest_migration = last_migration.id;
    let latest_breaking_migration = last_migration.biggest_breaking_id;

    let mut highest_migration = 0;
    let mut migrated = false;
    for migration in QUEUE_MIGRATIONS.iter() {
        let migration_number = migration.migration_number();

        if migration_number > highest_migration {
            highest_migration = migration_number;
        }

        if last_migration.is_before_number(migration_number) {
            migrated = true;
            info!(
                migration_number,
                migration_name = migration.name(),
                is_breaking_migration = migration.is_breaking(),
                "Running {} migration {}",
                if migration.is_breaking() {
                    "breaking"
                } else {
                    "backwards-compatible"
                },
                migration.name(),
            );
            let mut tx = pool.begin().await?;
            migration.execute(&mut tx).await?;
            query("insert or ignore into migrations (id, breaking) values (?1, ?2)")
                .bind(i64::from(migration_number))
                .bind(migration.is_breaking())
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
        }
    }

    if migrated {
        info!("Migrations complete");
    }

    if let Some(latest_breaking_migration) = latest_breaking_migration {
        if i64::from(highest_migration) < latest_breaking_migration {
            return Err(MigrateError::IncompatbleRevision {
                latest_migration: latest_migration.unwrap_or(0),
                latest_breaking_migration,
                highest_migration,
            });
        }
    }

    if let Some(latest_migration) = latest_migration {
        if i64::from(highest_migration) < latest_migration {
            warn!(
                latest_migration,
                highest_migration,
                "Database is using queuectl schema revision {}, but this binary only supports up to revision {}. Attempting to continue regardless.",
                latest_migration,
                highest_migration,
            );
        }
    }

    Ok(())
}
