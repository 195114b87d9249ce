//! # Database Migration Management
//!
//! This module handles database schema evolution using embedded SQL
//! migrations. Migrations ship inside the binary and are executed
//! automatically on pool creation when `auto_migrate` is enabled.

use crate::crypto::sha256_hex;
use crate::errors::{AuthPlaneError, Result};
use crate::storage::DbPool;
use sqlx::Row;
use tracing::{error, info};

/// One embedded migration.
struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

/// All schema migrations, in application order.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "create_control_plane_snapshots",
    sql: r#"
        CREATE TABLE IF NOT EXISTS control_plane_snapshots (
            snapshot_key TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            document TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
    "#,
}];

/// Run all pending database migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    create_migration_table(pool).await?;

    let applied = get_applied_migration_versions(pool).await?;

    let mut migrations_run = 0;
    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        info!(version = migration.version, "Running migration: {}", migration.description);
        let start_time = std::time::Instant::now();

        let mut tx = pool.begin().await.map_err(|e| {
            AuthPlaneError::database(e, "Failed to start migration transaction".to_string())
        })?;

        // raw_sql supports multi-statement migrations
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await.map_err(|e| {
            error!(error = %e, migration = migration.description, "Migration failed");
            AuthPlaneError::database(e, format!("Migration failed: {}", migration.description))
        })?;

        let execution_time = start_time.elapsed().as_millis() as i64;
        let checksum = sha256_hex(migration.sql);
        let now = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO _rezilient_migrations (version, description, checksum, execution_time, installed_on) VALUES (?1, ?2, ?3, ?4, ?5)"
        )
        .bind(migration.version)
        .bind(migration.description)
        .bind(&checksum)
        .bind(execution_time)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!(error = %e, migration = migration.description, "Failed to record migration");
            AuthPlaneError::database(e, format!("Failed to record migration: {}", migration.description))
        })?;

        tx.commit().await.map_err(|e| {
            AuthPlaneError::database(e, "Failed to commit migration transaction".to_string())
        })?;

        migrations_run += 1;
        info!(
            version = migration.version,
            execution_time_ms = execution_time,
            "Migration completed: {}",
            migration.description
        );
    }

    if migrations_run > 0 {
        info!(count = migrations_run, "Database migrations completed");
    }

    Ok(())
}

/// Create the migration tracking table
async fn create_migration_table(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _rezilient_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            checksum TEXT NOT NULL,
            execution_time INTEGER NOT NULL,
            installed_on TEXT NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        AuthPlaneError::database(e, "Failed to create migration tracking table".to_string())
    })?;

    Ok(())
}

/// Get list of applied migration versions
async fn get_applied_migration_versions(pool: &DbPool) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT version FROM _rezilient_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| {
            AuthPlaneError::database(e, "Failed to get applied migrations".to_string())
        })?;

    Ok(rows.into_iter().map(|row| row.get::<i64, _>("version")).collect())
}
