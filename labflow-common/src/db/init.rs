//! Database initialization
//!
//! Creates the LabFlow schema on first run. All statements are idempotent
//! (`CREATE TABLE IF NOT EXISTS`), so initialization is safe to repeat.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_and_migrate(&pool).await?;

    Ok(pool)
}

/// Open an in-memory database with the full schema. Used by tests.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    configure_and_migrate(&pool).await?;

    Ok(pool)
}

async fn configure_and_migrate(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL mode allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_request_types_table(pool).await?;
    create_submissions_table(pool).await?;
    create_orders_table(pool).await?;
    create_order_assets_table(pool).await?;
    create_requests_table(pool).await?;
    create_pre_capture_pool_tables(pool).await?;

    init_default_request_types(pool).await?;

    Ok(())
}

async fn create_request_types_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS request_types (
            id INTEGER PRIMARY KEY,
            key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('library_creation', 'multiplexing', 'sequencing', 'transfer')),
            for_multiplexing INTEGER NOT NULL DEFAULT 0,
            pooling_method TEXT CHECK (pooling_method IS NULL OR pooling_method = 'fixed_pool'),
            pool_count INTEGER CHECK (pool_count IS NULL OR pool_count > 0),
            for_pre_capture_pooling INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (pooling_method IS NULL OR pool_count IS NOT NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the submissions table
///
/// State column tracks the submission lifecycle; requests are only created
/// by a successful build, so a `building` submission has none.
pub async fn create_submissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            name TEXT,
            state TEXT NOT NULL DEFAULT 'building'
                CHECK (state IN ('building', 'pending', 'ready', 'failed', 'cancelled')),
            message TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_submissions_state ON submissions(state)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_orders_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            submission_id INTEGER NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            study_id INTEGER,
            project_id INTEGER,
            contaminated_human_dna INTEGER NOT NULL DEFAULT 0,
            remove_x_and_autosomes INTEGER NOT NULL DEFAULT 0,
            request_types TEXT NOT NULL,
            multipliers TEXT NOT NULL DEFAULT '{}',
            request_options TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_submission ON orders(submission_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_order_assets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS order_assets (
            order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            asset_id INTEGER NOT NULL,
            PRIMARY KEY (order_id, position),
            CHECK (position >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the requests table
///
/// Request ids are assigned explicitly by the build and are the sole ordering
/// authority for downstream resolution; rows must never be renumbered.
pub async fn create_requests_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            id INTEGER PRIMARY KEY,
            guid TEXT NOT NULL UNIQUE,
            submission_id INTEGER NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            order_id INTEGER REFERENCES orders(id),
            request_type_id INTEGER NOT NULL REFERENCES request_types(id),
            next_request_type_id INTEGER REFERENCES request_types(id),
            state TEXT NOT NULL DEFAULT 'pending'
                CHECK (state IN ('pending', 'started', 'passed', 'failed', 'cancelled', 'aborted')),
            source_asset_id INTEGER,
            target_asset_id INTEGER,
            pool_index INTEGER,
            paired_request_id INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (pool_index IS NULL OR pool_index >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_requests_submission_type ON requests(submission_id, request_type_id, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_state ON requests(state)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_pre_capture_pool_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pre_capture_pools (
            id INTEGER PRIMARY KEY,
            submission_id INTEGER NOT NULL REFERENCES submissions(id) ON DELETE CASCADE,
            order_id INTEGER NOT NULL REFERENCES orders(id),
            pool_index INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (submission_id, order_id, pool_index),
            CHECK (pool_index >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pre_capture_pool_requests (
            pool_id INTEGER NOT NULL REFERENCES pre_capture_pools(id) ON DELETE CASCADE,
            request_id INTEGER NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
            PRIMARY KEY (pool_id, request_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed the default request types on first run
///
/// These mirror the standard library-prep pipeline: library creation feeds
/// multiplexing, which feeds sequencing. Deployments add their own types with
/// different flags; seeding uses INSERT OR IGNORE so reruns are no-ops.
async fn init_default_request_types(pool: &SqlitePool) -> Result<()> {
    ensure_request_type(pool, 1, "library_creation", "Library creation", "library_creation", false, None, true).await?;
    ensure_request_type(pool, 2, "multiplexing", "Multiplexing", "multiplexing", true, None, false).await?;
    ensure_request_type(pool, 3, "single_ended_sequencing", "Single ended sequencing", "sequencing", false, None, false).await?;
    ensure_request_type(pool, 4, "transfer", "Transfer", "transfer", false, None, false).await?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn ensure_request_type(
    pool: &SqlitePool,
    id: i64,
    key: &str,
    name: &str,
    kind: &str,
    for_multiplexing: bool,
    pooling: Option<(&str, i64)>,
    for_pre_capture_pooling: bool,
) -> Result<()> {
    let (pooling_method, pool_count) = match pooling {
        Some((method, count)) => (Some(method), Some(count)),
        None => (None, None),
    };

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO request_types
            (id, key, name, kind, for_multiplexing, pooling_method, pool_count, for_pre_capture_pooling)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(key)
    .bind(name)
    .bind(kind)
    .bind(for_multiplexing)
    .bind(pooling_method)
    .bind(pool_count)
    .bind(for_pre_capture_pooling)
    .execute(pool)
    .await?;

    Ok(())
}
