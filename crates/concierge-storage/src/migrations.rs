//! Database schema migrations.
//!
//! v1 creates the conversation tables, v2 the product catalog.

use rusqlite::Connection;
use tracing::info;

use concierge_core::error::ConciergeError;

use crate::db::storage_err;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ConciergeError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| storage_err("Failed to create migrations table", e))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| storage_err("Failed to query migration version", e))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: conversations");
    }
    if current_version < 2 {
        apply_v2(conn)?;
        info!("Applied migration v2: products");
    }

    Ok(())
}

/// Version 1: conversations and their turns.
fn apply_v1(conn: &Connection) -> Result<(), ConciergeError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY NOT NULL,
            created_at      INTEGER NOT NULL,
            last_active     INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_last_active
            ON conversations (last_active ASC);

        CREATE TABLE IF NOT EXISTS turns (
            conversation_id TEXT NOT NULL,
            sequence        INTEGER NOT NULL,
            role            TEXT NOT NULL
                            CHECK (role IN ('user', 'assistant')),
            content         TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, sequence),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'conversations');
        ",
    )
    .map_err(|e| storage_err("Failed to apply migration v1", e))?;

    Ok(())
}

/// Version 2: product catalog.
fn apply_v2(conn: &Connection) -> Result<(), ConciergeError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS products (
            id              INTEGER PRIMARY KEY,
            product_link    TEXT,
            title           TEXT,
            brand           TEXT,
            discount        REAL,
            avg_rating      REAL,
            total_ratings   INTEGER,
            availability    TEXT,
            category        TEXT,
            price           REAL
        );

        CREATE INDEX IF NOT EXISTS idx_products_category
            ON products (category);

        CREATE INDEX IF NOT EXISTS idx_products_price
            ON products (price ASC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (2, 'products');
        ",
    )
    .map_err(|e| storage_err("Failed to apply migration v2", e))?;

    Ok(())
}
