//! Schema of the publish database.
//!
//! One table, `posts`, keyed by CID. Re-running is harmless.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// `cath init`.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    println!("[OK] database ready: {}", config.db.path.display());
    Ok(())
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            cid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            date TEXT,
            name TEXT,
            maker TEXT,
            label TEXT,
            series TEXT,
            sizes TEXT,
            bust INTEGER,
            waist INTEGER,
            hip INTEGER,
            genres_json TEXT NOT NULL DEFAULT '[]',
            affiliate_url TEXT,
            sample_movie_url TEXT,
            poster TEXT,
            review_body TEXT,
            draft_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_date ON posts(date DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
