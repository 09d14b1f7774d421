//! Publish importer.
//!
//! Drains the publish queue into the `posts` table:
//!
//! ```text
//! queue_dir/*.json ─▶ draft .md ─▶ front matter + review ─▶ posts upsert
//!                                                     ─▶ draft → published_dir
//! ```
//!
//! Descriptors are handled in file-name order. A descriptor that is not
//! `ready` stays in the queue. Any failure is reported for that CID and the
//! queue moves on.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::draft::{FrontMatter, NO_REVIEW, REVIEW_HEADING};
use crate::migrate;
use crate::models::QueueEntry;

/// One row of the `posts` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub cid: String,
    pub title: String,
    pub date: Option<String>,
    pub name: Option<String>,
    pub maker: Option<String>,
    pub label: Option<String>,
    pub series: Option<String>,
    pub sizes: Option<String>,
    pub bust: Option<i64>,
    pub waist: Option<i64>,
    pub hip: Option<i64>,
    pub genres: Vec<String>,
    pub affiliate_url: Option<String>,
    pub sample_movie_url: Option<String>,
    pub poster: Option<String>,
    pub review_body: Option<String>,
}

impl Post {
    pub fn from_draft(front: FrontMatter, review: Option<String>) -> Result<Self> {
        let (bust, waist, hip) = match front.sizes.as_deref() {
            Some(s) => parse_sizes_to_bwh(s)?,
            None => (None, None, None),
        };
        let title = if front.title.trim().is_empty() {
            front.cid.clone()
        } else {
            front.title
        };
        Ok(Self {
            cid: front.cid,
            title,
            date: Some(front.date).filter(|d| !d.is_empty()),
            name: front.name,
            maker: front.maker,
            label: front.label,
            series: front.series,
            sizes: front.sizes,
            bust,
            waist,
            hip,
            genres: front.tags,
            affiliate_url: front.affiliate_url,
            sample_movie_url: front.sample_movie_url,
            poster: front.poster_image,
            review_body: review,
        })
    }

    /// SHA-256 over the published content.
    pub fn content_hash(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self)?);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    Unchanged,
    NotReady,
    DryRun,
}

#[derive(Debug, Default)]
pub struct PublishSummary {
    pub published: usize,
    pub unchanged: usize,
    pub waiting: usize,
    pub failed: usize,
}

/// Integer bust/waist/hip from text like `T158 B88 W57 H84`.
pub fn parse_sizes_to_bwh(sizes: &str) -> Result<(Option<i64>, Option<i64>, Option<i64>)> {
    let grab = |letter: char| -> Result<Option<i64>> {
        let re = Regex::new(&format!(r"{}(\d+)", letter))?;
        Ok(re.captures(sizes).and_then(|c| c[1].parse().ok()))
    };
    Ok((grab('B')?, grab('W')?, grab('H')?))
}

/// Split a draft into its front matter and body.
pub fn split_front_matter(text: &str) -> Result<(FrontMatter, &str)> {
    let text = text.trim_start_matches('\u{feff}');
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        bail!("draft does not start with front matter");
    };
    let Some(end) = rest.find("\n---") else {
        bail!("unterminated front matter");
    };
    let yaml = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.split_once('\n').map_or("", |(_, b)| b);

    let front: FrontMatter =
        serde_yaml::from_str(yaml).context("Failed to parse front matter")?;
    if front.cid.trim().is_empty() {
        bail!("front matter has no cid");
    }
    Ok((front, body))
}

/// Text under the review heading, up to the next `## ` heading. The
/// placeholder for a missing review counts as no review.
pub fn extract_review(body: &str) -> Option<String> {
    let mut lines = body.lines();
    lines.by_ref().find(|l| l.trim() == REVIEW_HEADING)?;
    let text = lines
        .take_while(|l| !l.starts_with("## "))
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() || text == NO_REVIEW {
        None
    } else {
        Some(text.to_string())
    }
}

/// Queue descriptors in file-name order.
pub fn queue_files(queue_dir: &Path) -> Result<Vec<PathBuf>> {
    if !queue_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(queue_dir)
        .with_context(|| format!("Failed to read queue: {}", queue_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

/// `cath publish`.
pub async fn run_publish(config: &Config, dry_run: bool) -> Result<PublishSummary> {
    let files = queue_files(&config.paths.queue_dir)?;
    let mut summary = PublishSummary::default();
    if files.is_empty() {
        println!("[INFO] publish queue is empty: {}", config.paths.queue_dir.display());
        return Ok(summary);
    }

    let pool = if dry_run {
        None
    } else {
        let pool = db::connect(config).await?;
        migrate::ensure_schema(&pool).await?;
        Some(pool)
    };

    for file in &files {
        let label = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match publish_one(config, pool.as_ref(), file).await {
            Ok(PublishOutcome::Published) => summary.published += 1,
            Ok(PublishOutcome::Unchanged) => summary.unchanged += 1,
            Ok(PublishOutcome::NotReady) => {
                println!("[SKIP] not ready: {}", label);
                summary.waiting += 1;
            }
            Ok(PublishOutcome::DryRun) => {}
            Err(e) => {
                tracing::warn!(cid = %label, error = %e, "publish failed");
                println!("[FAIL] {}: {:#}", label, e);
                summary.failed += 1;
            }
        }
    }

    if let Some(pool) = pool {
        pool.close().await;
    }

    println!(
        "[DONE] published={} unchanged={} waiting={} failed={}",
        summary.published, summary.unchanged, summary.waiting, summary.failed
    );
    Ok(summary)
}

async fn publish_one(
    config: &Config,
    pool: Option<&SqlitePool>,
    queue_file: &Path,
) -> Result<PublishOutcome> {
    let text = std::fs::read_to_string(queue_file)
        .with_context(|| format!("Failed to read {}", queue_file.display()))?;
    let entry: QueueEntry = serde_json::from_str(&text)
        .with_context(|| format!("Invalid queue descriptor {}", queue_file.display()))?;
    if !entry.ready {
        return Ok(PublishOutcome::NotReady);
    }

    let draft_path = PathBuf::from(&entry.draft_path);
    let draft = std::fs::read_to_string(&draft_path)
        .with_context(|| format!("Failed to read draft {}", draft_path.display()))?;
    let (front, body) = split_front_matter(&draft)?;
    if front.cid != entry.cid {
        bail!(
            "draft {} belongs to {}, not {}",
            draft_path.display(),
            front.cid,
            entry.cid
        );
    }
    let post = Post::from_draft(front, extract_review(body))?;

    let Some(pool) = pool else {
        println!(
            "[INFO] would publish {} ({}) sizes={:?}/{:?}/{:?}",
            post.cid, post.title, post.bust, post.waist, post.hip
        );
        return Ok(PublishOutcome::DryRun);
    };

    let changed = upsert_post(pool, &post, &draft_path).await?;
    if changed {
        println!("[OK] published: {} {}", post.cid, post.title);
    } else {
        println!("[SKIP] unchanged: {}", post.cid);
    }

    let moved = move_into(&draft_path, &config.paths.published_dir)?;
    std::fs::remove_file(queue_file)
        .with_context(|| format!("Failed to remove {}", queue_file.display()))?;
    tracing::debug!(cid = %post.cid, draft = %moved.display(), "draft archived");

    Ok(if changed {
        PublishOutcome::Published
    } else {
        PublishOutcome::Unchanged
    })
}

/// Insert or update `post`. Returns `false` when the stored row already has
/// the same content hash.
async fn upsert_post(pool: &SqlitePool, post: &Post, draft_path: &Path) -> Result<bool> {
    let hash = post.content_hash()?;

    let existing: Option<String> =
        sqlx::query_scalar("SELECT content_hash FROM posts WHERE cid = ?")
            .bind(&post.cid)
            .fetch_optional(pool)
            .await?;
    if existing.as_deref() == Some(hash.as_str()) {
        return Ok(false);
    }

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO posts (cid, title, date, name, maker, label, series, sizes, bust, waist, hip, genres_json, affiliate_url, sample_movie_url, poster, review_body, draft_path, content_hash, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(cid) DO UPDATE SET
            title = excluded.title,
            date = excluded.date,
            name = excluded.name,
            maker = excluded.maker,
            label = excluded.label,
            series = excluded.series,
            sizes = excluded.sizes,
            bust = excluded.bust,
            waist = excluded.waist,
            hip = excluded.hip,
            genres_json = excluded.genres_json,
            affiliate_url = excluded.affiliate_url,
            sample_movie_url = excluded.sample_movie_url,
            poster = excluded.poster,
            review_body = excluded.review_body,
            draft_path = excluded.draft_path,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&post.cid)
    .bind(&post.title)
    .bind(&post.date)
    .bind(&post.name)
    .bind(&post.maker)
    .bind(&post.label)
    .bind(&post.series)
    .bind(&post.sizes)
    .bind(post.bust)
    .bind(post.waist)
    .bind(post.hip)
    .bind(serde_json::to_string(&post.genres)?)
    .bind(&post.affiliate_url)
    .bind(&post.sample_movie_url)
    .bind(&post.poster)
    .bind(&post.review_body)
    .bind(draft_path.display().to_string())
    .bind(&hash)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(true)
}

/// Move `file` into `dir`, copying when a rename is not possible.
fn move_into(file: &Path, dir: &Path) -> Result<PathBuf> {
    let Some(name) = file.file_name() else {
        bail!("not a file: {}", file.display());
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let target = dir.join(name);
    if std::fs::rename(file, &target).is_err() {
        std::fs::copy(file, &target)
            .with_context(|| format!("Failed to copy draft to {}", target.display()))?;
        std::fs::remove_file(file)?;
    }
    Ok(target)
}

/// Number of rows in `posts`, `None` when the database does not exist yet.
pub async fn count_posts(config: &Config) -> Result<Option<i64>> {
    if !config.db.path.exists() {
        return Ok(None);
    }
    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
        .fetch_one(&pool)
        .await?;
    pool.close().await;
    Ok(Some(count))
}
