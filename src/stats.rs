//! Pipeline statistics.
//!
//! A quick look at everything the pipeline has accumulated: history and
//! daily logs, the processed set, the publish queue and the posts table.
//! Used by `cath stats` to confirm that runs are landing where expected.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use walkdir::WalkDir;

use crate::config::Config;
use crate::jsonl;
use crate::processed::ProcessedSet;
use crate::publish;

/// One `YYYYMMDD.jsonl` file.
struct DailyStats {
    day: String,
    records: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub history: usize,
    pub distinct_cids: usize,
    pub daily_logs: usize,
    pub daily_records: usize,
    pub processed: usize,
    pub queued: usize,
}

/// File-level counts, without touching the database.
pub fn collect_counts(config: &Config) -> Result<Counts> {
    let history = jsonl::read_records(&config.paths.history)?;
    let distinct: HashSet<String> = history.iter().filter_map(|r| r.cid()).collect();
    let daily = daily_stats(&config.paths.daily_dir)?;

    Ok(Counts {
        history: history.len(),
        distinct_cids: distinct.len(),
        daily_logs: daily.len(),
        daily_records: daily.iter().map(|d| d.records).sum(),
        processed: ProcessedSet::load(&config.paths.processed)?.len(),
        queued: publish::queue_files(&config.paths.queue_dir)?.len(),
    })
}

fn daily_stats(dir: &Path) -> Result<Vec<DailyStats>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "jsonl") {
            continue;
        }
        let day = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push(DailyStats {
            day,
            records: jsonl::count_lines(path)?,
        });
    }
    Ok(out)
}

/// Run the stats command and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let counts = collect_counts(config)?;
    let posts = publish::count_posts(config).await?;
    let history_size = std::fs::metadata(&config.paths.history)
        .map(|m| m.len())
        .unwrap_or(0);
    let last_ingest = jsonl::read_last_record(&config.paths.history)?
        .and_then(|r| r.str_field("_ts").map(str::to_string));

    println!("Catalog Harness: Pipeline Stats");
    println!("================================");
    println!();
    println!("  History:     {}", config.paths.history.display());
    println!("  Size:        {}", format_bytes(history_size));
    println!(
        "  Last run:    {}",
        last_ingest
            .as_deref()
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("  Entries:     {}", counts.history);
    println!("  Distinct:    {}", counts.distinct_cids);
    println!("  Processed:   {}", counts.processed);
    println!("  Queued:      {}", counts.queued);
    match posts {
        Some(n) => println!("  Published:   {}", n),
        None => println!("  Published:   - (no database)"),
    }

    let daily = daily_stats(&config.paths.daily_dir)?;
    if !daily.is_empty() {
        println!();
        println!("  Daily logs:  {} ({} records)", counts.daily_logs, counts.daily_records);
        println!("  {:<10} {:>8}", "DAY", "RECORDS");
        println!("  {}", "-".repeat(19));
        // Most recent week only.
        for d in daily.iter().rev().take(7) {
            println!("  {:<10} {:>8}", d.day, d.records);
        }
    }

    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// RFC 3339 timestamp as a relative time ("3 hours ago").
fn format_ts_relative(ts: &str) -> String {
    let Ok(then) = chrono::DateTime::parse_from_rfc3339(ts) else {
        return ts.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - then.timestamp();
    if delta < 0 {
        return then.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        then.format("%Y-%m-%d %H:%M").to_string()
    }
}
