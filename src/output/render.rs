use std::path::Path;

use crate::gitlab::cache::{CacheEntry, CacheStats};
use crate::gitlab::explorer::{JobFailureDetail, MrPipeline, PipelineStatus};
use crate::gitlab::types::{Job, MergeRequest};

use super::styling::{bold, bright_green, bright_red, cyan, dim, status_styled};
use super::tables::{create_table, status_cell};

/// Formats a duration in seconds as "3m21s".
pub fn format_duration(duration: Option<f64>) -> String {
    match duration {
        Some(seconds) => {
            let total = seconds as u64;
            format!("{}m{}s", total / 60, total % 60)
        }
        None => "N/A".to_string(),
    }
}

/// Formats a byte count in human-readable units.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

fn format_timestamp(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

pub fn print_merge_requests(branch: &str, state: &str, mrs: &[MergeRequest], latest: bool) {
    if mrs.is_empty() {
        println!("No {state} MRs found for branch '{branch}'");
        return;
    }

    println!(
        "\nMerge requests for branch '{}' (state: {state}):",
        bold(branch)
    );

    let mut table = create_table();
    table.set_header(["MR", "State", "Pipeline", "Title", "Author", "Target"]);
    for mr in mrs {
        let pipeline = match &mr.head_pipeline {
            Some(p) => format!("{} ({})", p.id, p.status),
            None => "none".to_string(),
        };
        table.add_row([
            comfy_table::Cell::new(format!("!{}", mr.iid)),
            status_cell(&mr.state),
            comfy_table::Cell::new(pipeline),
            comfy_table::Cell::new(truncate(&mr.title, 50)),
            comfy_table::Cell::new(&mr.author.username),
            comfy_table::Cell::new(&mr.target_branch),
        ]);
    }
    println!("{table}");

    if latest {
        let mr = &mrs[0];
        println!("\nLatest MR: !{} (ID: {})", mr.iid, mr.id);
        if let Some(pipeline) = &mr.head_pipeline {
            println!("Latest pipeline: {} (status: {})", pipeline.id, pipeline.status);
        }
    }
}

pub fn print_mr_info(mr: &MergeRequest) {
    println!("\n{}", bold(format!("MR !{}: {}", mr.iid, mr.title)));
    println!("Status:        {}", status_styled(&mr.state));
    match &mr.author.name {
        Some(name) => println!("Author:        {} ({name})", mr.author.username),
        None => println!("Author:        {}", mr.author.username),
    }
    println!(
        "Source branch: {}",
        mr.source_branch.as_deref().unwrap_or("N/A")
    );
    println!("Target branch: {}", mr.target_branch);
    println!("Created:       {}", format_timestamp(mr.created_at));
    println!("Updated:       {}", format_timestamp(mr.updated_at));

    // Merge readiness only means anything while the MR is open
    if mr.state == "opened" {
        match mr.merge_status.as_deref() {
            Some("can_be_merged") => {
                println!("Merge status:  {}", bright_green("can be merged"))
            }
            Some("cannot_be_merged") => {
                println!("Merge status:  {}", bright_red("cannot be merged"))
            }
            Some(other) => println!("Merge status:  {other}"),
            None => {}
        }
        if mr.has_conflicts == Some(true) {
            println!("Conflicts:     {}", bright_red("has conflicts"));
        }
    }

    match &mr.head_pipeline {
        Some(pipeline) => println!(
            "Pipeline:      {} (ID: {})",
            status_styled(&pipeline.status),
            pipeline.id
        ),
        None => println!("Pipeline:      none"),
    }
    if let Some(url) = &mr.web_url {
        println!("URL:           {}", dim(url));
    }
}

pub fn print_mr_pipelines(mr_iid: u64, pipelines: &[MrPipeline], latest: bool) {
    if pipelines.is_empty() {
        println!("No pipelines found for MR !{mr_iid}");
        return;
    }

    println!("\nPipelines for MR !{mr_iid}:");

    let mut table = create_table();
    table.set_header(["ID", "Status", "Ref", "Created", "Cached"]);
    for entry in pipelines {
        table.add_row([
            comfy_table::Cell::new(entry.pipeline.id),
            status_cell(&entry.pipeline.status),
            comfy_table::Cell::new(entry.pipeline.ref_.as_deref().unwrap_or("N/A")),
            comfy_table::Cell::new(format_timestamp(entry.pipeline.created_at)),
            comfy_table::Cell::new(if entry.cached { "yes" } else { "" }),
        ]);
    }
    println!("{table}");

    if latest {
        println!("\nLatest pipeline: {}", pipelines[0].pipeline.id);
    }
}

pub fn print_status(status: &PipelineStatus, detailed: bool) {
    let pipeline = &status.pipeline;
    println!(
        "\nPipeline {} - {}",
        bold(pipeline.id),
        status_styled(&pipeline.status)
    );

    let progress = &status.summary.progress;
    let bar_width = 40;
    let filled = bar_width * progress.percentage as usize / 100;
    println!(
        "Progress: [{}{}] {}/{} ({}%)",
        "█".repeat(filled),
        "░".repeat(bar_width - filled),
        progress.completed,
        progress.total,
        progress.percentage
    );
    if pipeline.duration.is_some() {
        println!("Duration: {}", format_duration(pipeline.duration));
    }

    if detailed {
        for (stage, breakdown) in &status.summary.stages {
            let stage_complete = breakdown.counts.success
                + breakdown.counts.failed
                + breakdown.counts.canceled
                + breakdown.counts.skipped;
            println!(
                "\n{} [{}/{}]",
                cyan(format!("Stage: {stage}")),
                stage_complete,
                breakdown.total
            );

            let mut table = create_table();
            table.set_header(["ID", "Job", "Status", "Duration"]);
            for job in &breakdown.jobs {
                table.add_row([
                    comfy_table::Cell::new(job.id),
                    comfy_table::Cell::new(&job.name),
                    status_cell(&job.status),
                    comfy_table::Cell::new(format_duration(job.duration)),
                ]);
            }
            println!("{table}");
        }
        return;
    }

    let counts = &status.summary.counts;
    println!("\nTotal jobs: {}", status.summary.total);
    println!("  Success:  {}", counts.success);
    println!("  Failed:   {}", counts.failed);
    println!("  Running:  {}", counts.running);
    println!("  Pending:  {}", counts.pending);
    println!("  Skipped:  {}", counts.skipped);
    println!("  Canceled: {}", counts.canceled);
    println!("  Manual:   {}", counts.manual);

    if !status.summary.failed_jobs.is_empty() {
        println!("\n{}", bright_red("Failed jobs:"));
        let mut table = create_table();
        table.set_header(["ID", "Stage", "Name", "Duration"]);
        for job in &status.summary.failed_jobs {
            table.add_row([
                comfy_table::Cell::new(job.id),
                comfy_table::Cell::new(&job.stage),
                comfy_table::Cell::new(&job.name),
                comfy_table::Cell::new(format_duration(job.duration)),
            ]);
        }
        println!("{table}");
    }
}

pub fn print_jobs(pipeline_id: u64, jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs found for pipeline {pipeline_id}");
        return;
    }

    println!("\nJobs in pipeline {pipeline_id}:");
    let mut table = create_table();
    table.set_header(["ID", "Status", "Stage", "Name", "Duration", "Finished"]);
    for job in jobs {
        table.add_row([
            comfy_table::Cell::new(job.id),
            status_cell(&job.status),
            comfy_table::Cell::new(&job.stage),
            comfy_table::Cell::new(truncate(&job.name, 40)),
            comfy_table::Cell::new(format_duration(job.duration)),
            comfy_table::Cell::new(format_timestamp(job.finished_at)),
        ]);
    }
    println!("{table}");
}

pub fn print_failure_detail(detail: &JobFailureDetail, verbose: bool) {
    println!("\n{}", bold(format!("Job {}: {}", detail.id, detail.name)));
    println!(
        "Status: {} | Stage: {} | Duration: {}",
        status_styled(&detail.status),
        detail.stage,
        format_duration(detail.duration)
    );
    if let Some(url) = &detail.web_url {
        println!("URL: {}", dim(url));
    }
    println!("Extraction: {}", detail.failures.kind.as_str());

    let failures = &detail.failures;
    if verbose {
        if let Some(summary) = &failures.short_summary {
            println!("\n{}\n{summary}", cyan("Short summary:"));
        }
        if let Some(detailed) = &failures.detailed_failures {
            println!("\n{}\n{detailed}", cyan("Detailed failures:"));
        }
        if let Some(stderr) = &failures.stderr {
            println!("\n{}\n{stderr}", cyan("Captured stderr:"));
        }
        if failures.short_summary.is_none() && failures.detailed_failures.is_none() {
            println!("\nNo failure details extracted from trace");
        }
        return;
    }

    if let Some(summary) = &failures.short_summary {
        println!("\n{}", cyan("Failure summary:"));
        // Condensed view: FAILED lines when present, the whole summary otherwise
        let failed_lines: Vec<&str> = summary
            .lines()
            .filter(|line| line.contains("FAILED"))
            .collect();
        if failed_lines.is_empty() {
            println!("{summary}");
        } else {
            for line in failed_lines {
                println!("  • {}", line.trim());
            }
        }
    } else if !failures.error_lines.is_empty() {
        println!("\n{}", cyan("Error lines:"));
        for line in failures.error_lines.iter().take(10) {
            println!("  • {line}");
        }
    } else {
        println!("\nNo failure details extracted from trace");
    }
}

pub fn print_cache_list(entries: &[CacheEntry]) {
    if entries.is_empty() {
        println!("No cached pipelines found");
        return;
    }

    let mut table = create_table();
    table.set_header(["Pipeline", "Status", "Ref", "Cached at", "Size"]);
    for entry in entries {
        table.add_row([
            comfy_table::Cell::new(entry.pipeline_id),
            status_cell(entry.status.as_deref().unwrap_or("unknown")),
            comfy_table::Cell::new(entry.ref_.as_deref().unwrap_or("N/A")),
            comfy_table::Cell::new(
                entry
                    .created_at
                    .as_deref()
                    .map(|ts| ts.chars().take(16).collect::<String>())
                    .unwrap_or_else(|| "N/A".to_string()),
            ),
            comfy_table::Cell::new(format_size(entry.size_bytes)),
        ]);
    }
    println!("{table}");
}

pub fn print_cache_stats(stats: &CacheStats, db_path: &Path) {
    println!("\n{}", bold("Cache statistics"));
    println!("Location:         {}", db_path.display());
    println!("Cached pipelines: {}", stats.count);
    println!("Total data size:  {}", format_size(stats.total_bytes));
    if let (Some(oldest), Some(newest)) = (&stats.oldest, &stats.newest) {
        println!(
            "Date range:       {} to {}",
            date_prefix(oldest),
            date_prefix(newest)
        );
    }
}

pub fn print_cache_info(db_path: &Path, stats: &CacheStats) {
    println!("\n{}", bold("Cache configuration"));
    println!("Database file:    {}", db_path.display());
    println!("Cached pipelines: {}", stats.count);
    println!("\nCache behavior:");
    println!("  - Only completed pipelines are cached (success, failed, canceled, skipped)");
    println!("  - Running pipelines are always fetched fresh from the API");
    println!("  - The cache is consulted automatically when fetching pipeline details");
}

/// Date portion of a stored timestamp. Char-based so a tampered row with
/// multibyte content cannot split a character.
fn date_prefix(timestamp: &str) -> String {
    timestamp.chars().take(10).collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let truncated: String = text.chars().take(max).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Some(201.0)), "3m21s");
        assert_eq!(format_duration(Some(59.9)), "0m59s");
        assert_eq!(format_duration(None), "N/A");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_date_prefix() {
        assert_eq!(date_prefix("2024-06-01T12:00:00+00:00"), "2024-06-01");
        assert_eq!(date_prefix("short"), "short");
        // Multibyte content must not split a character
        assert_eq!(date_prefix("日本語のタイムスタンプです!"), "日本語のタイムスタン");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title here", 8), "a longer...");
    }
}
