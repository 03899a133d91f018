use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use log::debug;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use crate::config::{Config, OutputFormat};
use crate::gitlab::cache::{CacheSort, PipelineCache};
use crate::gitlab::client::GitLabClient;
use crate::gitlab::Explorer;
use crate::output::render;

/// Explore GitLab CI/CD pipelines, jobs, and merge requests from the terminal.
#[derive(Debug, Parser)]
#[command(name = "pipelens", version, about)]
pub struct Cli {
    /// Path to a config file (defaults to ./pipelens.{toml,json,yaml})
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum)]
    pub format: Option<OutputFormat>,

    /// GitLab personal access token
    #[arg(long, global = true, env = "GITLAB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// GitLab project path (e.g., 'group/project')
    #[arg(long, short = 'p', global = true)]
    pub project: Option<String>,

    /// GitLab instance URL
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Skip the local pipeline cache for this invocation
    #[arg(long, global = true)]
    pub no_cache: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List merge requests for a branch
    Branch {
        /// Source branch name
        branch_name: String,

        /// MR state filter: opened, closed, merged, locked, or all
        #[arg(long, default_value = "opened")]
        state: String,

        /// Highlight the most recent MR and its head pipeline
        #[arg(long)]
        latest: bool,
    },

    /// List pipelines for a merge request
    Mr {
        /// Merge request IID (the number shown in the UI)
        mr_iid: u64,

        /// Highlight the most recent pipeline
        #[arg(long)]
        latest: bool,
    },

    /// Show detailed information about a merge request
    MrInfo {
        /// Merge request IID
        mr_iid: u64,
    },

    /// Show a pipeline's aggregated status
    Status {
        pipeline_id: u64,

        /// Break the summary down per stage
        #[arg(long, short = 'd')]
        detailed: bool,
    },

    /// List jobs in a pipeline
    Jobs {
        pipeline_id: u64,

        /// Only show jobs with this status
        #[arg(long)]
        status: Option<String>,

        /// Only show jobs in this stage
        #[arg(long)]
        stage: Option<String>,

        /// Sort order
        #[arg(long, value_enum, default_value_t = JobSort::Created)]
        sort: JobSort,
    },

    /// Extract failure details from job traces
    Failures {
        /// Job IDs to analyze
        #[arg(required = true)]
        job_ids: Vec<u64>,

        /// Show detailed tracebacks and captured stderr
        #[arg(long, short = 'v')]
        verbose: bool,
    },

    /// Retry a failed pipeline or job
    #[command(group(ArgGroup::new("target").required(true).args(["pipeline", "job"])))]
    Retry {
        /// Pipeline ID to retry
        #[arg(long)]
        pipeline: Option<u64>,

        /// Job ID to retry
        #[arg(long)]
        job: Option<u64>,
    },

    /// Cancel a running pipeline
    Cancel { pipeline_id: u64 },

    /// Trigger a manual job
    Play { job_id: u64 },

    /// Inspect and manage the local pipeline cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    /// Show cache size and date range
    Stats,

    /// List cached pipelines
    List {
        /// Maximum number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Sort order
        #[arg(long, value_enum, default_value_t = CacheSortArg::Id)]
        sort: CacheSortArg,
    },

    /// Delete cached pipelines
    #[command(group(ArgGroup::new("selection").required(true).args(["all", "pipeline", "older_than"])))]
    Clear {
        /// Delete every cached pipeline
        #[arg(long)]
        all: bool,

        /// Delete one pipeline by ID
        #[arg(long)]
        pipeline: Option<u64>,

        /// Delete pipelines older than this many days
        #[arg(long, value_name = "DAYS")]
        older_than: Option<i64>,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Show cache location and behavior
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum JobSort {
    /// Longest running first
    Duration,
    /// Alphabetical by job name
    Name,
    /// Creation order
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CacheSortArg {
    Id,
    Date,
    Size,
}

impl From<CacheSortArg> for CacheSort {
    fn from(sort: CacheSortArg) -> Self {
        match sort {
            CacheSortArg::Id => CacheSort::Id,
            CacheSortArg::Date => CacheSort::Date,
            CacheSortArg::Size => CacheSort::Size,
        }
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let format = cli.format.unwrap_or(config.output.format);

    // Cache subcommands operate on the database directly; no API client needed
    if let Commands::Cache { command } = &cli.command {
        return execute_cache_command(command, &config, format);
    }

    let explorer = build_explorer(&cli, &config)?;
    let use_cache = !cli.no_cache && !config.cache.disabled;

    match cli.command {
        Commands::Branch {
            branch_name,
            state,
            latest,
        } => {
            let mrs = explorer.merge_requests_for_branch(&branch_name, &state).await?;
            match format {
                OutputFormat::Json => print_json(&mrs)?,
                _ => render::print_merge_requests(&branch_name, &state, &mrs, latest),
            }
        }

        Commands::Mr { mr_iid, latest } => {
            let pipelines = explorer.pipelines_for_mr(mr_iid).await?;
            match format {
                OutputFormat::Json => print_json(&pipelines)?,
                _ => render::print_mr_pipelines(mr_iid, &pipelines, latest),
            }
        }

        Commands::MrInfo { mr_iid } => {
            let mr = explorer.merge_request(mr_iid).await?;
            match format {
                OutputFormat::Json => print_json(&mr)?,
                _ => render::print_mr_info(&mr),
            }
        }

        Commands::Status {
            pipeline_id,
            detailed,
        } => {
            let status = explorer.status_summary(pipeline_id, use_cache).await?;
            match format {
                OutputFormat::Json => print_json(&status)?,
                _ => render::print_status(&status, detailed),
            }
        }

        Commands::Jobs {
            pipeline_id,
            status,
            stage,
            sort,
        } => {
            let detail = explorer.pipeline_detail(pipeline_id, use_cache).await?;
            let jobs = filter_and_sort_jobs(detail.jobs, status.as_deref(), stage.as_deref(), sort);
            match format {
                OutputFormat::Json => print_json(&jobs)?,
                _ => render::print_jobs(pipeline_id, &jobs),
            }
        }

        Commands::Failures { job_ids, verbose } => {
            debug!("Analyzing {} job trace(s)", job_ids.len());
            let lookups = job_ids.iter().map(|&id| explorer.job_failure_detail(id));
            let results = futures::future::join_all(lookups).await;

            let mut details = Vec::with_capacity(results.len());
            for (job_id, result) in job_ids.iter().zip(results) {
                details.push(
                    result.with_context(|| format!("Failed to analyze job {job_id}"))?,
                );
            }

            match format {
                OutputFormat::Json => print_json(&details)?,
                _ => {
                    for detail in &details {
                        render::print_failure_detail(detail, verbose);
                    }
                }
            }
        }

        Commands::Retry { pipeline, job } => {
            if let Some(pipeline_id) = pipeline {
                let pipeline = explorer.retry_pipeline(pipeline_id).await?;
                match format {
                    OutputFormat::Json => print_json(&pipeline)?,
                    _ => println!(
                        "Retried pipeline {} (status: {})",
                        pipeline.id, pipeline.status
                    ),
                }
            } else if let Some(job_id) = job {
                let job = explorer.retry_job(job_id).await?;
                match format {
                    OutputFormat::Json => print_json(&job)?,
                    _ => println!("Retried job {} '{}' (status: {})", job.id, job.name, job.status),
                }
            }
        }

        Commands::Cancel { pipeline_id } => {
            let pipeline = explorer.cancel_pipeline(pipeline_id).await?;
            match format {
                OutputFormat::Json => print_json(&pipeline)?,
                _ => println!(
                    "Canceled pipeline {} (status: {})",
                    pipeline.id, pipeline.status
                ),
            }
        }

        Commands::Play { job_id } => {
            let job = explorer.play_job(job_id).await?;
            match format {
                OutputFormat::Json => print_json(&job)?,
                _ => println!("Triggered job {} '{}' (status: {})", job.id, job.name, job.status),
            }
        }

        Commands::Cache { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn build_explorer(cli: &Cli, config: &Config) -> Result<Explorer> {
    let base_url = cli
        .url
        .clone()
        .unwrap_or_else(|| config.gitlab.base_url.clone());
    let project = cli
        .project
        .clone()
        .or_else(|| config.gitlab.project_path.clone());
    let Some(project) = project else {
        bail!("No project specified. Pass --project or set gitlab.project-path in the config file");
    };
    let token = cli.token.clone().or_else(|| config.gitlab.token.clone());

    let client = GitLabClient::new(&base_url, &project, token)?;
    let cache = if cli.no_cache || config.cache.disabled {
        PipelineCache::open_in_memory()?
    } else {
        PipelineCache::open(config.cache_db_path()?)?
    };

    Ok(Explorer::new(client, cache))
}

fn execute_cache_command(
    command: &CacheCommands,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let db_path = config.cache_db_path()?;
    let cache = PipelineCache::open(&db_path)?;

    match command {
        CacheCommands::Stats => {
            let stats = cache.stats()?;
            match format {
                OutputFormat::Json => print_json(&stats)?,
                _ => render::print_cache_stats(&stats, &db_path),
            }
        }

        CacheCommands::List { limit, sort } => {
            let entries = cache.list(*limit, (*sort).into())?;
            match format {
                OutputFormat::Json => print_json(&entries)?,
                _ => render::print_cache_list(&entries),
            }
        }

        CacheCommands::Clear {
            all,
            pipeline,
            older_than,
            force,
        } => {
            if *all {
                let count = cache.stats()?.count;
                if count == 0 {
                    println!("Cache is already empty");
                    return Ok(());
                }
                if !force && !confirm(&format!("Delete all {count} cached pipelines?"))? {
                    println!("Aborted");
                    return Ok(());
                }
                let deleted = cache.delete_all()?;
                println!("Deleted {deleted} cached pipelines");
            } else if let Some(pipeline_id) = pipeline {
                let deleted = cache.delete(*pipeline_id)?;
                if deleted > 0 {
                    println!("Deleted pipeline {pipeline_id} from cache");
                } else {
                    println!("Pipeline {pipeline_id} was not cached");
                }
            } else if let Some(days) = older_than {
                let cutoff = chrono::Utc::now() - chrono::Duration::days(*days);
                let count = cache.count_older_than(cutoff)?;
                if count == 0 {
                    println!("No cached pipelines older than {days} days");
                    return Ok(());
                }
                if !force
                    && !confirm(&format!(
                        "Delete {count} cached pipelines older than {days} days?"
                    ))?
                {
                    println!("Aborted");
                    return Ok(());
                }
                let deleted = cache.delete_older_than(cutoff)?;
                println!("Deleted {deleted} cached pipelines");
            }
        }

        CacheCommands::Info => {
            let stats = cache.stats()?;
            match format {
                OutputFormat::Json => print_json(&stats)?,
                _ => render::print_cache_info(&db_path, &stats),
            }
        }
    }

    Ok(())
}

fn filter_and_sort_jobs(
    mut jobs: Vec<crate::gitlab::types::Job>,
    status: Option<&str>,
    stage: Option<&str>,
    sort: JobSort,
) -> Vec<crate::gitlab::types::Job> {
    if let Some(status) = status {
        let wanted = status.to_lowercase();
        jobs.retain(|job| job.status.to_lowercase() == wanted);
    }
    if let Some(stage) = stage {
        let wanted = stage.to_lowercase();
        jobs.retain(|job| job.stage.to_lowercase() == wanted);
    }

    match sort {
        JobSort::Duration => jobs.sort_by(|a, b| {
            b.duration
                .unwrap_or(0.0)
                .partial_cmp(&a.duration.unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        JobSort::Name => jobs.sort_by(|a, b| a.name.cmp(&b.name)),
        JobSort::Created => jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
    }

    jobs
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
