use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use super::types::Job;

/// Per-status job counts for the known status vocabulary.
///
/// Statuses outside this set still count toward totals but land in no named
/// bucket; the remote vocabulary may grow and must not break aggregation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub success: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    pub canceled: usize,
    pub skipped: usize,
    pub manual: usize,
}

impl StatusCounts {
    fn record(&mut self, status: &str) {
        match status {
            "success" => self.success += 1,
            "failed" => self.failed += 1,
            "running" => self.running += 1,
            "pending" => self.pending += 1,
            "canceled" => self.canceled += 1,
            "skipped" => self.skipped += 1,
            "manual" => self.manual += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub total: usize,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub jobs: Vec<JobBrief>,
}

/// Job fields carried into stage breakdowns.
#[derive(Debug, Clone, Serialize)]
pub struct JobBrief {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub duration: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedJob {
    pub id: u64,
    pub name: String,
    pub stage: String,
    pub duration: Option<f64>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u32,
}

/// Aggregated view of a pipeline's job list.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    #[serde(flatten)]
    pub counts: StatusCounts,
    /// Stage name -> breakdown, in first-seen-stage order
    pub stages: IndexMap<String, StageSummary>,
    pub failed_jobs: Vec<FailedJob>,
    pub progress: Progress,
}

/// Folds a job list into per-status counts, a per-stage breakdown, and a
/// completion percentage.
///
/// Stages appear in the order first encountered in the job list, not
/// alphabetically, so the breakdown reads in pipeline order. An empty job
/// list yields totals of zero with a zero percentage.
pub fn summarize(jobs: &[Job]) -> StatusSummary {
    let mut counts = StatusCounts::default();
    let mut stages: IndexMap<String, StageSummary> = IndexMap::new();
    let mut failed_jobs = Vec::new();

    for job in jobs {
        let status = job.status.to_lowercase();
        counts.record(&status);

        let stage = stages.entry(job.stage.clone()).or_insert_with(|| StageSummary {
            total: 0,
            counts: StatusCounts::default(),
            jobs: Vec::new(),
        });
        stage.total += 1;
        stage.counts.record(&status);
        stage.jobs.push(JobBrief {
            id: job.id,
            name: job.name.clone(),
            status: job.status.clone(),
            duration: job.duration,
            started_at: job.started_at,
            finished_at: job.finished_at,
        });

        if status == "failed" {
            failed_jobs.push(FailedJob {
                id: job.id,
                name: job.name.clone(),
                stage: job.stage.clone(),
                duration: job.duration,
                finished_at: job.finished_at,
            });
        }
    }

    let total = jobs.len();
    let completed = counts.success + counts.failed + counts.canceled + counts.skipped;
    let percentage = if total > 0 {
        (completed * 100 / total) as u32
    } else {
        0
    };

    StatusSummary {
        total,
        counts,
        stages,
        failed_jobs,
        progress: Progress {
            completed,
            total,
            percentage,
        },
    }
}
