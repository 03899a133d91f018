use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline statuses from which no further transition occurs.
///
/// Snapshots are cache-eligible only once they reach one of these states;
/// anything still in flight is always fetched fresh.
pub const COMPLETE_STATUSES: [&str; 4] = ["success", "failed", "canceled", "skipped"];

/// Returns true if the status is terminal (case-insensitive).
pub fn is_complete(status: &str) -> bool {
    let status = status.to_lowercase();
    COMPLETE_STATUSES.contains(&status.as_str())
}

/// A GitLab CI/CD pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Numeric pipeline ID, assigned by GitLab
    pub id: u64,
    /// Pipeline status (e.g., "success", "failed", "running")
    pub status: String,
    /// Git reference that triggered the pipeline
    #[serde(rename = "ref", default)]
    pub ref_: Option<String>,
    /// Commit SHA the pipeline ran against
    #[serde(default)]
    pub sha: Option<String>,
    /// Trigger source (e.g., "push", "merge_request_event")
    #[serde(default)]
    pub source: Option<String>,
    /// Creation timestamp, immutable once assigned
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Total duration in seconds, absent while running
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// A job within a GitLab CI/CD pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Numeric job ID
    pub id: u64,
    /// Job name as defined in .gitlab-ci.yml
    pub name: String,
    /// Stage this job belongs to
    #[serde(default = "unknown_stage")]
    pub stage: String,
    /// Job status (same vocabulary as pipelines)
    pub status: String,
    /// Execution duration in seconds, absent until finished
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

fn unknown_stage() -> String {
    "unknown".to_string()
}

/// Full detail for one pipeline: metadata plus its job list.
///
/// This is the unit the cache persists. Job order is discovery order from
/// the list call, not guaranteed chronological.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDetail {
    pub pipeline: Pipeline,
    pub jobs: Vec<Job>,
}

/// A merge request with the fields the explorer consumes.
///
/// Fields GitLab omits for some MRs (conflict state, head pipeline) are
/// explicit options so callers handle absence uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: u64,
    pub iid: u64,
    pub title: String,
    pub state: String,
    pub author: Author,
    #[serde(default)]
    pub source_branch: Option<String>,
    pub target_branch: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub has_conflicts: Option<bool>,
    #[serde(default)]
    pub merge_status: Option<String>,
    /// Latest pipeline on the MR's head commit, if any
    #[serde(default)]
    pub head_pipeline: Option<PipelineRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Abbreviated pipeline reference as embedded in MR payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRef {
    pub id: u64,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_statuses() {
        assert!(is_complete("success"));
        assert!(is_complete("FAILED"));
        assert!(is_complete("canceled"));
        assert!(is_complete("skipped"));
        assert!(!is_complete("running"));
        assert!(!is_complete("pending"));
        assert!(!is_complete("created"));
        assert!(!is_complete("manual"));
    }

    #[test]
    fn test_job_defaults_missing_stage() {
        let job: Job = serde_json::from_str(r#"{"id": 1, "name": "build", "status": "success"}"#)
            .expect("job should deserialize without optional fields");
        assert_eq!(job.stage, "unknown");
        assert!(job.duration.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_merge_request_without_head_pipeline() {
        let mr: MergeRequest = serde_json::from_str(
            r#"{
                "id": 10,
                "iid": 3,
                "title": "Fix build",
                "state": "opened",
                "author": {"username": "dev"},
                "target_branch": "main"
            }"#,
        )
        .expect("MR should deserialize without head_pipeline");
        assert!(mr.head_pipeline.is_none());
        assert!(mr.has_conflicts.is_none());
    }
}
