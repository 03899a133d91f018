use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::error::Result;

use super::cache::PipelineCache;
use super::client::GitLabClient;
use super::failures::{self, FailureReport};
use super::summary::{self, StatusSummary};
use super::types::{is_complete, MergeRequest, Pipeline, PipelineDetail};

/// A pipeline's aggregated status, paired with its metadata.
#[derive(Debug, Serialize)]
pub struct PipelineStatus {
    pub pipeline: Pipeline,
    #[serde(flatten)]
    pub summary: StatusSummary,
}

/// Failure detail for one job: identity plus the extracted report.
#[derive(Debug, Serialize)]
pub struct JobFailureDetail {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub stage: String,
    pub duration: Option<f64>,
    pub finished_at: Option<DateTime<Utc>>,
    pub web_url: Option<String>,
    pub failures: FailureReport,
}

/// A pipeline listed for an MR, with whether a snapshot is cached locally.
#[derive(Debug, Serialize)]
pub struct MrPipeline {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub cached: bool,
}

/// Cache-aware entry point for pipeline, job, and merge request lookups.
///
/// Owns the remote client and the local cache; both are injected at
/// construction so callers control where state lives.
pub struct Explorer {
    client: GitLabClient,
    cache: PipelineCache,
}

impl Explorer {
    pub fn new(client: GitLabClient, cache: PipelineCache) -> Self {
        Self { client, cache }
    }

    pub fn cache(&self) -> &PipelineCache {
        &self.cache
    }

    /// Fetches a pipeline's full detail, reading through the cache.
    ///
    /// A cache hit returns immediately with no remote call and no freshness
    /// check: only terminal pipelines are admitted, and terminal pipeline
    /// data is immutable at the source. On a miss the pipeline and its full
    /// job list are fetched, and the snapshot is persisted only if the
    /// pipeline has completed.
    pub async fn pipeline_detail(&self, pipeline_id: u64, use_cache: bool) -> Result<PipelineDetail> {
        if use_cache {
            if let Some(detail) = self.cache.get(pipeline_id)? {
                info!("Retrieved pipeline {pipeline_id} from cache");
                return Ok(detail);
            }
        }

        info!("Fetching pipeline {pipeline_id} from API");
        let pipeline = self.client.get_pipeline(pipeline_id).await?;
        let jobs = self.client.list_pipeline_jobs(pipeline_id).await?;
        let detail = PipelineDetail { pipeline, jobs };

        if is_complete(&detail.pipeline.status) {
            self.cache.put(&detail)?;
            info!(
                "Cached completed pipeline {pipeline_id} (status: {})",
                detail.pipeline.status
            );
        } else {
            debug!(
                "Not caching pipeline {pipeline_id} (status: {} - still running)",
                detail.pipeline.status
            );
        }

        Ok(detail)
    }

    /// Aggregated job status for a pipeline.
    pub async fn status_summary(&self, pipeline_id: u64, use_cache: bool) -> Result<PipelineStatus> {
        let detail = self.pipeline_detail(pipeline_id, use_cache).await?;
        let summary = summary::summarize(&detail.jobs);
        Ok(PipelineStatus {
            pipeline: detail.pipeline,
            summary,
        })
    }

    /// Fetches a job and its trace, and extracts a structured failure report.
    pub async fn job_failure_detail(&self, job_id: u64) -> Result<JobFailureDetail> {
        let job = self.client.get_job(job_id).await?;
        let trace = self.client.get_job_trace(job_id).await?;
        let failures = failures::extract(&trace, &job.name);

        Ok(JobFailureDetail {
            id: job.id,
            name: job.name,
            status: job.status,
            stage: job.stage,
            duration: job.duration,
            finished_at: job.finished_at,
            web_url: job.web_url,
            failures,
        })
    }

    pub async fn merge_requests_for_branch(
        &self,
        branch: &str,
        state: &str,
    ) -> Result<Vec<MergeRequest>> {
        self.client.merge_requests_for_branch(branch, state).await
    }

    pub async fn merge_request(&self, mr_iid: u64) -> Result<MergeRequest> {
        self.client.get_merge_request(mr_iid).await
    }

    /// Pipelines for a merge request, newest first, with local-cache
    /// presence marked. Associations are recorded in the MR index as a side
    /// effect so later lookups can answer from the cache database.
    pub async fn pipelines_for_mr(&self, mr_iid: u64) -> Result<Vec<MrPipeline>> {
        let mut pipelines = self.client.pipelines_for_mr(mr_iid).await?;
        pipelines.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut annotated = Vec::with_capacity(pipelines.len());
        for pipeline in pipelines {
            self.cache
                .link_merge_request(mr_iid, pipeline.id, pipeline.created_at)?;
            let cached = self.cache.contains(pipeline.id)?;
            annotated.push(MrPipeline { pipeline, cached });
        }
        Ok(annotated)
    }

    pub async fn retry_job(&self, job_id: u64) -> Result<super::types::Job> {
        self.client.retry_job(job_id).await
    }

    pub async fn play_job(&self, job_id: u64) -> Result<super::types::Job> {
        self.client.play_job(job_id).await
    }

    pub async fn retry_pipeline(&self, pipeline_id: u64) -> Result<Pipeline> {
        self.client.retry_pipeline(pipeline_id).await
    }

    pub async fn cancel_pipeline(&self, pipeline_id: u64) -> Result<Pipeline> {
        self.client.cancel_pipeline(pipeline_id).await
    }
}
