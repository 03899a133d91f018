use log::debug;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{PipelensError, Result};

use super::types::{Job, MergeRequest, Pipeline};

pub(super) const PAGE_SIZE: usize = 100;

/// Thin client over the GitLab REST v4 API, scoped to one project.
///
/// Performs no retries and no caching; transient failures surface to the
/// caller as typed errors. List endpoints are fully paginated before
/// returning, so consumers always see a materialized list.
pub struct GitLabClient {
    client: Client,
    api_url: Url,
    project: String,
    token: Option<String>,
}

impl GitLabClient {
    pub fn new(base_url: &str, project_path: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pipelens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelensError::Config(format!("Failed to create HTTP client: {e}")))?;

        let base = Url::parse(base_url)
            .map_err(|e| PipelensError::Config(format!("Invalid base URL: {e}")))?;

        let api_url = base
            .join("api/v4/")
            .map_err(|e| PipelensError::Config(format!("Invalid API URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            // Project paths are URL-encoded in REST paths ("group/proj" -> "group%2Fproj")
            project: project_path.replace('/', "%2F"),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.header("PRIVATE-TOKEN", token)
        } else {
            request
        }
    }

    fn project_endpoint(&self, path: &str) -> String {
        format!("{}projects/{}/{}", self.api_url, self.project, path)
    }

    /// Maps HTTP statuses to the error taxonomy. `what` names the entity for
    /// not-found reporting (e.g., "pipeline 123").
    async fn check_response(response: Response, what: &str) -> Result<Response> {
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PipelensError::Auth(format!(
                "access denied fetching {what} (status {})",
                status.as_u16()
            )));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PipelensError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(PipelensError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    /// Deserializes a checked response body. Decode failures are the remote
    /// sending garbage, not a transport fault, so they report as `Api` rather
    /// than `Network`.
    async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status().as_u16();
        response.json().await.map_err(|e| {
            if e.is_decode() {
                PipelensError::Api {
                    status,
                    message: format!("Malformed response body: {e}"),
                }
            } else {
                PipelensError::Network(e)
            }
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, what: &str) -> Result<T> {
        debug!("GET {endpoint}");
        let response = self
            .auth_request(self.client.get(endpoint))
            .send()
            .await?;
        let response = Self::check_response(response, what).await?;
        Self::decode_body(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, endpoint: &str, what: &str) -> Result<T> {
        debug!("POST {endpoint}");
        let response = self
            .auth_request(self.client.post(endpoint))
            .send()
            .await?;
        let response = Self::check_response(response, what).await?;
        Self::decode_body(response).await
    }

    /// Fetches every page of a list endpoint. `path` may already carry query
    /// parameters; pagination parameters are appended.
    async fn get_all_pages<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<Vec<T>> {
        let separator = if path.contains('?') { '&' } else { '?' };
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            let endpoint = format!(
                "{}{separator}per_page={PAGE_SIZE}&page={page}",
                self.project_endpoint(path)
            );
            let batch: Vec<T> = self.get_json(&endpoint, what).await?;
            let batch_len = batch.len();
            items.extend(batch);

            if batch_len < PAGE_SIZE {
                return Ok(items);
            }
            page += 1;
        }
    }

    pub async fn get_pipeline(&self, pipeline_id: u64) -> Result<Pipeline> {
        let endpoint = self.project_endpoint(&format!("pipelines/{pipeline_id}"));
        self.get_json(&endpoint, &format!("pipeline {pipeline_id}"))
            .await
    }

    /// All jobs of a pipeline, in the API's discovery order.
    pub async fn list_pipeline_jobs(&self, pipeline_id: u64) -> Result<Vec<Job>> {
        self.get_all_pages(
            &format!("pipelines/{pipeline_id}/jobs"),
            &format!("jobs for pipeline {pipeline_id}"),
        )
        .await
    }

    pub async fn get_job(&self, job_id: u64) -> Result<Job> {
        let endpoint = self.project_endpoint(&format!("jobs/{job_id}"));
        self.get_json(&endpoint, &format!("job {job_id}")).await
    }

    /// Raw log of a job. Traces are served as bytes and may contain invalid
    /// UTF-8; decoded with replacement.
    pub async fn get_job_trace(&self, job_id: u64) -> Result<String> {
        let endpoint = self.project_endpoint(&format!("jobs/{job_id}/trace"));
        debug!("GET {endpoint}");
        let response = self
            .auth_request(self.client.get(endpoint.as_str()))
            .send()
            .await?;
        let response = Self::check_response(response, &format!("trace for job {job_id}")).await?;
        let bytes = response.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn merge_requests_for_branch(
        &self,
        branch: &str,
        state: &str,
    ) -> Result<Vec<MergeRequest>> {
        let state_query = if state == "all" {
            String::new()
        } else {
            format!("&state={state}")
        };
        self.get_all_pages(
            &format!(
                "merge_requests?source_branch={branch}&order_by=created_at&sort=desc{state_query}"
            ),
            &format!("merge requests for branch {branch}"),
        )
        .await
    }

    /// One merge request with its full detail, including merge readiness and
    /// the head pipeline.
    pub async fn get_merge_request(&self, mr_iid: u64) -> Result<MergeRequest> {
        let endpoint = self.project_endpoint(&format!("merge_requests/{mr_iid}"));
        self.get_json(&endpoint, &format!("merge request {mr_iid}"))
            .await
    }

    pub async fn pipelines_for_mr(&self, mr_iid: u64) -> Result<Vec<Pipeline>> {
        self.get_all_pages(
            &format!("merge_requests/{mr_iid}/pipelines"),
            &format!("pipelines for MR {mr_iid}"),
        )
        .await
    }

    pub async fn retry_job(&self, job_id: u64) -> Result<Job> {
        let endpoint = self.project_endpoint(&format!("jobs/{job_id}/retry"));
        self.post_json(&endpoint, &format!("job {job_id}")).await
    }

    pub async fn play_job(&self, job_id: u64) -> Result<Job> {
        let endpoint = self.project_endpoint(&format!("jobs/{job_id}/play"));
        self.post_json(&endpoint, &format!("job {job_id}")).await
    }

    pub async fn retry_pipeline(&self, pipeline_id: u64) -> Result<Pipeline> {
        let endpoint = self.project_endpoint(&format!("pipelines/{pipeline_id}/retry"));
        self.post_json(&endpoint, &format!("pipeline {pipeline_id}"))
            .await
    }

    pub async fn cancel_pipeline(&self, pipeline_id: u64) -> Result<Pipeline> {
        let endpoint = self.project_endpoint(&format!("pipelines/{pipeline_id}/cancel"));
        self.post_json(&endpoint, &format!("pipeline {pipeline_id}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_payload(id: u64) -> serde_json::Value {
        json!({
            "id": id,
            "name": format!("job-{id}"),
            "stage": "test",
            "status": "success",
            "duration": 12.5
        })
    }

    #[tokio::test]
    async fn test_get_pipeline() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/group%2Fproj/pipelines/42")
            .with_status(200)
            .with_body(
                json!({
                    "id": 42,
                    "status": "success",
                    "ref": "main",
                    "sha": "deadbeef",
                    "created_at": "2024-06-01T12:00:00Z"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), "group/proj", None).unwrap();
        let pipeline = client.get_pipeline(42).await.unwrap();

        assert_eq!(pipeline.id, 42);
        assert_eq!(pipeline.status, "success");
        assert_eq!(pipeline.ref_.as_deref(), Some("main"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_maps_to_typed_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/group%2Fproj/pipelines/99")
            .with_status(404)
            .with_body(r#"{"message": "404 Not Found"}"#)
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), "group/proj", None).unwrap();
        let err = client.get_pipeline(99).await.unwrap_err();
        assert!(matches!(err, PipelensError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/group%2Fproj/jobs/7")
            .with_status(401)
            .create_async()
            .await;

        let client =
            GitLabClient::new(&server.url(), "group/proj", Some("bad-token".into())).unwrap();
        let err = client.get_job(7).await.unwrap_err();
        assert!(matches!(err, PipelensError::Auth(_)));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/group%2Fproj/pipelines/1")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), "group/proj", None).unwrap();
        let err = client.get_pipeline(1).await.unwrap_err();
        assert!(matches!(err, PipelensError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_token_is_sent_as_private_token_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/group%2Fproj/jobs/5")
            .match_header("PRIVATE-TOKEN", "glpat-secret")
            .with_status(200)
            .with_body(job_payload(5).to_string())
            .create_async()
            .await;

        let client =
            GitLabClient::new(&server.url(), "group/proj", Some("glpat-secret".into())).unwrap();
        let job = client.get_job(5).await.unwrap();
        assert_eq!(job.name, "job-5");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_job_listing_paginates_until_short_page() {
        let mut server = mockito::Server::new_async().await;

        let page1: Vec<_> = (1..=PAGE_SIZE as u64).map(job_payload).collect();
        let page2: Vec<_> = ((PAGE_SIZE as u64 + 1)..=(PAGE_SIZE as u64 + 3))
            .map(job_payload)
            .collect();

        let mock1 = server
            .mock("GET", "/api/v4/projects/group%2Fproj/pipelines/8/jobs")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "1".into()))
            .with_status(200)
            .with_body(serde_json::to_string(&page1).unwrap())
            .create_async()
            .await;
        let mock2 = server
            .mock("GET", "/api/v4/projects/group%2Fproj/pipelines/8/jobs")
            .match_query(mockito::Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(serde_json::to_string(&page2).unwrap())
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), "group/proj", None).unwrap();
        let jobs = client.list_pipeline_jobs(8).await.unwrap();

        assert_eq!(jobs.len(), PAGE_SIZE + 3);
        assert_eq!(jobs[0].id, 1);
        assert_eq!(jobs.last().unwrap().id, PAGE_SIZE as u64 + 3);
        mock1.assert_async().await;
        mock2.assert_async().await;
    }

    #[tokio::test]
    async fn test_trace_decodes_invalid_utf8_with_replacement() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/group%2Fproj/jobs/3/trace")
            .with_status(200)
            .with_body(b"ok line\n\xff\xfe bad bytes\n".to_vec())
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), "group/proj", None).unwrap();
        let trace = client.get_job_trace(3).await.unwrap();
        assert!(trace.starts_with("ok line"));
        assert!(trace.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_get_merge_request_full_detail() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v4/projects/group%2Fproj/merge_requests/17")
            .with_status(200)
            .with_body(
                json!({
                    "id": 170,
                    "iid": 17,
                    "title": "Add feature flag",
                    "state": "opened",
                    "author": {"username": "dev", "name": "Dev Eloper"},
                    "source_branch": "feature/flag",
                    "target_branch": "main",
                    "merge_status": "cannot_be_merged",
                    "has_conflicts": true,
                    "head_pipeline": {"id": 501, "status": "failed"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), "group/proj", None).unwrap();
        let mr = client.get_merge_request(17).await.unwrap();

        assert_eq!(mr.iid, 17);
        assert_eq!(mr.merge_status.as_deref(), Some("cannot_be_merged"));
        assert_eq!(mr.has_conflicts, Some(true));
        assert_eq!(mr.head_pipeline.as_ref().unwrap().id, 501);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_success_body_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/group%2Fproj/pipelines/6")
            .with_status(200)
            .with_body("<html>proxy login page</html>")
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), "group/proj", None).unwrap();
        let err = client.get_pipeline(6).await.unwrap_err();
        assert!(matches!(err, PipelensError::Api { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_retry_job_posts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v4/projects/group%2Fproj/jobs/12/retry")
            .with_status(201)
            .with_body(job_payload(13).to_string())
            .create_async()
            .await;

        let client = GitLabClient::new(&server.url(), "group/proj", None).unwrap();
        let job = client.retry_job(12).await.unwrap();
        assert_eq!(job.id, 13);
        mock.assert_async().await;
    }
}
