use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::Result;

use super::types::PipelineDetail;

/// Sort order for cache listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSort {
    Id,
    Date,
    Size,
}

/// One row of a cache listing. Status and ref are pulled out of the stored
/// blob with `json_extract`, so listing never deserializes full snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub pipeline_id: u64,
    pub created_at: Option<String>,
    pub size_bytes: u64,
    pub status: Option<String>,
    #[serde(rename = "ref")]
    pub ref_: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub count: u64,
    pub total_bytes: u64,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

/// Persistent store for completed pipeline snapshots.
///
/// Pipelines are keyed by their numeric ID with the snapshot serialized as
/// JSON. `created_at` is denormalized into its own column so age-based
/// pruning and listing work without touching the blobs. A second table
/// indexes MR-to-pipeline associations, populated when an MR's pipelines
/// are listed.
///
/// The admission policy (only terminal pipelines get written) lives in the
/// explorer, not here; the store itself is a plain upsert/lookup surface.
pub struct PipelineCache {
    conn: Connection,
}

impl PipelineCache {
    /// Opens (or creates) the cache database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    /// In-memory cache, used by tests and `--no-cache` runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS pipelines (
                pipeline_id INTEGER PRIMARY KEY,
                created_at TEXT,
                data TEXT
            );
            CREATE TABLE IF NOT EXISTS merge_request_pipelines (
                mr_id INTEGER,
                pipeline_id INTEGER,
                created_at TEXT,
                PRIMARY KEY (mr_id, pipeline_id)
            );
            ",
        )?;
        Ok(())
    }

    /// Looks up a cached snapshot.
    ///
    /// A record that fails to deserialize is logged and reported as a miss;
    /// a corrupt row must never block the read-through path.
    pub fn get(&self, pipeline_id: u64) -> Result<Option<PipelineDetail>> {
        let blob: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM pipelines WHERE pipeline_id = ?1",
                [pipeline_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(blob) = blob else {
            debug!("Cache miss for pipeline {pipeline_id}");
            return Ok(None);
        };

        match serde_json::from_str(&blob) {
            Ok(detail) => {
                debug!("Cache hit for pipeline {pipeline_id}");
                Ok(Some(detail))
            }
            Err(e) => {
                warn!("Corrupt cache record for pipeline {pipeline_id}, treating as miss: {e}");
                Ok(None)
            }
        }
    }

    /// True if a snapshot exists for the pipeline, without deserializing it.
    pub fn contains(&self, pipeline_id: u64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM pipelines WHERE pipeline_id = ?1 LIMIT 1",
                [pipeline_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Upserts a snapshot; last write wins for a given pipeline ID.
    pub fn put(&self, detail: &PipelineDetail) -> Result<()> {
        let created_at = detail
            .pipeline
            .created_at
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();
        let blob = serde_json::to_string(detail)?;

        self.conn.execute(
            "REPLACE INTO pipelines (pipeline_id, created_at, data) VALUES (?1, ?2, ?3)",
            params![detail.pipeline.id, created_at, blob],
        )?;

        debug!("Cached pipeline {}", detail.pipeline.id);
        Ok(())
    }

    /// Records that a pipeline belongs to a merge request.
    pub fn link_merge_request(
        &self,
        mr_id: u64,
        pipeline_id: u64,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn.execute(
            "REPLACE INTO merge_request_pipelines (mr_id, pipeline_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                mr_id,
                pipeline_id,
                created_at.map(|ts| ts.to_rfc3339()).unwrap_or_default()
            ],
        )?;
        Ok(())
    }

    /// Pipeline IDs previously associated with a merge request, newest first.
    pub fn pipeline_ids_for_mr(&self, mr_id: u64) -> Result<Vec<u64>> {
        let mut statement = self.conn.prepare(
            "SELECT pipeline_id FROM merge_request_pipelines
             WHERE mr_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = statement.query_map([mr_id], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Deletes one pipeline; returns the number of rows removed (0 or 1).
    pub fn delete(&self, pipeline_id: u64) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM pipelines WHERE pipeline_id = ?1",
            [pipeline_id],
        )?;
        Ok(affected)
    }

    /// Deletes all pipelines created before the cutoff; returns the count.
    ///
    /// RFC 3339 UTC timestamps compare correctly as text.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn.execute(
            "DELETE FROM pipelines WHERE created_at < ?1 AND created_at != ''",
            [cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }

    /// Count of pipelines that predate the cutoff, for confirmation prompts.
    pub fn count_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM pipelines WHERE created_at < ?1 AND created_at != ''",
            [cutoff.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Wipes the whole cache and reclaims file space.
    pub fn delete_all(&self) -> Result<usize> {
        let affected = self.conn.execute("DELETE FROM pipelines", [])?;
        self.conn.execute("DELETE FROM merge_request_pipelines", [])?;
        self.conn.execute_batch("VACUUM")?;
        Ok(affected)
    }

    /// Lists cached pipelines without deserializing their snapshots.
    pub fn list(&self, limit: usize, sort: CacheSort) -> Result<Vec<CacheEntry>> {
        let order_by = match sort {
            CacheSort::Id => "pipeline_id DESC",
            CacheSort::Date => "created_at DESC",
            CacheSort::Size => "LENGTH(data) DESC",
        };

        let query = format!(
            "SELECT
                pipeline_id,
                created_at,
                LENGTH(data),
                json_extract(data, '$.pipeline.status'),
                json_extract(data, '$.pipeline.ref')
             FROM pipelines
             ORDER BY {order_by}
             LIMIT ?1"
        );

        let mut statement = self.conn.prepare(&query)?;
        let rows = statement.query_map([limit as i64], |row| {
            let created_at: String = row.get(1)?;
            Ok(CacheEntry {
                pipeline_id: row.get(0)?,
                created_at: (!created_at.is_empty()).then_some(created_at),
                size_bytes: row.get::<_, i64>(2)? as u64,
                status: row.get(3)?,
                ref_: row.get(4)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let (count, total_bytes): (u64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), SUM(LENGTH(data)) FROM pipelines",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (oldest, newest): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM pipelines WHERE created_at != ''",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(CacheStats {
            count,
            total_bytes: total_bytes.unwrap_or(0) as u64,
            oldest,
            newest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::types::{Job, Pipeline};
    use chrono::TimeZone;

    fn test_pipeline(id: u64, status: &str, created_at: DateTime<Utc>) -> Pipeline {
        Pipeline {
            id,
            status: status.to_string(),
            ref_: Some("main".to_string()),
            sha: Some("abc1234".to_string()),
            source: Some("push".to_string()),
            created_at: Some(created_at),
            updated_at: None,
            duration: Some(120.0),
            web_url: None,
        }
    }

    fn test_job(id: u64, name: &str, status: &str) -> Job {
        Job {
            id,
            name: name.to_string(),
            stage: "test".to_string(),
            status: status.to_string(),
            duration: Some(10.0),
            created_at: None,
            started_at: None,
            finished_at: None,
            web_url: None,
            failure_reason: None,
        }
    }

    fn test_detail(id: u64, status: &str) -> PipelineDetail {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        PipelineDetail {
            pipeline: test_pipeline(id, status, created),
            jobs: vec![test_job(1, "build", "success"), test_job(2, "unit", "failed")],
        }
    }

    #[test]
    fn test_get_on_empty_cache_is_miss() {
        let cache = PipelineCache::open_in_memory().unwrap();
        assert!(cache.get(123).unwrap().is_none());
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = PipelineCache::open_in_memory().unwrap();
        cache.put(&test_detail(42, "success")).unwrap();

        let detail = cache.get(42).unwrap().expect("cached pipeline");
        assert_eq!(detail.pipeline.id, 42);
        assert_eq!(detail.pipeline.status, "success");
        assert_eq!(detail.jobs.len(), 2);
        assert_eq!(detail.jobs[0].name, "build");
    }

    #[test]
    fn test_put_is_idempotent_upsert() {
        let cache = PipelineCache::open_in_memory().unwrap();

        let mut first = test_detail(7, "failed");
        cache.put(&first).unwrap();

        first.pipeline.status = "success".to_string();
        first.jobs.truncate(1);
        cache.put(&first).unwrap();

        let detail = cache.get(7).unwrap().expect("cached pipeline");
        assert_eq!(detail.pipeline.status, "success");
        assert_eq!(detail.jobs.len(), 1);
        assert_eq!(cache.stats().unwrap().count, 1);
    }

    #[test]
    fn test_corrupt_record_is_a_miss() {
        let cache = PipelineCache::open_in_memory().unwrap();
        cache
            .conn
            .execute(
                "INSERT INTO pipelines (pipeline_id, created_at, data) VALUES (9, '', 'not json')",
                [],
            )
            .unwrap();

        assert!(cache.get(9).unwrap().is_none());
    }

    #[test]
    fn test_delete_returns_count() {
        let cache = PipelineCache::open_in_memory().unwrap();
        cache.put(&test_detail(1, "success")).unwrap();

        assert_eq!(cache.delete(1).unwrap(), 1);
        assert_eq!(cache.delete(1).unwrap(), 0);
        assert!(cache.get(1).unwrap().is_none());
    }

    #[test]
    fn test_delete_older_than_prunes_by_date() {
        let cache = PipelineCache::open_in_memory().unwrap();

        for day in 1..=10 {
            let created = Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap();
            let detail = PipelineDetail {
                pipeline: test_pipeline(day as u64, "success", created),
                jobs: vec![],
            };
            cache.put(&detail).unwrap();
        }

        // Days 1-3 predate the cutoff
        let cutoff = Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap();
        assert_eq!(cache.count_older_than(cutoff).unwrap(), 3);
        assert_eq!(cache.delete_older_than(cutoff).unwrap(), 3);

        let remaining = cache.list(100, CacheSort::Date).unwrap();
        assert_eq!(remaining.len(), 7);
        assert!(remaining.iter().all(|entry| entry.pipeline_id >= 4));
    }

    #[test]
    fn test_list_sorting() {
        let cache = PipelineCache::open_in_memory().unwrap();

        let mut big = test_detail(1, "success");
        big.jobs = (0..50).map(|i| test_job(i, "padding-job", "success")).collect();
        cache.put(&big).unwrap();
        cache.put(&test_detail(3, "failed")).unwrap();

        let by_id = cache.list(10, CacheSort::Id).unwrap();
        assert_eq!(by_id[0].pipeline_id, 3);

        let by_size = cache.list(10, CacheSort::Size).unwrap();
        assert_eq!(by_size[0].pipeline_id, 1);
        assert!(by_size[0].size_bytes > by_size[1].size_bytes);
        assert_eq!(by_size[0].status.as_deref(), Some("success"));
        assert_eq!(by_size[0].ref_.as_deref(), Some("main"));
    }

    #[test]
    fn test_list_respects_limit() {
        let cache = PipelineCache::open_in_memory().unwrap();
        for id in 1..=5 {
            cache.put(&test_detail(id, "success")).unwrap();
        }
        assert_eq!(cache.list(2, CacheSort::Id).unwrap().len(), 2);
    }

    #[test]
    fn test_stats() {
        let cache = PipelineCache::open_in_memory().unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.count, 0);
        assert_eq!(stats.total_bytes, 0);
        assert!(stats.oldest.is_none());

        cache.put(&test_detail(1, "success")).unwrap();
        cache.put(&test_detail(2, "failed")).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.count, 2);
        assert!(stats.total_bytes > 0);
        assert!(stats.oldest.is_some());
        assert!(stats.newest.is_some());
    }

    #[test]
    fn test_delete_all() {
        let cache = PipelineCache::open_in_memory().unwrap();
        for id in 1..=4 {
            cache.put(&test_detail(id, "success")).unwrap();
        }
        cache.link_merge_request(100, 1, None).unwrap();

        assert_eq!(cache.delete_all().unwrap(), 4);
        assert_eq!(cache.stats().unwrap().count, 0);
        assert!(cache.pipeline_ids_for_mr(100).unwrap().is_empty());
    }

    #[test]
    fn test_mr_pipeline_index_roundtrip() {
        let cache = PipelineCache::open_in_memory().unwrap();
        let older = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();

        cache.link_merge_request(55, 900, Some(older)).unwrap();
        cache.link_merge_request(55, 901, Some(newer)).unwrap();
        // Re-linking the same pair is a no-op upsert
        cache.link_merge_request(55, 901, Some(newer)).unwrap();

        assert_eq!(cache.pipeline_ids_for_mr(55).unwrap(), vec![901, 900]);
        assert!(cache.pipeline_ids_for_mr(56).unwrap().is_empty());
    }

    #[test]
    fn test_cache_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines_cache.db");

        {
            let cache = PipelineCache::open(&path).unwrap();
            cache.put(&test_detail(11, "success")).unwrap();
        }

        let reopened = PipelineCache::open(&path).unwrap();
        let detail = reopened.get(11).unwrap().expect("persisted pipeline");
        assert_eq!(detail.pipeline.id, 11);
    }
}
