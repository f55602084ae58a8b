//! Read side: job history, job status and processed records.

use std::sync::Arc;
use std::time::Duration;

use history_cache::HistoryCache;
use job_store::{JobRegistry, RecordStore};
use pipeline_core::limits::{HISTORY_CACHE_KEY, HISTORY_CACHE_TTL_SECS};
use pipeline_core::{Error, JobId, JobSummary, ProcessedRecord, RecordFilter, Result};
use tracing::{debug, warn};

/// Queries served by the gateway.
pub struct HistoryService {
    jobs: Arc<dyn JobRegistry>,
    records: Arc<dyn RecordStore>,
    cache: Arc<dyn HistoryCache>,
    ttl: Duration,
}

impl HistoryService {
    pub fn new(
        jobs: Arc<dyn JobRegistry>,
        records: Arc<dyn RecordStore>,
        cache: Arc<dyn HistoryCache>,
    ) -> Self {
        Self {
            jobs,
            records,
            cache,
            ttl: Duration::from_secs(HISTORY_CACHE_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// All job summaries, newest first, read through the cache.
    ///
    /// Cache failures fall back to the store.
    pub async fn job_history(&self) -> Result<Vec<JobSummary>> {
        match self.cache.get(HISTORY_CACHE_KEY).await {
            Ok(Some(cached)) => match serde_json::from_str(&cached) {
                Ok(history) => {
                    debug!("Job history cache hit");
                    return Ok(history);
                }
                Err(e) => warn!(error = %e, "Discarding undecodable job history cache entry"),
            },
            Ok(None) => debug!("Job history cache miss"),
            Err(e) => warn!(error = %e, "Job history cache unavailable"),
        }

        let history = self.jobs.list_summaries().await?;

        match serde_json::to_string(&history) {
            Ok(encoded) => {
                if let Err(e) = self.cache.set(HISTORY_CACHE_KEY, encoded, self.ttl).await {
                    warn!(error = %e, "Failed to cache job history");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode job history"),
        }

        Ok(history)
    }

    pub async fn job_status(&self, id: JobId) -> Result<JobSummary> {
        self.jobs
            .get_job(id)
            .await?
            .map(|job| JobSummary::from(&job))
            .ok_or(Error::JobNotFound(id))
    }

    pub async fn processed_records(&self, filter: RecordFilter) -> Result<Vec<ProcessedRecord>> {
        self.records.query_records(&filter.normalized()).await
    }
}
