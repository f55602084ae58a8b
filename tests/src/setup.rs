//! A fully wired pipeline over in-memory collaborators.
//!
//! The broker is simulated by `MockPublisher` queues; `deliver_*` pops the
//! queued payloads and runs them through the same dispatch path the AMQP
//! consumer uses.

use std::sync::Arc;

use api::{router, AppState, GatewayConfig, HistoryService, IngestionCoordinator, UploadRequest};
use axum_test::TestServer;
use broker::{dispatch, HandlerOutcome};
use bytes::Bytes;
use pipeline_core::{Job, JobCreatedEvent, JobFinishedEvent, Result};
use worker::{NotificationWorker, OutboxRelay, ProcessingWorker, RelayConfig};

use crate::mocks::{MemoryFileStore, MemoryStore, MockPublisher, RecordingCache, RecordingMailer};

/// Default uploader used by `upload`.
pub const USER: &str = "ana@example.com";

/// Every component of the pipeline, sharing one set of collaborators.
pub struct Pipeline {
    pub store: MemoryStore,
    pub publisher: MockPublisher,
    pub files: MemoryFileStore,
    pub cache: RecordingCache,
    pub mailer: RecordingMailer,
    pub coordinator: Arc<IngestionCoordinator>,
    pub history: Arc<HistoryService>,
    pub processing: Arc<ProcessingWorker>,
    pub notifications: Arc<NotificationWorker>,
    pub relay: Arc<OutboxRelay>,
}

impl Pipeline {
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let publisher = MockPublisher::new();
        let files = MemoryFileStore::new();
        let cache = RecordingCache::new();
        let mailer = RecordingMailer::new();

        let coordinator = Arc::new(IngestionCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(files.clone()),
            Arc::new(cache.clone()),
            Arc::new(publisher.clone()),
        ));
        let history = Arc::new(HistoryService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(cache.clone()),
        ));
        let processing = Arc::new(ProcessingWorker::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(files.clone()),
            Arc::new(cache.clone()),
            Arc::new(publisher.clone()),
        ));
        let notifications = Arc::new(NotificationWorker::new(
            Arc::new(store.clone()),
            Arc::new(mailer.clone()),
        ));
        let relay = Arc::new(OutboxRelay::new(
            Arc::new(store.clone()),
            Arc::new(publisher.clone()),
            RelayConfig {
                interval_ms: 10,
                min_age_secs: 0,
                batch: 100,
            },
        ));

        Self {
            store,
            publisher,
            files,
            cache,
            mailer,
            coordinator,
            history,
            processing,
            notifications,
            relay,
        }
    }

    /// Submit `content` as `file_name` for `period`.
    pub async fn upload(&self, file_name: &str, period: &str, content: Vec<u8>) -> Result<Job> {
        self.coordinator
            .submit_upload(UploadRequest::new(
                file_name,
                USER,
                period,
                Bytes::from(content),
            ))
            .await
    }

    /// Deliver every queued JobCreatedEvent to the processing worker.
    pub async fn deliver_created(&self) -> Vec<HandlerOutcome> {
        let mut outcomes = Vec::new();
        for payload in self.publisher.take::<JobCreatedEvent>() {
            outcomes.push(dispatch::<JobCreatedEvent, _>(self.processing.as_ref(), &payload).await);
        }
        outcomes
    }

    /// Deliver every queued JobFinishedEvent to the notification worker.
    pub async fn deliver_finished(&self) -> Vec<HandlerOutcome> {
        let mut outcomes = Vec::new();
        for payload in self.publisher.take::<JobFinishedEvent>() {
            outcomes
                .push(dispatch::<JobFinishedEvent, _>(self.notifications.as_ref(), &payload).await);
        }
        outcomes
    }

    /// Drain both queues until nothing is left in flight.
    pub async fn run_to_completion(&self) {
        loop {
            let created = self.deliver_created().await;
            let finished = self.deliver_finished().await;
            if created.is_empty() && finished.is_empty() {
                break;
            }
        }
    }

    /// An HTTP test server over the gateway router.
    pub fn server(&self) -> TestServer {
        self.server_with(GatewayConfig::default())
    }

    pub fn server_with(&self, config: GatewayConfig) -> TestServer {
        let state = AppState::new(self.coordinator.clone(), self.history.clone(), config);
        TestServer::new(router(state)).expect("test server")
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
