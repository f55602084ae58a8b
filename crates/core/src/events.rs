//! Broker event definitions.
//!
//! Events are JSON objects with camelCase field names. Receivers match field
//! names case-insensitively, then decode strictly: unknown or missing fields
//! reject the payload instead of producing a partially filled event.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::job::{Job, JobId};

/// Exchange, queue and routing key owned by one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub exchange: &'static str,
    pub queue: &'static str,
    pub routing_key: &'static str,
}

impl Route {
    /// Queue receiving messages dead-lettered from this route's queue.
    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dlq", self.queue)
    }
}

/// Route for job creation (gateway -> processing worker).
pub const JOB_CREATED_ROUTE: Route = Route {
    exchange: "jobs.exchange",
    queue: "FileProcessingQueue",
    routing_key: "FileProcessingQueue",
};

/// Route for job completion (processing worker -> notification worker).
pub const JOB_FINISHED_ROUTE: Route = Route {
    exchange: "notifications.exchange",
    queue: "notification.finished.queue",
    routing_key: "notificaciones",
};

/// A typed message travelling over a fixed route.
pub trait PipelineEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable event type name, stored with outbox rows.
    const NAME: &'static str;
    const ROUTE: Route;
    /// Canonical wire field names.
    const FIELDS: &'static [&'static str];

    fn job_id(&self) -> JobId;

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        decode_case_insensitive(payload, Self::FIELDS)
    }
}

/// Published once a job row exists and its file is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobCreatedEvent {
    pub carga_archivo_id: JobId,
    pub file_key: String,
    pub file_name: String,
    pub user_email: String,
    pub file_size_in_bytes: i64,
}

impl JobCreatedEvent {
    pub fn for_job(job: &Job, file_size_in_bytes: i64) -> Self {
        Self {
            carga_archivo_id: job.id,
            file_key: job.file_key.clone(),
            file_name: job.file_name.clone(),
            user_email: job.user.clone(),
            file_size_in_bytes,
        }
    }
}

impl PipelineEvent for JobCreatedEvent {
    const NAME: &'static str = "job_created";
    const ROUTE: Route = JOB_CREATED_ROUTE;
    const FIELDS: &'static [&'static str] = &[
        "cargaArchivoId",
        "fileKey",
        "fileName",
        "userEmail",
        "fileSizeInBytes",
    ];

    fn job_id(&self) -> JobId {
        self.carga_archivo_id
    }
}

/// Published when processing reached Finished or Error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobFinishedEvent {
    pub carga_archivo_id: JobId,
    #[serde(default)]
    pub usuario_email: Option<String>,
    pub fecha_fin: DateTime<Utc>,
    pub con_errores: bool,
}

impl JobFinishedEvent {
    pub fn for_job(job: &Job, had_errors: bool) -> Self {
        let recipient = Some(job.user.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            carga_archivo_id: job.id,
            usuario_email: recipient,
            fecha_fin: job.finished_at.unwrap_or_else(Utc::now),
            con_errores: had_errors,
        }
    }

    /// Non-blank recipient address, if any.
    pub fn recipient(&self) -> Option<&str> {
        self.usuario_email
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl PipelineEvent for JobFinishedEvent {
    const NAME: &'static str = "job_finished";
    const ROUTE: Route = JOB_FINISHED_ROUTE;
    const FIELDS: &'static [&'static str] =
        &["cargaArchivoId", "usuarioEmail", "fechaFin", "conErrores"];

    fn job_id(&self) -> JobId {
        self.carga_archivo_id
    }
}

/// Decode a JSON object whose keys may use any casing of `fields`.
pub fn decode_case_insensitive<T: DeserializeOwned>(payload: &[u8], fields: &[&str]) -> Result<T> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| Error::malformed(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(Error::malformed("event payload is not a JSON object"));
    };

    let mut canonical = Map::with_capacity(map.len());
    for (key, value) in map {
        let name = fields
            .iter()
            .find(|field| field.eq_ignore_ascii_case(&key))
            .map(|field| field.to_string())
            .unwrap_or(key);
        if canonical.contains_key(&name) {
            return Err(Error::malformed(format!("duplicate field '{name}'")));
        }
        canonical.insert(name, value);
    }

    serde_json::from_value(Value::Object(canonical)).map_err(|e| Error::malformed(e.to_string()))
}
