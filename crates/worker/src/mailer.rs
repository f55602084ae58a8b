//! Outcome emails.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use pipeline_core::{Error, JobId, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Email delivery collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send the outcome email for a job.
    async fn send(&self, recipient: &str, job_id: JobId, had_errors: bool) -> Result<()>;
}

/// Subject and plain-text body of an outcome email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

impl EmailContent {
    pub fn for_outcome(job_id: JobId, had_errors: bool) -> Self {
        let (state, detail) = if had_errors {
            (
                "FINALIZADA CON ERRORES",
                "El proceso terminó con errores. Revise el historial de cargas para ver el detalle.",
            )
        } else {
            (
                "FINALIZADA EXITOSAMENTE",
                "Todos los registros fueron procesados correctamente.",
            )
        };

        Self {
            subject: format!("Carga Masiva #{job_id} - {state}"),
            body: format!(
                "Estimado usuario,\n\n\
                 La carga masiva #{job_id} ha sido procesada.\n\
                 Estado final: {state}\n\n\
                 {detail}\n"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailBackend {
    Smtp,
    /// Log the email instead of sending it.
    Log,
}

/// Mail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_backend")]
    pub backend: MailBackend,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS
    #[serde(default = "default_starttls")]
    pub starttls: bool,
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
}

fn default_backend() -> MailBackend {
    MailBackend::Log
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

fn default_sender() -> String {
    "no-reply@localhost".to_string()
}

fn default_sender_name() -> String {
    "Carga Masiva".to_string()
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            starttls: default_starttls(),
            sender: default_sender(),
            sender_name: default_sender_name(),
        }
    }
}

/// Build the configured mailer.
pub fn build_mailer(config: &MailConfig) -> Result<Arc<dyn Mailer>> {
    Ok(match config.backend {
        MailBackend::Smtp => Arc::new(SmtpMailer::new(config)?),
        MailBackend::Log => Arc::new(LogMailer),
    })
}

/// SMTP delivery through lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| Error::mail(format!("smtp relay {}: {e}", config.host)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = builder.port(config.port);
        let builder = match (&config.username, &config.password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        let from = Mailbox::new(
            Some(config.sender_name.clone()),
            config
                .sender
                .parse()
                .map_err(|e| Error::mail(format!("invalid sender '{}': {e}", config.sender)))?,
        );

        info!(host = %config.host, port = config.port, "SMTP mailer configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, recipient: &str, job_id: JobId, had_errors: bool) -> Result<()> {
        let content = EmailContent::for_outcome(job_id, had_errors);
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| Error::mail(format!("invalid recipient '{recipient}': {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(content.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(content.body)
            .map_err(|e| Error::mail(format!("build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::mail(e.to_string()))?;

        debug!(job_id, "Outcome email sent");
        Ok(())
    }
}

/// Logs outcome emails instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, job_id: JobId, had_errors: bool) -> Result<()> {
        let content = EmailContent::for_outcome(job_id, had_errors);
        info!(to = %recipient, subject = %content.subject, "Would send email");
        Ok(())
    }
}
