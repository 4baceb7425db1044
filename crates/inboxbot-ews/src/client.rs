//! EWS client.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use inboxbot_scheduler::{BackendError, Credential, MailBackend, MailMessage, OutgoingMail};

use crate::response::{self, EwsResponse, ParsedItem};
use crate::soap::{self, Disposition, InlineAttachment, ItemRef};
use crate::{EwsError, SERVER_BUSY};

/// Default Exchange host.
pub const DEFAULT_SERVER: &str = "mail.spbstu.ru";

/// Default HTTPS port.
pub const DEFAULT_PORT: u16 = 443;

/// Default number of unread messages fetched per poll.
pub const DEFAULT_FETCH_LIMIT: usize = 20;

/// Exchange connection settings shared by all accounts.
#[derive(Debug, Clone)]
pub struct EwsConfig {
    pub server: String,
    pub port: u16,
    /// Full endpoint URL; overrides `server` and `port` when set.
    pub endpoint: Option<String>,
    /// Reject invalid TLS certificates.
    pub verify_tls: bool,
    /// Unread messages fetched per poll.
    pub fetch_limit: usize,
    /// Flag fetched messages as read on the server.
    pub mark_as_read: bool,
    /// Upper bound on one HTTP round trip.
    pub request_timeout: Duration,
}

impl Default for EwsConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            endpoint: None,
            verify_tls: true,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            mark_as_read: false,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl EwsConfig {
    /// The `Exchange.asmx` URL requests are posted to.
    pub fn endpoint_url(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        if self.port == DEFAULT_PORT {
            format!("https://{}/EWS/Exchange.asmx", self.server)
        } else {
            format!("https://{}:{}/EWS/Exchange.asmx", self.server, self.port)
        }
    }
}

/// Exchange Web Services client.
///
/// One client serves every account; the credential is passed per call.
pub struct EwsClient {
    http: Client,
    endpoint: String,
    config: EwsConfig,
}

impl EwsClient {
    /// Create a new client.
    pub fn new(config: EwsConfig) -> Result<Self, EwsError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout);

        if !config.verify_tls {
            warn!(server = %config.server, "TLS certificate verification disabled for EWS");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let endpoint = config.endpoint_url();
        info!(endpoint = %endpoint, "EWS client configured");

        Ok(Self {
            http: builder.build()?,
            endpoint,
            config,
        })
    }

    pub fn config(&self) -> &EwsConfig {
        &self.config
    }

    /// Unread inbox messages, newest first, with attachment names and sizes.
    #[tracing::instrument(skip(self, credential), fields(login = %credential.login))]
    pub async fn fetch_unread(&self, credential: &Credential) -> Result<Vec<MailMessage>, EwsError> {
        let found = self
            .call(credential, "FindItem", soap::find_unread(self.config.fetch_limit))
            .await?;
        let mut items = found.items;

        let with_attachments: Vec<ItemRef> = items
            .iter()
            .filter(|item| item.has_attachments)
            .filter_map(|item| item.id.clone())
            .collect();

        if !with_attachments.is_empty() {
            let details = self
                .call(credential, "GetItem", soap::get_attachments(&with_attachments))
                .await?;
            let mut by_id: HashMap<String, ParsedItem> = details
                .items
                .into_iter()
                .filter_map(|item| item.id.clone().map(|id| (id.id, item)))
                .collect();

            for item in items.iter_mut() {
                if let Some(detail) = item.id.as_ref().and_then(|id| by_id.remove(&id.id)) {
                    item.attachments = detail.attachments;
                }
            }
        }

        if self.config.mark_as_read && !items.is_empty() {
            let ids: Vec<ItemRef> = items.iter().filter_map(|item| item.id.clone()).collect();
            // Notifications matter more than the read flag
            if let Err(e) = self.call(credential, "UpdateItem", soap::mark_read(&ids)).await {
                warn!(error = %e, count = ids.len(), "failed to mark messages as read");
            }
        }

        let messages: Vec<MailMessage> = items.into_iter().map(into_message).collect();
        debug!(count = messages.len(), limit = self.config.fetch_limit, "fetched unread mail");
        Ok(messages)
    }

    /// Send a plain-text message from the credential's mailbox.
    ///
    /// Attachment paths that do not exist are skipped with a warning.
    #[tracing::instrument(skip(self, credential, mail), fields(login = %credential.login, to = mail.to.len()))]
    pub async fn send_mail(&self, credential: &Credential, mail: &OutgoingMail) -> Result<(), EwsError> {
        if mail.to.is_empty() {
            return Err(EwsError::InvalidRequest("no recipients".to_string()));
        }

        let attachments = load_attachments(mail).await?;
        let disposition = if mail.save_to_sent {
            Disposition::SendAndSaveCopy
        } else {
            Disposition::SendOnly
        };

        let body = soap::create_message(&mail.to, &mail.subject, &mail.body, &attachments, disposition);
        self.call(credential, "CreateItem", body).await?;

        info!(
            subject = %mail.subject,
            attachments = attachments.len(),
            "mail sent"
        );
        Ok(())
    }

    /// Post one SOAP request and check the reply for errors.
    async fn call(
        &self,
        credential: &Credential,
        operation: &'static str,
        body: String,
    ) -> Result<EwsResponse, EwsError> {
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&credential.login, Some(&credential.secret))
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(soap::envelope(&body))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(EwsError::Unauthorized);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .map(|s| format!(" (retry after {}s)", s))
                .unwrap_or_default();
            return Err(EwsError::Throttled {
                operation,
                detail: format!("HTTP 429{}", retry_after),
            });
        }

        let text = response.text().await?;

        // Faults usually come back as HTTP 500 with a SOAP body
        let parsed = match response::parse(&text) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(EwsError::Xml {
                    operation,
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(EwsError::Status {
                    operation,
                    status: status.as_u16(),
                    body: truncate(&text, 200),
                });
            }
        };

        if let Some(fault) = parsed.fault {
            if fault.code.as_deref() == Some(SERVER_BUSY) {
                return Err(EwsError::Throttled {
                    operation,
                    detail: fault.message,
                });
            }
            return Err(EwsError::Fault {
                operation,
                message: fault.message,
            });
        }

        if !status.is_success() {
            return Err(EwsError::Status {
                operation,
                status: status.as_u16(),
                body: truncate(&text, 200),
            });
        }

        if let Some(error) = parsed.first_error() {
            let code = error.code.clone().unwrap_or_else(|| "unknown".to_string());
            let message = error.text.clone().unwrap_or_default();
            if code == SERVER_BUSY {
                return Err(EwsError::Throttled {
                    operation,
                    detail: message,
                });
            }
            return Err(EwsError::Response {
                operation,
                code,
                message,
            });
        }

        Ok(parsed)
    }
}

#[async_trait]
impl MailBackend for EwsClient {
    async fn fetch_unread(&self, credential: &Credential) -> Result<Vec<MailMessage>, BackendError> {
        Ok(EwsClient::fetch_unread(self, credential).await?)
    }

    async fn send_mail(&self, credential: &Credential, mail: &OutgoingMail) -> Result<(), BackendError> {
        Ok(EwsClient::send_mail(self, credential, mail).await?)
    }
}

fn into_message(item: ParsedItem) -> MailMessage {
    MailMessage {
        sender: item.sender_address().map(str::to_string),
        id: item.id.map(|id| id.id),
        subject: item.subject,
        received_at: item.received_at,
        has_attachments: item.has_attachments,
        attachments: item.attachments,
    }
}

async fn load_attachments(mail: &OutgoingMail) -> Result<Vec<InlineAttachment>, EwsError> {
    let mut attachments = Vec::with_capacity(mail.attachments.len());

    for path in &mail.attachments {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "attachment not found, skipping");
                continue;
            }
            Err(source) => {
                return Err(EwsError::Attachment {
                    path: path.clone(),
                    source,
                });
            }
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        attachments.push(InlineAttachment {
            name,
            content: STANDARD.encode(content),
        });
    }

    Ok(attachments)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
