//! Durable REST client
//!
//! Every outgoing message goes through this path regardless of push-channel
//! state; the push side is best-effort, this one is authoritative.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::warn;

use crate::error::ApiError;
use crate::models::{
    Conversation, Message, SendMessageRequest, UnreadCountResponse,
};

/// Fixed delay between retries of a transient failure
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maximum attempts for one durable write
const MAX_ATTEMPTS: u32 = 3;

/// Hard cap on any single request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated REST client for the messaging endpoints
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Create a client for the given API root, carrying the bearer credential
    /// on every call
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let base_url: String = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Persist a message server-side and return the authoritative record.
    ///
    /// Transient failures (network, serverfault-class status) are retried
    /// with a fixed delay; validation and permission failures propagate
    /// immediately. The returned `id` and `timestamp` replace any provisional
    /// values used for optimistic display.
    pub async fn send_message(
        &self,
        subject_label: &str,
        text: &str,
        receiver_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<Message, ApiError> {
        let body = SendMessageRequest {
            school_name: subject_label.to_string(),
            message_text: text.to_string(),
            receiver_id: receiver_id.to_string(),
            conversation_id: conversation_id.map(str::to_string),
        };

        retry_transient(MAX_ATTEMPTS, RETRY_DELAY, || async {
            let resp = self
                .http
                .post(self.url("/api/messages/"))
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await?;

            Ok(check(resp).await?.json::<Message>().await?)
        })
        .await
    }

    /// Fetch all conversation summaries for the current user
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let resp = self
            .http
            .get(self.url("/api/conversations/"))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Ok(check(resp).await?.json().await?)
    }

    /// Fetch the ordered message history of one conversation
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/api/conversations/{}/messages/", conversation_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        Ok(check(resp).await?.json().await?)
    }

    /// Mark every message of a conversation as read
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/conversations/{}/mark-read/", conversation_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        check(resp).await?;
        Ok(())
    }

    /// Fetch the server-side total unread count for the current user
    pub async fn unread_count(&self) -> Result<u32, ApiError> {
        let resp = self
            .http
            .get(self.url("/api/messages/unread-count/"))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let counts: UnreadCountResponse = check(resp).await?.json().await?;
        Ok(counts.unread_count)
    }
}

/// Map a non-success status onto the error taxonomy
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();

    if status.is_success() {
        return Ok(resp);
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }

    if status.is_server_error() {
        return Err(ApiError::Server {
            status: status.as_u16(),
        });
    }

    let message = resp.text().await.unwrap_or_default();
    Err(ApiError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Run an operation, retrying transient failures up to `max_attempts` total
/// tries with a fixed delay in between. Permanent failures propagate on the
/// first occurrence.
async fn retry_transient<T, F, Fut>(
    max_attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    "Durable call failed (attempt {}/{}), retrying: {}",
                    attempt, max_attempts, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
