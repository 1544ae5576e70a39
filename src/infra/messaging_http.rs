//! Messaging endpoint over a bot-style HTTP API.
//!
//! `GET {base}/getUpdates?offset=&timeout=` returns
//! `{ok, result: [{update_id, message: {chat: {id}, from: {id}, text}}]}` and
//! `POST {base}/sendMessage {chat_id, text}` sends a reply.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::error::{ControlPlaneError, Result};
use crate::core::model::Update;
use crate::core::router::MessagingEndpoint;

/// Slack added to the long-poll wait before the HTTP request itself times out.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawPeer,
    #[serde(default)]
    from: Option<RawPeer>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPeer {
    id: serde_json::Value,
}

fn peer_id(value: &serde_json::Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let Some(message) = raw.message else {
            return Self {
                update_id: raw.update_id,
                chat_id: String::new(),
                sender_id: String::new(),
                text: String::new(),
            };
        };
        let chat_id = peer_id(&message.chat.id);
        let sender_id = message
            .from
            .as_ref()
            .map_or_else(|| chat_id.clone(), |from| peer_id(&from.id));
        Self {
            update_id: raw.update_id,
            chat_id,
            sender_id,
            text: message.text.unwrap_or_default(),
        }
    }
}

/// [`MessagingEndpoint`] over HTTP.
#[derive(Clone)]
pub struct HttpMessagingEndpoint {
    base_url: String,
    client: reqwest::Client,
}

impl HttpMessagingEndpoint {
    /// Endpoint rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }
}

fn transport(e: &reqwest::Error) -> ControlPlaneError {
    ControlPlaneError::TransientInfra(format!("messaging endpoint: {e}"))
}

#[async_trait]
impl MessagingEndpoint for HttpMessagingEndpoint {
    async fn fetch_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(self.url("getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", timeout.as_secs().to_string())])
            .timeout(timeout + POLL_GRACE)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ControlPlaneError::TransientInfra(format!(
                "getUpdates returned {status}"
            )));
        }
        let envelope: Envelope<Vec<RawUpdate>> = response.json().await.map_err(|e| transport(&e))?;
        if !envelope.ok {
            return Err(ControlPlaneError::Backend(format!(
                "getUpdates failed: {}",
                envelope.description.unwrap_or_default()
            )));
        }
        Ok(envelope
            .result
            .unwrap_or_default()
            .into_iter()
            .map(Update::from)
            .collect())
    }

    async fn send_reply(&self, chat_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| transport(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ControlPlaneError::Backend(format!("sendMessage returned {status}")));
        }
        Ok(())
    }
}
