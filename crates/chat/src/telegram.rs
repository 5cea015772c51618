use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use novaxa_core::config::ChatConfig;
use novaxa_core::domain::response::ReplyFormat;

use crate::events::{ChatEnvelope, ChatEvent, IncomingMessage, OutgoingMessage};
use crate::runner::{ChatTransport, TransportError};

const HTTP_GRACE: Duration = Duration::from_secs(10);

/// Telegram Bot API transport using long polling. Offsets only advance on
/// `acknowledge`, so an update is redelivered if the process dies before
/// it was queued.
pub struct TelegramTransport {
    client: Client,
    api_base_url: String,
    bot_token: SecretString,
    poll_timeout_secs: u64,
    state: Mutex<PollState>,
}

#[derive(Default)]
struct PollState {
    offset: i64,
    buffered: VecDeque<ChatEnvelope>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotIdentity {
    id: i64,
    username: Option<String>,
}

impl TelegramTransport {
    pub fn new(config: &ChatConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs) + HTTP_GRACE)
            .build()
            .map_err(|error| TransportError::Connect(error.without_url().to_string()))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_owned(),
            bot_token: SecretString::from(config.bot_token.expose_secret().to_owned()),
            poll_timeout_secs: config.poll_timeout_secs,
            state: Mutex::new(PollState::default()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base_url, self.bot_token.expose_secret(), method)
    }

    // reqwest errors carry the request URL, which embeds the token.
    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, String> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|error| error.without_url().to_string())?;
        let status = response.status();
        let payload: ApiResponse<T> =
            response.json().await.map_err(|error| error.without_url().to_string())?;

        match payload {
            ApiResponse { ok: true, result: Some(result), .. } => Ok(result),
            ApiResponse { description, .. } => Err(format!(
                "{method} returned {status}: {}",
                description.unwrap_or_else(|| "no description".to_owned())
            )),
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let identity: BotIdentity =
            self.call("getMe", json!({})).await.map_err(TransportError::Connect)?;
        info!(
            event_name = "chat.telegram.identified",
            bot_id = identity.id,
            bot_username = identity.username.as_deref().unwrap_or(""),
            "telegram bot identified"
        );
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<ChatEnvelope>, TransportError> {
        loop {
            let offset = {
                let mut state = self.state.lock().await;
                if let Some(envelope) = state.buffered.pop_front() {
                    return Ok(Some(envelope));
                }
                state.offset
            };

            let updates: Vec<Value> = self
                .call(
                    "getUpdates",
                    json!({
                        "offset": offset,
                        "timeout": self.poll_timeout_secs,
                        "allowed_updates": ["message"],
                    }),
                )
                .await
                .map_err(TransportError::Receive)?;
            debug!(event_name = "chat.telegram.polled", offset, updates = updates.len(), "polled updates");

            let mut state = self.state.lock().await;
            state.buffered.extend(updates.iter().filter_map(envelope_from_update));
        }
    }

    async fn acknowledge(&self, update_id: i64) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.offset = state.offset.max(update_id + 1);
        Ok(())
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let _: Value =
            self.call("sendMessage", send_message_body(message)).await.map_err(TransportError::Send)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.buffered.clear();
        info!(event_name = "chat.telegram.disconnected", offset = state.offset, "telegram polling stopped");
        Ok(())
    }
}

/// Converts one `getUpdates` item into an envelope. Updates without an id
/// are dropped; anything other than a text message becomes `Unsupported`.
pub fn envelope_from_update(update: &Value) -> Option<ChatEnvelope> {
    let update_id = update.get("update_id")?.as_i64()?;

    let Some(message) = update.get("message") else {
        let event_type = update
            .as_object()
            .and_then(|fields| fields.keys().find(|key| key.as_str() != "update_id").cloned())
            .unwrap_or_else(|| "unknown".to_owned());
        return Some(ChatEnvelope { update_id, event: ChatEvent::Unsupported { event_type } });
    };

    let parsed = (|| {
        Some(IncomingMessage {
            chat_id: message.get("chat")?.get("id")?.as_i64()?,
            message_id: message.get("message_id")?.as_i64()?,
            user_id: message.get("from")?.get("id")?.as_i64()?,
            text: message.get("text")?.as_str()?.to_owned(),
        })
    })();

    Some(match parsed {
        Some(incoming) => ChatEnvelope::from_message(update_id, incoming),
        None => ChatEnvelope {
            update_id,
            event: ChatEvent::Unsupported { event_type: "message:non_text".to_owned() },
        },
    })
}

fn send_message_body(message: &OutgoingMessage) -> Value {
    let mut body = json!({
        "chat_id": message.chat_id,
        "text": message.text,
    });
    if let Some(reply_to) = message.reply_to_message_id {
        body["reply_parameters"] = json!({ "message_id": reply_to, "allow_sending_without_reply": true });
    }
    if message.format == ReplyFormat::Markdown {
        body["parse_mode"] = json!("Markdown");
    }
    body
}
