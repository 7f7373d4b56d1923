use async_trait::async_trait;
use keyward_core::constants::MIN_HTTP_TIMEOUT;
use keyward_core::error::CoreError;
use keyward_core::model::{MessageButton, ParseMode, UserId};
use tracing::warn;

use crate::message::Message;
use crate::sink::MessagingSink;

/// Delivers over the Telegram Bot API. Mirrors `PanelClient`/
/// `PaymentProviderClient`'s shape — a `reqwest::Client`, a private `call`
/// helper, typed methods on top.
pub struct TelegramSink {
    base_url: String,
    admin_ids: Vec<UserId>,
    http: reqwest::Client,
}

impl TelegramSink {
    /// `api_base_url` is the bot-scoped Telegram API root, e.g.
    /// `https://api.telegram.org/bot<token>` — callers build this from
    /// their own token configuration, mirroring `PaymentProviderClient::new`.
    pub fn new(api_base_url: impl Into<String>, admin_ids: Vec<UserId>) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(MIN_HTTP_TIMEOUT)
            .build()
            .map_err(|e| CoreError::transient(format!("building telegram http client: {e}")))?;
        Ok(Self {
            base_url: api_base_url.into(),
            admin_ids,
            http,
        })
    }

    fn parse_mode_str(mode: ParseMode) -> &'static str {
        match mode {
            ParseMode::Html => "HTML",
            ParseMode::Markdown => "Markdown",
        }
    }

    fn reply_markup(buttons: &[Vec<MessageButton>]) -> Option<serde_json::Value> {
        if buttons.is_empty() {
            return None;
        }
        let rows: Vec<Vec<serde_json::Value>> = buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| {
                        let mut obj = serde_json::json!({ "text": b.text });
                        if let Some(url) = &b.url {
                            obj["url"] = serde_json::Value::String(url.clone());
                        }
                        if let Some(cb) = &b.callback_data {
                            obj["callback_data"] = serde_json::Value::String(cb.clone());
                        }
                        obj
                    })
                    .collect()
            })
            .collect();
        Some(serde_json::json!({ "inline_keyboard": rows }))
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value, CoreError> {
        let resp = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::delivery(format!("telegram request failed: {e}")))?;

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::delivery(format!("parsing telegram response: {e}")))?;

        if value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
            Ok(value)
        } else {
            let description = value
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown telegram error");
            // 403 "bot was blocked by the user" lands here, not as a transport
            // error — it is the blocked/deleted-user case the messaging sink
            // needs to surface distinctly.
            Err(CoreError::delivery(format!("telegram API error: {description}")))
        }
    }

    async fn deliver(&self, chat_id: i64, message: &Message) -> Result<String, CoreError> {
        let result = match message {
            Message::Text { text, parse_mode, buttons } => {
                let mut body = serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": Self::parse_mode_str(*parse_mode),
                });
                if let Some(markup) = Self::reply_markup(buttons) {
                    body["reply_markup"] = markup;
                }
                self.call("sendMessage", body).await?
            }
            Message::Photo { media_id, caption, parse_mode, buttons } => {
                let mut body = serde_json::json!({
                    "chat_id": chat_id,
                    "photo": media_id,
                    "caption": caption,
                    "parse_mode": Self::parse_mode_str(*parse_mode),
                });
                if let Some(markup) = Self::reply_markup(buttons) {
                    body["reply_markup"] = markup;
                }
                self.call("sendPhoto", body).await?
            }
            Message::Video { media_id, caption, parse_mode, buttons } => {
                let mut body = serde_json::json!({
                    "chat_id": chat_id,
                    "video": media_id,
                    "caption": caption,
                    "parse_mode": Self::parse_mode_str(*parse_mode),
                });
                if let Some(markup) = Self::reply_markup(buttons) {
                    body["reply_markup"] = markup;
                }
                self.call("sendVideo", body).await?
            }
            Message::Document { media_id, caption, parse_mode, buttons } => {
                let mut body = serde_json::json!({
                    "chat_id": chat_id,
                    "document": media_id,
                    "caption": caption,
                    "parse_mode": Self::parse_mode_str(*parse_mode),
                });
                if let Some(markup) = Self::reply_markup(buttons) {
                    body["reply_markup"] = markup;
                }
                self.call("sendDocument", body).await?
            }
        };

        result
            .get("result")
            .and_then(|r| r.get("message_id"))
            .map(|id| id.to_string())
            .ok_or_else(|| CoreError::delivery("telegram response missing result.message_id"))
    }
}

#[async_trait]
impl MessagingSink for TelegramSink {
    async fn send(&self, user_id: UserId, message: Message) -> Result<String, CoreError> {
        self.deliver(user_id, &message).await
    }

    /// Best-effort: one admin's blocked bot doesn't stop the others.
    async fn send_admins(&self, message: Message) -> Result<(), CoreError> {
        for admin_id in &self.admin_ids {
            if let Err(e) = self.deliver(*admin_id, &message).await {
                warn!(error = %e, admin_id, "failed to notify admin");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink_against(base_url: String, admin_ids: Vec<UserId>) -> TelegramSink {
        TelegramSink {
            base_url,
            admin_ids,
            http: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn send_returns_the_message_id_on_success() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sendMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ok": true, "result": {"message_id": 42}})),
            )
            .mount(&mock)
            .await;

        let sink = sink_against(mock.uri(), vec![]);
        let id = sink.send(100, Message::text("hi")).await.unwrap();
        assert_eq!(id, "42");
    }

    #[tokio::test]
    async fn send_surfaces_a_delivery_error_on_blocked_bot() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"ok": false, "description": "Forbidden: bot was blocked by the user"}),
            ))
            .mount(&mock)
            .await;

        let sink = sink_against(mock.uri(), vec![]);
        let err = sink.send(100, Message::text("hi")).await.unwrap_err();
        assert!(matches!(err, CoreError::Delivery(_)));
    }

    #[tokio::test]
    async fn send_admins_keeps_going_past_one_failed_delivery() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sendMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": false})))
            .mount(&mock)
            .await;

        let sink = sink_against(mock.uri(), vec![1, 2, 3]);
        sink.send_admins(Message::text("alert")).await.unwrap();
    }

    #[test]
    fn reply_markup_is_none_for_no_buttons() {
        assert!(TelegramSink::reply_markup(&[]).is_none());
    }

    #[test]
    fn reply_markup_renders_url_and_callback_buttons() {
        let rows = vec![vec![
            MessageButton { text: "go".into(), url: Some("https://x.y".into()), callback_data: None },
            MessageButton { text: "ack".into(), url: None, callback_data: Some("ack".into()) },
        ]];
        let markup = TelegramSink::reply_markup(&rows).unwrap();
        let buttons = markup["inline_keyboard"][0].as_array().unwrap();
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0]["url"], "https://x.y");
        assert_eq!(buttons[1]["callback_data"], "ack");
    }
}
