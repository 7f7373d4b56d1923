use keyward_core::constants::MAX_CALLBACK_DATA_BYTES;
use keyward_core::model::{MediaType, MessageButton, MessageTemplate, ParseMode};
use serde::{Deserialize, Serialize};

/// An outbound message, ready for a sink to deliver. Unlike
/// `MessageTemplate` (stored on a rule, unvalidated), every `Message` here
/// has already had its buttons filtered to only the valid ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Text {
        text: String,
        parse_mode: ParseMode,
        buttons: Vec<Vec<MessageButton>>,
    },
    Photo {
        media_id: String,
        caption: String,
        parse_mode: ParseMode,
        buttons: Vec<Vec<MessageButton>>,
    },
    Video {
        media_id: String,
        caption: String,
        parse_mode: ParseMode,
        buttons: Vec<Vec<MessageButton>>,
    },
    Document {
        media_id: String,
        caption: String,
        parse_mode: ParseMode,
        buttons: Vec<Vec<MessageButton>>,
    },
}

impl Message {
    pub fn text(body: impl Into<String>) -> Self {
        Message::Text {
            text: body.into(),
            parse_mode: ParseMode::Html,
            buttons: Vec::new(),
        }
    }
}

/// Is this a structurally valid button?
/// `text` non-empty, exactly one of `url`/`callback_data`, `url` must be
/// `http`/`https` with a non-empty host, `callback_data` within the byte
/// cap.
fn is_valid_button(button: &MessageButton) -> bool {
    if button.text.is_empty() {
        return false;
    }
    match (&button.url, &button.callback_data) {
        (Some(url), None) => url::Url::parse(url)
            .ok()
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().map(|h| !h.is_empty()).unwrap_or(false))
            .unwrap_or(false),
        (None, Some(data)) => data.len() <= MAX_CALLBACK_DATA_BYTES,
        _ => false,
    }
}

/// Drop invalid buttons silently, row by row, dropping rows left empty.
fn filter_buttons(buttons: &[Vec<MessageButton>]) -> Vec<Vec<MessageButton>> {
    buttons
        .iter()
        .map(|row| row.iter().filter(|b| is_valid_button(b)).cloned().collect::<Vec<_>>())
        .filter(|row: &Vec<MessageButton>| !row.is_empty())
        .collect()
}

/// Render a rule's stored template into a deliverable message.
pub fn render(template: &MessageTemplate, text: String) -> Message {
    let buttons = filter_buttons(&template.buttons);
    match template.media_type {
        MediaType::Text => Message::Text {
            text,
            parse_mode: template.parse_mode,
            buttons,
        },
        MediaType::Photo => Message::Photo {
            media_id: template.media_id.clone().unwrap_or_default(),
            caption: text,
            parse_mode: template.parse_mode,
            buttons,
        },
        MediaType::Video => Message::Video {
            media_id: template.media_id.clone().unwrap_or_default(),
            caption: text,
            parse_mode: template.parse_mode,
            buttons,
        },
        MediaType::Document => Message::Document {
            media_id: template.media_id.clone().unwrap_or_default(),
            caption: text,
            parse_mode: template.parse_mode,
            buttons,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(text: &str, url: Option<&str>, callback: Option<&str>) -> MessageButton {
        MessageButton {
            text: text.into(),
            url: url.map(String::from),
            callback_data: callback.map(String::from),
        }
    }

    #[test]
    fn button_needs_exactly_one_of_url_or_callback_data() {
        assert!(!is_valid_button(&button("both", Some("https://x.y"), Some("cb"))));
        assert!(!is_valid_button(&button("neither", None, None)));
        assert!(is_valid_button(&button("url", Some("https://x.y"), None)));
        assert!(is_valid_button(&button("cb", None, Some("short"))));
    }

    #[test]
    fn url_button_requires_http_or_https_scheme_and_host() {
        assert!(!is_valid_button(&button("bad", Some("ftp://x.y"), None)));
        assert!(!is_valid_button(&button("bad", Some("https:///nohost"), None)));
    }

    #[test]
    fn oversized_callback_data_is_rejected() {
        let oversized = "x".repeat(MAX_CALLBACK_DATA_BYTES + 1);
        assert!(!is_valid_button(&button("too long", None, Some(&oversized))));
    }

    #[test]
    fn rows_left_empty_after_filtering_are_dropped() {
        let rows = vec![
            vec![button("ok", Some("https://a.b"), None)],
            vec![button("bad", None, None)],
        ];
        let filtered = filter_buttons(&rows);
        assert_eq!(filtered.len(), 1);
    }
}
