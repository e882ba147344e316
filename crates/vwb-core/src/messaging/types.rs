use crate::domain::{ChatId, MessageRef};

/// Cross-messenger incoming update model.
///
/// Telegram-specific fields live in the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Text(TextMessage),
    /// A message without text (sticker, photo, ...).
    Unsupported { chat_id: ChatId },
    Callback(CallbackQuery),
}

impl IncomingUpdate {
    pub fn chat_id(&self) -> ChatId {
        match self {
            IncomingUpdate::Text(m) => m.chat_id,
            IncomingUpdate::Unsupported { chat_id } => *chat_id,
            IncomingUpdate::Callback(q) => q.chat_id,
        }
    }

    pub fn callback(&self) -> Option<&CallbackQuery> {
        match self {
            IncomingUpdate::Callback(q) => Some(q),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Sender {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub sender: Sender,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    /// Resolved from the acting user id.
    pub chat_id: ChatId,
    pub callback_id: String,
    pub data: Option<String>,
    pub message: Option<MessageRef>,
}

/// Inline keyboard (buttons attached to a message, answered via callbacks).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    pub fn button(label: impl Into<String>, callback_data: impl Into<String>) -> InlineButton {
        InlineButton {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Reply keyboard (persistent buttons that send their label as text).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<String>>,
}

impl ReplyKeyboard {
    pub fn new(rows: &[&[&str]]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|row| row.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    /// The main menu shown whenever a chat returns to idle.
    pub fn main_menu() -> Self {
        Self::new(&[&["Watch", "Unwatch"], &["Watch List"]])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Markup {
    #[default]
    None,
    Reply(ReplyKeyboard),
    Inline(InlineKeyboard),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: ChatId,
    pub html: String,
    pub markup: Markup,
    pub disable_link_preview: bool,
}

impl OutgoingMessage {
    pub fn html(chat_id: ChatId, html: impl Into<String>) -> Self {
        Self {
            chat_id,
            html: html.into(),
            markup: Markup::None,
            disable_link_preview: false,
        }
    }

    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.markup = markup;
        self
    }

    pub fn without_link_preview(mut self) -> Self {
        self.disable_link_preview = true;
        self
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_edit: bool,
    pub max_message_len: usize,
}
