//! Telegram adapter (teloxide).
//!
//! Implements the `vwb-core` MessagingPort over the Telegram Bot API and
//! feeds inbound updates into the conversation engine.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, ParseMode,
        ReplyMarkup,
    },
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use vwb_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{Markup, MessagingCapabilities, OutgoingMessage},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::debug!(wait_ms = d.as_millis() as u64, "telegram flood wait");
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

/// Translate the port's keyboard model into Telegram markup.
pub(crate) fn reply_markup(markup: &Markup) -> Option<ReplyMarkup> {
    match markup {
        Markup::None => None,
        Markup::Reply(keyboard) => {
            let rows: Vec<Vec<KeyboardButton>> = keyboard
                .rows
                .iter()
                .map(|row| row.iter().map(KeyboardButton::new).collect())
                .collect();
            Some(ReplyMarkup::Keyboard(
                KeyboardMarkup::new(rows).resize_keyboard(true),
            ))
        }
        Markup::Inline(keyboard) => {
            // One button per row.
            let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
                .buttons
                .iter()
                .map(|b| {
                    vec![InlineKeyboardButton::callback(
                        b.label.clone(),
                        b.callback_data.clone(),
                    )]
                })
                .collect();
            Some(ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(rows)))
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            max_message_len: 4096,
        }
    }

    async fn send_message(&self, msg: &OutgoingMessage) -> Result<MessageRef> {
        let markup = reply_markup(&msg.markup);
        let sent = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(msg.chat_id), msg.html.clone())
                    .parse_mode(ParseMode::Html);
                if msg.disable_link_preview {
                    req = req.disable_web_page_preview(true);
                }
                if let Some(m) = markup.clone() {
                    req = req.reply_markup(m);
                }
                req
            })
            .await?;

        Ok(MessageRef {
            chat_id: msg.chat_id,
            message_id: MessageId(sent.id.0),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}
