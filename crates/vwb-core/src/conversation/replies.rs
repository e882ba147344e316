use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{CallbackQuery, Markup, OutgoingMessage, ReplyKeyboard},
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Send(OutgoingMessage),
    /// Replace the text of the message a callback came from.
    Edit {
        chat_id: ChatId,
        message: Option<MessageRef>,
        html: String,
    },
}

/// What a handler wants sent back, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub answer_callback: Option<String>,
    pub replies: Vec<Reply>,
}

impl Response {
    pub fn send(msg: OutgoingMessage) -> Self {
        Self {
            answer_callback: None,
            replies: vec![Reply::Send(msg)],
        }
    }

    /// Plain HTML notice with the main menu keyboard.
    pub fn notice(chat_id: ChatId, html: impl Into<String>) -> Self {
        Self::send(
            OutgoingMessage::html(chat_id, html).with_markup(Markup::Reply(ReplyKeyboard::main_menu())),
        )
    }

    /// Answer the callback and rewrite its message.
    pub fn edit(q: &CallbackQuery, html: impl Into<String>) -> Self {
        Self {
            answer_callback: Some(q.callback_id.clone()),
            replies: vec![Reply::Edit {
                chat_id: q.chat_id,
                message: q.message,
                html: html.into(),
            }],
        }
    }

    pub fn answering(mut self, q: Option<&CallbackQuery>) -> Self {
        if let Some(q) = q {
            self.answer_callback = Some(q.callback_id.clone());
        }
        self
    }

    pub fn texts(&self) -> Vec<&str> {
        self.replies
            .iter()
            .map(|r| match r {
                Reply::Send(m) => m.html.as_str(),
                Reply::Edit { html, .. } => html.as_str(),
            })
            .collect()
    }
}

/// Send a handler's response. Failures are logged, never retried.
pub async fn deliver(messenger: &dyn MessagingPort, response: Response) {
    if let Some(id) = response.answer_callback.as_deref() {
        if let Err(e) = messenger.answer_callback_query(id, None).await {
            tracing::warn!(callback_id = id, error = %e, "failed to answer callback query");
        }
    }

    let can_edit = messenger.capabilities().supports_edit;
    for reply in response.replies {
        let res = match reply {
            Reply::Send(msg) => messenger.send_message(&msg).await.map(|_| ()),
            Reply::Edit {
                message: Some(message),
                html,
                ..
            } if can_edit => messenger.edit_html(message, &html).await,
            Reply::Edit { chat_id, html, .. } => messenger
                .send_message(&OutgoingMessage::html(chat_id, html))
                .await
                .map(|_| ()),
        };
        if let Err(e) = res {
            tracing::warn!(error = %e, "failed to deliver reply");
        }
    }
}
