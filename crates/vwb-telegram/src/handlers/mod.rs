//! Telegram update handlers.
//!
//! Each handler converts the teloxide update into the core's
//! `IncomingUpdate`, runs it through the conversation engine under the
//! chat's lock, then delivers the resulting replies.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use vwb_core::{
    conversation::replies::deliver,
    domain::{ChatId, MessageId, MessageRef},
    messaging::types::{self, IncomingUpdate, Sender, TextMessage},
};

use crate::router::AppState;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    process(callback_update(&q), &state).await;
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    process(message_update(&msg), &state).await;
    Ok(())
}

async fn process(update: IncomingUpdate, state: &AppState) {
    let chat_id = update.chat_id();
    // Dialog steps are read-modify-write on the stored state.
    let _guard = state.chat_locks.lock_chat(chat_id).await;
    tracing::debug!(chat_id = chat_id.0, "handling update");
    let response = state.conversation.handle_update(&update).await;
    deliver(state.messenger.as_ref(), response).await;
}

pub(crate) fn message_update(msg: &Message) -> IncomingUpdate {
    let chat_id = ChatId(msg.chat.id.0);
    match msg.text() {
        Some(text) => IncomingUpdate::Text(TextMessage {
            chat_id,
            sender: Sender {
                username: msg.chat.username().map(str::to_string),
                first_name: msg.chat.first_name().map(str::to_string),
                last_name: msg.chat.last_name().map(str::to_string),
            },
            text: text.to_string(),
        }),
        None => IncomingUpdate::Unsupported { chat_id },
    }
}

pub(crate) fn callback_update(q: &CallbackQuery) -> IncomingUpdate {
    IncomingUpdate::Callback(types::CallbackQuery {
        chat_id: ChatId(q.from.id.0 as i64),
        callback_id: q.id.clone(),
        data: q.data.clone(),
        message: q.message.as_ref().map(|m| MessageRef {
            chat_id: ChatId(m.chat.id.0),
            message_id: MessageId(m.id.0),
        }),
    })
}
