//! Per-chat command routing and the watch / unwatch dialogs.
//!
//! Every inbound update resolves to one chat. A chat with persisted dialog
//! state is routed by that state; an idle chat is routed by its normalized
//! command text.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    config::Config,
    domain::ChatId,
    messaging::types::{CallbackQuery, IncomingUpdate, Sender},
    pipeline::MessageLimits,
    store::{ConversationState, Store},
    Result,
};

pub mod command;
pub mod replies;
pub mod state;

mod lists;
mod unwatch;
mod watch;

use command::{normalize_command, COMMAND_MAX_LEN};
use replies::Response;
use state::{Decoded, Dialog, UnwatchStep, WatchStep, UNWATCH};

#[derive(Clone, Copy, Debug)]
pub struct ConversationSettings {
    pub command_max_len: usize,
    pub limits: MessageLimits,
}

impl ConversationSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            command_max_len: cfg.command_max_len,
            limits: MessageLimits {
                soft: cfg.notify_soft_limit,
                hard: cfg.telegram_message_limit,
            },
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            command_max_len: COMMAND_MAX_LEN,
            limits: MessageLimits::default(),
        }
    }
}

/// An update reduced to what the handlers look at.
pub(crate) struct Input<'a> {
    chat_id: ChatId,
    /// Trimmed message text; `None` for callbacks.
    text: Option<&'a str>,
    /// Normalized routing key; empty for callbacks.
    command: String,
    callback: Option<&'a CallbackQuery>,
    sender: Option<&'a Sender>,
}

impl Input<'_> {
    fn callback_data(&self) -> Option<&str> {
        self.callback.and_then(|q| q.data.as_deref())
    }
}

pub struct Conversation {
    store: Arc<dyn Store>,
    settings: ConversationSettings,
}

impl Conversation {
    pub fn new(store: Arc<dyn Store>, settings: ConversationSettings) -> Self {
        Self { store, settings }
    }

    /// Handle one update, turning unexpected failures into a reset chat and
    /// a generic notice.
    pub async fn handle_update(&self, update: &IncomingUpdate) -> Response {
        match self.handle(update).await {
            Ok(response) => response,
            Err(e) => {
                let chat_id = update.chat_id();
                tracing::error!(chat_id = chat_id.0, error = %e, "conversation handler failed");
                if let Err(e) = self.store.delete_conversation(chat_id).await {
                    tracing::warn!(chat_id = chat_id.0, error = %e, "failed to reset conversation");
                }
                Response::notice(chat_id, "<i>Something went wrong</i>").answering(update.callback())
            }
        }
    }

    pub async fn handle(&self, update: &IncomingUpdate) -> Result<Response> {
        let chat_id = update.chat_id();
        let input = match update {
            IncomingUpdate::Unsupported { .. } => {
                return Ok(Response::notice(
                    chat_id,
                    "<i>Only text command is supported</i>",
                ));
            }
            IncomingUpdate::Text(m) => Input {
                chat_id,
                text: Some(m.text.trim()),
                command: normalize_command(&m.text, self.settings.command_max_len),
                callback: None,
                sender: Some(&m.sender),
            },
            IncomingUpdate::Callback(q) => Input {
                chat_id,
                text: None,
                command: String::new(),
                callback: Some(q),
                sender: None,
            },
        };

        if input.command == "cancel" {
            self.store.delete_conversation(chat_id).await?;
            return Ok(Response::notice(chat_id, "<i>Cancelled</i>"));
        }

        if let Some(state) = self.store.conversation(chat_id).await? {
            tracing::debug!(chat_id = chat_id.0, command = %state.command, step = state.step, "continuing dialog");
            return match Dialog::decode(&state)? {
                Decoded::Dialog(dialog) => self.continue_dialog(dialog, &state, &input).await,
                Decoded::UnhandledStep => self.unhandled_step(&input).await,
                Decoded::UnknownCommand => self.not_found(&input).await,
            };
        }

        match input.command.as_str() {
            "start" => self.start(&input).await,
            "help" => Ok(self.help(&input)),
            "watch" => self.begin(Dialog::Watch(WatchStep::Prompt), &input).await,
            "watch list" | "watch_list" => self.watch_list(&input).await,
            "unwatch" => self.unwatch_list(&input).await,
            c if c.starts_with(UNWATCH) => {
                self.begin(Dialog::Unwatch(UnwatchStep::Lookup), &input)
                    .await
            }
            _ => self.not_found(&input).await,
        }
    }

    /// Persist the first step of a dialog and run it.
    async fn begin(&self, dialog: Dialog, input: &Input<'_>) -> Result<Response> {
        let state = dialog.encode(input.chat_id, now_ms(), None)?;
        self.store.put_conversation(&state).await?;
        self.continue_dialog(dialog, &state, input).await
    }

    async fn continue_dialog(
        &self,
        dialog: Dialog,
        state: &ConversationState,
        input: &Input<'_>,
    ) -> Result<Response> {
        match dialog {
            Dialog::Watch(step) => self.watch_step(step, state, input).await,
            Dialog::Unwatch(step) => self.unwatch_step(step, state, input).await,
        }
    }

    /// Move the chat to `next` only if it is still at `current`.
    async fn advance(&self, current: &ConversationState, next: Dialog) -> Result<bool> {
        let row = next.encode(current.chat_id, now_ms(), Some(current))?;
        let applied = self
            .store
            .advance_conversation(&current.command, current.step, &row)
            .await?;
        if !applied {
            tracing::warn!(
                chat_id = current.chat_id.0,
                command = %current.command,
                step = current.step,
                "dialog state changed underneath handler"
            );
        }
        Ok(applied)
    }

    async fn finish(&self, chat_id: ChatId) -> Result<()> {
        self.store.delete_conversation(chat_id).await
    }

    async fn unhandled_step(&self, input: &Input<'_>) -> Result<Response> {
        self.finish(input.chat_id).await?;
        Ok(Response::notice(input.chat_id, "<i>Unhandled step</i>").answering(input.callback))
    }

    async fn not_found(&self, input: &Input<'_>) -> Result<Response> {
        if let Some(q) = input.callback {
            self.finish(input.chat_id).await?;
            return Ok(Response::edit(q, "<i>Invalid session</i>"));
        }
        Ok(Response::notice(input.chat_id, "<i>Unknown command</i>"))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messaging::types::{Markup, ReplyKeyboard},
        store::SqliteStore,
        test_support::{callback, seed_products, text, ScriptedStore},
    };
    use replies::Reply;
    use std::sync::atomic::Ordering;

    pub(super) fn conversation() -> (Arc<SqliteStore>, Conversation) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let conv = Conversation::new(store.clone(), ConversationSettings::default());
        (store, conv)
    }

    #[tokio::test]
    async fn start_creates_subscriber_once() {
        let (store, conv) = conversation();
        let resp = conv.handle(&text(1, "/start")).await.unwrap();
        assert!(resp.texts()[0].starts_with("Welcome to Version Watcher."));
        assert!(store.subscriber_exists(ChatId(1)).await.unwrap());

        conv.handle(&text(1, "/START")).await.unwrap();
        assert!(store.subscriber_exists(ChatId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn non_text_messages_are_rejected() {
        let (_, conv) = conversation();
        let resp = conv
            .handle(&IncomingUpdate::Unsupported { chat_id: ChatId(1) })
            .await
            .unwrap();
        assert_eq!(resp.texts(), vec!["<i>Only text command is supported</i>"]);
    }

    #[tokio::test]
    async fn unknown_text_shows_main_menu() {
        let (_, conv) = conversation();
        let resp = conv.handle(&text(1, "hello")).await.unwrap();
        match &resp.replies[0] {
            Reply::Send(m) => {
                assert_eq!(m.html, "<i>Unknown command</i>");
                assert_eq!(m.markup, Markup::Reply(ReplyKeyboard::main_menu()));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stray_callback_is_an_invalid_session() {
        let (_, conv) = conversation();
        let resp = conv.handle(&callback(1, Some("17"))).await.unwrap();
        assert_eq!(resp.answer_callback.as_deref(), Some("cb-1"));
        assert!(matches!(
            &resp.replies[0],
            Reply::Edit { html, message: Some(_), .. } if html == "<i>Invalid session</i>"
        ));
    }

    #[tokio::test]
    async fn cancel_resets_any_dialog() {
        let (store, conv) = conversation();
        conv.handle(&text(1, "watch")).await.unwrap();
        assert!(store.conversation(ChatId(1)).await.unwrap().is_some());

        let resp = conv.handle(&text(1, " /Cancel ")).await.unwrap();
        assert_eq!(resp.texts(), vec!["<i>Cancelled</i>"]);
        assert!(store.conversation(ChatId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dialog_state_takes_precedence_over_command_text() {
        let (store, conv) = conversation();
        crate::test_support::seed_products(&store, &[("nginx", "nginx")]).await;
        conv.handle(&text(1, "watch")).await.unwrap();

        // "start" is a search keyword while the watch dialog is open.
        let resp = conv.handle(&text(1, "start")).await.unwrap();
        assert_eq!(
            resp.texts(),
            vec!["<i>No products found. Type another keyword...</i>"]
        );
        assert!(!store.subscriber_exists(ChatId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_persisted_step_is_reset() {
        let (store, conv) = conversation();
        store
            .put_conversation(&ConversationState {
                chat_id: ChatId(1),
                command: "watch".to_string(),
                step: 7,
                data: None,
                created_at: 0,
                updated_at: 0,
            })
            .await
            .unwrap();

        let resp = conv.handle(&text(1, "anything")).await.unwrap();
        assert_eq!(resp.texts(), vec!["<i>Unhandled step</i>"]);
        assert!(store.conversation(ChatId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handler_failure_resets_chat() {
        let (store, conv) = conversation();
        store
            .put_conversation(&ConversationState {
                chat_id: ChatId(1),
                command: "unwatch_".to_string(),
                step: 2,
                data: Some(b"not json".to_vec()),
                created_at: 0,
                updated_at: 0,
            })
            .await
            .unwrap();

        let resp = conv.handle_update(&text(1, "Yes")).await;
        assert_eq!(resp.texts(), vec!["<i>Something went wrong</i>"]);
        assert!(store.conversation(ChatId(1)).await.unwrap().is_none());
    }

    fn scripted_conversation() -> (Arc<ScriptedStore>, Conversation) {
        let store = Arc::new(ScriptedStore::new(SqliteStore::open_in_memory().unwrap()));
        let conv = Conversation::new(store.clone(), ConversationSettings::default());
        (store, conv)
    }

    async fn assert_reset_as_unhandled(store: &ScriptedStore, resp: Response) {
        assert_eq!(resp.texts(), vec!["<i>Unhandled step</i>"]);
        assert!(store.conversation(ChatId(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn raced_watch_prompt_resets_the_chat() {
        let (store, conv) = scripted_conversation();
        store.race_advance.store(true, Ordering::SeqCst);

        let resp = conv.handle(&text(1, "watch")).await.unwrap();
        assert_reset_as_unhandled(&store, resp).await;
    }

    #[tokio::test]
    async fn raced_watch_search_resets_the_chat() {
        let (store, conv) = scripted_conversation();
        seed_products(&store.inner, &[("nginx", "nginx")]).await;
        conv.handle(&text(1, "watch")).await.unwrap();

        store.race_advance.store(true, Ordering::SeqCst);
        let resp = conv.handle(&text(1, "ngi")).await.unwrap();
        assert_reset_as_unhandled(&store, resp).await;
    }

    #[tokio::test]
    async fn raced_unwatch_lookup_keeps_the_subscription() {
        let (store, conv) = scripted_conversation();
        let ids = seed_products(&store.inner, &[("nginx", "nginx")]).await;
        store.create_subscription(ChatId(1), ids[0]).await.unwrap();

        store.race_advance.store(true, Ordering::SeqCst);
        let resp = conv.handle(&text(1, "/unwatch_nginx")).await.unwrap();
        assert_reset_as_unhandled(&store, resp).await;
        assert!(store.subscription_exists(ChatId(1), ids[0]).await.unwrap());
    }
}
