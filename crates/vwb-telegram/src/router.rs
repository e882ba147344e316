use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::BotCommand};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use vwb_core::{conversation::Conversation, domain::ChatId, messaging::port::MessagingPort};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub conversation: Arc<Conversation>,
    pub messenger: Arc<dyn MessagingPort>,
    pub chat_locks: Arc<ChatLocks>,
}

impl AppState {
    pub fn new(conversation: Arc<Conversation>, messenger: Arc<dyn MessagingPort>) -> Self {
        Self {
            conversation,
            messenger,
            chat_locks: Arc::new(ChatLocks::default()),
        }
    }
}

type LockMap = HashMap<ChatId, Arc<Mutex<()>>>;

/// One async mutex per chat; updates for the same chat run one at a time.
///
/// An entry lives only while some update for the chat holds or awaits it.
#[derive(Default)]
pub struct ChatLocks {
    inner: Arc<StdMutex<LockMap>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: ChatId) -> ChatGuard {
        let lock = {
            let mut map = lock_map(&self.inner);
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        ChatGuard {
            chat_id,
            lock,
            guard: Some(guard),
            map: self.inner.clone(),
        }
    }

    #[cfg(test)]
    fn tracked_chats(&self) -> usize {
        lock_map(&self.inner).len()
    }
}

fn lock_map(map: &StdMutex<LockMap>) -> MutexGuard<'_, LockMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a chat's lock; releasing the last user of a chat evicts its entry.
pub struct ChatGuard {
    chat_id: ChatId,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    map: Arc<StdMutex<LockMap>>,
}

impl Drop for ChatGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = lock_map(&self.map);
        // Clones are only handed out under the map lock, so two references
        // (the map's and ours) mean nobody else is waiting.
        let idle = map
            .get(&self.chat_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock))
            && Arc::strong_count(&self.lock) == 2;
        if idle {
            map.remove(&self.chat_id);
        }
    }
}

fn bot_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("watch", "Watch a product for new releases"),
        BotCommand::new("unwatch", "Stop watching a product"),
        BotCommand::new("watch_list", "Show watched products"),
        BotCommand::new("cancel", "Cancel the current command"),
        BotCommand::new("help", "Show help"),
    ]
}

/// Long-poll Telegram until `cancel` fires.
pub async fn run_polling(
    bot: Bot,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed"),
    }

    if let Err(e) = bot.set_my_commands(bot_commands()).await {
        tracing::warn!(error = %e, "failed to register bot commands");
    }

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            tracing::debug!(update_id = ?upd.id, "ignoring unhandled update");
        })
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        match shutdown.shutdown() {
            Ok(done) => {
                done.await;
                tracing::info!("dispatcher stopped");
            }
            Err(e) => tracing::warn!(error = ?e, "dispatcher shutdown failed"),
        }
    });

    dispatcher.dispatch().await;
    Ok(())
}
