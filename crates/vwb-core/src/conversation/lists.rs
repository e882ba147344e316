use crate::{
    conversation::{replies::Reply, replies::Response, unwatch::unwatch_command_for, Conversation, Input},
    formatting::{escape_html, format_release_date, product_title, MessageChunker},
    messaging::types::{Markup, OutgoingMessage, ReplyKeyboard},
    pipeline::MessageLimits,
    store::{NewSubscriber, WatchListEntry},
    Result,
};

const WELCOME: &str =
    "Welcome to Version Watcher. Type /help to see the list of available commands.";

const HELP: &str = "<b>Commands</b>\n\n\
/watch - add a product to your watch list\n\
/unwatch - remove a product from your watch list\n\
/watch_list - show watched products and their latest versions\n\
/cancel - abort the current dialog\n\
/help - show this message\n\n\
<i>You'll be notified when a watched product publishes a new version.</i>";

impl Conversation {
    pub(super) async fn start(&self, input: &Input<'_>) -> Result<Response> {
        if !self.store.subscriber_exists(input.chat_id).await? {
            let sender = input.sender.cloned().unwrap_or_default();
            self.store
                .create_subscriber(NewSubscriber {
                    chat_id: input.chat_id,
                    username: sender.username,
                    first_name: sender.first_name,
                    last_name: sender.last_name,
                })
                .await?;
            tracing::info!(chat_id = input.chat_id.0, "subscriber created");
        }
        Ok(Response::notice(input.chat_id, WELCOME))
    }

    pub(super) fn help(&self, input: &Input<'_>) -> Response {
        Response::notice(input.chat_id, HELP)
    }

    pub(super) async fn watch_list(&self, input: &Input<'_>) -> Result<Response> {
        let entries = self.store.watch_list(input.chat_id).await?;
        let pages = render_watch_list(&entries, self.settings.limits);
        Ok(paged(input, pages, Markup::Reply(ReplyKeyboard::main_menu())))
    }

    pub(super) async fn unwatch_list(&self, input: &Input<'_>) -> Result<Response> {
        let entries = self.store.watch_list(input.chat_id).await?;
        let pages = render_unwatch_list(&entries, self.settings.limits);
        Ok(paged(input, pages, Markup::None))
    }
}

/// One message per page; `last_markup` goes on the final page.
fn paged(input: &Input<'_>, pages: Vec<String>, last_markup: Markup) -> Response {
    let count = pages.len();
    let replies = pages
        .into_iter()
        .enumerate()
        .map(|(i, html)| {
            let mut msg = OutgoingMessage::html(input.chat_id, html).without_link_preview();
            if i + 1 == count {
                msg = msg.with_markup(last_markup.clone());
            }
            Reply::Send(msg)
        })
        .collect();
    Response {
        answer_callback: None,
        replies,
    }
}

fn list_header(count: usize) -> String {
    match count {
        0 => "<b>Watch List</b>\n\n<i>No watch list found</i>".to_string(),
        1 => "<b>Watch List</b>\n<i>You watch 1 product</i>\n\n".to_string(),
        n => format!("<b>Watch List</b>\n<i>You watch {n} products</i>\n\n"),
    }
}

pub(super) fn render_watch_list(entries: &[WatchListEntry], limits: MessageLimits) -> Vec<String> {
    let header = list_header(entries.len());
    if entries.is_empty() {
        return vec![header];
    }

    let mut chunker = MessageChunker::new(limits.soft, limits.hard);
    for (i, entry) in entries.iter().enumerate() {
        let title = product_title(&entry.label, &entry.info_url);
        let mut segments = vec![if i == 0 { format!("{header}{title}") } else { title }];
        segments.extend(entry.latest.iter().map(|v| match v.version_release_date {
            Some(_) => format!(
                "• Latest: {} - {}\n",
                escape_html(&v.version),
                format_release_date(v.version_release_date)
            ),
            None => "• Latest release: -\n".to_string(),
        }));
        chunker.push_block(&segments);
    }
    chunker.finish()
}

pub(super) fn render_unwatch_list(entries: &[WatchListEntry], limits: MessageLimits) -> Vec<String> {
    let header = list_header(entries.len());
    if entries.is_empty() {
        return vec![header];
    }

    let mut chunker = MessageChunker::new(limits.soft, limits.hard);
    for (i, entry) in entries.iter().enumerate() {
        let line = format!(
            "• {} - {}\n",
            escape_html(&entry.label),
            unwatch_command_for(&entry.name)
        );
        chunker.push_block(&[if i == 0 { format!("{header}{line}") } else { line }]);
    }
    chunker.finish()
}
