use std::{collections::HashSet, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
    formatting::{escape_html, format_release_date, product_title, MessageChunker},
    messaging::{port::MessagingPort, types::OutgoingMessage},
    pipeline::ensure_active,
    store::{EnrichedProduct, Store, VersionSummary},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageLimits {
    /// Flush once a message reaches this many characters.
    pub soft: usize,
    /// Never emit a message longer than this.
    pub hard: usize,
}

impl MessageLimits {
    /// Clamp both limits to what the messenger can deliver.
    pub fn capped(self, max_len: usize) -> Self {
        let hard = self.hard.min(max_len);
        Self {
            soft: self.soft.min(hard),
            hard,
        }
    }
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            soft: 3500,
            hard: 4096,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub subscribers_notified: usize,
    pub messages_sent: usize,
    pub delivery_failures: usize,
}

/// Fans detected changes out to the chats subscribed to them.
pub struct Notifier {
    store: Arc<dyn Store>,
    messenger: Arc<dyn MessagingPort>,
    limits: MessageLimits,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn Store>,
        messenger: Arc<dyn MessagingPort>,
        limits: MessageLimits,
    ) -> Self {
        Self {
            store,
            messenger,
            limits,
        }
    }

    pub async fn notify(
        &self,
        changed: &[EnrichedProduct],
        cancel: &CancellationToken,
    ) -> Result<NotifyReport> {
        let mut report = NotifyReport::default();
        let limits = self
            .limits
            .capped(self.messenger.capabilities().max_message_len);
        let groups = self.store.subscriptions_by_chat().await?;

        for group in groups {
            ensure_active(cancel)?;

            let subscribed: HashSet<_> = group.product_ids.iter().copied().collect();
            let matched: Vec<&EnrichedProduct> = changed
                .iter()
                .filter(|p| subscribed.contains(&p.product_id))
                .collect();
            if matched.is_empty() {
                continue;
            }

            report.subscribers_notified += 1;
            for html in compose_notice(&matched, limits) {
                let msg = OutgoingMessage::html(group.chat_id, html).without_link_preview();
                match self.messenger.send_message(&msg).await {
                    Ok(_) => report.messages_sent += 1,
                    Err(e) => {
                        report.delivery_failures += 1;
                        tracing::warn!(chat_id = group.chat_id.0, error = %e, "failed to deliver release notice");
                    }
                }
            }
        }

        Ok(report)
    }
}

/// Render the notice for one subscriber, split into sendable messages.
pub fn compose_notice(products: &[&EnrichedProduct], limits: MessageLimits) -> Vec<String> {
    let header = if products.len() > 1 {
        "<b>New Releases Detected</b>\n\n"
    } else {
        "<b>New Release Detected</b>\n\n"
    };

    let mut chunker = MessageChunker::new(limits.soft, limits.hard);
    for (i, product) in products.iter().enumerate() {
        let title = product_title(&product.label, &product.info_url);
        let mut segments = Vec::with_capacity(product.versions.len() + 1);
        segments.push(if i == 0 { format!("{header}{title}") } else { title });
        segments.extend(product.versions.iter().map(version_entry));
        if let Some(last) = segments.last_mut() {
            last.push('\n');
        }
        chunker.push_block(&segments);
    }
    chunker.finish()
}

fn version_entry(v: &VersionSummary) -> String {
    let changelog = match v.version_release_link.as_deref() {
        Some(link) if !link.is_empty() => {
            format!("<a href=\"{}\">link</a>", escape_html(link))
        }
        _ => "-".to_string(),
    };
    format!(
        "Version: <code>{}</code> | Label: {}\n• Release: {}\n• Changelog: {}\n",
        escape_html(&v.version),
        escape_html(&v.release_label),
        format_release_date(v.version_release_date),
        changelog
    )
}
