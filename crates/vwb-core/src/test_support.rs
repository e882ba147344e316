//! Fakes for the ports plus small seeding helpers shared by unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    domain::{ChatId, MessageId, MessageRef, ProductId, RunTimestamp},
    errors::Error,
    feed::{
        CatalogEntry, CatalogResponse, LatestRelease, ProductDetail, ProductDetailResponse,
        Release, ReleaseFeed,
    },
    messaging::{
        port::MessagingPort,
        types::{
            CallbackQuery, IncomingUpdate, MessagingCapabilities, OutgoingMessage, Sender,
            TextMessage,
        },
    },
    store::{
        ChatSubscriptions, ConversationState, EnrichedProduct, NewSubscriber, Product,
        ProductUpsert, RunBatch, RunCommit, SqliteStore, Store, VersionRow, WatchListEntry,
    },
    Result,
};

pub const CATALOG_BASE: &str = "https://endoflife.date/api/v1/products/";

#[derive(Default)]
pub struct FakeFeed {
    pub catalog: Mutex<Vec<CatalogEntry>>,
    pub details: Mutex<HashMap<String, Vec<Release>>>,
    pub fail_catalog: bool,
    pub product_calls: AtomicUsize,
}

impl FakeFeed {
    pub fn with_catalog(names: &[(&str, &str)]) -> Self {
        let feed = Self::default();
        {
            let mut catalog = feed.catalog.lock().unwrap();
            for (name, label) in names {
                catalog.push(CatalogEntry {
                    name: name.to_string(),
                    label: label.to_string(),
                    category: "app".to_string(),
                    uri: format!("{CATALOG_BASE}{name}"),
                });
            }
        }
        feed
    }

    pub fn set_releases(&self, name: &str, releases: Vec<Release>) {
        self.details
            .lock()
            .unwrap()
            .insert(format!("{CATALOG_BASE}{name}"), releases);
    }
}

#[async_trait]
impl ReleaseFeed for FakeFeed {
    async fn fetch_catalog(&self) -> Result<CatalogResponse> {
        if self.fail_catalog {
            return Err(Error::Upstream("catalog unavailable".to_string()));
        }
        let result = self.catalog.lock().unwrap().clone();
        Ok(CatalogResponse {
            total: result.len() as u64,
            result,
        })
    }

    async fn fetch_product(&self, uri: &str) -> Result<ProductDetailResponse> {
        self.product_calls.fetch_add(1, Ordering::SeqCst);
        let releases = self
            .details
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| Error::Upstream(format!("404 for {uri}")))?;
        Ok(ProductDetailResponse {
            result: ProductDetail { releases },
        })
    }
}

/// A release with a `latest` block dated `date`.
pub fn release(name: &str, version: &str, date: &str) -> Release {
    Release {
        name: name.to_string(),
        codename: None,
        label: name.to_string(),
        release_date: Some("2020-01-01".to_string()),
        latest: Some(LatestRelease {
            name: Some(version.to_string()),
            date: Some(date.to_string()),
            link: Some(format!("https://example.com/{version}")),
        }),
        custom: None,
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    sent: Mutex<Vec<OutgoingMessage>>,
    edits: Mutex<Vec<(MessageRef, String)>>,
    answers: Mutex<Vec<(String, Option<String>)>>,
    pub failing_chat: Option<ChatId>,
    pub edits_unsupported: bool,
    pub max_len: Option<usize>,
    next_id: AtomicI32,
}

impl FakeMessenger {
    pub fn failing_for(chat_id: ChatId) -> Self {
        Self {
            failing_chat: Some(chat_id),
            ..Self::default()
        }
    }

    pub fn without_edits() -> Self {
        Self {
            edits_unsupported: true,
            ..Self::default()
        }
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn answers(&self) -> Vec<(String, Option<String>)> {
        self.answers.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: !self.edits_unsupported,
            max_message_len: self.max_len.unwrap_or(4096),
        }
    }

    async fn send_message(&self, msg: &OutgoingMessage) -> Result<MessageRef> {
        if self.failing_chat == Some(msg.chat_id) {
            return Err(Error::External("bot was blocked by the user".to_string()));
        }
        self.sent.lock().unwrap().push(msg.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageRef {
            chat_id: msg.chat_id,
            message_id: MessageId(id),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.answers
            .lock()
            .unwrap()
            .push((callback_id.to_string(), text.map(str::to_string)));
        Ok(())
    }
}

/// A [`SqliteStore`] with hooks for failure and race scenarios.
pub struct ScriptedStore {
    pub inner: Arc<SqliteStore>,
    /// Sleep this long before committing a run.
    pub commit_delay: Mutex<Option<Duration>>,
    pub fail_detection: AtomicBool,
    /// Move the stored dialog one step ahead right before the next
    /// conditional advance, as a concurrent handler would.
    pub race_advance: AtomicBool,
}

impl ScriptedStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner: Arc::new(inner),
            commit_delay: Mutex::new(None),
            fail_detection: AtomicBool::new(false),
            race_advance: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn commit_run(&self, batch: RunBatch) -> Result<RunCommit> {
        let delay = *self.commit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.commit_run(batch).await
    }

    async fn watched_products(&self) -> Result<Vec<Product>> {
        self.inner.watched_products().await
    }

    async fn product_ids_in_run(&self, run_ts: RunTimestamp) -> Result<Vec<ProductId>> {
        self.inner.product_ids_in_run(run_ts).await
    }

    async fn discard_run(&self, run_ts: RunTimestamp) -> Result<usize> {
        self.inner.discard_run(run_ts).await
    }

    async fn products_with_new_releases(
        &self,
        run_ts: RunTimestamp,
        candidates: &[ProductId],
    ) -> Result<Vec<EnrichedProduct>> {
        if self.fail_detection.load(Ordering::SeqCst) {
            return Err(Error::External("database is locked".to_string()));
        }
        self.inner
            .products_with_new_releases(run_ts, candidates)
            .await
    }

    async fn subscriptions_by_chat(&self) -> Result<Vec<ChatSubscriptions>> {
        self.inner.subscriptions_by_chat().await
    }

    async fn watch_list(&self, chat_id: ChatId) -> Result<Vec<WatchListEntry>> {
        self.inner.watch_list(chat_id).await
    }

    async fn search_products(&self, keyword: &str, limit: usize) -> Result<Vec<Product>> {
        self.inner.search_products(keyword, limit).await
    }

    async fn product_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        self.inner.product_by_id(id).await
    }

    async fn subscribed_product_by_name(
        &self,
        chat_id: ChatId,
        name: &str,
    ) -> Result<Option<Product>> {
        self.inner.subscribed_product_by_name(chat_id, name).await
    }

    async fn subscription_exists(&self, chat_id: ChatId, product_id: ProductId) -> Result<bool> {
        self.inner.subscription_exists(chat_id, product_id).await
    }

    async fn create_subscription(&self, chat_id: ChatId, product_id: ProductId) -> Result<bool> {
        self.inner.create_subscription(chat_id, product_id).await
    }

    async fn delete_subscription(&self, chat_id: ChatId, product_id: ProductId) -> Result<()> {
        self.inner.delete_subscription(chat_id, product_id).await
    }

    async fn subscriber_exists(&self, chat_id: ChatId) -> Result<bool> {
        self.inner.subscriber_exists(chat_id).await
    }

    async fn create_subscriber(&self, subscriber: NewSubscriber) -> Result<()> {
        self.inner.create_subscriber(subscriber).await
    }

    async fn conversation(&self, chat_id: ChatId) -> Result<Option<ConversationState>> {
        self.inner.conversation(chat_id).await
    }

    async fn put_conversation(&self, state: &ConversationState) -> Result<()> {
        self.inner.put_conversation(state).await
    }

    async fn advance_conversation(
        &self,
        expected_command: &str,
        expected_step: i16,
        next: &ConversationState,
    ) -> Result<bool> {
        if self.race_advance.swap(false, Ordering::SeqCst) {
            if let Some(mut row) = self.inner.conversation(next.chat_id).await? {
                row.step = expected_step + 1;
                self.inner.put_conversation(&row).await?;
            }
        }
        self.inner
            .advance_conversation(expected_command, expected_step, next)
            .await
    }

    async fn delete_conversation(&self, chat_id: ChatId) -> Result<()> {
        self.inner.delete_conversation(chat_id).await
    }
}

pub fn product_upsert(name: &str, label: &str) -> ProductUpsert {
    ProductUpsert {
        name: name.to_string(),
        label: label.to_string(),
        category: "app".to_string(),
        catalog_url: format!("{CATALOG_BASE}{name}"),
        info_url: format!("https://endoflife.date/{name}"),
    }
}

pub fn version_row(
    product_id: ProductId,
    release_name: &str,
    version: &str,
    version_date: Option<NaiveDate>,
) -> VersionRow {
    VersionRow {
        product_id,
        release_name: release_name.to_string(),
        release_codename: None,
        release_label: release_name.to_string(),
        release_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        version: version.to_string(),
        version_release_date: version_date,
        version_release_link: None,
    }
}

/// Commit the given products and return their ids in input order.
pub async fn seed_products(store: &SqliteStore, products: &[(&str, &str)]) -> Vec<ProductId> {
    let mut batch = RunBatch::new(RunTimestamp::from_millis(1));
    batch.products = products
        .iter()
        .map(|(name, label)| product_upsert(name, label))
        .collect();
    store.commit_run(batch).await.unwrap();

    let all = store.search_products("", 10_000).await.unwrap();
    products
        .iter()
        .map(|(name, _)| {
            all.iter()
                .find(|p| p.name == *name)
                .map(|p| p.id)
                .unwrap()
        })
        .collect()
}

pub fn text(chat_id: i64, text: &str) -> IncomingUpdate {
    IncomingUpdate::Text(TextMessage {
        chat_id: ChatId(chat_id),
        sender: Sender {
            username: Some("tester".to_string()),
            first_name: Some("Test".to_string()),
            last_name: None,
        },
        text: text.to_string(),
    })
}

pub fn callback(chat_id: i64, data: Option<&str>) -> IncomingUpdate {
    IncomingUpdate::Callback(CallbackQuery {
        chat_id: ChatId(chat_id),
        callback_id: format!("cb-{chat_id}"),
        data: data.map(str::to_string),
        message: Some(MessageRef {
            chat_id: ChatId(chat_id),
            message_id: MessageId(42),
        }),
    })
}
