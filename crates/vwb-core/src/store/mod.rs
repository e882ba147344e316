//! Persistence port and the rows it traffics in.

use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    domain::{ChatId, ProductId, RunTimestamp},
    Result,
};

mod sqlite;

pub use sqlite::SqliteStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub label: String,
    pub category: String,
    pub catalog_url: String,
    pub info_url: String,
}

/// A catalog entry staged for upsert (keyed by `name`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductUpsert {
    pub name: String,
    pub label: String,
    pub category: String,
    pub catalog_url: String,
    pub info_url: String,
}

/// One release of one product as seen in one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionRow {
    pub product_id: ProductId,
    pub release_name: String,
    pub release_codename: Option<String>,
    pub release_label: String,
    pub release_date: NaiveDate,
    pub version: String,
    pub version_release_date: Option<NaiveDate>,
    pub version_release_link: Option<String>,
}

/// Everything one pipeline run writes, applied atomically by
/// [`Store::commit_run`].
#[derive(Clone, Debug)]
pub struct RunBatch {
    pub run_ts: RunTimestamp,
    pub products: Vec<ProductUpsert>,
    pub versions: Vec<VersionRow>,
    /// The transaction rolls back instead of committing once this passes.
    pub commit_deadline: Option<Instant>,
}

impl RunBatch {
    pub fn new(run_ts: RunTimestamp) -> Self {
        Self {
            run_ts,
            products: Vec::new(),
            versions: Vec::new(),
            commit_deadline: None,
        }
    }

    pub fn staged_product(&self, name: &str) -> Option<&ProductUpsert> {
        self.products.iter().find(|p| p.name == name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunCommit {
    pub products_upserted: usize,
    pub products_unchanged: usize,
    pub versions_inserted: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionSummary {
    pub release_label: String,
    pub version: String,
    pub version_release_date: Option<NaiveDate>,
    pub version_release_link: Option<String>,
}

/// A product with new releases, plus every release row of the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrichedProduct {
    pub product_id: ProductId,
    pub label: String,
    pub info_url: String,
    pub versions: Vec<VersionSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatSubscriptions {
    pub chat_id: ChatId,
    pub product_ids: Vec<ProductId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchListEntry {
    pub product_id: ProductId,
    pub name: String,
    pub label: String,
    pub info_url: String,
    pub latest: Vec<VersionSummary>,
}

#[derive(Clone, Debug)]
pub struct NewSubscriber {
    pub chat_id: ChatId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Persisted dialog position of one chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationState {
    pub chat_id: ChatId,
    pub command: String,
    pub step: i16,
    pub data: Option<Vec<u8>>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Maximum number of products returned by [`Store::search_products`].
pub const SEARCH_LIMIT: usize = 20;

/// Maximum number of release rows shown per watch list entry.
pub const WATCH_LIST_LATEST: usize = 3;

#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert catalog products and append version rows in one transaction.
    async fn commit_run(&self, batch: RunBatch) -> Result<RunCommit>;

    /// Products with at least one subscription.
    async fn watched_products(&self) -> Result<Vec<Product>>;

    async fn product_ids_in_run(&self, run_ts: RunTimestamp) -> Result<Vec<ProductId>>;

    /// Drop the version rows of a committed run so the next run is compared
    /// against the one before it.
    async fn discard_run(&self, run_ts: RunTimestamp) -> Result<usize>;

    /// Candidates that gained a release identity relative to their previous run.
    async fn products_with_new_releases(
        &self,
        run_ts: RunTimestamp,
        candidates: &[ProductId],
    ) -> Result<Vec<EnrichedProduct>>;

    async fn subscriptions_by_chat(&self) -> Result<Vec<ChatSubscriptions>>;

    async fn watch_list(&self, chat_id: ChatId) -> Result<Vec<WatchListEntry>>;

    /// Case-insensitive substring match on label, ordered by label.
    async fn search_products(&self, keyword: &str, limit: usize) -> Result<Vec<Product>>;

    async fn product_by_id(&self, id: ProductId) -> Result<Option<Product>>;

    async fn subscribed_product_by_name(
        &self,
        chat_id: ChatId,
        name: &str,
    ) -> Result<Option<Product>>;

    async fn subscription_exists(&self, chat_id: ChatId, product_id: ProductId) -> Result<bool>;

    /// Returns `false` when the pair already existed.
    async fn create_subscription(&self, chat_id: ChatId, product_id: ProductId) -> Result<bool>;

    async fn delete_subscription(&self, chat_id: ChatId, product_id: ProductId) -> Result<()>;

    async fn subscriber_exists(&self, chat_id: ChatId) -> Result<bool>;

    async fn create_subscriber(&self, subscriber: NewSubscriber) -> Result<()>;

    async fn conversation(&self, chat_id: ChatId) -> Result<Option<ConversationState>>;

    async fn put_conversation(&self, state: &ConversationState) -> Result<()>;

    /// Replace the state only if it is still at `(command, step)`.
    async fn advance_conversation(
        &self,
        expected_command: &str,
        expected_step: i16,
        next: &ConversationState,
    ) -> Result<bool>;

    async fn delete_conversation(&self, chat_id: ChatId) -> Result<()>;
}
