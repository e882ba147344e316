//! Upstream release feed (endoflife.date API v1).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;

/// `GET {catalog_url}`
#[derive(Clone, Debug, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub total: u64,
    pub result: Vec<CatalogEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub label: String,
    pub category: String,
    pub uri: String,
}

/// `GET <entry.uri>`
#[derive(Clone, Debug, Deserialize)]
pub struct ProductDetailResponse {
    pub result: ProductDetail,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProductDetail {
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub codename: Option<String>,
    pub label: String,
    #[serde(default, rename = "releaseDate")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub latest: Option<LatestRelease>,
    #[serde(default)]
    pub custom: Option<CustomFields>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LatestRelease {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CustomFields {
    #[serde(default, rename = "apiVersion")]
    pub api_version: Option<String>,
}

#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    async fn fetch_catalog(&self) -> Result<CatalogResponse>;
    async fn fetch_product(&self, uri: &str) -> Result<ProductDetailResponse>;
}

/// HTTP client for the public endoflife.date API.
#[derive(Clone)]
pub struct EndOfLifeClient {
    http: reqwest::Client,
    catalog_url: String,
}

impl EndOfLifeClient {
    pub fn new(catalog_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vwb/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            catalog_url: catalog_url.into(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl ReleaseFeed for EndOfLifeClient {
    async fn fetch_catalog(&self) -> Result<CatalogResponse> {
        self.get_json(&self.catalog_url).await
    }

    async fn fetch_product(&self, uri: &str) -> Result<ProductDetailResponse> {
        self.get_json(uri).await
    }
}
