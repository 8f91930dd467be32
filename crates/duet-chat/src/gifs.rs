use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use duet_backend::ConfigError;

use crate::error::{ChatError, Result};

const DEFAULT_BASE_URL: &str = "https://g.tenor.com/v2";
const PAGE_LIMIT: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifConfig {
    pub api_key: String,
    pub base_url: String,
}

impl GifConfig {
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> std::result::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("DUET_TENOR_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("DUET_TENOR_API_KEY"))?;
        let base_url = lookup("DUET_TENOR_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();
        Ok(Self { api_key, base_url })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GifCategory {
    pub searchterm: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
}

/// A search hit. `url` is what gets sent as message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gif {
    pub id: String,
    pub description: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GifPage {
    pub gifs: Vec<Gif>,
    /// Position token for the next page; `None` when there is none.
    pub next: Option<String>,
}

#[derive(Deserialize)]
struct CategoriesResponse {
    #[serde(default)]
    tags: Vec<GifCategory>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: String,
    #[serde(default)]
    content_description: String,
    #[serde(default)]
    media_formats: HashMap<String, MediaFormat>,
}

#[derive(Deserialize)]
struct MediaFormat {
    url: String,
}

impl SearchResponse {
    fn into_page(self) -> GifPage {
        let gifs: Vec<Gif> = self
            .results
            .into_iter()
            .filter_map(|mut r| {
                let format = r.media_formats.remove("tinygif").or_else(|| r.media_formats.remove("gif"))?;
                Some(Gif {
                    id: r.id,
                    description: r.content_description,
                    url: format.url,
                })
            })
            .collect();

        // Tenor returns an empty or "0" position at the end of results
        let next = self.next.filter(|n| !n.is_empty() && n != "0" && !gifs.is_empty());
        GifPage { gifs, next }
    }
}

/// Client for the Tenor v2 search API.
pub struct GifClient {
    http: Client,
    config: GifConfig,
}

impl GifClient {
    pub fn new(config: GifConfig) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self { http, config })
    }

    pub async fn categories(&self) -> Result<Vec<GifCategory>> {
        let url = format!("{}/categories", self.config.base_url);
        let response: CategoriesResponse = self.get(&url, &[("key", self.config.api_key.as_str())]).await?;
        Ok(response.tags)
    }

    /// One page of results for `query`, continuing at `pos` when given.
    pub async fn search(&self, query: &str, pos: Option<&str>) -> Result<GifPage> {
        let url = format!("{}/search", self.config.base_url);
        let limit = PAGE_LIMIT.to_string();
        let mut params = vec![
            ("q", query),
            ("key", self.config.api_key.as_str()),
            ("limit", limit.as_str()),
        ];
        if let Some(pos) = pos {
            params.push(("pos", pos));
        }
        let response: SearchResponse = self.get(&url, &params).await?;
        let page = response.into_page();
        debug!("GIF search '{}' returned {} results", query, page.gifs.len());
        Ok(page)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str, params: &[(&str, &str)]) -> Result<T> {
        let response = self.http.get(url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ChatError::Gif {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }
        Ok(response.json::<T>().await?)
    }
}
