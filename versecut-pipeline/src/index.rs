//! Vector index gateway
//!
//! Stores snippet vectors with their payloads in a Qdrant collection and
//! answers filtered similarity queries over its REST API. The collection is
//! cosine-distance with the configured dimension and is created on demand.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::VectorIndexConfig;

/// Payload stored with each vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetPayload {
    pub snippet_id: String,
    pub song_title: String,
    pub artist: String,
    pub album: Option<String>,
    pub lyrics: String,
    pub ai_description: String,
    pub snippet_url: String,
    pub start_time: f64,
    pub end_time: f64,
    pub primary_emotion: String,
    pub secondary_emotion: Option<String>,
    pub energy: String,
    pub tone: String,
    pub genre: String,
    pub track_id: i64,
}

/// Optional equality filters applied to a search
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub energy: Option<String>,
    pub primary_emotion: Option<String>,
    pub genre: Option<String>,
}

/// One search result, sorted by score descending
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub snippet_id: String,
    pub score: f32,
    pub payload: Value,
}

/// Index gateway failure
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Vector count ({vectors}) != payload count ({payloads})")]
    Mismatch { vectors: usize, payloads: usize },

    #[error("Index request failed: {0}")]
    Http(String),

    #[error("Index error: {0}")]
    Api(String),
}

/// Vector index seam used by the pipeline and the search endpoint
#[async_trait]
pub trait SnippetIndex: Send + Sync {
    /// Idempotently create the collection if absent
    async fn ensure_collection(&self) -> Result<(), IndexError>;

    /// Upsert vectors with their payloads; empty input succeeds trivially
    async fn upsert(
        &self,
        vectors: Vec<Vec<f32>>,
        payloads: Vec<SnippetPayload>,
    ) -> Result<usize, IndexError>;

    /// Similarity search with optional filters
    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filters: SearchFilters,
    ) -> Result<Vec<SearchHit>, IndexError>;

    /// Point count; 0 when the collection is absent
    async fn count(&self) -> Result<u64, IndexError>;

    /// Delete the collection and recreate it empty
    async fn clear(&self) -> Result<(), IndexError>;
}

/// Build the Qdrant `filter` clause, `None` when no filter is set
fn build_filter(filters: &SearchFilters) -> Option<Value> {
    let mut must = Vec::new();
    for (key, value) in [
        ("energy", &filters.energy),
        ("primary_emotion", &filters.primary_emotion),
        ("genre", &filters.genre),
    ] {
        if let Some(v) = value {
            must.push(json!({ "key": key, "match": { "value": v } }));
        }
    }
    (!must.is_empty()).then(|| json!({ "must": must }))
}

/// Qdrant REST client
pub struct QdrantIndex {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    pub fn new(cfg: &VectorIndexConfig, dimension: usize) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: cfg.base_url(),
            api_key: cfg.api_key.clone(),
            collection: cfg.collection.clone(),
            dimension,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key.as_str());
        }
        builder
    }

    async fn collection_exists(&self) -> Result<bool, IndexError> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", self.collection),
            )
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;

        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            code => Err(IndexError::Api(format!(
                "collection lookup returned {code}"
            ))),
        }
    }

    async fn create_collection(&self) -> Result<(), IndexError> {
        let body = json!({
            "vectors": { "size": self.dimension, "distance": "Cosine" }
        });
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IndexError::Api(format!(
                "collection create returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SnippetIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<(), IndexError> {
        if !self.collection_exists().await? {
            tracing::info!(collection = %self.collection, "Creating vector collection");
            self.create_collection().await?;
        }
        Ok(())
    }

    async fn upsert(
        &self,
        vectors: Vec<Vec<f32>>,
        payloads: Vec<SnippetPayload>,
    ) -> Result<usize, IndexError> {
        if vectors.len() != payloads.len() {
            return Err(IndexError::Mismatch {
                vectors: vectors.len(),
                payloads: payloads.len(),
            });
        }
        if vectors.is_empty() {
            return Ok(0);
        }

        self.ensure_collection().await?;

        let points: Vec<Value> = vectors
            .iter()
            .zip(&payloads)
            .map(|(vector, payload)| {
                json!({
                    "id": payload.snippet_id,
                    "vector": vector,
                    "payload": payload,
                })
            })
            .collect();

        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points?wait=true", self.collection),
            )
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(IndexError::Api(format!(
                "upsert returned {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        Ok(points.len())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        filters: SearchFilters,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = build_filter(&filters) {
            body["filter"] = filter;
        }

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IndexError::Api(format!(
                "search returned {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;

        let hits = payload["result"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|hit| SearchHit {
                snippet_id: hit["id"]
                    .as_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| hit["id"].to_string()),
                score: hit["score"].as_f64().unwrap_or(0.0) as f32,
                payload: hit["payload"].clone(),
            })
            .collect();

        Ok(hits)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        if !self.collection_exists().await? {
            return Ok(0);
        }

        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", self.collection),
            )
            .send()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| IndexError::Http(e.to_string()))?;
        Ok(payload["result"]["points_count"].as_u64().unwrap_or(0))
    }

    async fn clear(&self) -> Result<(), IndexError> {
        if self.collection_exists().await? {
            let response = self
                .request(
                    reqwest::Method::DELETE,
                    &format!("/collections/{}", self.collection),
                )
                .send()
                .await
                .map_err(|e| IndexError::Http(e.to_string()))?;
            if !response.status().is_success() {
                return Err(IndexError::Api(format!(
                    "collection delete returned {}",
                    response.status()
                )));
            }
        }
        self.create_collection().await
    }
}
