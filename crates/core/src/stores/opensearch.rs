use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use crate::error::SearchError;
use crate::models::Chunk;
use crate::traits::LexicalIndex;

/// OpenSearch-backed term index. One document per chunk, keyed by chunk id.
pub struct OpenSearchIndex {
    client: Arc<Client>,
    endpoint: Url,
    index_name: String,
}

impl OpenSearchIndex {
    pub fn new(endpoint: &str, index_name: impl Into<String>) -> Result<Self, SearchError> {
        Ok(Self {
            client: Arc::new(Client::new()),
            endpoint: Url::parse(endpoint)?,
            index_name: index_name.into(),
        })
    }

    pub async fn ensure_index(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .head(format!("{}{}", self.endpoint, self.index_name))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(format!("{}{}", self.endpoint, self.index_name))
            .json(&json!({
                "settings": {
                    "number_of_shards": 1,
                    "number_of_replicas": 0
                },
                "mappings": {
                    "properties": {
                        "text": {"type": "text", "analyzer": "standard"},
                        "document_id": {"type": "keyword"},
                        "text_hash": {"type": "keyword"},
                        "page": {"type": "integer"},
                        "start_offset": {"type": "long"},
                        "end_offset": {"type": "long"}
                    }
                }
            }))
            .send()
            .await?;

        if response.status().is_server_error() || response.status().is_client_error() {
            return Err(SearchError::Request(format!(
                "open-search index setup failed with {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl LexicalIndex for OpenSearchIndex {
    async fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), SearchError> {
        let mut operations = Vec::new();

        for chunk in chunks {
            operations.push(json!({
                "index": {
                    "_index": self.index_name,
                    "_id": chunk.id,
                }
            }));
            operations.push(json!({
                "document_id": chunk.document_id,
                "page": chunk.page,
                "start_offset": chunk.start_offset,
                "end_offset": chunk.end_offset,
                "text": chunk.text,
                "text_hash": chunk.text_hash,
            }));
        }

        if operations.is_empty() {
            return Ok(());
        }

        let payload: String = operations
            .into_iter()
            .map(|value| serde_json::to_string(&value))
            .collect::<Result<Vec<_>, serde_json::Error>>()?
            .join("\n")
            + "\n";

        let response = self
            .client
            .post(format!("{}_bulk", self.endpoint))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<(), SearchError> {
        let response = self
            .client
            .post(format!(
                "{}{}/_delete_by_query",
                self.endpoint, self.index_name
            ))
            .json(&json!({
                "query": {
                    "term": {"document_id": document_id}
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<(Uuid, f64)>, SearchError> {
        let body = json!({
            "size": limit,
            "query": {
                "match": {
                    "text": query
                }
            }
        });

        let response = self
            .client
            .post(format!("{}{}/_search", self.endpoint, self.index_name))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "opensearch".to_string(),
                details: response.status().to_string(),
            });
        }

        let response_json: Value = response.json().await?;
        let hits = response_json
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for raw in hits {
            let chunk_id = raw
                .pointer("/_id")
                .and_then(Value::as_str)
                .and_then(|id| Uuid::parse_str(id).ok());
            let score = raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);

            if let Some(chunk_id) = chunk_id {
                result.push((chunk_id, score));
            }
        }

        Ok(result)
    }
}
