use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use kbase_core::config::EmbeddingSettings;
use kbase_core::error::{Error, Result};
use kbase_core::traits::Embedder;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
///
/// Does not retry on its own; callers wrap it in `kbase_core::retry::with_retry`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/embeddings") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/embeddings", base)
        } else {
            format!("{}/v1/embeddings", base)
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest { model: &self.model, input: texts };
        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| Error::Service(format!("embedding request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::from_http_status("embedding", status.as_u16(), &detail));
        }
        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| Error::Service(format!("unexpected embedding response: {e}")))?;
        let vectors = order_embeddings(parsed.data, texts.len())?;
        debug!(model = %self.model, inputs = texts.len(), "embedded batch");
        Ok(vectors)
    }
}

fn order_embeddings(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(Error::Service(format!(
            "embedding service returned {} vectors for {} inputs",
            items.len(),
            expected
        )));
    }
    if items.iter().all(|i| i.index.is_some()) {
        items.sort_by_key(|i| i.index);
    }
    let vectors: Vec<Vec<f32>> = items.into_iter().map(|i| i.embedding).collect();
    if let Some(first) = vectors.first() {
        if vectors.iter().any(|v| v.len() != first.len() || v.is_empty()) {
            return Err(Error::Service("embedding service returned inconsistent dimensions".into()));
        }
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, v: &[f32]) -> EmbeddingItem {
        EmbeddingItem { embedding: v.to_vec(), index: Some(index) }
    }

    #[test]
    fn reorders_by_index() {
        let out = order_embeddings(vec![item(1, &[2.0]), item(0, &[1.0])], 2).unwrap();
        assert_eq!(out, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn count_mismatch_is_a_service_error() {
        let err = order_embeddings(vec![item(0, &[1.0])], 2).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn endpoint_resolution() {
        let mut s = EmbeddingSettings::default();
        s.base_url = "http://localhost:1234/v1/".into();
        assert_eq!(HttpEmbedder::new(&s).unwrap().endpoint(), "http://localhost:1234/v1/embeddings");
        s.base_url = "http://embed.internal".into();
        assert_eq!(HttpEmbedder::new(&s).unwrap().endpoint(), "http://embed.internal/v1/embeddings");
    }
}
