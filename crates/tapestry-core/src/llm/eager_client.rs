//! `EagerLlmClient` — the reference `LlmJobClient` (spec §4.9).
//!
//! Grounded on `context_use.llm.litellm.LiteLLMSyncClient`: rather than
//! uploading a JSONL file and polling OpenAI's batch endpoint (minutes of
//! latency, `context_use.llm.base.LLMClient`'s real shape), this client
//! does every completion/embedding call eagerly inside `batch_submit` /
//! `embed_batch_submit`, stashes the results under a generated `job_key`,
//! and hands them back once on the first poll. The submit/poll interface
//! is unchanged, so the state machine in `batch_manager` runs unmodified.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tapestry_proto::{EmbedItem, LlmJobClient, ProtoError, PromptItem};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Model identifiers and credentials for the reference client.
///
/// Mirrors `context_use.llm.models`'s `OpenAIModel` / `OpenAIEmbeddingModel`
/// enums, reduced to plain strings since this crate has no first-party
/// provider SDK to validate against.
#[derive(Debug, Clone)]
pub struct EagerLlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub completion_model: String,
    pub embedding_model: String,
}

impl Default for EagerLlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            completion_model: "gpt-4o".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
        }
    }
}

pub struct EagerLlmClient {
    http: reqwest::Client,
    config: EagerLlmConfig,
    gen_cache: Mutex<HashMap<String, HashMap<String, Value>>>,
    embed_cache: Mutex<HashMap<String, HashMap<String, Vec<f32>>>>,
}

impl EagerLlmClient {
    pub fn new(config: EagerLlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            gen_cache: Mutex::new(HashMap::new()),
            embed_cache: Mutex::new(HashMap::new()),
        }
    }

    fn encode_asset_as_data_url(path: &str) -> Option<String> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(err) => {
                warn!(path, %err, "skipping missing asset");
                return None;
            }
        };
        let mime = mime_guess_from_path(path);
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Some(format!("data:{mime};base64,{encoded}"))
    }

    fn build_messages(item: &PromptItem) -> Value {
        let mut parts = Vec::new();
        for path in &item.asset_paths {
            if let Some(data_url) = Self::encode_asset_as_data_url(path) {
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": {"url": data_url},
                }));
            }
        }
        parts.push(serde_json::json!({"type": "text", "text": item.prompt}));
        serde_json::json!([{"role": "user", "content": parts}])
    }

    async fn complete_one(&self, item: &PromptItem) -> Result<Value, ProtoError> {
        let body = serde_json::json!({
            "model": self.config.completion_model,
            "messages": Self::build_messages(item),
            "response_format": {
                "type": "json_schema",
                "json_schema": {"name": "response", "schema": item.response_schema},
            },
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProtoError::LlmJobFailed(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProtoError::LlmJobFailed(e.to_string()))?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProtoError::LlmJobFailed(format!("empty response for {}", item.item_id)))?;

        serde_json::from_str(text.trim())
            .map_err(|e| ProtoError::LlmJobFailed(format!("{}: {e}", item.item_id)))
    }

    async fn embed_one(&self, item: &EmbedItem) -> Result<Vec<f32>, ProtoError> {
        let body = serde_json::json!({
            "model": self.config.embedding_model,
            "input": [item.text],
        });

        let response = self
            .http
            .post(format!("{}/embeddings", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProtoError::LlmJobFailed(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProtoError::LlmJobFailed(e.to_string()))?;

        let vector = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| ProtoError::LlmJobFailed(format!("no embedding for {}", item.item_id)))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        Ok(vector)
    }
}

fn mime_guess_from_path(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or("").to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl LlmJobClient for EagerLlmClient {
    async fn batch_submit(
        &self,
        batch_id: &str,
        items: Vec<PromptItem>,
    ) -> Result<String, ProtoError> {
        let total = items.len();
        let mut results = HashMap::new();
        for item in &items {
            match self.complete_one(item).await {
                Ok(value) => {
                    results.insert(item.item_id.clone(), value);
                }
                Err(err) => error!(batch_id, item_id = %item.item_id, %err, "sync completion failed"),
            }
        }
        info!(batch_id, completed = results.len(), total, "sync completions done");

        let key = format!("gen-{batch_id}");
        self.gen_cache.lock().await.insert(key.clone(), results);
        Ok(key)
    }

    async fn batch_get_results(
        &self,
        job_key: &str,
    ) -> Result<Option<HashMap<String, Value>>, ProtoError> {
        Ok(self.gen_cache.lock().await.remove(job_key))
    }

    async fn embed_batch_submit(
        &self,
        batch_id: &str,
        items: Vec<EmbedItem>,
    ) -> Result<String, ProtoError> {
        let total = items.len();
        let mut results = HashMap::new();
        for item in &items {
            match self.embed_one(item).await {
                Ok(vector) => {
                    results.insert(item.item_id.clone(), vector);
                }
                Err(err) => error!(batch_id, item_id = %item.item_id, %err, "sync embedding failed"),
            }
        }
        info!(batch_id, completed = results.len(), total, "sync embeddings done");

        let key = format!("embed-{batch_id}");
        self.embed_cache.lock().await.insert(key.clone(), results);
        Ok(key)
    }

    async fn embed_batch_get_results(
        &self,
        job_key: &str,
    ) -> Result<Option<HashMap<String, Vec<f32>>>, ProtoError> {
        Ok(self.embed_cache.lock().await.remove(job_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_guess_covers_common_image_types() {
        assert_eq!(mime_guess_from_path("photo.JPG"), "image/jpeg");
        assert_eq!(mime_guess_from_path("frame.png"), "image/png");
        assert_eq!(mime_guess_from_path("clip.mov"), "application/octet-stream");
    }

    #[tokio::test]
    async fn unpolled_job_key_returns_none() {
        let client = EagerLlmClient::new(EagerLlmConfig::default());
        let result = client.batch_get_results("gen-missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn poll_is_one_shot() {
        let client = EagerLlmClient::new(EagerLlmConfig::default());
        client
            .gen_cache
            .lock()
            .await
            .insert("gen-1".to_string(), HashMap::from([("a".to_string(), serde_json::json!(1))]));

        let first = client.batch_get_results("gen-1").await.unwrap();
        assert!(first.is_some());
        let second = client.batch_get_results("gen-1").await.unwrap();
        assert!(second.is_none());
    }
}
