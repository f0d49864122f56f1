//! Description embedding
//!
//! Embeds snippet descriptions into unit vectors for the semantic index.
//! The model is loaded lazily on first use and can be unloaded explicitly
//! to release accelerator memory between jobs. Inference is synchronous and
//! CPU/GPU bound; async callers run it on a blocking worker.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use thiserror::Error;

use crate::config::EmbeddingConfig;

/// Embedding failure
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Model initialization failed: {0}")]
    Init(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Text embedding seam
///
/// Implementations produce unit vectors of the configured dimension.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// Output vector dimension
    fn dimension(&self) -> usize;

    /// Release model memory; the next embed call reloads
    fn unload(&self);
}

/// Truncate to `dim` entries and rescale back to unit length
fn truncate_and_renormalize(mut vector: Vec<f32>, dim: usize) -> Vec<f32> {
    vector.truncate(dim);
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

fn resolve_model(model_id: &str) -> EmbeddingModel {
    match model_id {
        // bge-m3 is not in fastembed's model registry; multilingual-e5-large
        // is the dense 1024-dim multilingual model it ships
        "BAAI/bge-m3" | "intfloat/multilingual-e5-large" => EmbeddingModel::MultilingualE5Large,
        other => {
            tracing::warn!(model = %other, "Unknown embedding model id, using multilingual-e5-large");
            EmbeddingModel::MultilingualE5Large
        }
    }
}

/// Lazily initialized local embedding model
pub struct FastEmbedder {
    model: Mutex<Option<TextEmbedding>>,
    cfg: EmbeddingConfig,
}

impl FastEmbedder {
    pub fn new(cfg: EmbeddingConfig) -> Self {
        Self {
            model: Mutex::new(None),
            cfg,
        }
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut guard = self
            .model
            .lock()
            .map_err(|_| EmbedError::Inference("model lock poisoned".to_string()))?;

        if guard.is_none() {
            tracing::info!(model = %self.cfg.model_id, "Loading embedding model");
            let model = TextEmbedding::try_new(
                InitOptions::new(resolve_model(&self.cfg.model_id))
                    .with_show_download_progress(false),
            )
            .map_err(|e| EmbedError::Init(e.to_string()))?;
            *guard = Some(model);
        }

        let model = guard.as_mut().expect("model just initialized");
        let embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        Ok(embeddings
            .into_iter()
            .map(|v| truncate_and_renormalize(v, self.cfg.dimension))
            .collect())
    }
}

impl TextEmbedder for FastEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Inference("model returned no vector".to_string()))
    }

    fn dimension(&self) -> usize {
        self.cfg.dimension
    }

    fn unload(&self) {
        if let Ok(mut guard) = self.model.lock() {
            if guard.take().is_some() {
                tracing::info!("Embedding model unloaded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_keeps_unit_length() {
        let raw = vec![0.5f32; 1024];
        let out = truncate_and_renormalize(raw, 768);
        assert_eq!(out.len(), 768);
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_vector_stays_zero() {
        let out = truncate_and_renormalize(vec![0.0; 10], 4);
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn short_vector_is_not_padded() {
        let out = truncate_and_renormalize(vec![3.0, 4.0], 768);
        assert_eq!(out.len(), 2);
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }
}
