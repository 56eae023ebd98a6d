//! ONNX encoder and reranker sessions
//!
//! One [`EncoderSession`] owns all model state for a worker: the dense
//! encoder (CLS-pooled, L2-normalized output), an optional late-interaction
//! token head, and the cross-encoder reranker. Model weights are fetched
//! once into the data directory and loaded from there offline.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use ort::session::Session;
use thiserror::Error;

use crate::embed::{HybridEmbedding, LatePayload, QueryEmbedding};
use crate::math::normalize_l2;
use crate::EMBEDDING_DIM;

/// Dense encoder model repository.
pub const MODEL_REPO: &str = "nomic-ai/nomic-embed-text-v1.5";
const MODEL_FILE: &str = "onnx/model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Cross-encoder reranker repository (~91MB ONNX, 22M params).
pub const RERANKER_REPO: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";
const RERANKER_MODEL_FILE: &str = "onnx/model.onnx";
const RERANKER_TOKENIZER_FILE: &str = "tokenizer.json";

/// Prefixes the encoder was trained with.
const DOCUMENT_PREFIX: &str = "search_document: ";
const QUERY_PREFIX: &str = "search_query: ";

/// Cap on per-document token rows kept in the late-interaction payload.
const MAX_LATE_TOKENS: usize = 128;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Model download failed: {0}")]
    Download(String),
    #[error("Query cannot be empty")]
    EmptyQuery,
}

impl From<ort::Error> for SessionError {
    fn from(e: ort::Error) -> Self {
        SessionError::Inference(e.to_string())
    }
}

/// Resolved on-disk locations of all model assets.
pub struct ModelPaths {
    pub dense_model: PathBuf,
    pub dense_tokenizer: PathBuf,
    pub reranker_model: PathBuf,
    pub reranker_tokenizer: PathBuf,
}

/// Fetch model assets into `models_dir` (no-op when already cached).
///
/// This is the only network-touching operation; everything else runs
/// offline against the cached files.
pub fn ensure_models(models_dir: &Path) -> Result<ModelPaths, SessionError> {
    use hf_hub::api::sync::ApiBuilder;

    std::fs::create_dir_all(models_dir)
        .map_err(|e| SessionError::Download(format!("cannot create models dir: {}", e)))?;

    let api = ApiBuilder::new()
        .with_cache_dir(models_dir.to_path_buf())
        .build()
        .map_err(|e| SessionError::Download(e.to_string()))?;

    let dense = api.model(MODEL_REPO.to_string());
    let dense_model = dense
        .get(MODEL_FILE)
        .map_err(|e| SessionError::Download(e.to_string()))?;
    let dense_tokenizer = dense
        .get(TOKENIZER_FILE)
        .map_err(|e| SessionError::Download(e.to_string()))?;

    let reranker = api.model(RERANKER_REPO.to_string());
    let reranker_model = reranker
        .get(RERANKER_MODEL_FILE)
        .map_err(|e| SessionError::Download(e.to_string()))?;
    let reranker_tokenizer = reranker
        .get(RERANKER_TOKENIZER_FILE)
        .map_err(|e| SessionError::Download(e.to_string()))?;

    tracing::info!(dir = %models_dir.display(), "Model assets ready");
    Ok(ModelPaths {
        dense_model,
        dense_tokenizer,
        reranker_model,
        reranker_tokenizer,
    })
}

/// All model state owned by one worker. Sessions are not reentrant, so the
/// pool serializes access; each worker holds its own copy.
pub struct EncoderSession {
    dense: Session,
    dense_tokenizer: tokenizers::Tokenizer,
    reranker: Option<Session>,
    reranker_tokenizer: Option<tokenizers::Tokenizer>,
    /// Name of the dense model's per-token output, when the exported graph
    /// has one
    token_output_name: Option<&'static str>,
    max_length: usize,
}

impl EncoderSession {
    /// Load sessions from already-downloaded model assets.
    pub fn load(models_dir: &Path) -> Result<Self, SessionError> {
        let _span = tracing::info_span!("session_load").entered();
        let paths = ensure_models(models_dir)?;

        let dense = Session::builder()?.commit_from_file(&paths.dense_model)?;
        let dense_tokenizer = tokenizers::Tokenizer::from_file(&paths.dense_tokenizer)
            .map_err(|e| SessionError::Tokenizer(e.to_string()))?;

        let token_output_name = dense.outputs.iter().find_map(|o| match o.name.as_str() {
            "token_embeddings" => Some("token_embeddings"),
            "last_hidden_state" => Some("last_hidden_state"),
            _ => None,
        });

        // The reranker is optional: retrieval degrades to RRF ordering when
        // it cannot be loaded.
        let (reranker, reranker_tokenizer) =
            match Session::builder().and_then(|b| b.commit_from_file(&paths.reranker_model)) {
                Ok(session) => {
                    match tokenizers::Tokenizer::from_file(&paths.reranker_tokenizer) {
                        Ok(tok) => (Some(session), Some(tok)),
                        Err(e) => {
                            tracing::warn!(error = %e, "Reranker tokenizer unavailable");
                            (None, None)
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reranker session unavailable");
                    (None, None)
                }
            };

        tracing::info!(
            late_interaction = token_output_name.is_some(),
            reranker = reranker.is_some(),
            "Encoder session initialized"
        );

        Ok(EncoderSession {
            dense,
            dense_tokenizer,
            reranker,
            reranker_tokenizer,
            token_output_name,
            max_length: 8192,
        })
    }

    /// Embed documents for storage. Adds the document prefix; returns one
    /// result per input text.
    pub fn embed_documents(
        &mut self,
        texts: &[String],
    ) -> Result<Vec<HybridEmbedding>, SessionError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let prefixed: Vec<String> = texts
            .iter()
            .map(|t| format!("{}{}", DOCUMENT_PREFIX, t))
            .collect();
        let (dense, token_matrices) = self.encode_batch(&prefixed)?;

        Ok(dense
            .into_iter()
            .zip(token_matrices)
            .map(|(dense, tokens)| HybridEmbedding {
                dense,
                late: tokens.as_deref().and_then(LatePayload::quantize),
            })
            .collect())
    }

    /// Embed a query. Adds the query prefix; the late matrix stays float.
    pub fn embed_query(&mut self, text: &str) -> Result<QueryEmbedding, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyQuery);
        }
        let prefixed = format!("{}{}", QUERY_PREFIX, text);
        let (mut dense, mut token_matrices) = self.encode_batch(std::slice::from_ref(&prefixed))?;
        Ok(QueryEmbedding {
            dense: dense.pop().unwrap_or_default(),
            late: token_matrices.pop().flatten(),
        })
    }

    /// Cross-encoder probabilities for `(query, document)` pairs.
    pub fn rerank(&mut self, query: &str, documents: &[String]) -> Result<Vec<f32>, SessionError> {
        let _span =
            tracing::debug_span!("rerank", count = documents.len(), query_len = query.len())
                .entered();
        if documents.is_empty() {
            return Ok(vec![]);
        }
        let (Some(session), Some(tokenizer)) = (&mut self.reranker, &self.reranker_tokenizer)
        else {
            return Err(SessionError::Inference("reranker not loaded".into()));
        };

        let encodings: Vec<tokenizers::Encoding> = documents
            .iter()
            .map(|doc| {
                tokenizer
                    .encode((query, doc.as_str()), true)
                    .map_err(|e| SessionError::Tokenizer(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let input_ids: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| e.get_ids().iter().map(|&id| id as i64).collect())
            .collect();
        let attention_mask: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| e.get_attention_mask().iter().map(|&m| m as i64).collect())
            .collect();

        let max_len = input_ids.iter().map(Vec::len).max().unwrap_or(0).min(512);
        if max_len == 0 {
            return Ok(vec![0.0; documents.len()]);
        }

        let ids_arr = pad_2d_i64(&input_ids, max_len, 0);
        let mask_arr = pad_2d_i64(&attention_mask, max_len, 0);
        let type_arr = Array2::<i64>::zeros((documents.len(), max_len));

        use ort::value::Tensor;
        let ids_tensor = Tensor::from_array(ids_arr)?;
        let mask_tensor = Tensor::from_array(mask_arr)?;
        let type_tensor = Tensor::from_array(type_arr)?;

        let outputs = session.run(ort::inputs![
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => type_tensor,
        ])?;

        // Cross-encoder output is "logits" with shape [batch, 1] or [batch]
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let stride = if shape.len() == 2 { shape[1] as usize } else { 1 };

        let expected = documents.len() * stride;
        if data.len() < expected {
            return Err(SessionError::Inference(format!(
                "Model output too short: expected {} elements, got {}",
                expected,
                data.len()
            )));
        }

        Ok((0..documents.len())
            .map(|i| sigmoid(data[i * stride]))
            .collect())
    }

    /// Tokenize, pad, run the dense model, and pool.
    ///
    /// Returns the normalized dense vector and (when the model exposes a
    /// token output) the per-token matrix for each input.
    #[allow(clippy::type_complexity)]
    fn encode_batch(
        &mut self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, Vec<Option<Vec<Vec<f32>>>>), SessionError> {
        use ort::value::Tensor;

        let encodings = self
            .dense_tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| SessionError::Tokenizer(e.to_string()))?;

        // INT32 ids for ONNX model compatibility
        let input_ids: Vec<Vec<i32>> = encodings
            .iter()
            .map(|e| e.get_ids().iter().map(|&id| id as i32).collect())
            .collect();
        let attention_mask: Vec<Vec<i32>> = encodings
            .iter()
            .map(|e| e.get_attention_mask().iter().map(|&m| m as i32).collect())
            .collect();

        let max_len = input_ids
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .min(self.max_length);

        let input_ids_arr = pad_2d_i32(&input_ids, max_len, 0);
        let attention_mask_arr = pad_2d_i32(&attention_mask, max_len, 0);

        let input_ids_tensor = Tensor::from_array(input_ids_arr)?;
        let attention_mask_tensor = Tensor::from_array(attention_mask_arr)?;

        let outputs = self.dense.run(ort::inputs![
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
        ])?;

        let batch = texts.len();

        // CLS-pooled sentence embedding, pre-pooled by the exported graph
        let (_shape, data) = outputs["sentence_embedding"].try_extract_tensor::<f32>()?;
        let mut dense = Vec::with_capacity(batch);
        for i in 0..batch {
            let start = i * EMBEDDING_DIM;
            let end = start + EMBEDDING_DIM;
            if end > data.len() {
                return Err(SessionError::Inference(
                    "sentence_embedding output shorter than batch".into(),
                ));
            }
            dense.push(normalize_l2(data[start..end].to_vec()));
        }

        // Optional per-token output for the late-interaction payload
        let mut token_matrices: Vec<Option<Vec<Vec<f32>>>> = vec![None; batch];
        if let Some(output_name) = self.token_output_name {
            match outputs[output_name].try_extract_tensor::<f32>() {
                Ok((shape, token_data)) if shape.len() == 3 => {
                    let seq = shape[1] as usize;
                    let hidden = shape[2] as usize;
                    for (i, matrix_slot) in token_matrices.iter_mut().enumerate() {
                        let token_count = attention_mask[i]
                            .iter()
                            .filter(|&&m| m != 0)
                            .count()
                            .min(seq)
                            .min(MAX_LATE_TOKENS);
                        let mut matrix = Vec::with_capacity(token_count);
                        for t in 0..token_count {
                            let start = (i * seq + t) * hidden;
                            let end = start + hidden;
                            if end > token_data.len() {
                                break;
                            }
                            matrix.push(token_data[start..end].to_vec());
                        }
                        if !matrix.is_empty() {
                            *matrix_slot = Some(matrix);
                        }
                    }
                }
                Ok(_) => {
                    tracing::debug!("Token output has unexpected rank, skipping late payload");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Token output extraction failed");
                }
            }
        }

        Ok((dense, token_matrices))
    }
}

/// Pad 2D sequences to a fixed length
fn pad_2d_i32(inputs: &[Vec<i32>], max_len: usize, pad_value: i32) -> Array2<i32> {
    let batch_size = inputs.len();
    let mut arr = Array2::from_elem((batch_size, max_len), pad_value);
    for (i, seq) in inputs.iter().enumerate() {
        for (j, &val) in seq.iter().take(max_len).enumerate() {
            arr[[i, j]] = val;
        }
    }
    arr
}

/// Pad 2D sequences to a fixed length (i64 variant for the reranker)
fn pad_2d_i64(inputs: &[Vec<i64>], max_len: usize, pad_value: i64) -> Array2<i64> {
    let batch_size = inputs.len();
    let mut arr = Array2::from_elem((batch_size, max_len), pad_value);
    for (i, seq) in inputs.iter().enumerate() {
        for (j, &val) in seq.iter().take(max_len).enumerate() {
            arr[[i, j]] = val;
        }
    }
    arr
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
