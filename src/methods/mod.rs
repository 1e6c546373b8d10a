//! Prediction methods.
//!
//! A method takes an ordered batch of sentence pairs and returns one verdict
//! per pair. The runner receives the raw JSON value and enforces the shape
//! itself, so a method that misbehaves is rejected rather than trusted.

mod chat;
mod constant;
mod registry;

pub use chat::*;
pub use constant::*;
pub use registry::*;

use crate::models::{Result, SentencePair};
use async_trait::async_trait;
use serde_json::Value;

/// Something that can judge a batch of sentence pairs.
///
/// A well-behaved implementation returns a JSON array of booleans, one per
/// pair, in batch order. Errors count as a failed attempt for the batch.
#[async_trait]
pub trait PredictionMethod: Send + Sync {
    async fn predict(&self, batch: &[SentencePair]) -> Result<Value>;
}

/// Adapter turning a synchronous closure into a [`PredictionMethod`].
pub struct FnMethod<F> {
    f: F,
}

impl<F> FnMethod<F>
where
    F: Fn(&[SentencePair]) -> Result<Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> PredictionMethod for FnMethod<F>
where
    F: Fn(&[SentencePair]) -> Result<Value> + Send + Sync,
{
    async fn predict(&self, batch: &[SentencePair]) -> Result<Value> {
        (self.f)(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_method_sees_the_batch() {
        let method = FnMethod::new(|batch: &[SentencePair]| {
            Ok(Value::Array(
                batch.iter().map(|(a, b)| Value::Bool(a == b)).collect(),
            ))
        });
        let batch = vec![
            ("same".to_string(), "same".to_string()),
            ("one".to_string(), "other".to_string()),
        ];
        assert_eq!(method.predict(&batch).await.unwrap(), json!([true, false]));
    }
}
