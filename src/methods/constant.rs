use crate::methods::PredictionMethod;
use crate::models::{Result, SentencePair};
use async_trait::async_trait;
use serde_json::Value;

/// Gives the same verdict for every pair. Useful as a baseline.
#[derive(Debug, Clone, Copy)]
pub struct ConstantMethod {
    pub value: bool,
}

impl ConstantMethod {
    pub fn new(value: bool) -> Self {
        Self { value }
    }
}

#[async_trait]
impl PredictionMethod for ConstantMethod {
    async fn predict(&self, batch: &[SentencePair]) -> Result<Value> {
        Ok(Value::Array(vec![Value::Bool(self.value); batch.len()]))
    }
}
