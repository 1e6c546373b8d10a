//! OpenAI-compatible chat completion client.
//!
//! Provides:
//! - `LLMClient`: One endpoint, with retry and backoff
//! - `EndpointRegistry`: Clients for the endpoints methods refer to

mod llm_client;
mod registry;
#[cfg(test)]
pub(crate) mod testing;

pub use llm_client::*;
pub use registry::*;
