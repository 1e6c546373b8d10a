//! Chat-model prediction method.
//!
//! Epistemic foundation:
//! - K_i: One completion request per pair, in batch order
//! - B_i: The model answers with a recognisable yes/no word (might not)
//! - I^B: Reasoning models wrap deliberation in `<think>` blocks → optional strip

use crate::client::{LLMClient, Message};
use crate::methods::PredictionMethod;
use crate::models::{ChatMethodConfig, ConfigError, Result, SENTENCE1, SENTENCE2, SentencePair};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Prompt used when a method does not name a template file.
pub const DEFAULT_PROMPT: &str = "\
Do the following two sentences express the same meaning, i.e. is one a paraphrase of the other?

Sentence 1: {sentence1}
Sentence 2: {sentence2}

Answer with a single word: yes or no.";

const CLOSE_THINK: &str = "</think>";
const OPEN_THINK: &str = "<think>";

/// Prompt text with `{sentence1}` and `{sentence2}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
    placeholder: Regex,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> std::result::Result<Self, ConfigError> {
        let placeholder = Regex::new(&format!(r"\{{({SENTENCE1}|{SENTENCE2})\}}"))
            .map_err(|e| ConfigError::Invalid(format!("placeholder pattern: {e}")))?;
        Ok(Self {
            text: text.into(),
            placeholder,
        })
    }

    /// Substitute both sentences in one pass, so sentence text is never
    /// itself scanned for placeholders.
    pub fn render(&self, (sentence1, sentence2): &SentencePair) -> String {
        self.placeholder
            .replace_all(&self.text, |caps: &regex::Captures<'_>| {
                if &caps[1] == SENTENCE1 {
                    sentence1.clone()
                } else {
                    sentence2.clone()
                }
            })
            .into_owned()
    }
}

/// Maps a model reply to a verdict.
#[derive(Debug, Clone)]
pub struct VerdictParser {
    strip_thinking: bool,
    first_word: Regex,
}

impl VerdictParser {
    pub fn new(strip_thinking: bool) -> std::result::Result<Self, ConfigError> {
        let first_word = Regex::new(r"^[^A-Za-z]*([A-Za-z]+)")
            .map_err(|e| ConfigError::Invalid(format!("verdict pattern: {e}")))?;
        Ok(Self {
            strip_thinking,
            first_word,
        })
    }

    /// Drop reasoning: everything up to the last `</think>`, or an unclosed
    /// `<think>` block to the end of the reply.
    fn strip<'a>(&self, reply: &'a str) -> &'a str {
        if let Some(pos) = reply.rfind(CLOSE_THINK) {
            &reply[pos + CLOSE_THINK.len()..]
        } else if let Some(pos) = reply.find(OPEN_THINK) {
            &reply[..pos]
        } else {
            reply
        }
    }

    /// `true`/`false` for a recognised answer, otherwise the reply itself as
    /// a string so that validation rejects the batch.
    pub fn parse(&self, reply: &str) -> Value {
        let answer = match self.strip_thinking {
            true => self.strip(reply),
            false => reply,
        };
        let answer = answer.trim();

        let word = self
            .first_word
            .captures(answer)
            .map(|caps| caps[1].to_ascii_lowercase());

        match word.as_deref() {
            Some("yes" | "true" | "paraphrase" | "paraphrases") => Value::Bool(true),
            Some("no" | "false" | "not") => Value::Bool(false),
            _ => Value::String(answer.to_string()),
        }
    }
}

/// Asks a chat model about each pair of the batch.
pub struct ChatMethod {
    client: Arc<LLMClient>,
    model: String,
    template: PromptTemplate,
    system_prompt: Option<String>,
    parser: VerdictParser,
    max_tokens: u32,
    temperature: f64,
}

impl ChatMethod {
    pub fn new(
        client: Arc<LLMClient>,
        config: &ChatMethodConfig,
        template: PromptTemplate,
    ) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            client,
            model: config.model.clone(),
            template,
            system_prompt: config.system_prompt.clone(),
            parser: VerdictParser::new(config.strip_thinking)?,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn messages(&self, pair: &SentencePair) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(self.template.render(pair)));
        messages
    }
}

#[async_trait]
impl PredictionMethod for ChatMethod {
    async fn predict(&self, batch: &[SentencePair]) -> Result<Value> {
        let mut verdicts = Vec::with_capacity(batch.len());

        for pair in batch {
            let response = self
                .client
                .complete(&self.model, &self.messages(pair), self.max_tokens, self.temperature)
                .await?;
            let verdict = self.parser.parse(&response.content);
            debug!(
                endpoint = %self.client.name(),
                model = %response.model,
                duration_ms = response.duration.as_millis() as u64,
                verdict = %verdict,
                "Pair judged"
            );
            verdicts.push(verdict);
        }

        Ok(Value::Array(verdicts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BenchError;
    use serde_json::json;
    use crate::client::testing::{Reply, serve};
    use std::collections::HashMap;

    fn pair(a: &str, b: &str) -> SentencePair {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn test_render_single_pass() {
        let template =
            PromptTemplate::new("A: {sentence1}\nB: {sentence2}\nA again: {sentence1}").unwrap();
        let rendered = template.render(&pair("says {sentence2}", "plain"));
        assert_eq!(rendered, "A: says {sentence2}\nB: plain\nA again: says {sentence2}");
    }

    #[test]
    fn test_default_prompt_has_both_placeholders() {
        let template = PromptTemplate::new(DEFAULT_PROMPT).unwrap();
        let rendered = template.render(&pair("The cat sat.", "A cat was sitting."));
        assert!(rendered.contains("Sentence 1: The cat sat."));
        assert!(rendered.contains("Sentence 2: A cat was sitting."));
        assert!(!rendered.contains('{'));
    }

    #[test]
    fn test_parse_recognised_answers() {
        let parser = VerdictParser::new(false).unwrap();
        assert_eq!(parser.parse("Yes"), json!(true));
        assert_eq!(parser.parse("  yes, they are."), json!(true));
        assert_eq!(parser.parse("**Paraphrase**"), json!(true));
        assert_eq!(parser.parse("TRUE"), json!(true));
        assert_eq!(parser.parse("No."), json!(false));
        assert_eq!(parser.parse("Not a paraphrase"), json!(false));
        assert_eq!(parser.parse("false"), json!(false));
    }

    #[test]
    fn test_parse_unrecognised_answer_stays_a_string() {
        let parser = VerdictParser::new(false).unwrap();
        assert_eq!(parser.parse("Maybe"), json!("Maybe"));
        assert_eq!(parser.parse(""), json!(""));
        assert_eq!(parser.parse("<think>hmm</think>Yes"), json!("<think>hmm</think>Yes"));
    }

    #[test]
    fn test_parse_strips_thinking() {
        let parser = VerdictParser::new(true).unwrap();
        assert_eq!(parser.parse("<think>They differ... no wait</think>\n\nYes"), json!(true));
        assert_eq!(parser.parse("reasoning without opener</think> No"), json!(false));
        assert_eq!(parser.parse("<think>never finished"), json!(""));
        assert_eq!(parser.parse("No"), json!(false));
    }

    fn chat_method(base_url: String, strip_thinking: bool) -> (ChatMethod, Arc<LLMClient>) {
        let client = Arc::new(
            LLMClient::new("test".into(), None, base_url, HashMap::new(), 5, 1).unwrap(),
        );
        let config = ChatMethodConfig {
            endpoint: "test".into(),
            model: "test-model".into(),
            prompt: None,
            system_prompt: Some("You judge paraphrases.".into()),
            strip_thinking,
            max_tokens: 8,
            temperature: 0.0,
        };
        let method = ChatMethod::new(
            Arc::clone(&client),
            &config,
            PromptTemplate::new(DEFAULT_PROMPT).unwrap(),
        )
        .unwrap();
        (method, client)
    }

    #[tokio::test]
    async fn test_predict_one_request_per_pair() {
        let (url, _) = serve(vec![
            Reply::completion("Yes"),
            Reply::completion("<think>hm</think>No"),
            Reply::completion("I cannot tell"),
        ])
        .await;
        let (method, client) = chat_method(url, true);

        let batch = vec![pair("a", "b"), pair("c", "d"), pair("e", "f")];
        let result = method.predict(&batch).await.unwrap();
        assert_eq!(result, json!([true, false, "I cannot tell"]));
        assert_eq!(client.total_tokens(), (30, 3));
    }

    #[tokio::test]
    async fn test_predict_surfaces_auth_errors() {
        let (url, _) = serve(vec![Reply::error(401, "bad key")]).await;
        let (method, _) = chat_method(url, false);

        let err = method.predict(&[pair("a", "b")]).await.unwrap_err();
        match err {
            BenchError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
