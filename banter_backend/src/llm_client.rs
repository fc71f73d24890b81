use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http_client::build_http_client;

pub const JSON_SYSTEM_PROMPT: &str = "You are a helpful assistant that responds in valid JSON format.";
pub const DEFAULT_DECISION_PROMPT: &str = "You are a conversation analyst. Respond with YES or NO.";

const STRUCTURED_TEMPERATURE: f32 = 0.8;
const STRUCTURED_MAX_TOKENS: u32 = 1000;
const DECISION_TEMPERATURE: f32 = 0.2;
const DECISION_MAX_TOKENS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Text-generation backend consumed by enrichment, the AI gate and comment generation.
///
/// Only `generate_text` is required; the two convenience calls are expressed
/// over it so test doubles only need to script raw completions.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn generate_text(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;

    /// Ask a yes/no question. The raw answer is returned; callers interpret it.
    async fn decide_yes_no(&self, prompt: &str) -> Result<String> {
        self.generate_text(
            vec![
                Message::system(DEFAULT_DECISION_PROMPT),
                Message::user(prompt),
            ],
            DECISION_TEMPERATURE,
            DECISION_MAX_TOKENS,
        )
        .await
    }

    /// Ask for a JSON answer, hinting at the language the content should use.
    async fn generate_structured(&self, prompt: &str, language: &str) -> Result<String> {
        self.generate_text(
            vec![
                Message::system(JSON_SYSTEM_PROMPT),
                Message::user(with_language_hint(prompt, language)),
            ],
            STRUCTURED_TEMPERATURE,
            STRUCTURED_MAX_TOKENS,
        )
        .await
    }
}

fn with_language_hint(prompt: &str, language: &str) -> String {
    let language = language.trim();
    if language.is_empty() || language.eq_ignore_ascii_case("en") {
        prompt.to_string()
    } else {
        format!(
            "{}\n\nWrite any human-readable text in the language with code \"{}\".",
            prompt, language
        )
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: String,
    model: String,
    decision_prompt: String,
    persona_prompt: Option<String>,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            decision_prompt: DEFAULT_DECISION_PROMPT.to_string(),
            persona_prompt: None,
            client: build_http_client(),
        }
    }

    pub fn with_decision_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        if !prompt.trim().is_empty() {
            self.decision_prompt = prompt;
        }
        self
    }

    /// Persona prepended to the JSON instruction for structured calls.
    pub fn with_persona_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        if !prompt.trim().is_empty() {
            self.persona_prompt = Some(prompt);
        }
        self
    }

    fn structured_system_prompt(&self) -> String {
        match &self.persona_prompt {
            Some(persona) => format!("{}\n\n{}", persona.trim(), JSON_SYSTEM_PROMPT),
            None => JSON_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl AiClient for LlmClient {
    async fn generate_text(
        &self,
        messages: Vec<Message>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        };

        let mut req = self.client.post(&url).json(&request);

        // Local servers usually run without a key
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send LLM request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("LLM API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))
    }

    async fn decide_yes_no(&self, prompt: &str) -> Result<String> {
        self.generate_text(
            vec![
                Message::system(self.decision_prompt.clone()),
                Message::user(prompt),
            ],
            DECISION_TEMPERATURE,
            DECISION_MAX_TOKENS,
        )
        .await
    }

    async fn generate_structured(&self, prompt: &str, language: &str) -> Result<String> {
        self.generate_text(
            vec![
                Message::system(self.structured_system_prompt()),
                Message::user(with_language_hint(prompt, language)),
            ],
            STRUCTURED_TEMPERATURE,
            STRUCTURED_MAX_TOKENS,
        )
        .await
    }
}

/// Remove a surrounding Markdown code fence (with or without a `json` tag).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Slice from the first `{` to the last `}`, tolerating prose around the object.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

/// Parse a model reply as JSON, trying the raw text, then a fenced block,
/// then the outermost braces.
pub fn parse_json_reply<T>(raw: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if let Ok(parsed) = serde_json::from_str::<T>(raw.trim()) {
        return Ok(parsed);
    }

    let unfenced = strip_code_fences(raw);
    if let Ok(parsed) = serde_json::from_str::<T>(unfenced) {
        return Ok(parsed);
    }

    let candidate = extract_json_object(unfenced).unwrap_or(unfenced);
    serde_json::from_str::<T>(candidate).with_context(|| {
        format!(
            "Failed to parse JSON reply: {}",
            raw.chars().take(500).collect::<String>()
        )
    })
}

/// Interpret a yes/no answer: only a reply starting with YES counts as yes.
pub fn is_affirmative(answer: &str) -> bool {
    answer
        .trim_start_matches(|c: char| c.is_whitespace() || c == '"' || c == '*')
        .to_uppercase()
        .starts_with("YES")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingClient {
        calls: Mutex<Vec<(Vec<Message>, f32, u32)>>,
    }

    #[async_trait]
    impl AiClient for RecordingClient {
        async fn generate_text(
            &self,
            messages: Vec<Message>,
            temperature: f32,
            max_tokens: u32,
        ) -> Result<String> {
            self.calls
                .lock()
                .expect("lock")
                .push((messages, temperature, max_tokens));
            Ok("YES".to_string())
        }
    }

    #[test]
    fn strips_fences_with_and_without_tag() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn extracts_outermost_object_from_prose() {
        let raw = "Sure! Here you go: {\"x\": {\"y\": 2}} hope that helps";
        assert_eq!(extract_json_object(raw), Some("{\"x\": {\"y\": 2}}"));
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn parse_json_reply_handles_fenced_and_wrapped_replies() {
        #[derive(Deserialize)]
        struct Reply {
            ok: bool,
        }

        let fenced: Reply = parse_json_reply("```json\n{\"ok\": true}\n```").expect("fenced");
        assert!(fenced.ok);
        let wrapped: Reply = parse_json_reply("Answer: {\"ok\": false}.").expect("wrapped");
        assert!(!wrapped.ok);
        assert!(parse_json_reply::<Reply>("not json").is_err());
    }

    #[test]
    fn affirmative_requires_leading_yes() {
        assert!(is_affirmative("YES"));
        assert!(is_affirmative("  yes, go ahead"));
        assert!(is_affirmative("**YES**"));
        assert!(!is_affirmative("NO"));
        assert!(!is_affirmative("I would say yes"));
    }

    #[tokio::test]
    async fn default_methods_route_through_generate_text() {
        let client = RecordingClient {
            calls: Mutex::new(Vec::new()),
        };

        client.decide_yes_no("comment now?").await.expect("decide");
        client
            .generate_structured("give json", "ru")
            .await
            .expect("structured");

        let calls = client.calls.lock().expect("lock");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0[0].content, DEFAULT_DECISION_PROMPT);
        assert_eq!(calls[1].0[0].content, JSON_SYSTEM_PROMPT);
        assert_eq!(calls[1].1, STRUCTURED_TEMPERATURE);
        assert_eq!(calls[1].2, STRUCTURED_MAX_TOKENS);
        assert!(calls[1].0[1].content.contains("\"ru\""));
    }

    #[test]
    fn persona_prompt_prefixes_json_instruction() {
        let client = LlmClient::new(
            "http://localhost:11434/v1/".to_string(),
            String::new(),
            "llama3.2".to_string(),
        );
        assert_eq!(client.structured_system_prompt(), JSON_SYSTEM_PROMPT);

        let client = client.with_persona_prompt("   ");
        assert_eq!(client.structured_system_prompt(), JSON_SYSTEM_PROMPT);

        let client = client.with_persona_prompt("You are a sarcastic regular.");
        let system = client.structured_system_prompt();
        assert!(system.starts_with("You are a sarcastic regular."));
        assert!(system.ends_with(JSON_SYSTEM_PROMPT));
    }
}
