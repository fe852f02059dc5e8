//! Answer and digest generation through a chat-completion model.
//!
//! The pipelines only see the [`Generator`] trait. The OpenAI
//! implementation posts to `{url}/v1/chat/completions` with a system
//! message and a single user message.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::config::GenerationConfig;

pub const DIGEST_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise daily summaries. \
Summarize the key points and topics discussed in the provided messages. \
Focus on actionable insights and important information. \
Keep the summary under 300 words.";

const ANSWER_MAX_TOKENS: u32 = 1000;
const DIGEST_MAX_TOKENS: u32 = 500;
const DIGEST_TEMPERATURE: f32 = 0.3;

/// One chat-completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &Completion) -> Result<String>;
}

/// User message for answering `question` from assembled `context`.
pub fn answer_prompt(context: &str, question: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}", context, question)
}

/// User message asking for a digest of one day's messages.
pub fn digest_prompt(date: NaiveDate, messages: &[String]) -> String {
    let lines: Vec<String> = messages.iter().map(|m| format!("- {}", m)).collect();
    format!(
        "Create a daily digest for {} based on these messages:\n\n{}",
        date.format("%Y-%m-%d"),
        lines.join("\n")
    )
}

/// `generate(system_prompt, context, question) -> answer_text`.
pub async fn generate_answer(
    generator: &dyn Generator,
    system_prompt: &str,
    context: &str,
    question: &str,
    temperature: f32,
) -> Result<String> {
    let request = Completion {
        system: system_prompt.to_string(),
        user: answer_prompt(context, question),
        temperature,
        max_tokens: ANSWER_MAX_TOKENS,
    };
    let text = generator.complete(&request).await?;
    Ok(text.trim().to_string())
}

pub async fn summarize_day(
    generator: &dyn Generator,
    date: NaiveDate,
    messages: &[String],
) -> Result<String> {
    let request = Completion {
        system: DIGEST_SYSTEM_PROMPT.to_string(),
        user: digest_prompt(date, messages),
        temperature: DIGEST_TEMPERATURE,
        max_tokens: DIGEST_MAX_TOKENS,
    };
    let text = generator.complete(&request).await?;
    Ok(text.trim().to_string())
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &Completion) -> Result<String> {
        bail!("Generation provider is disabled. Set [generation] provider in config.")
    }
}

pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            model,
        })
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid chat response: missing choices[0].message.content"))
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &Completion) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
