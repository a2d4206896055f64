use crate::config::{Config, LlmProvider};
use crate::error::{Error, Result};
use crate::utils::text::preview;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a question parser expert.";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Sends one prompt to a language model and returns the raw response body.
///
/// Implementations must be safe to call from several tasks at once. Extracting the
/// message text from the body is left to the response normalizer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn send(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl GatewaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
            timeout: Duration::from_secs(config.llm_timeout_secs),
        }
    }
}

/// Picks the gateway implementation for the configured provider.
pub fn gateway_from_config(config: &Config, client: Client) -> Arc<dyn CompletionGateway> {
    let settings = GatewaySettings::from_config(config);
    match config.llm_provider {
        LlmProvider::OpenAi => Arc::new(OpenAiCompatibleGateway::new(settings, client)),
        LlmProvider::Anthropic => Arc::new(AnthropicGateway::new(settings, client)),
    }
}

/// Any `/chat/completions` endpoint: OpenAI, Zhipu and most self-hosted servers.
#[derive(Clone)]
pub struct OpenAiCompatibleGateway {
    client: Client,
    settings: GatewaySettings,
}

impl OpenAiCompatibleGateway {
    pub fn new(settings: GatewaySettings, client: Client) -> Self {
        Self { client, settings }
    }

    pub fn endpoint(&self) -> String {
        endpoint_url(&self.settings.base_url, "chat/completions")
    }
}

#[async_trait]
impl CompletionGateway for OpenAiCompatibleGateway {
    async fn send(&self, prompt: &str) -> Result<String> {
        let payload = json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&payload)
            .timeout(self.settings.timeout)
            .send()
            .await?;

        read_body(res, "chat completion").await
    }
}

#[derive(Clone)]
pub struct AnthropicGateway {
    client: Client,
    settings: GatewaySettings,
}

impl AnthropicGateway {
    pub fn new(settings: GatewaySettings, client: Client) -> Self {
        Self { client, settings }
    }

    pub fn endpoint(&self) -> String {
        endpoint_url(&self.settings.base_url, "messages")
    }
}

#[async_trait]
impl CompletionGateway for AnthropicGateway {
    async fn send(&self, prompt: &str) -> Result<String> {
        let payload = json!({
            "model": self.settings.model,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let res = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .timeout(self.settings.timeout)
            .send()
            .await?;

        read_body(res, "messages").await
    }
}

async fn read_body(res: reqwest::Response, call: &str) -> Result<String> {
    let status = res.status();
    if !status.is_success() {
        let text = res.text().await.unwrap_or_default();
        tracing::error!("{} request failed with {}: {}", call, status, preview(&text, 500));
        return Err(Error::Completion(format!(
            "{} returned {}: {}",
            call,
            status,
            preview(&text, 200)
        )));
    }
    Ok(res.text().await?)
}

/// `base` with `path` appended, unless `base` already ends with it.
fn endpoint_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(path) {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> GatewaySettings {
        GatewaySettings {
            base_url: base_url.to_string(),
            api_key: "key".to_string(),
            model: "model".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn endpoints_are_derived_from_the_base_url() {
        let client = Client::new();
        let openai = OpenAiCompatibleGateway::new(settings("https://api.openai.com/v1/"), client.clone());
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        let zhipu = OpenAiCompatibleGateway::new(
            settings("https://open.bigmodel.cn/api/paas/v4/chat/completions"),
            client.clone(),
        );
        assert_eq!(zhipu.endpoint(), "https://open.bigmodel.cn/api/paas/v4/chat/completions");

        let anthropic = AnthropicGateway::new(settings("https://api.anthropic.com/v1"), client);
        assert_eq!(anthropic.endpoint(), "https://api.anthropic.com/v1/messages");
    }

    #[tokio::test]
    async fn mocked_gateway_can_stand_in_for_a_backend() {
        let mut gateway = MockCompletionGateway::new();
        gateway
            .expect_send()
            .withf(|prompt| prompt.contains("1. 2+2"))
            .times(1)
            .returning(|_| Ok("[]".to_string()));
        assert_eq!(gateway.send("1. 2+2=?").await.unwrap(), "[]");
    }
}
