use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" | "zhipu" | "zhipu-ai" => Ok(LlmProvider::OpenAi),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_provider: LlmProvider,
    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub max_chunk_size: usize,
    pub max_concurrency: usize,
    pub chunking_enabled: bool,
    pub template_cache_capacity: usize,
    pub log_format: LogFormat,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let llm_provider: LlmProvider = get_env_parse_or("LLM_PROVIDER", LlmProvider::OpenAi)?;
        let default_base_url = match llm_provider {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1",
        };

        let log_format = match env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") | None => LogFormat::Pretty,
            Some(other) => {
                return Err(Error::Config(format!(
                    "Invalid value for LOG_FORMAT: {}",
                    other
                )))
            }
        };

        Ok(Self {
            llm_provider,
            llm_base_url: env::var("LLM_BASE_URL").unwrap_or_else(|_| default_base_url.to_string()),
            llm_api_key: get_env("LLM_API_KEY")?,
            llm_model: get_env("LLM_MODEL")?,
            llm_timeout_secs: get_env_parse_or("LLM_TIMEOUT_SECS", 120)?,
            llm_temperature: get_env_parse_or("LLM_TEMPERATURE", 0.3)?,
            llm_max_tokens: get_env_parse_or("LLM_MAX_TOKENS", 2000)?,
            max_chunk_size: get_env_parse_or("PARSE_MAX_CHUNK_SIZE", 2000)?,
            max_concurrency: get_env_parse_or("PARSE_MAX_CONCURRENCY", 3)?,
            chunking_enabled: get_env_parse_or("PARSE_CHUNKING", true)?,
            template_cache_capacity: get_env_parse_or("TEMPLATE_CACHE_CAPACITY", 32)?,
            log_format,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> Result<&'static Config> {
    CONFIG
        .get()
        .ok_or_else(|| Error::Config("Configuration has not been initialized".to_string()))
}
