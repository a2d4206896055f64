use qbank_parser::config::{get_config, init_config, LogFormat};
use qbank_parser::services::completion_service::gateway_from_config;
use qbank_parser::{
    InMemoryTemplateStore, ParseOptions, ParseRequest, ParseService, PromptTemplate,
    TemplateCache,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const USAGE: &str = "usage: qbank-parser <input.txt> [template.txt] [name=value ...]";

fn init_tracing(format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,qbank_parser=debug"));

    // Logs go to stderr so stdout carries only the JSON result.
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config()?;
    init_tracing(config.log_format);

    let mut input_path = None;
    let mut template_path = None;
    let mut request = ParseRequest::default();
    for arg in std::env::args().skip(1) {
        if let Some((name, value)) = arg.split_once('=') {
            request.variables.insert(name.to_string(), value.to_string());
        } else if input_path.is_none() {
            input_path = Some(arg);
        } else {
            template_path = Some(arg);
        }
    }
    let input_path = input_path.ok_or_else(|| anyhow::anyhow!(USAGE))?;
    request.raw_text = tokio::fs::read_to_string(&input_path).await?;

    let store = Arc::new(InMemoryTemplateStore::new());
    if let Some(path) = template_path {
        let template = PromptTemplate::from_file(&path).await?;
        request.template_id = Some(template.id.clone());
        store.insert(template);
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(config.llm_timeout_secs))
        .build()?;
    let service = ParseService::new(
        gateway_from_config(config, client),
        ParseOptions::from_config(config),
    )
    .with_template_store(store)
    .with_template_cache(Arc::new(TemplateCache::new(config.template_cache_capacity)));

    tracing::info!(
        "Parsing {} with {} ({:?})",
        input_path,
        config.llm_model,
        config.llm_provider
    );
    let result = service.parse_request(request).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success() {
        std::process::exit(1);
    }
    Ok(())
}
