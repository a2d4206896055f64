use crate::config::Config;
use crate::dto::parse_dto::ParseRequest;
use crate::error::{Error, Result};
use crate::models::parse_result::{ParseError, ParseErrorKind, ParseLogRecord, ParseResult};
use crate::models::question::{ParsedQuestion, QuestionBody};
use crate::models::template::{default_template, PromptTemplate, DEFAULT_TEMPLATE_ID};
use crate::services::canonicalizer::canonicalize;
use crate::services::chunker::{chunk_with, DEFAULT_MAX_CHUNK_SIZE};
use crate::services::completion_service::CompletionGateway;
use crate::services::prompt_service::{build_chunk_prompt, build_prompt};
use crate::services::response_normalizer::extract_questions;
use crate::services::template_cache::{TemplateCache, TemplateStore};
use crate::utils::text::{char_len, preview, truncate_chars};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
pub const DEFAULT_TEMPLATE_CACHE_CAPACITY: usize = 32;
const HISTORY_EXCERPT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    pub max_chunk_size: usize,
    pub chunking_enabled: bool,
    pub max_concurrency: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            chunking_enabled: true,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl ParseOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size,
            chunking_enabled: config.chunking_enabled,
            max_concurrency: config.max_concurrency,
        }
    }
}

/// Receives one record per finished parse call.
#[async_trait]
pub trait ParseHistorySink: Send + Sync {
    async fn record(&self, record: ParseLogRecord);
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    questions: Vec<ParsedQuestion>,
    errors: Vec<ParseError>,
}

impl ChunkOutcome {
    fn failed(error: ParseError) -> Self {
        Self {
            questions: Vec::new(),
            errors: vec![error],
        }
    }
}

#[derive(Clone)]
pub struct ParseService {
    gateway: Arc<dyn CompletionGateway>,
    options: ParseOptions,
    template_store: Option<Arc<dyn TemplateStore>>,
    template_cache: Arc<TemplateCache>,
    history: Option<Arc<dyn ParseHistorySink>>,
}

impl ParseService {
    pub fn new(gateway: Arc<dyn CompletionGateway>, options: ParseOptions) -> Self {
        Self {
            gateway,
            options,
            template_store: None,
            template_cache: Arc::new(TemplateCache::new(DEFAULT_TEMPLATE_CACHE_CAPACITY)),
            history: None,
        }
    }

    pub fn with_template_store(mut self, store: Arc<dyn TemplateStore>) -> Self {
        self.template_store = Some(store);
        self
    }

    pub fn with_template_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.template_cache = cache;
        self
    }

    pub fn with_history(mut self, sink: Arc<dyn ParseHistorySink>) -> Self {
        self.history = Some(sink);
        self
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        &self.template_cache
    }

    /// Parses `raw_text` with the service's default options.
    pub async fn parse(
        &self,
        raw_text: &str,
        template: &PromptTemplate,
        variables: &HashMap<String, String>,
    ) -> Result<ParseResult> {
        self.parse_with(raw_text, template, variables, self.options).await
    }

    /// Validates a request, resolves its template and parses it.
    pub async fn parse_request(&self, request: ParseRequest) -> Result<ParseResult> {
        request.validate()?;

        let template = self.resolve_template(request.template_id.as_deref()).await?;
        let options = ParseOptions {
            max_chunk_size: request.max_chunk_size.unwrap_or(self.options.max_chunk_size),
            chunking_enabled: request.chunking.unwrap_or(self.options.chunking_enabled),
            max_concurrency: request
                .max_concurrency
                .unwrap_or(self.options.max_concurrency),
        };

        self.parse_with(&request.raw_text, &template, &request.variables, options)
            .await
    }

    /// Looks a template up through the cache. No id, or the default id with no
    /// stored override, yields the built-in template.
    pub async fn resolve_template(&self, template_id: Option<&str>) -> Result<PromptTemplate> {
        let id = match template_id {
            Some(id) => id,
            None => return Ok(default_template()),
        };

        if let Some(store) = &self.template_store {
            if let Some(template) = self.template_cache.get_or_load(id, store.as_ref()).await? {
                return Ok(template);
            }
        }

        if id == DEFAULT_TEMPLATE_ID {
            Ok(default_template())
        } else {
            Err(Error::TemplateNotFound(id.to_string()))
        }
    }

    pub async fn parse_with(
        &self,
        raw_text: &str,
        template: &PromptTemplate,
        variables: &HashMap<String, String>,
        options: ParseOptions,
    ) -> Result<ParseResult> {
        if raw_text.trim().is_empty() {
            return Err(Error::BadRequest("Text to parse cannot be empty".to_string()));
        }

        let call_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = Instant::now();

        let chunks = chunk_with(raw_text, options.max_chunk_size, options.chunking_enabled);
        if chunks.is_empty() {
            return Err(Error::BadRequest("Input produced no chunks".to_string()));
        }
        let chunk_count = chunks.len();
        let chunked = chunk_count > 1;

        let permits = options.max_concurrency.max(1).min(chunk_count);
        let semaphore = Arc::new(Semaphore::new(permits));
        tracing::debug!(%call_id, chunk_count, permits, "Dispatching chunks");

        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let prompt = if chunked {
                    build_chunk_prompt(&template.content, &chunk.text, variables)
                } else {
                    build_prompt(&template.content, &chunk.text, variables)
                };
                let gateway = Arc::clone(&self.gateway);
                let semaphore = Arc::clone(&semaphore);
                let index = chunk.index;
                let handle = tokio::spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            return ChunkOutcome::failed(ParseError::new(
                                index,
                                ParseErrorKind::ChunkCompletion,
                                format!("Concurrency limiter closed: {}", e),
                            ))
                        }
                    };
                    process_chunk(index, &prompt, gateway.as_ref()).await
                });
                (index, handle)
            })
            .collect();

        let mut settled = join_all(handles.into_iter().map(|(index, handle)| async move {
            let outcome = handle.await.unwrap_or_else(|e| {
                ChunkOutcome::failed(ParseError::new(
                    index,
                    ParseErrorKind::ChunkCompletion,
                    format!("Chunk task failed: {}", e),
                ))
            });
            (index, outcome)
        }))
        .await;
        settled.sort_by_key(|(index, _)| *index);

        let mut result = ParseResult::default();
        for (_, outcome) in settled {
            result.questions.extend(outcome.questions);
            result.errors.extend(outcome.errors);
        }
        result.suggestions = suggestions(&result.questions);

        let duration_ms = timer.elapsed().as_millis() as u64;
        let record = ParseLogRecord {
            call_id,
            started_at,
            input_excerpt: truncate_chars(raw_text, HISTORY_EXCERPT_CHARS),
            input_chars: char_len(raw_text),
            chunk_count,
            question_count: result.questions.len(),
            success: result.success(),
            errors: result.errors.iter().map(ToString::to_string).collect(),
            duration_ms,
        };

        tracing::info!(
            call_id = %record.call_id,
            input_chars = record.input_chars,
            chunk_count = record.chunk_count,
            question_count = record.question_count,
            error_count = record.errors.len(),
            errors = ?record.errors,
            success = record.success,
            duration_ms = record.duration_ms,
            "Parse finished"
        );

        if let Some(history) = &self.history {
            history.record(record).await;
        }

        Ok(result)
    }
}

async fn process_chunk(index: usize, prompt: &str, gateway: &dyn CompletionGateway) -> ChunkOutcome {
    match gateway.send(prompt).await {
        Ok(completion) => interpret_completion(index, &completion),
        Err(e) => {
            tracing::warn!("Completion for chunk {} failed: {}", index, e);
            ChunkOutcome::failed(ParseError::new(
                index,
                ParseErrorKind::ChunkCompletion,
                e.to_string(),
            ))
        }
    }
}

fn interpret_completion(index: usize, completion: &str) -> ChunkOutcome {
    let extraction = match extract_questions(completion) {
        Ok(extraction) => extraction,
        Err(e) => {
            tracing::warn!("Chunk {} returned no usable JSON: {}", index, e);
            return ChunkOutcome::failed(
                ParseError::new(index, ParseErrorKind::UnparseableResponse, e.to_string())
                    .with_raw_text(completion),
            );
        }
    };

    let mut outcome = ChunkOutcome::default();
    for (question_index, raw) in extraction.questions.iter().enumerate() {
        match canonicalize(raw) {
            Ok(question) => outcome.questions.push(question),
            Err(e) => outcome.errors.push(
                ParseError::new(index, ParseErrorKind::Canonicalization, e.to_string())
                    .with_question(question_index)
                    .with_raw_text(raw.to_string()),
            ),
        }
    }

    if let Some(dropped) = extraction.dropped {
        outcome.errors.push(
            ParseError::new(
                index,
                ParseErrorKind::TruncatedResponse,
                format!("Dropped incomplete trailing element: {}", preview(&dropped, 80)),
            )
            .with_raw_text(dropped),
        );
    }

    outcome
}

/// Advisory notes on the merged questions, numbered from 1 in final order.
pub fn suggestions(questions: &[ParsedQuestion]) -> Vec<String> {
    let mut notes = Vec::new();
    for (i, question) in questions.iter().enumerate() {
        let n = i + 1;
        if question.stem.trim().is_empty() {
            notes.push(format!("Question {}: missing stem", n));
        }
        match &question.body {
            QuestionBody::Single { options } | QuestionBody::Multiple { options }
                if options.is_empty() =>
            {
                notes.push(format!("Question {}: choice question missing options", n));
            }
            QuestionBody::Single { options } if !options.iter().any(|o| o.is_correct) => {
                notes.push(format!("Question {}: single-choice question has no correct option", n));
            }
            QuestionBody::Fill { blanks } if blanks.is_empty() => {
                notes.push(format!("Question {}: fill question missing blanks", n));
            }
            QuestionBody::Fill { blanks } if blanks.len() != question.placeholder_count() => {
                notes.push(format!(
                    "Question {}: fill question has {} answers for {} blanks",
                    n,
                    blanks.len(),
                    question.placeholder_count()
                ));
            }
            _ => {}
        }
    }
    notes
}
