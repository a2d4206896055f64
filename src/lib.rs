pub mod config;
pub mod dto;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::dto::parse_dto::ParseRequest;
pub use crate::error::{Error, Result};
pub use crate::models::parse_result::{ParseError, ParseErrorKind, ParseLogRecord, ParseResult};
pub use crate::models::question::{
    Blank, ChoiceOption, EssayAnswer, ParsedQuestion, QuestionBody, QuestionType,
};
pub use crate::models::template::{default_template, PromptTemplate};
pub use crate::services::completion_service::CompletionGateway;
pub use crate::services::parse_service::{ParseHistorySink, ParseOptions, ParseService};
pub use crate::services::template_cache::{InMemoryTemplateStore, TemplateCache, TemplateStore};
