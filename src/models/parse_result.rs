use crate::models::question::ParsedQuestion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    /// The completion backend call failed for the chunk.
    ChunkCompletion,
    /// No JSON could be recovered from the completion text.
    UnparseableResponse,
    /// JSON was recovered but an incomplete trailing element had to be dropped.
    TruncatedResponse,
    /// A single question had an unknown type or a malformed answer shape.
    Canonicalization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    pub kind: ParseErrorKind,
    pub message: String,
    /// Offending completion text, kept for operators and never serialized.
    #[serde(skip)]
    pub raw_text: Option<String>,
}

impl ParseError {
    pub fn new(chunk_index: usize, kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self {
            chunk_index,
            question_index: None,
            kind,
            message: message.into(),
            raw_text: None,
        }
    }

    pub fn with_question(mut self, question_index: usize) -> Self {
        self.question_index = Some(question_index);
        self
    }

    pub fn with_raw_text(mut self, raw_text: impl Into<String>) -> Self {
        self.raw_text = Some(raw_text.into());
        self
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.question_index {
            Some(q) => write!(f, "chunk {} question {}: {}", self.chunk_index, q, self.message),
            None => write!(f, "chunk {}: {}", self.chunk_index, self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub questions: Vec<ParsedQuestion>,
    pub errors: Vec<ParseError>,
    pub suggestions: Vec<String>,
}

impl ParseResult {
    pub fn success(&self) -> bool {
        !self.questions.is_empty()
    }
}

/// One record per parse call, handed to whoever keeps parse history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseLogRecord {
    pub call_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub input_excerpt: String,
    pub input_chars: usize,
    pub chunk_count: usize,
    pub question_count: usize,
    pub success: bool,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}
