use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ParseRequest {
    #[validate(length(min = 1, message = "Text to parse cannot be empty"))]
    pub raw_text: String,
    #[validate(length(min = 1, message = "Template id cannot be empty"))]
    pub template_id: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[validate(range(min = 1, message = "Chunk size must be at least 1 character"))]
    pub max_chunk_size: Option<usize>,
    #[validate(range(min = 1, max = 16, message = "Concurrency must be between 1 and 16"))]
    pub max_concurrency: Option<usize>,
    pub chunking: Option<bool>,
}

impl ParseRequest {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            ..Default::default()
        }
    }
}
