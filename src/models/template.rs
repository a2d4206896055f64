use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

pub const DEFAULT_TEMPLATE_ID: &str = "default_question_parser";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

impl PromptTemplate {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            content: content.into(),
            variables: Vec::new(),
        }
    }

    /// Reads a template file; the file stem becomes the template id.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("custom");
        Ok(Self::new(id, content))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = variables.into_iter().map(Into::into).collect();
        self
    }

    /// Hex SHA-256 of the template body; a changed hash means a stale cache entry.
    pub fn content_hash(&self) -> String {
        hex::encode(Sha256::digest(self.content.as_bytes()))
    }
}

/// General-purpose parsing template used when the caller names none.
pub fn default_template() -> PromptTemplate {
    PromptTemplate::new(DEFAULT_TEMPLATE_ID, DEFAULT_TEMPLATE_CONTENT)
        .with_name("General question parser")
        .with_variables(["input_text", "output_format"])
}

const DEFAULT_TEMPLATE_CONTENT: &str = r#"You are an expert at parsing exam questions. Convert the text below into structured questions.

Rules:
1. Detect the question type:
   - single: several options, exactly one correct answer
   - multiple: several options, more than one correct answer
   - judge: the answer is true/false, 对/错, 正确/错误
   - fill: the stem contains blanks such as ____, {}, [] or （）
   - essay: an open question answered in free text
2. Fill questions: mark every blank in "stem" with {} in order, list one entry in "blanks" per blank, and put other acceptable answers in "alternatives".
3. Choice questions: keep every option with its label (A, B, C, ...) and mark the correct ones.
4. Output format:
{output_format}

Text to parse:
{input_text}

Return only the JSON array. Do not add explanations, reasoning or markdown fences."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_tracks_content_only() {
        let a = PromptTemplate::new("t1", "Parse: {input_text}");
        let b = PromptTemplate::new("t1", "Parse: {input_text}").with_name("renamed");
        let c = PromptTemplate::new("t1", "Parse this: {input_text}");
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[tokio::test]
    async fn template_file_is_named_after_its_stem() {
        let path = std::env::temp_dir().join(format!("chemistry-{}.txt", uuid::Uuid::new_v4()));
        std::fs::write(&path, "Chemistry: {input_text}").unwrap();

        let template = PromptTemplate::from_file(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(template.id.starts_with("chemistry-"));
        assert_eq!(template.content, "Chemistry: {input_text}");

        let err = PromptTemplate::from_file(&path).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Io(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn default_template_declares_builtin_placeholders() {
        let t = default_template();
        assert!(t.content.contains("{input_text}"));
        assert!(t.content.contains("{output_format}"));
        assert_eq!(t.variables, vec!["input_text", "output_format"]);
    }
}
