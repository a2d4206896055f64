use serde::{Deserialize, Serialize};

/// Placeholder that marks a blank inside a canonical fill-question stem.
pub const BLANK_PLACEHOLDER: &str = "{{BLANK}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Single,
    Multiple,
    Judge,
    Fill,
    Essay,
}

impl QuestionType {
    /// Maps the type names seen in pasted documents and model output onto the closed set.
    pub fn from_label(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "single" | "single_choice" | "singlechoice" | "radio" | "单选" | "单选题"
            | "单项选择" | "单项选择题" => QuestionType::Single,
            "multiple" | "multiple_choice" | "multi" | "multichoice" | "indefinite_choice"
            | "checkbox" | "多选" | "多选题" | "多项选择" | "多项选择题" | "不定项"
            | "不定项选择" | "不定项选择题" => QuestionType::Multiple,
            "judge" | "judgement" | "judgment" | "true_false" | "truefalse" | "boolean"
            | "判断" | "判断题" | "是非题" => QuestionType::Judge,
            "fill" | "fill_blank" | "fill_in_blank" | "fill_in_the_blank" | "blank"
            | "填空" | "填空题" => QuestionType::Fill,
            "essay" | "short_answer" | "subjective" | "问答" | "问答题" | "简答"
            | "简答题" | "论述题" => QuestionType::Essay,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Single => "single",
            QuestionType::Multiple => "multiple",
            QuestionType::Judge => "judge",
            QuestionType::Fill => "fill",
            QuestionType::Essay => "essay",
        }
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionType::Single | QuestionType::Multiple)
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub label: String,
    pub content: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blank {
    pub position: usize,
    pub answer: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EssayAnswer {
    pub reference_answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// The type-specific part of a question. The tag decides which answer shape exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionBody {
    Single { options: Vec<ChoiceOption> },
    Multiple { options: Vec<ChoiceOption> },
    Judge { judge_answer: bool },
    Fill { blanks: Vec<Blank> },
    Essay { essay_answer: EssayAnswer },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    pub stem: String,
    /// Stem as it appeared in the source, original blank markers included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stem_display: Option<String>,
    #[serde(flatten)]
    pub body: QuestionBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl ParsedQuestion {
    pub fn new(stem: impl Into<String>, body: QuestionBody) -> Self {
        Self {
            stem: stem.into(),
            stem_display: None,
            body,
            difficulty: None,
            category: None,
            tags: Vec::new(),
            explanation: None,
        }
    }

    pub fn question_type(&self) -> QuestionType {
        match self.body {
            QuestionBody::Single { .. } => QuestionType::Single,
            QuestionBody::Multiple { .. } => QuestionType::Multiple,
            QuestionBody::Judge { .. } => QuestionType::Judge,
            QuestionBody::Fill { .. } => QuestionType::Fill,
            QuestionBody::Essay { .. } => QuestionType::Essay,
        }
    }

    pub fn options(&self) -> Option<&[ChoiceOption]> {
        match &self.body {
            QuestionBody::Single { options } | QuestionBody::Multiple { options } => {
                Some(options)
            }
            _ => None,
        }
    }

    pub fn blanks(&self) -> Option<&[Blank]> {
        match &self.body {
            QuestionBody::Fill { blanks } => Some(blanks),
            _ => None,
        }
    }

    pub fn judge_answer(&self) -> Option<bool> {
        match self.body {
            QuestionBody::Judge { judge_answer } => Some(judge_answer),
            _ => None,
        }
    }

    pub fn essay_answer(&self) -> Option<&EssayAnswer> {
        match &self.body {
            QuestionBody::Essay { essay_answer } => Some(essay_answer),
            _ => None,
        }
    }

    /// Number of blank placeholders in the canonical stem.
    pub fn placeholder_count(&self) -> usize {
        self.stem.matches(BLANK_PLACEHOLDER).count()
    }
}
