use crate::models::question::{
    Blank, ChoiceOption, EssayAnswer, ParsedQuestion, QuestionBody, QuestionType,
    BLANK_PLACEHOLDER,
};
use crate::utils::text::{char_len, non_empty_trimmed};
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Judge answers that count as "true". Everything else is false.
pub const JUDGE_TRUE_TOKENS: [&str; 8] = ["true", "t", "yes", "y", "正确", "对", "是", "√"];

const MAX_KEYWORDS: usize = 5;

static RE_BLANK_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{BLANK\}\}|\{\}|_{2,}|＿{2,}|\(\s*\)|（\s*）|\[\s*\]|【\s*】")
        .expect("static regex")
});
static RE_FILL_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[；;]").expect("static regex"));
static RE_ANSWER_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,，、;；/|\s]+").expect("static regex"));
static RE_TAG_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,，、;；]").expect("static regex"));
static RE_KEYWORD_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[；;、,，/]").expect("static regex"));
static RE_PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[（(][^)）]*[)）]").expect("static regex"));
static RE_LABELED_OPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[(（]?([A-Za-z])\s*[.、)）．:：]\s*(.*)$").expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonicalizationError {
    #[error("question is not a JSON object")]
    NotAnObject,
    #[error("unknown question type: {0}")]
    UnknownType(String),
    #[error("duplicate option label: {0}")]
    DuplicateLabel(String),
    #[error("single-choice question has options but no correct option")]
    NoCorrectOption,
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// Turns one loosely-shaped question object into a [`ParsedQuestion`].
pub fn canonicalize(value: &JsonValue) -> Result<ParsedQuestion, CanonicalizationError> {
    let obj = value.as_object().ok_or(CanonicalizationError::NotAnObject)?;

    let question_type = resolve_type(obj)?;
    let raw_stem = first_text(obj, &["stem", "question", "title"]).unwrap_or_default();

    let mut stem_display = first_text(obj, &["stem_display"]);
    let (stem, body) = match question_type {
        QuestionType::Single | QuestionType::Multiple => {
            (raw_stem, choice_body(obj, question_type)?)
        }
        QuestionType::Judge => (
            raw_stem,
            QuestionBody::Judge {
                judge_answer: judge_answer(obj),
            },
        ),
        QuestionType::Fill => {
            let stem = normalize_blank_markers(&raw_stem);
            if stem_display.is_none() && stem != raw_stem {
                stem_display = Some(raw_stem);
            }
            (
                stem,
                QuestionBody::Fill {
                    blanks: fill_blanks(obj)?,
                },
            )
        }
        QuestionType::Essay => (
            raw_stem,
            QuestionBody::Essay {
                essay_answer: essay_answer(obj),
            },
        ),
    };

    let mut question = ParsedQuestion::new(stem, body);
    question.stem_display = stem_display;
    question.difficulty = obj.get("difficulty").and_then(scalar_text);
    question.category = first_text(obj, &["category"]);
    question.tags = tags(obj.get("tags"));
    question.explanation = first_text(obj, &["explanation", "analysis"]);
    Ok(question)
}

fn resolve_type(obj: &Map<String, JsonValue>) -> Result<QuestionType, CanonicalizationError> {
    match obj.get("type") {
        None | Some(JsonValue::Null) => Ok(QuestionType::Single),
        Some(JsonValue::String(s)) if s.trim().is_empty() => Ok(QuestionType::Single),
        Some(JsonValue::String(s)) => QuestionType::from_label(s)
            .ok_or_else(|| CanonicalizationError::UnknownType(s.trim().to_string())),
        Some(other) => Err(CanonicalizationError::UnknownType(other.to_string())),
    }
}

/// Rewrites the blank markers a fill stem may use into [`BLANK_PLACEHOLDER`].
pub fn normalize_blank_markers(stem: &str) -> String {
    RE_BLANK_MARKER
        .replace_all(stem, BLANK_PLACEHOLDER)
        .into_owned()
}

fn choice_body(
    obj: &Map<String, JsonValue>,
    declared: QuestionType,
) -> Result<QuestionBody, CanonicalizationError> {
    let mut options = choice_options(obj.get("options"))?;

    let mut seen = HashSet::new();
    for option in &options {
        if !seen.insert(option.label.as_str()) {
            return Err(CanonicalizationError::DuplicateLabel(option.label.clone()));
        }
    }

    if !options.iter().any(|o| o.is_correct) {
        if let Some(answer) = first_present(obj, &["correct_answer", "answer"]) {
            mark_correct_from_answer(&mut options, answer);
        }
    }

    let correct = options.iter().filter(|o| o.is_correct).count();
    let body = match declared {
        QuestionType::Single if correct > 1 => QuestionBody::Multiple { options },
        QuestionType::Single if !options.is_empty() && correct == 0 => {
            return Err(CanonicalizationError::NoCorrectOption)
        }
        QuestionType::Single => QuestionBody::Single { options },
        _ => QuestionBody::Multiple { options },
    };
    Ok(body)
}

fn choice_options(value: Option<&JsonValue>) -> Result<Vec<ChoiceOption>, CanonicalizationError> {
    let mut options = match value {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(option_from_value)
            .collect::<Result<Vec<_>, _>>()?,
        // {"A": "Paris", "B": "Rome"}
        Some(JsonValue::Object(map)) => map
            .iter()
            .map(|(label, content)| ChoiceOption {
                label: normalize_label(label),
                content: scalar_text(content).unwrap_or_default(),
                is_correct: false,
            })
            .collect(),
        Some(other) => {
            return Err(CanonicalizationError::Malformed {
                field: "options",
                reason: format!("expected an array, got {}", json_kind(other)),
            })
        }
    };

    for (i, option) in options.iter_mut().enumerate() {
        if option.label.is_empty() {
            option.label = label_for_index(i);
        }
    }
    Ok(options)
}

fn option_from_value(value: &JsonValue) -> Result<ChoiceOption, CanonicalizationError> {
    match value {
        JsonValue::String(s) => Ok(match RE_LABELED_OPTION.captures(s) {
            Some(caps) => ChoiceOption {
                label: normalize_label(&caps[1]),
                content: caps[2].trim().to_string(),
                is_correct: false,
            },
            None => ChoiceOption {
                label: String::new(),
                content: s.trim().to_string(),
                is_correct: false,
            },
        }),
        JsonValue::Object(map) => Ok(ChoiceOption {
            label: first_text(map, &["label", "key"])
                .map(|l| normalize_label(&l))
                .unwrap_or_default(),
            content: first_text(map, &["content", "text", "value"]).unwrap_or_default(),
            is_correct: first_present(map, &["is_correct", "correct", "isCorrect"])
                .is_some_and(option_flag),
        }),
        other => Err(CanonicalizationError::Malformed {
            field: "options",
            reason: format!("option must be a string or object, got {}", json_kind(other)),
        }),
    }
}

pub fn normalize_label(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(['(', '（'])
        .trim_end_matches(['.', '、', ')', '）', '．', ':', '：'])
        .trim()
        .to_uppercase()
}

fn label_for_index(i: usize) -> String {
    if i < 26 {
        char::from(b'A' + i as u8).to_string()
    } else {
        (i + 1).to_string()
    }
}

/// Marks options named by an aggregate answer such as `"AC"`, `"A,C"`, `["A", "C"]`
/// or by an option's content.
fn mark_correct_from_answer(options: &mut [ChoiceOption], answer: &JsonValue) {
    let tokens: Vec<String> = match answer {
        JsonValue::Array(items) => items.iter().filter_map(scalar_text).collect(),
        other => match scalar_text(other) {
            Some(text) => answer_tokens(&text, options),
            None => return,
        },
    };

    for token in tokens {
        let label = normalize_label(&token);
        for option in options.iter_mut() {
            if option.label == label || option.content == token {
                option.is_correct = true;
            }
        }
    }
}

fn answer_tokens(text: &str, options: &[ChoiceOption]) -> Vec<String> {
    let text = text.trim();
    if options.iter().any(|o| o.content == text) {
        return vec![text.to_string()];
    }
    if RE_ANSWER_SEPARATOR.is_match(text) {
        return RE_ANSWER_SEPARATOR
            .split(text)
            .filter_map(non_empty_trimmed)
            .collect();
    }

    // "AC" names two options only when every letter is a known label.
    let labels: HashSet<char> = options
        .iter()
        .filter_map(|o| {
            let mut chars = o.label.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            }
        })
        .collect();
    if char_len(text) > 1 && text.chars().all(|c| labels.contains(&c.to_ascii_uppercase())) {
        return text.chars().map(|c| c.to_string()).collect();
    }
    vec![text.to_string()]
}

/// Option correctness also accepts a nonzero number, unlike judge answers.
fn option_flag(value: &JsonValue) -> bool {
    match value {
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        other => is_truthy(other),
    }
}

fn judge_answer(obj: &Map<String, JsonValue>) -> bool {
    first_present(obj, &["judge_answer", "correct_answer", "answer"]).is_some_and(is_truthy)
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::String(s) => {
            let token = s.trim().to_lowercase();
            JUDGE_TRUE_TOKENS.contains(&token.as_str())
        }
        JsonValue::Object(map) => map.get("answer").is_some_and(is_truthy),
        _ => false,
    }
}

fn fill_blanks(obj: &Map<String, JsonValue>) -> Result<Vec<Blank>, CanonicalizationError> {
    match first_present(obj, &["blanks", "correct_answer", "answer"]) {
        Some(value) => blanks_from_value(value),
        None => Ok(Vec::new()),
    }
}

fn blanks_from_value(value: &JsonValue) -> Result<Vec<Blank>, CanonicalizationError> {
    match value {
        JsonValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| blank_from_value(i, item))
            .collect(),
        JsonValue::Object(map) if map.contains_key("blanks") => blanks_from_value(&map["blanks"]),
        JsonValue::String(s) => Ok(RE_FILL_SEPARATOR
            .split(s)
            .filter_map(non_empty_trimmed)
            .enumerate()
            .map(|(position, answer)| Blank {
                position,
                answer,
                alternatives: Vec::new(),
            })
            .collect()),
        JsonValue::Number(_) => Ok(vec![blank_from_value(0, value)?]),
        other => Err(CanonicalizationError::Malformed {
            field: "blanks",
            reason: format!("expected an array or string, got {}", json_kind(other)),
        }),
    }
}

fn blank_from_value(index: usize, value: &JsonValue) -> Result<Blank, CanonicalizationError> {
    match value {
        JsonValue::Object(map) => Ok(Blank {
            position: map
                .get("position")
                .and_then(JsonValue::as_u64)
                .map(|p| p as usize)
                .unwrap_or(index),
            answer: first_text(map, &["answer", "content", "value"]).unwrap_or_default(),
            alternatives: string_list(map.get("alternatives")),
        }),
        other => match scalar_text(other) {
            Some(answer) => Ok(Blank {
                position: index,
                answer,
                alternatives: Vec::new(),
            }),
            None => Err(CanonicalizationError::Malformed {
                field: "blanks",
                reason: format!("blank {index} is {}", json_kind(other)),
            }),
        },
    }
}

fn essay_answer(obj: &Map<String, JsonValue>) -> EssayAnswer {
    let value = first_present(
        obj,
        &["essay_answer", "reference_answer", "correct_answer", "answer"],
    );
    match value {
        Some(JsonValue::Object(map)) => {
            let reference_answer =
                first_text(map, &["reference_answer", "answer", "content"]).unwrap_or_default();
            let mut keywords = string_list(map.get("keywords"));
            if keywords.is_empty() {
                keywords = extract_keywords(&reference_answer);
            }
            EssayAnswer {
                reference_answer,
                keywords,
            }
        }
        Some(other) => {
            let reference_answer = scalar_text(other).unwrap_or_default();
            EssayAnswer {
                keywords: extract_keywords(&reference_answer),
                reference_answer,
            }
        }
        None => EssayAnswer {
            reference_answer: String::new(),
            keywords: Vec::new(),
        },
    }
}

/// Picks up to five short phrases from a reference answer to use as grading keywords.
pub fn extract_keywords(reference_answer: &str) -> Vec<String> {
    let without_notes = RE_PARENTHETICAL.replace_all(reference_answer, "");
    RE_KEYWORD_SEPARATOR
        .split(&without_notes)
        .filter_map(non_empty_trimmed)
        .filter(|part| (2..50).contains(&char_len(part)))
        .take(MAX_KEYWORDS)
        .collect()
}

fn tags(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::String(s)) => RE_TAG_SEPARATOR
            .split(s)
            .filter_map(non_empty_trimmed)
            .collect(),
        other => string_list(other),
    }
}

fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(scalar_text)
            .collect(),
        Some(JsonValue::String(s)) => non_empty_trimmed(s).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn first_present<'a>(map: &'a Map<String, JsonValue>, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

fn first_text(map: &Map<String, JsonValue>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find_map(scalar_text)
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => non_empty_trimmed(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
