use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static RE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .expect("static regex")
});

/// Appended to prompts for inputs that were split into several chunks.
pub const CHUNK_INSTRUCTIONS: &str = r#"

Additional instructions:
1. The text above is one fragment of a larger document; questions may be cut off at its start or end.
2. Silently skip any question at the beginning or end of the fragment that looks incomplete (no stem, or a stem without its options or answer).
3. Return strictly a JSON array. No prose, no explanations, no markdown code fences."#;

/// Schema description substituted for `{output_format}`.
pub const DEFAULT_OUTPUT_FORMAT: &str = r#"Return a JSON array. Each question is an object:
{
    "type": "single | multiple | judge | fill | essay",
    "stem": "question text; for fill questions mark each blank with {}",
    "stem_display": "question text with the original blank markers",
    "options": [{"label": "A", "content": "option text", "is_correct": true}],
    "blanks": [{"position": 0, "answer": "answer", "alternatives": ["other accepted answer"]}],
    "correct_answer": "judge: true/false; essay: reference answer",
    "difficulty": "easy | medium | hard",
    "category": "category",
    "tags": ["tag"],
    "explanation": "explanation"
}
Use "options" only for single/multiple questions and "blanks" only for fill questions."#;

/// Fills a template's placeholders in one pass.
///
/// `{input_text}` always receives `raw_text`. `{output_format}` receives the caller's
/// `output_format` variable when present, otherwise [`DEFAULT_OUTPUT_FORMAT`]. Any other
/// `{name}` or `{{name}}` placeholder takes the matching caller variable; placeholders
/// with no value are left as written, and variables with no placeholder are ignored.
pub fn build_prompt(template: &str, raw_text: &str, variables: &HashMap<String, String>) -> String {
    RE_PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match name {
                "input_text" => raw_text.to_string(),
                "output_format" => variables
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.to_string()),
                _ => variables
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string()),
            }
        })
        .into_owned()
}

/// Prompt for one chunk of a document that was split into several.
pub fn build_chunk_prompt(
    template: &str,
    chunk_text: &str,
    variables: &HashMap<String, String>,
) -> String {
    let mut prompt = build_prompt(template, chunk_text, variables);
    prompt.push_str(CHUNK_INSTRUCTIONS);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_builtins_and_caller_variables() {
        let prompt = build_prompt(
            "Subject: {subject}\n{output_format}\n---\n{input_text}",
            "1. 2+2=?",
            &vars(&[("subject", "math"), ("unused", "x")]),
        );
        assert!(prompt.starts_with("Subject: math\n"));
        assert!(prompt.contains(DEFAULT_OUTPUT_FORMAT));
        assert!(prompt.ends_with("---\n1. 2+2=?"));
    }

    #[test]
    fn unmatched_placeholders_stay_verbatim() {
        let prompt = build_prompt("{input_text} {grade} {{level}}", "q", &HashMap::new());
        assert_eq!(prompt, "q {grade} {{level}}");
    }

    #[test]
    fn double_brace_placeholders_are_filled() {
        let prompt = build_prompt("{{ input_text }} / {{lang}}", "q", &vars(&[("lang", "zh")]));
        assert_eq!(prompt, "q / zh");
    }

    #[test]
    fn inserted_text_is_not_rescanned() {
        let prompt = build_prompt(
            "{input_text}",
            "Fill in: {subject} is {}",
            &vars(&[("subject", "SHOULD NOT APPEAR")]),
        );
        assert_eq!(prompt, "Fill in: {subject} is {}");
    }

    #[test]
    fn caller_may_replace_output_format_but_not_input_text() {
        let prompt = build_prompt(
            "{output_format}|{input_text}",
            "real",
            &vars(&[("output_format", "custom"), ("input_text", "fake")]),
        );
        assert_eq!(prompt, "custom|real");
    }

    #[test]
    fn chunk_prompt_appends_fragment_instructions() {
        let prompt = build_chunk_prompt("{input_text}", "3. partial", &HashMap::new());
        assert!(prompt.starts_with("3. partial"));
        assert!(prompt.ends_with(CHUNK_INSTRUCTIONS));
        assert!(prompt.contains("JSON array"));
    }
}
