use async_trait::async_trait;
use qbank_parser::services::chunker::chunk_text;
use qbank_parser::{
    default_template, CompletionGateway, Error, InMemoryTemplateStore, ParseErrorKind,
    ParseOptions, ParseRequest, ParseService, PromptTemplate, QuestionType,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers each chunk according to the `Marker-Q<n>` tag found in its prompt.
struct ScriptedGateway {
    delays_ms: Vec<u64>,
    failing: Option<usize>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGateway {
    fn new(delays_ms: Vec<u64>) -> Self {
        Self {
            delays_ms,
            failing: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, question_number: usize) -> Self {
        self.failing = Some(question_number);
        self
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn send(&self, prompt: &str) -> qbank_parser::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let number = (1..=self.delays_ms.len())
            .find(|n| prompt.contains(&format!("Marker-Q{n} ")))
            .expect("prompt carries a marker");
        tokio::time::sleep(Duration::from_millis(self.delays_ms[number - 1])).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing == Some(number) {
            return Err(Error::Completion("connection reset by peer".to_string()));
        }
        Ok(json!([{
            "type": "single",
            "stem": format!("Q{number}"),
            "options": [
                {"label": "A", "content": "yes", "is_correct": true},
                {"label": "B", "content": "no", "is_correct": false}
            ]
        }])
        .to_string())
    }
}

/// Fixed completion body, whatever the prompt.
struct CannedGateway(String);

#[async_trait]
impl CompletionGateway for CannedGateway {
    async fn send(&self, _prompt: &str) -> qbank_parser::Result<String> {
        Ok(self.0.clone())
    }
}

const CHUNK_SIZE: usize = 100;

/// `count` questions of 90 characters each, so a 100-character limit puts one per chunk.
fn document(count: usize) -> String {
    (1..=count)
        .map(|i| {
            format!(
                "{i}. Marker-Q{i} what is the value?\nfiller line for padding only\nfiller line for padding only\n"
            )
        })
        .collect()
}

fn options(max_concurrency: usize) -> ParseOptions {
    ParseOptions {
        max_chunk_size: CHUNK_SIZE,
        chunking_enabled: true,
        max_concurrency,
    }
}

fn stems(result: &qbank_parser::ParseResult) -> Vec<String> {
    result.questions.iter().map(|q| q.stem.clone()).collect()
}

#[tokio::test]
async fn failed_chunk_does_not_affect_its_siblings() {
    let text = document(3);
    assert_eq!(chunk_text(&text, CHUNK_SIZE).len(), 3);

    let gateway = Arc::new(ScriptedGateway::new(vec![5, 5, 5]).failing_on(2));
    let service = ParseService::new(gateway.clone(), options(3));
    let result = service
        .parse(&text, &default_template(), &HashMap::new())
        .await
        .expect("parse");

    assert_eq!(stems(&result), vec!["Q1", "Q3"]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].chunk_index, 1);
    assert_eq!(result.errors[0].kind, ParseErrorKind::ChunkCompletion);
    assert!(result.success());
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn merge_order_ignores_completion_order() {
    let text = document(4);

    let forward = ParseService::new(Arc::new(ScriptedGateway::new(vec![5, 20, 35, 50])), options(4))
        .parse(&text, &default_template(), &HashMap::new())
        .await
        .expect("forward parse");
    let reverse = ParseService::new(Arc::new(ScriptedGateway::new(vec![50, 35, 20, 5])), options(4))
        .parse(&text, &default_template(), &HashMap::new())
        .await
        .expect("reverse parse");

    assert_eq!(stems(&forward), vec!["Q1", "Q2", "Q3", "Q4"]);
    assert_eq!(forward, reverse);
}

#[tokio::test]
async fn in_flight_completions_respect_the_concurrency_cap() {
    let text = document(6);
    let gateway = Arc::new(ScriptedGateway::new(vec![20; 6]));
    let service = ParseService::new(gateway.clone(), options(2));

    let result = service
        .parse(&text, &default_template(), &HashMap::new())
        .await
        .expect("parse");

    assert_eq!(result.questions.len(), 6);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 6);
    let peak = gateway.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {peak}");
}

#[tokio::test]
async fn truncated_completion_yields_the_complete_question_and_an_error() {
    let truncated = r#"[{"type":"single","stem":"X","options":[{"label":"A","content":"a","is_correct":true}]},{"type":"single","stem":"Y""#;
    let service = ParseService::new(
        Arc::new(CannedGateway(truncated.to_string())),
        ParseOptions::default(),
    );

    let result = service
        .parse("1. X?\nA. a\n2. Y?", &default_template(), &HashMap::new())
        .await
        .expect("parse");

    assert_eq!(stems(&result), vec!["X"]);
    assert_eq!(result.questions[0].question_type(), QuestionType::Single);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ParseErrorKind::TruncatedResponse);
    assert_eq!(result.errors[0].chunk_index, 0);
}

#[tokio::test]
async fn provider_envelope_is_unwrapped_and_answers_canonicalized() {
    let content = "```json\n[{\"type\":\"填空题\",\"stem\":\"The sun is ___ and 3 ___ 2\",\"correct_answer\":\"上方；>\"},{\"type\":\"判断\",\"stem\":\"Water is wet\",\"correct_answer\":\"√\"},{\"type\":\"essay\",\"stem\":\"Explain borrowing\",\"correct_answer\":\"shared references; mutable references\"}]\n```";
    let body = json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
    .to_string();
    let service = ParseService::new(Arc::new(CannedGateway(body)), ParseOptions::default());

    let result = service
        .parse("some pasted text", &default_template(), &HashMap::new())
        .await
        .expect("parse");

    assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);
    let fill = &result.questions[0];
    assert_eq!(fill.stem, "The sun is {{BLANK}} and 3 {{BLANK}} 2");
    let answers: Vec<_> = fill
        .blanks()
        .expect("fill blanks")
        .iter()
        .map(|b| (b.position, b.answer.as_str()))
        .collect();
    assert_eq!(answers, vec![(0, "上方"), (1, ">")]);
    assert_eq!(result.questions[1].judge_answer(), Some(true));
    assert_eq!(
        result.questions[2].essay_answer().expect("essay").keywords,
        vec!["shared references", "mutable references"]
    );
    assert!(result.suggestions.is_empty());

    let serialized = serde_json::to_value(&result).expect("serialize");
    assert_eq!(serialized["questions"][1]["type"], "judge");
    assert!(serialized["questions"][1].get("options").is_none());
}

#[tokio::test]
async fn empty_input_fails_outright() {
    let gateway = Arc::new(ScriptedGateway::new(vec![]));
    let service = ParseService::new(gateway.clone(), ParseOptions::default());

    let err = service
        .parse_request(ParseRequest::new("   \n\t"))
        .await
        .expect_err("blank input must be rejected");
    assert!(matches!(err, Error::BadRequest(_)));
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn request_options_override_service_defaults() {
    let text = document(3);
    let gateway = Arc::new(ScriptedGateway::new(vec![1, 1, 1]));
    let service = ParseService::new(gateway.clone(), options(3));

    let mut request = ParseRequest::new(text);
    request.chunking = Some(false);
    let result = service.parse_request(request).await.expect("parse");

    // One unchunked prompt contains every marker; the gateway answers for the first.
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stems(&result), vec!["Q1"]);
}

#[test]
fn chunking_is_a_lossless_partition() {
    let samples = [
        document(25),
        format!("{}tail without newline", "line\n".repeat(300)),
        "一、选择题\n1. 下列说法正确的是（）\nA. 甲\nB. 乙\n".repeat(40),
        "\n\n\n".to_string(),
    ];
    for text in &samples {
        for max in [1, 7, 50, 100, 2000] {
            let chunks = chunk_text(text, max);
            let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(&rebuilt, text, "max_chunk_size {max}");
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, i);
                assert_eq!(chunk.end - chunk.start, chunk.text.chars().count());
            }
        }
    }
}

#[test]
fn stored_templates_resolve_through_the_cache() {
    let store = Arc::new(InMemoryTemplateStore::with_templates([PromptTemplate::new(
        "chemistry",
        "Chemistry questions: {input_text}",
    )]));
    let service = ParseService::new(Arc::new(ScriptedGateway::new(vec![])), ParseOptions::default())
        .with_template_store(store);

    let template = tokio_test::block_on(service.resolve_template(Some("chemistry")))
        .expect("stored template");
    assert_eq!(template.content, "Chemistry questions: {input_text}");
    assert_eq!(service.template_cache().len(), 1);

    let fallback = tokio_test::block_on(service.resolve_template(None)).expect("default template");
    assert_eq!(fallback, default_template());
}
