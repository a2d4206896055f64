use crate::models::chunk::Chunk;
use crate::utils::text::char_len;
use regex::Regex;
use std::sync::LazyLock;

pub const DEFAULT_MAX_CHUNK_SIZE: usize = 2000;

static RE_QUESTION_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^\s*(?:
            \d+\s*[.、)）．]
          | [(（]\s*\d+\s*[)）]
          | [一二三四五六七八九十百]+\s*[、.．]
          | (?i:question)\s*\d+
          | 第\s*(?:\d+|[一二三四五六七八九十百]+)\s*题
        )",
    )
    .expect("static regex")
});

/// Whether a line looks like the first line of a new question.
pub fn is_question_start(line: &str) -> bool {
    RE_QUESTION_START.is_match(line)
}

/// Splits `text` into line-aligned chunks of roughly `max_chunk_size` characters.
///
/// A boundary is placed before a line when adding it would overflow the size limit and
/// the line opens a new question, or unconditionally once the current chunk is past
/// 1.5x the limit. Lines are never split, and the chunk texts concatenate back to
/// `text`.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<Chunk> {
    let max_chunk_size = max_chunk_size.max(1);
    let total_chars = char_len(text);
    if total_chars < max_chunk_size {
        return vec![whole(text, total_chars)];
    }

    let hard_cap = max_chunk_size + max_chunk_size / 2;
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;
    let mut start = 0usize;

    for line in text.split_inclusive('\n') {
        let line_chars = char_len(line);
        if current_chars > 0 {
            let overflows = current_chars + line_chars > max_chunk_size;
            let past_cap = current_chars > hard_cap;
            if (overflows && is_question_start(line)) || past_cap {
                chunks.push(Chunk {
                    index: chunks.len(),
                    start,
                    end: start + current_chars,
                    text: std::mem::take(&mut current),
                });
                start += current_chars;
                current_chars = 0;
            }
        }
        current.push_str(line);
        current_chars += line_chars;
    }

    if current_chars > 0 || chunks.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            start,
            end: start + current_chars,
            text: current,
        });
    }

    chunks
}

/// Like [`chunk_text`], but returns the whole text as one chunk when chunking is off.
pub fn chunk_with(text: &str, max_chunk_size: usize, enabled: bool) -> Vec<Chunk> {
    if enabled {
        chunk_text(text, max_chunk_size)
    } else {
        vec![whole(text, char_len(text))]
    }
}

fn whole(text: &str, chars: usize) -> Chunk {
    Chunk {
        index: 0,
        start: 0,
        end: chars,
        text: text.to_string(),
    }
}
