/// Length in characters, which is how every size limit in the pipeline is measured.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Keeps at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

/// Short preview for log lines and error messages.
pub fn preview(s: &str, max_chars: usize) -> String {
    if char_len(s) <= max_chars {
        s.to_string()
    } else {
        format!("{}...", truncate_chars(s, max_chars))
    }
}

pub fn non_empty_trimmed(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("题目解析", 2), "题目");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(char_len("上方；>"), 4);
    }
}
