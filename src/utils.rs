use lazy_static::lazy_static;
use regex::Regex;
use rustc_hash::FxHashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref STOP_WORDS: FxHashSet<&'static str> = {
        let words = vec![
            "a", "an", "and", "are", "as", "at", "be", "by", "for", "from",
            "has", "he", "in", "is", "it", "its", "of", "on", "that", "the",
            "to", "was", "were", "will", "with"
        ];
        words.into_iter().collect()
    };
    static ref PUNCTUATION: Regex = Regex::new(r"[^\w\s]").unwrap();
}

/// Splits text into lower-cased word tokens, dropping punctuation and stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.nfc().collect::<String>().to_lowercase();
    let text = PUNCTUATION.replace_all(&text, " ");

    text.split_whitespace()
        .filter(|&token| !STOP_WORDS.contains(token))
        .map(|token| token.to_string())
        .collect()
}

/// Trims and lower-cases a language tag; blank tags become `None`.
pub fn normalize_language(language: &str) -> Option<String> {
    let language = language.trim().to_lowercase();
    if language.is_empty() {
        None
    } else {
        Some(language)
    }
}

/// Number of source lines in a snippet, ignoring one trailing newline.
pub fn line_count(code: &str) -> usize {
    code.lines().count()
}

/// 1-based number of the last line holding anything but whitespace; 0 when blank.
pub fn last_content_line(code: &str) -> usize {
    code.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, _)| i + 1)
        .last()
        .unwrap_or(0)
}

/// Returns at most `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_strips_punctuation_and_stop_words() {
        let tokens = tokenize("printf(\"%d\", fib(n)); return the value;");
        assert_eq!(tokens, vec!["printf", "d", "fib", "n", "return", "value"]);
    }

    #[test]
    fn test_tokenize_normalizes_unicode() {
        // "é" as a combining sequence and as a single code point
        assert_eq!(tokenize("cafe\u{301}"), tokenize("caf\u{e9}"));
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language(" C++ ").as_deref(), Some("c++"));
        assert_eq!(normalize_language(""), None);
    }

    #[test]
    fn test_line_count() {
        assert_eq!(line_count("a\nb\n"), 2);
        assert_eq!(line_count("a\n\nb"), 3);
        assert_eq!(line_count(""), 0);
    }

    #[test]
    fn test_last_content_line() {
        assert_eq!(last_content_line("a\n\nb\n\n  \n"), 3);
        assert_eq!(last_content_line("\n \n"), 0);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
