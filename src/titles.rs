// ABOUTME: Conversation title synthesis from the first user message
// ABOUTME: Ordered pattern rules, first match wins, no I/O
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Charla Project

//! Derives a short human-readable conversation label from the first user
//! message. Deterministic: the rules are evaluated in order and the first
//! match wins. All lengths are measured in characters, not bytes.

use regex::Regex;
use std::sync::LazyLock;

/// Default label for a conversation before any message names it
pub const PLACEHOLDER_TITLE: &str = "Nueva conversación";

/// Messages at or under this length are used verbatim
const SHORT_MESSAGE_MAX: usize = 10;

/// A leading question is kept whole only up to this length
const QUESTION_MAX: usize = 60;

/// Truncation point for interrogative-lead messages
const LEAD_TRUNCATE: usize = 50;

/// Word budget before falling back to a truncated prefix
const MAX_TITLE_WORDS: usize = 8;

/// Interrogative lead words that select the truncated-prefix rule
const QUESTION_STARTERS: &[&str] = &[
    "qué", "que", "cómo", "como", "cuál", "cual", "cuándo", "cuando", "dónde", "donde", "por qué",
    "por que",
];

static LESSON_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Safe: pattern is a checked literal
    Regex::new(r"(?i)lecci[oó]n\s*\d+").unwrap()
});

/// Synthesize a conversation title from the first user message.
///
/// Rules, first match wins:
/// 1. Trimmed message of at most 10 characters is used as-is (the
///    placeholder if empty).
/// 2. A question whose text up to and including the first `?` fits in 60
///    characters keeps that question.
/// 3. A lesson reference (`lección N`) becomes `Pregunta sobre lección N`.
/// 4. Mentions of the fixed topic become `Consulta sobre Escuela Sabática`.
/// 5. Messages starting with an interrogative lead word keep their first 50
///    characters, with an ellipsis when truncated.
/// 6. Messages of at most 8 words are used as-is.
/// 7. Everything else keeps its first 8 words plus an ellipsis.
#[must_use]
pub fn synthesize(message: &str) -> String {
    let clean = message.trim();

    if clean.chars().count() <= SHORT_MESSAGE_MAX {
        if clean.is_empty() {
            return PLACEHOLDER_TITLE.to_owned();
        }
        return clean.to_owned();
    }

    if let Some(question) = leading_question(clean) {
        return question;
    }

    let lower = clean.to_lowercase();

    if let Some(lesson) = LESSON_PATTERN.find(clean) {
        return format!("Pregunta sobre {}", lesson.as_str());
    }

    if lower.contains("escuela sab") {
        return "Consulta sobre Escuela Sabática".to_owned();
    }

    if QUESTION_STARTERS
        .iter()
        .any(|start| lower.starts_with(start))
    {
        return truncate_chars(clean, LEAD_TRUNCATE);
    }

    let words: Vec<&str> = clean.split_whitespace().collect();
    if words.len() <= MAX_TITLE_WORDS {
        return clean.to_owned();
    }

    format!("{}...", words[..MAX_TITLE_WORDS].join(" "))
}

/// Check whether a title is still the placeholder (or empty) and may be
/// overwritten by a synthesized one
#[must_use]
pub fn is_placeholder(title: &str) -> bool {
    title.is_empty() || title == PLACEHOLDER_TITLE
}

/// Text up to and including the first `?`, when it fits the question budget
fn leading_question(message: &str) -> Option<String> {
    if !message.contains('?') {
        return None;
    }

    let question: String = message
        .chars()
        .take_while(|&c| c != '?')
        .chain(std::iter::once('?'))
        .collect();

    (question.chars().count() <= QUESTION_MAX).then_some(question)
}

/// First `max` characters, with an ellipsis when anything was cut
fn truncate_chars(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_owned();
    }
    let prefix: String = message.chars().take(max).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_verbatim() {
        // 10 characters exactly stays verbatim
        assert_eq!(synthesize("1234567890"), "1234567890");
        assert_eq!(synthesize("Hi"), "Hi");
        assert_eq!(synthesize("  Hi  "), "Hi");
    }

    #[test]
    fn test_empty_message_falls_back_to_placeholder() {
        assert_eq!(synthesize(""), PLACEHOLDER_TITLE);
        assert_eq!(synthesize("   "), PLACEHOLDER_TITLE);
    }

    #[test]
    fn test_question_kept_whole() {
        assert_eq!(synthesize("¿Qué es la gracia?"), "¿Qué es la gracia?");
    }

    #[test]
    fn test_question_keeps_only_first_question() {
        assert_eq!(
            synthesize("Explicame esto por favor? y esto otro?"),
            "Explicame esto por favor?"
        );
    }

    #[test]
    fn test_sixty_one_char_question_falls_through() {
        // 61 characters including the trailing '?': rule 2 must not apply,
        // so the word-count fallback takes over
        let message = "aaaaaa bbbbbb cccccc dddddd eeeeee ffffff gggggg hhhhhh iiii?";
        assert_eq!(message.chars().count(), 61);

        assert_eq!(
            synthesize(message),
            "aaaaaa bbbbbb cccccc dddddd eeeeee ffffff gggggg hhhhhh..."
        );
    }

    #[test]
    fn test_sixty_char_question_is_kept() {
        let body = "x".repeat(59);
        let message = format!("{body}?");
        assert_eq!(synthesize(&message), message);
    }

    #[test]
    fn test_lesson_pattern() {
        assert_eq!(
            synthesize("Tengo dudas acerca de la Lección 7 de este trimestre"),
            "Pregunta sobre Lección 7"
        );
    }

    #[test]
    fn test_topic_keyword() {
        assert_eq!(
            synthesize("Necesito material de escuela sabática para el grupo"),
            "Consulta sobre Escuela Sabática"
        );
    }

    #[test]
    fn test_interrogative_lead_truncates_at_fifty() {
        let message =
            "como puedo prepararme mejor para dirigir el repaso de la proxima semana sin ayuda";
        let title = synthesize(message);
        assert_eq!(title.chars().count(), 53); // 50 + "..."
        assert!(title.ends_with("..."));
        let expected_prefix: String = message.chars().take(50).collect();
        assert!(title.starts_with(&expected_prefix));
    }

    #[test]
    fn test_interrogative_lead_under_fifty_kept() {
        let message = "como estudiar mejor la biblia";
        assert_eq!(synthesize(message), message);
    }

    #[test]
    fn test_eight_words_verbatim() {
        let message = "estas son exactamente ocho palabras para un titulo";
        assert_eq!(synthesize(message), message);
    }

    #[test]
    fn test_nine_words_truncated_to_eight() {
        let message = "estas son nueve palabras en total para el titulo";
        assert_eq!(
            synthesize(message),
            "estas son nueve palabras en total para el..."
        );
    }

    #[test]
    fn test_is_placeholder() {
        assert!(is_placeholder(""));
        assert!(is_placeholder(PLACEHOLDER_TITLE));
        assert!(!is_placeholder("Pregunta sobre Lección 7"));
    }
}
