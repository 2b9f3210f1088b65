//! Text preparation for embedding generation.
//!
//! A vocabulary entry becomes one labeled block of text:
//! 1. Trim every field
//! 2. Skip empty fields
//! 3. Join labeled lines
//! 4. Truncate to max length with ellipsis

use crate::documents::Document;

/// Maximum text length for embedding input (characters, not tokens)
const MAX_TEXT_LENGTH: usize = 2048;

/// Ellipsis suffix when text is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Build the embedding input for a document.
///
/// Returns `None` if the document has no text at all.
pub fn document_text(doc: &Document) -> Option<String> {
    let mut lines: Vec<String> = vec![];

    let mut push = |label: &str, value: &str| {
        let value = value.trim();
        if !value.is_empty() {
            lines.push(format!("{label}: {value}"));
        }
    };

    push("Word", &doc.word);
    push("Description", &doc.description);
    push("Explanation", &doc.explanation);
    push("Tags", &doc.tags.join(", "));
    push("Synonyms", &doc.synonyms.join(", "));
    push("Antonyms", &doc.antonyms.join(", "));
    push("Remark", &doc.remark);

    if lines.is_empty() {
        return None;
    }

    Some(truncate_text(&lines.join("\n")))
}

/// Truncate text to MAX_TEXT_LENGTH characters, adding ellipsis if truncated.
fn truncate_text(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_LENGTH {
        return text.to_string();
    }

    let max_chars = MAX_TEXT_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = text.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(word: &str) -> Document {
        Document {
            word: word.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_document_returns_none() {
        assert!(document_text(&doc("")).is_none());
        assert!(document_text(&doc("  \n\t ")).is_none());
    }

    #[test]
    fn test_word_only() {
        assert_eq!(document_text(&doc("serendipity")), Some("Word: serendipity".to_string()));
    }

    #[test]
    fn test_all_fields_labeled_in_order() {
        let d = Document {
            word: " ephemeral ".to_string(),
            description: "lasting a short time".to_string(),
            tags: vec!["adjective".to_string(), "b2".to_string()],
            antonyms: vec!["permanent".to_string()],
            remark: "".to_string(),
            ..Default::default()
        };

        assert_eq!(
            document_text(&d).unwrap(),
            "Word: ephemeral\nDescription: lasting a short time\nTags: adjective, b2\nAntonyms: permanent"
        );
    }

    #[test]
    fn test_text_without_word_still_embeds() {
        let d = Document {
            explanation: "used loosely".to_string(),
            ..Default::default()
        };
        assert_eq!(document_text(&d), Some("Explanation: used loosely".to_string()));
    }

    #[test]
    fn test_truncation() {
        let d = Document {
            description: "x".repeat(3000),
            ..doc("long")
        };
        let text = document_text(&d).unwrap();

        assert_eq!(text.chars().count(), MAX_TEXT_LENGTH);
        assert!(text.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let d = Document {
            description: "ü".repeat(3000),
            ..doc("umlaut")
        };
        let text = document_text(&d).unwrap();
        assert_eq!(text.chars().count(), MAX_TEXT_LENGTH);
    }
}
