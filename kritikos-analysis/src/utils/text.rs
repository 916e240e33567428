//! Text helpers for bill documents and model output

/// Marker appended when text is cut short
pub const TRUNCATION_MARKER: &str = "[...]";

/// Truncate to at most `max_chars` characters, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Keep at most `max_words` whitespace-separated words
///
/// Returns the input unchanged (whitespace included) when it fits, otherwise
/// the first `max_words` words joined by single spaces plus
/// [`TRUNCATION_MARKER`].
pub fn limit_words(text: &str, max_words: usize) -> String {
    let word_count = text.split_whitespace().count();
    if word_count <= max_words {
        return text.to_string();
    }

    let kept: Vec<&str> = text.split_whitespace().take(max_words).collect();
    format!("{} {}", kept.join(" "), TRUNCATION_MARKER)
}

/// Collapse runs of whitespace into single spaces
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull the JSON object out of a model reply
///
/// Models wrap JSON in markdown fences or surround it with prose. This strips
/// a leading ```json fence and returns the slice from the first `{` to the
/// last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&unfenced[start..=end])
}

/// Visible text of an HTML document
///
/// Text inside `<script>`, `<style>` and `<head>` is dropped and whitespace
/// is collapsed.
pub fn html_to_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);

    let parts: Vec<&str> = document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map(|el| matches!(el.name(), "script" | "style" | "head" | "noscript"))
                    .unwrap_or(false)
            });
            if hidden {
                None
            } else {
                Some(&**text)
            }
        })
        .collect();

    collapse_whitespace(&parts.join(" "))
}

/// Heuristic check for an HTML payload
pub fn looks_like_html(body: &str) -> bool {
    let head = truncate_chars(body.trim_start(), 512).to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.contains("<html") || head.contains("<body")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ação legislativa";
        assert_eq!(truncate_chars(text, 4), "ação");
        assert_eq!(truncate_chars(text, 100), text);
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_limit_words() {
        assert_eq!(limit_words("um dois três", 5), "um dois três");
        assert_eq!(limit_words("um  dois\ntrês quatro", 2), "um dois [...]");
    }

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let reply = "```json\n{\"trivial\": true}\n```";
        assert_eq!(extract_json_object(reply), Some("{\"trivial\": true}"));
    }

    #[test]
    fn test_extract_json_from_prose() {
        let reply = "Segue a análise: {\"a\": {\"b\": 1}} Obrigado.";
        assert_eq!(extract_json_object(reply), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("sem json"), None);
        assert_eq!(extract_json_object("} invertido {"), None);
    }

    #[test]
    fn test_html_to_text_drops_scripts_and_head() {
        let html = r#"<html><head><title>Título</title><style>p{}</style></head>
            <body><h1>Projeto de Lei</h1><script>var x = 1;</script>
            <p>Art. 1º   Esta lei dispõe</p></body></html>"#;
        assert_eq!(html_to_text(html), "Projeto de Lei Art. 1º Esta lei dispõe");
    }

    #[test]
    fn test_looks_like_html() {
        assert!(looks_like_html("  <!DOCTYPE html><html></html>"));
        assert!(looks_like_html("<HTML><BODY>x</BODY></HTML>"));
        assert!(!looks_like_html("Art. 1º Fica instituído"));
    }
}
