/// Default per-text limit, in bytes.
pub const DEFAULT_MAX_CHARS: usize = 10_000;

/// How far before the limit a word boundary may sit and still be preferred.
const WORD_BOUNDARY_WINDOW: usize = 100;

/// Fields of a file that make up its embedding input.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentText<'a> {
    pub filename: &'a str,
    pub path: &'a str,
    pub category: Option<&'a str>,
    pub subcategory: Option<&'a str>,
    pub content_text: Option<&'a str>,
    pub content_preview: Option<&'a str>,
}

impl DocumentText<'_> {
    /// True when there is body text to embed.
    pub fn has_content(&self) -> bool {
        [self.content_text, self.content_preview]
            .into_iter()
            .flatten()
            .any(|text| !text.trim().is_empty())
    }
}

/// Render the embedding input: a short header naming the file, a blank line,
/// then the full text or, failing that, the preview.
pub fn prepare_text(doc: &DocumentText<'_>) -> String {
    let mut out = format!("File: {}\nPath: {}\n", doc.filename, doc.path);
    if let Some(category) = doc.category.filter(|c| !c.is_empty()) {
        out.push_str("Type: ");
        out.push_str(category);
        if let Some(sub) = doc.subcategory.filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(sub);
        }
        out.push('\n');
    }
    out.push('\n');
    let body = doc
        .content_text
        .filter(|t| !t.trim().is_empty())
        .or(doc.content_preview.filter(|p| !p.trim().is_empty()));
    if let Some(body) = body {
        out.push_str(body);
    }
    out
}

/// Cut `text` to at most `max_len` bytes. A space within the last 100 bytes
/// of the cut becomes the end so words stay whole; otherwise the cut lands on
/// the nearest char boundary at or below the limit.
pub fn truncate_text(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &text[..cut];
    match truncated.rfind(' ') {
        Some(idx) if idx > max_len.saturating_sub(WORD_BOUNDARY_WINDOW) => &truncated[..idx],
        _ => truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prepare_text_with_category_and_content() {
        let doc = DocumentText {
            filename: "report.pdf",
            path: "/docs/report.pdf",
            category: Some("document"),
            subcategory: Some("pdf"),
            content_text: Some("quarterly numbers"),
            content_preview: Some("ignored"),
        };
        assert_eq!(
            prepare_text(&doc),
            "File: report.pdf\nPath: /docs/report.pdf\nType: document/pdf\n\nquarterly numbers"
        );
    }

    #[test]
    fn test_prepare_text_falls_back_to_preview() {
        let doc = DocumentText {
            filename: "a.txt",
            path: "/a.txt",
            content_text: Some(""),
            content_preview: Some("first lines"),
            ..Default::default()
        };
        assert_eq!(prepare_text(&doc), "File: a.txt\nPath: /a.txt\n\nfirst lines");
        assert!(doc.has_content());
        assert!(!DocumentText::default().has_content());
    }

    #[test]
    fn test_whitespace_only_text_is_not_content() {
        let doc = DocumentText {
            filename: "blank.txt",
            path: "/blank.txt",
            content_text: Some("  \n "),
            content_preview: Some("\t"),
            ..Default::default()
        };
        assert!(!doc.has_content());
        assert_eq!(prepare_text(&doc), "File: blank.txt\nPath: /blank.txt\n\n");
    }

    #[test]
    fn test_truncate_prefers_nearby_space() {
        let text = format!("{} tail", "a".repeat(95));
        assert_eq!(truncate_text(&text, 98), "a".repeat(95));
    }

    #[test]
    fn test_truncate_hard_cuts_when_space_is_far() {
        let text = format!("word {}", "b".repeat(300));
        let cut = truncate_text(&text, 200);
        assert_eq!(cut.len(), 200);
        assert!(cut.starts_with("word b"));
    }

    #[test]
    fn test_truncate_keeps_char_boundaries() {
        let text = "é".repeat(10);
        assert_eq!(truncate_text(&text, 5), "éé");
        assert_eq!(truncate_text("short", 10), "short");
    }
}
