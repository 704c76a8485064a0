//! Plain-text extraction from reference assets.
//!
//! Text and markdown files are read as-is (lossy UTF-8). OOXML documents go
//! through the archive reader and get their markup stripped down to
//! paragraph-separated text. PDFs and anything else fail with an extraction
//! error, which ingestion isolates to the single asset.

use std::path::Path;

use docforge_placeholders::raw_markup_text;
use docforge_shared::{DocforgeError, Result};

/// Extract plain text from a file based on its extension.
pub fn extract_text(path: &Path, ext: &str) -> Result<String> {
    match ext {
        "txt" | "md" => {
            let bytes = std::fs::read(path).map_err(|e| DocforgeError::io(path, e))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        "docx" | "pptx" | "xlsx" => {
            let bytes = std::fs::read(path).map_err(|e| DocforgeError::io(path, e))?;
            let markup = raw_markup_text(&bytes, ext)?;
            Ok(strip_markup(&markup))
        }
        "pdf" => Err(DocforgeError::extraction(format!(
            "PDF text extraction is not available for {}",
            path.display()
        ))),
        other => Err(DocforgeError::extraction(format!(
            "unsupported reference format '{other}' for {}",
            path.display()
        ))),
    }
}

/// Strip XML markup to text, preserving paragraph structure.
///
/// Word/PowerPoint paragraph closers and spreadsheet string entries become
/// blank lines so the chunker sees real paragraph boundaries.
pub fn strip_markup(xml: &str) -> String {
    let with_breaks = xml
        .replace("</w:p>", "\n\n")
        .replace("</a:p>", "\n\n")
        .replace("</si>", "\n\n");

    let mut text = String::with_capacity(with_breaks.len() / 2);
    let mut in_tag = false;
    for c in with_breaks.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }

    normalize_whitespace(&decode_entities(&text))
}

/// Decode the five predefined XML entities.
fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapse intra-paragraph whitespace runs and drop empty paragraphs.
fn normalize_whitespace(text: &str) -> String {
    let paragraphs: Vec<String> = text
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect();
    paragraphs.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_stripping_keeps_paragraphs() {
        let xml = "<w:document><w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>\
                   <w:p><w:r><w:t>Second</w:t></w:r><w:r><w:t> paragraph.</w:t></w:r></w:p>\
                   </w:document>";
        let text = strip_markup(xml);
        assert_eq!(text, "First paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn entities_are_decoded() {
        let xml = "<w:p><w:t>Quality &amp; Safety &lt;2024&gt;</w:t></w:p>";
        assert_eq!(strip_markup(xml), "Quality & Safety <2024>");
    }

    #[test]
    fn whitespace_is_normalized() {
        let xml = "<w:p><w:t>a   b</w:t></w:p><w:p></w:p><w:p><w:t>c</w:t></w:p>";
        assert_eq!(strip_markup(xml), "a b\n\nc");
    }

    #[test]
    fn plain_text_roundtrip() {
        let tmp = std::env::temp_dir().join(format!("df_extract_{}.txt", uuid::Uuid::now_v7()));
        std::fs::write(&tmp, "hello\n\nworld").unwrap();
        let text = extract_text(&tmp, "txt").expect("extract");
        assert_eq!(text, "hello\n\nworld");
        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn unsupported_formats_fail_with_extraction_error() {
        let tmp = std::env::temp_dir().join("whatever.bin");
        let err = extract_text(&tmp, "png").unwrap_err();
        assert!(matches!(err, DocforgeError::Extraction { .. }));
        assert!(!err.is_run_fatal());

        let err = extract_text(&tmp, "pdf").unwrap_err();
        assert!(matches!(err, DocforgeError::Extraction { .. }));
    }
}
