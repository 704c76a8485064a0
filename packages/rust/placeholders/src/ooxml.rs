//! Format-aware placeholder rewriting for OOXML archives.
//!
//! An OOXML document (docx/pptx/xlsx) is a zip archive of named parts. Only
//! `.xml` parts under the format's content root are rewritten; every other
//! member — binary assets, relationship files, markup outside the content
//! root — is copied through unmodified, preserving member order and
//! compression method. An unsupported extension returns the input unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use docforge_shared::{DocforgeError, Result};

use crate::substitute;

/// Supported structured document formats and their content roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Docx,
    Pptx,
    Xlsx,
}

impl DocumentFormat {
    /// Map a lowercased extension (with or without leading dot) to a format.
    pub fn from_ext(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    /// Archive prefix under which substitutable markup lives.
    pub fn content_root(&self) -> &'static str {
        match self {
            Self::Docx => "word/",
            Self::Pptx => "ppt/",
            Self::Xlsx => "xl/",
        }
    }

    /// Whether an archive member is a rewrite target for this format.
    fn is_target_part(&self, name: &str) -> bool {
        name.ends_with(".xml") && name.starts_with(self.content_root())
    }
}

/// Rewrite placeholder tokens inside an OOXML archive.
///
/// Returns the rewritten archive bytes and the union of unresolved tokens
/// across all rewritten parts. An unsupported extension returns the input
/// bytes unchanged with an empty unresolved set.
pub fn apply_values_to_archive(
    source_bytes: &[u8],
    ext: &str,
    values: &BTreeMap<String, String>,
) -> Result<(Vec<u8>, BTreeSet<String>)> {
    let Some(format) = DocumentFormat::from_ext(ext) else {
        return Ok((source_bytes.to_vec(), BTreeSet::new()));
    };

    let mut archive = ZipArchive::new(Cursor::new(source_bytes))
        .map_err(|e| DocforgeError::Archive(format!("open archive: {e}")))?;

    let mut output = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(&mut output);
    let mut unresolved = BTreeSet::new();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| DocforgeError::Archive(format!("read member {index}: {e}")))?;
        let name = entry.name().to_string();
        let options =
            SimpleFileOptions::default().compression_method(entry.compression());

        if entry.is_dir() {
            writer
                .add_directory(name.trim_end_matches('/'), options)
                .map_err(|e| DocforgeError::Archive(format!("write dir {name}: {e}")))?;
            continue;
        }

        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| DocforgeError::Archive(format!("read member {name}: {e}")))?;

        if format.is_target_part(&name) {
            let xml = String::from_utf8_lossy(&data);
            let (replaced, unresolved_local) = substitute(&xml, values);
            unresolved.extend(unresolved_local);
            data = replaced.into_bytes();
        }

        writer
            .start_file(&name, options)
            .map_err(|e| DocforgeError::Archive(format!("write member {name}: {e}")))?;
        writer
            .write_all(&data)
            .map_err(|e| DocforgeError::Archive(format!("write member {name}: {e}")))?;
    }

    writer
        .finish()
        .map_err(|e| DocforgeError::Archive(format!("finalize archive: {e}")))?;
    Ok((output.into_inner(), unresolved))
}

/// Walk the content-root markup parts and collect the distinct placeholder
/// tokens they contain, without rewriting anything. Used at indexing time.
pub fn extract_tokens_from_archive(source_bytes: &[u8], ext: &str) -> Result<BTreeSet<String>> {
    let Some(format) = DocumentFormat::from_ext(ext) else {
        return Ok(BTreeSet::new());
    };

    let mut archive = ZipArchive::new(Cursor::new(source_bytes))
        .map_err(|e| DocforgeError::Archive(format!("open archive: {e}")))?;

    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();

    let mut tokens = BTreeSet::new();
    for name in names {
        if !format.is_target_part(&name) {
            continue;
        }
        let mut entry = archive
            .by_name(&name)
            .map_err(|e| DocforgeError::Archive(format!("read member {name}: {e}")))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| DocforgeError::Archive(format!("read member {name}: {e}")))?;
        let xml = String::from_utf8_lossy(&data);
        tokens.extend(crate::extract_tokens(&xml));
    }
    Ok(tokens)
}

/// Concatenated raw markup of all content-root parts, tags included.
/// Used for placeholder scanning across split text runs at indexing time.
pub fn raw_markup_text(source_bytes: &[u8], ext: &str) -> Result<String> {
    let Some(format) = DocumentFormat::from_ext(ext) else {
        return Ok(String::new());
    };

    let mut archive = ZipArchive::new(Cursor::new(source_bytes))
        .map_err(|e| DocforgeError::Archive(format!("open archive: {e}")))?;

    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();

    let mut parts = Vec::new();
    for name in names {
        if !format.is_target_part(&name) {
            continue;
        }
        let mut entry = archive
            .by_name(&name)
            .map_err(|e| DocforgeError::Archive(format!("read member {name}: {e}")))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| DocforgeError::Archive(format!("read member {name}: {e}")))?;
        parts.push(String::from_utf8_lossy(&data).into_owned());
    }
    Ok(parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal docx-shaped archive from (name, bytes) members.
    fn build_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = ZipWriter::new(&mut cursor);
        for (name, data) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start member");
            writer.write_all(data).expect("write member");
        }
        writer.finish().expect("finish archive");
        cursor.into_inner()
    }

    fn read_member(bytes: &[u8], name: &str) -> Vec<u8> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("open");
        let mut entry = archive.by_name(name).expect("member");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("read");
        data
    }

    fn sample_docx() -> Vec<u8> {
        build_archive(&[
            ("[Content_Types].xml", b"<Types>{{COMPANY_NAME}}</Types>"),
            ("word/document.xml", b"<w:t>{{COMPANY_NAME}} audit {{SCOPE}}</w:t>"),
            ("word/media/logo.png", &[0x89, 0x50, 0x4e, 0x47]),
            ("word/styles.xml", b"<w:styles>{{SCOPE}}</w:styles>"),
            ("docProps/app.xml", b"<Props>{{SCOPE}}</Props>"),
        ])
    }

    #[test]
    fn rewrites_only_content_root_markup() {
        let source = sample_docx();
        let mut values = BTreeMap::new();
        values.insert("COMPANY_NAME".to_string(), "Acme GmbH".to_string());
        values.insert("SCOPE".to_string(), "full".to_string());

        let (out, unresolved) = apply_values_to_archive(&source, "docx", &values).expect("apply");
        assert!(unresolved.is_empty());

        assert_eq!(
            read_member(&out, "word/document.xml"),
            b"<w:t>Acme GmbH audit full</w:t>"
        );
        assert_eq!(read_member(&out, "word/styles.xml"), b"<w:styles>full</w:styles>");
        // Outside the content root: untouched even though it contains tokens.
        assert_eq!(
            read_member(&out, "[Content_Types].xml"),
            b"<Types>{{COMPANY_NAME}}</Types>"
        );
        assert_eq!(read_member(&out, "docProps/app.xml"), b"<Props>{{SCOPE}}</Props>");
        // Binary member copied verbatim.
        assert_eq!(read_member(&out, "word/media/logo.png"), [0x89, 0x50, 0x4e, 0x47]);
    }

    #[test]
    fn member_order_is_preserved() {
        let source = sample_docx();
        let (out, _) =
            apply_values_to_archive(&source, "docx", &BTreeMap::new()).expect("apply");

        let order = |bytes: &[u8]| -> Vec<String> {
            let archive = ZipArchive::new(Cursor::new(bytes.to_vec())).expect("open");
            archive.file_names().map(String::from).collect()
        };
        assert_eq!(order(&source), order(&out));
    }

    #[test]
    fn empty_value_map_leaves_qualifying_parts_intact() {
        let source = sample_docx();
        let (out, unresolved) =
            apply_values_to_archive(&source, "docx", &BTreeMap::new()).expect("apply");

        let expected: Vec<&str> = unresolved.iter().map(String::as_str).collect();
        assert_eq!(expected, vec!["COMPANY_NAME", "SCOPE"]);
        assert_eq!(
            read_member(&out, "word/document.xml"),
            read_member(&source, "word/document.xml")
        );
    }

    #[test]
    fn token_free_archive_round_trips_byte_identical_parts() {
        let source = build_archive(&[
            ("word/document.xml", b"<w:t>plain text, no markers</w:t>"),
            ("word/media/blob.bin", &[1, 2, 3, 4, 5]),
        ]);
        let mut values = BTreeMap::new();
        values.insert("UNUSED".to_string(), "value".to_string());

        let (out, unresolved) = apply_values_to_archive(&source, "docx", &values).expect("apply");
        assert!(unresolved.is_empty());
        assert_eq!(
            read_member(&out, "word/document.xml"),
            read_member(&source, "word/document.xml")
        );
        assert_eq!(
            read_member(&out, "word/media/blob.bin"),
            read_member(&source, "word/media/blob.bin")
        );
    }

    #[test]
    fn unsupported_format_passes_through() {
        let source = b"not an archive at all".to_vec();
        let (out, unresolved) =
            apply_values_to_archive(&source, "pdf", &BTreeMap::new()).expect("apply");
        assert_eq!(out, source);
        assert!(unresolved.is_empty());
        assert!(extract_tokens_from_archive(&source, "pdf").expect("extract").is_empty());
    }

    #[test]
    fn extract_walks_content_root_parts() {
        let source = sample_docx();
        let tokens = extract_tokens_from_archive(&source, "docx").expect("extract");
        let listed: Vec<&str> = tokens.iter().map(String::as_str).collect();
        assert_eq!(listed, vec!["COMPANY_NAME", "SCOPE"]);
    }

    #[test]
    fn format_mapping() {
        assert_eq!(DocumentFormat::from_ext(".DOCX"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_ext("pptx"), Some(DocumentFormat::Pptx));
        assert_eq!(DocumentFormat::from_ext("xlsx"), Some(DocumentFormat::Xlsx));
        assert_eq!(DocumentFormat::from_ext("pdf"), None);
        assert_eq!(DocumentFormat::Pptx.content_root(), "ppt/");
    }
}
