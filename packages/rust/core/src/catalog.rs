//! Package catalog: variable schemas, playbooks, and asset classification.
//!
//! Each registered package version ships a variable schema (the declared
//! placeholder tokens) and a playbook (which templates become which
//! outputs). Both are JSON files referenced from the package catalog entry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use docforge_shared::{
    AssetRole, DocforgeError, GenerationPolicy, PackageEntry, Result, VariableKey,
};
use docforge_storage::Storage;

// ---------------------------------------------------------------------------
// Variable schema
// ---------------------------------------------------------------------------

/// On-disk variable schema for one package version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableSchema {
    #[serde(default)]
    pub variables: Vec<SchemaVariable>,
}

/// One declared variable in the schema file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVariable {
    pub token: String,
    #[serde(default = "default_value_type")]
    pub value_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub generation_policy: GenerationPolicy,
}

fn default_value_type() -> String {
    "string".into()
}

/// Load and parse a variable schema file.
pub fn load_variable_schema(path: &Path) -> Result<VariableSchema> {
    let content = std::fs::read_to_string(path).map_err(|e| DocforgeError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        DocforgeError::config(format!("invalid variable schema {}: {e}", path.display()))
    })
}

/// Upsert the schema's variables into the catalog tables. Returns the number
/// of keys written.
pub async fn seed_variable_keys(
    storage: &Storage,
    entry: &PackageEntry,
    schema: &VariableSchema,
) -> Result<usize> {
    for variable in &schema.variables {
        let key = VariableKey {
            package_code: entry.code.clone(),
            package_version: entry.version.clone(),
            token: variable.token.clone(),
            value_type: variable.value_type.clone(),
            required: variable.required,
            description: variable.description.clone(),
            default_value: variable.default_value.clone(),
            generation_policy: variable.generation_policy,
        };
        storage.upsert_variable_key(&key).await?;
    }
    Ok(schema.variables.len())
}

// ---------------------------------------------------------------------------
// Playbook
// ---------------------------------------------------------------------------

/// On-disk playbook: the template-to-output mapping for one package version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default)]
    pub outputs: Vec<PlaybookOutput>,
}

/// One planned document in the playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookOutput {
    /// Template path relative to the package root.
    pub template: String,
    /// Output path relative to the set's output directory.
    pub output: String,
    #[serde(default)]
    pub notes: String,
}

/// Load and parse a playbook file.
pub fn load_playbook(path: &Path) -> Result<Playbook> {
    let content = std::fs::read_to_string(path).map_err(|e| DocforgeError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| DocforgeError::config(format!("invalid playbook {}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// Asset classification
// ---------------------------------------------------------------------------

/// Classify a vault file into an asset role, or `None` to skip it.
///
/// Prefix rules win over extension rules; when a package declares no
/// prefixes at all, extensions alone decide. Template extensions are
/// checked before reference extensions because OOXML files appear in both
/// lists for some packages.
pub fn classify_asset(entry: &PackageEntry, rel_path: &str) -> Option<AssetRole> {
    let ext = path_ext(rel_path);

    let template_prefix = entry
        .template_prefixes
        .iter()
        .any(|p| rel_path.starts_with(p.as_str()));
    let reference_prefix = entry
        .reference_prefixes
        .iter()
        .any(|p| rel_path.starts_with(p.as_str()));
    let template_ext = entry.template_file_exts.iter().any(|e| e == &ext);
    let reference_ext = entry.reference_file_exts.iter().any(|e| e == &ext);

    if template_prefix && template_ext {
        return Some(AssetRole::Template);
    }
    if reference_prefix && reference_ext {
        return Some(AssetRole::Reference);
    }
    if entry.template_prefixes.is_empty() && entry.reference_prefixes.is_empty() {
        if template_ext {
            return Some(AssetRole::Template);
        }
        if reference_ext {
            return Some(AssetRole::Reference);
        }
    }
    None
}

/// Lowercased extension without the dot.
pub fn path_ext(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// MIME type for an extension, used for asset metadata only.
pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext {
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "doc" => "application/msword",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> PackageEntry {
        PackageEntry {
            code: "ISO9001".into(),
            version: "v1".into(),
            source_dir: "/vault/ISO9001/v1".into(),
            template_prefixes: vec!["02 Handbook".into()],
            reference_prefixes: vec!["01 Norm".into()],
            template_file_exts: vec!["docx".into(), "pptx".into(), "xlsx".into()],
            reference_file_exts: vec![
                "pdf".into(),
                "docx".into(),
                "doc".into(),
                "txt".into(),
                "md".into(),
            ],
            language: "de".into(),
            target_chars: 2400,
            overlap_chars: 300,
            variable_schema_path: "/schemas/iso9001.json".into(),
            playbook_path: "/playbooks/iso9001.json".into(),
        }
    }

    #[test]
    fn classification_by_prefix_and_extension() {
        let entry = entry();
        assert_eq!(
            classify_asset(&entry, "02 Handbook/manual.docx"),
            Some(AssetRole::Template)
        );
        assert_eq!(
            classify_asset(&entry, "01 Norm/iso9001.pdf"),
            Some(AssetRole::Reference)
        );
        // Right prefix, wrong extension
        assert_eq!(classify_asset(&entry, "02 Handbook/readme.pdf"), None);
        // No matching prefix
        assert_eq!(classify_asset(&entry, "99 Misc/notes.txt"), None);
    }

    #[test]
    fn classification_falls_back_to_extensions() {
        let mut entry = entry();
        entry.template_prefixes.clear();
        entry.reference_prefixes.clear();
        assert_eq!(
            classify_asset(&entry, "anywhere/manual.docx"),
            Some(AssetRole::Template)
        );
        assert_eq!(
            classify_asset(&entry, "anywhere/norm.pdf"),
            Some(AssetRole::Reference)
        );
        assert_eq!(classify_asset(&entry, "anywhere/image.png"), None);
    }

    #[test]
    fn schema_parsing_applies_defaults() {
        let json = r#"{
            "variables": [
                {"token": "COMPANY_NAME", "required": true, "description": "Legal name"},
                {"token": "SCOPE", "generation_policy": "ai_draft", "default_value": null}
            ]
        }"#;
        let schema: VariableSchema = serde_json::from_str(json).expect("schema");
        assert_eq!(schema.variables.len(), 2);
        assert_eq!(schema.variables[0].value_type, "string");
        assert_eq!(
            schema.variables[0].generation_policy,
            GenerationPolicy::Deterministic
        );
        assert_eq!(
            schema.variables[1].generation_policy,
            GenerationPolicy::AiDraft
        );
    }

    #[test]
    fn playbook_parsing() {
        let json = r#"{
            "outputs": [
                {"template": "02 Handbook/manual.docx", "output": "manual.docx", "notes": "main manual"},
                {"template": "02 Handbook/policy.docx", "output": "policy.docx"}
            ]
        }"#;
        let playbook: Playbook = serde_json::from_str(json).expect("playbook");
        assert_eq!(playbook.outputs.len(), 2);
        assert_eq!(playbook.outputs[1].notes, "");
    }

    #[test]
    fn mime_and_ext_helpers() {
        assert_eq!(path_ext("a/b/Manual.DOCX"), "docx");
        assert_eq!(path_ext("noext"), "");
        assert!(mime_for_ext("docx").contains("wordprocessingml"));
        assert_eq!(mime_for_ext("weird"), "application/octet-stream");
    }
}
