//! Core domain types for docforge document sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SetId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for document set identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetId(pub Uuid);

impl SetId {
    /// Generate a new time-sortable set identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SetId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Document set
// ---------------------------------------------------------------------------

/// A document set: the templates, references, and generated outputs grouped
/// under one generation job, bound to a package code/version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSet {
    pub id: SetId,
    /// Human-readable name.
    pub name: String,
    /// Standard package code (e.g. `ISO9001`).
    pub package_code: String,
    /// Package version (e.g. `v1`).
    pub package_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Role an asset plays inside a document set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    /// A template with placeholder tokens awaiting substitution.
    Template,
    /// Normative/reference material used for retrieval grounding.
    Reference,
    /// Customer-uploaded reference material.
    CustomerReference,
    /// A rendered output produced by a generation run.
    GeneratedOutput,
}

impl AssetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Reference => "reference",
            Self::CustomerReference => "customer_reference",
            Self::GeneratedOutput => "generated_output",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "template" => Some(Self::Template),
            "reference" => Some(Self::Reference),
            "customer_reference" => Some(Self::CustomerReference),
            "generated_output" => Some(Self::GeneratedOutput),
            _ => None,
        }
    }
}

/// Where an asset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetOrigin {
    /// Copied from the package vault during ingestion.
    PackageVault,
    /// Uploaded by the customer.
    Upload,
    /// Produced by a generation run.
    Generated,
}

impl AssetOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PackageVault => "package_vault",
            Self::Upload => "upload",
            Self::Generated => "generated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "package_vault" => Some(Self::PackageVault),
            "upload" => Some(Self::Upload),
            "generated" => Some(Self::Generated),
            _ => None,
        }
    }
}

/// Metadata for a single asset (template, reference, or output) in a set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMeta {
    /// Unique asset identifier (UUID v7).
    pub id: String,
    /// Owning document set.
    pub set_id: String,
    /// Path relative to the package root (stable identity within the set).
    pub rel_path: String,
    pub role: AssetRole,
    pub origin: AssetOrigin,
    /// Absolute path of the copied file on disk.
    pub local_path: String,
    /// MIME type guessed from the extension.
    pub mime: String,
    /// Lowercased extension without the dot (`docx`, `pdf`, ...).
    pub file_ext: String,
    /// SHA-256 of the file content.
    pub sha256: String,
    /// For generated outputs: the template asset they were rendered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_asset_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// An indexed text chunk. The id is derived from the owning asset, the chunk
/// position, and a content hash, so re-indexing identical input always yields
/// identical ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub asset_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub token_estimate: usize,
    /// Source metadata (package, set, asset role/path, language).
    pub metadata: serde_json::Value,
    /// Embedding vector; absent until the batch embedding step runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A retrieval candidate produced for one query. Transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk_id: String,
    pub text: String,
    pub asset_id: String,
    /// Path of the owning asset relative to the package root.
    pub asset_path: String,
    pub role: AssetRole,
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// How a variable value may be produced when nothing higher-precedence
/// supplies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPolicy {
    /// Value must come from input or defaults; never generated.
    Deterministic,
    /// Direct, non-grounded AI completion.
    AiInfer,
    /// AI completion grounded in retrieved reference chunks.
    AiDraft,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self::Deterministic
    }
}

impl GenerationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::AiInfer => "ai_infer",
            Self::AiDraft => "ai_draft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deterministic" => Some(Self::Deterministic),
            "ai_infer" => Some(Self::AiInfer),
            "ai_draft" => Some(Self::AiDraft),
            _ => None,
        }
    }
}

/// A declared variable in a package's schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableKey {
    pub package_code: String,
    pub package_version: String,
    /// Token string without braces (`COMPANY_NAME`).
    pub token: String,
    /// Declared value type (free-form: `string`, `date`, ...).
    #[serde(default = "default_variable_type")]
    pub value_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default = "default_generation_policy")]
    pub generation_policy: GenerationPolicy,
}

fn default_variable_type() -> String {
    "string".into()
}

fn default_generation_policy() -> GenerationPolicy {
    GenerationPolicy::Deterministic
}

/// Provenance of a resolved variable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    /// Supplied by the customer. Permanent for the life of the set.
    CustomerInput,
    /// Taken from the schema default.
    Default,
    /// Produced by a non-grounded AI completion.
    AiInferred,
    /// Produced by a retrieval-grounded AI completion.
    AiDrafted,
    /// Supplied as an explicit override by an operator.
    HumanOverride,
}

impl VariableSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerInput => "customer_input",
            Self::Default => "default",
            Self::AiInferred => "ai_inferred",
            Self::AiDrafted => "ai_drafted",
            Self::HumanOverride => "human_override",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer_input" => Some(Self::CustomerInput),
            "default" => Some(Self::Default),
            "ai_inferred" => Some(Self::AiInferred),
            "ai_drafted" => Some(Self::AiDrafted),
            "human_override" => Some(Self::HumanOverride),
            _ => None,
        }
    }
}

/// A resolved variable value for one (document set, token) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub set_id: String,
    pub token: String,
    pub value: String,
    pub source: VariableSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// For AI-sourced values: model, prompt version, grounding chunk ids,
    /// timestamp. For others: a short origin marker.
    pub provenance: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Placeholder snapshots
// ---------------------------------------------------------------------------

/// Whether a discovered placeholder token is declared in the package schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStatus {
    Known,
    Unknown,
}

impl PlaceholderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Known => "known",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "known" => Some(Self::Known),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// One placeholder token discovered in a template asset. The set of records
/// for an asset is a full snapshot, recomputed on every index pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceholderRecord {
    /// Deterministic id: sha256 of `"{asset_id}:{token}"`.
    pub id: String,
    pub asset_id: String,
    pub token: String,
    pub occurrences: usize,
    pub status: PlaceholderStatus,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Kind of pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Ingestion,
    Generation,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Generation => "generation",
        }
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "PARTIAL" => Some(Self::Partial),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_id_roundtrip() {
        let id = SetId::new();
        let s = id.to_string();
        let parsed: SetId = s.parse().expect("parse SetId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn enum_string_roundtrips() {
        for role in [
            AssetRole::Template,
            AssetRole::Reference,
            AssetRole::CustomerReference,
            AssetRole::GeneratedOutput,
        ] {
            assert_eq!(AssetRole::parse(role.as_str()), Some(role));
        }
        for source in [
            VariableSource::CustomerInput,
            VariableSource::Default,
            VariableSource::AiInferred,
            VariableSource::AiDrafted,
            VariableSource::HumanOverride,
        ] {
            assert_eq!(VariableSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(RunStatus::parse("PARTIAL"), Some(RunStatus::Partial));
        assert_eq!(AssetRole::parse("bogus"), None);
    }

    #[test]
    fn variable_key_schema_defaults() {
        let json = r#"{
            "package_code": "ISO9001",
            "package_version": "v1",
            "token": "COMPANY_NAME",
            "required": true,
            "description": "Legal company name"
        }"#;
        let key: VariableKey = serde_json::from_str(json).expect("deserialize");
        assert_eq!(key.value_type, "string");
        assert_eq!(key.generation_policy, GenerationPolicy::Deterministic);
        assert!(key.default_value.is_none());
    }

    #[test]
    fn resolved_value_serialization() {
        let value = ResolvedValue {
            set_id: SetId::new().to_string(),
            token: "SCOPE".into(),
            value: "Initial scope".into(),
            source: VariableSource::Default,
            confidence: Some(1.0),
            provenance: serde_json::json!({"source": "variable_key.default_value"}),
        };
        let json = serde_json::to_string(&value).expect("serialize");
        let parsed: ResolvedValue = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.source, VariableSource::Default);
        assert_eq!(parsed.token, "SCOPE");
    }
}
