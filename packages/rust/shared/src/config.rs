//! Application configuration for docforge.
//!
//! User config lives at `~/.docforge/docforge.toml`.
//! CLI flags override config file values, which override defaults.
//! Package catalog entries (`[[packages]]`) describe each standard package:
//! where its vault lives on disk, how files are classified into roles, and
//! where its variable schema and playbook are found.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DocforgeError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docforge";

// ---------------------------------------------------------------------------
// Config structs (matching docforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenAI-compatible API settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Registered standard packages.
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory holding per-set data (databases, copied assets, outputs).
    #[serde(default = "default_data_root")]
    pub data_root: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
        }
    }
}

fn default_data_root() -> String {
    "~/docforge-sets".into()
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for planning and variable inference/drafting.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Model used for chunk and query embeddings.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embed_model: default_embed_model(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".into()
}

/// `[[packages]]` entry — one version of one standard package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Package code (e.g. `ISO9001`).
    pub code: String,
    /// Package version (e.g. `v1`).
    pub version: String,
    /// Directory holding the package vault (templates + references).
    pub source_dir: String,
    /// Path prefixes that classify files as templates.
    #[serde(default)]
    pub template_prefixes: Vec<String>,
    /// Path prefixes that classify files as references.
    #[serde(default)]
    pub reference_prefixes: Vec<String>,
    /// Extensions accepted as templates.
    #[serde(default = "default_template_exts")]
    pub template_file_exts: Vec<String>,
    /// Extensions accepted as references.
    #[serde(default = "default_reference_exts")]
    pub reference_file_exts: Vec<String>,
    /// Content language tag attached to chunk metadata.
    #[serde(default = "default_language")]
    pub language: String,
    /// Chunking: greedy target size in characters.
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    /// Chunking: sliding-window overlap for oversized paragraphs.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Path to the variable schema JSON file.
    pub variable_schema_path: String,
    /// Path to the playbook JSON file.
    pub playbook_path: String,
}

fn default_template_exts() -> Vec<String> {
    vec!["docx".into(), "pptx".into(), "xlsx".into()]
}
fn default_reference_exts() -> Vec<String> {
    vec!["pdf".into(), "docx".into(), "doc".into(), "txt".into(), "md".into()]
}
fn default_language() -> String {
    "en".into()
}
fn default_target_chars() -> usize {
    2400
}
fn default_overlap_chars() -> usize {
    300
}

impl AppConfig {
    /// Find the catalog entry for a package code/version.
    pub fn package(&self, code: &str, version: &str) -> Result<&PackageEntry> {
        self.packages
            .iter()
            .find(|p| p.code == code && p.version == version)
            .ok_or_else(|| {
                DocforgeError::not_found(format!("unsupported package: {code}/{version}"))
            })
    }

    /// Resolve the data root, expanding a leading `~`.
    pub fn data_root(&self) -> Result<PathBuf> {
        expand_home(&self.defaults.data_root)
    }
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| DocforgeError::config("could not determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocforgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docforge/docforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocforgeError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocforgeError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocforgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocforgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocforgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openai.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(DocforgeError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_root"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.openai.api_key_env, "OPENAI_API_KEY");
        assert_eq!(parsed.openai.chat_model, "gpt-4o-mini");
    }

    #[test]
    fn config_with_packages() {
        let toml_str = r#"
[defaults]
data_root = "/tmp/sets"

[[packages]]
code = "ISO9001"
version = "v1"
source_dir = "/data/packages/ISO9001/v1"
template_prefixes = ["02 Musterhandbuch"]
reference_prefixes = ["01 Norm"]
language = "de"
variable_schema_path = "/data/schemas/ISO9001_v1_variables.json"
playbook_path = "/data/playbooks/ISO9001_v1_playbook.json"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.packages.len(), 1);

        let entry = config.package("ISO9001", "v1").expect("lookup");
        assert_eq!(entry.language, "de");
        assert_eq!(entry.target_chars, 2400);
        assert_eq!(entry.overlap_chars, 300);
        assert_eq!(entry.template_file_exts, vec!["docx", "pptx", "xlsx"]);

        assert!(config.package("ISO9001", "v2").is_err());
        assert!(config.package("SSCP", "v1").is_err());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openai.api_key_env = "DF_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
