//! Pipeline orchestration for docforge.
//!
//! Ties the storage, chunking, placeholder, retrieval, and AI crates into
//! the three user-facing operations: creating document sets, ingesting a
//! package vault, and generating outputs from templates.

pub mod catalog;
pub mod events;
pub mod execution;
pub mod extract;
pub mod ingestion;
pub mod planning;
pub mod variables;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use docforge_ai::{CompletionClient, EmbeddingClient};
use docforge_shared::{
    AppConfig, DocforgeError, DocumentSet, PackageEntry, Result, SetId, expand_home,
};
use docforge_storage::Storage;

use events::ProgressReporter;

pub use execution::{GenerationReport, GenerationRequest, OutputOutcome, OutputResult};
pub use ingestion::{IngestionOutcome, IngestionStats};
pub use variables::{ResolutionReport, ResolutionRequest};

/// Shared handle for all pipeline operations.
///
/// Owns the database connection and the injected AI clients; individual
/// operations are free functions in the submodules taking `&Pipeline`.
pub struct Pipeline {
    pub storage: Storage,
    pub config: AppConfig,
    pub completions: Arc<dyn CompletionClient>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub progress: Arc<dyn ProgressReporter>,
}

impl Pipeline {
    pub fn new(
        storage: Storage,
        config: AppConfig,
        completions: Arc<dyn CompletionClient>,
        embeddings: Arc<dyn EmbeddingClient>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            storage,
            config,
            completions,
            embeddings,
            progress,
        }
    }

    /// Root directory for one set's data.
    pub fn set_dir(&self, set_id: &SetId) -> Result<PathBuf> {
        Ok(self.config.data_root()?.join(set_id.to_string()))
    }

    /// Directory holding copies of ingested assets.
    pub fn assets_dir(&self, set_id: &SetId) -> Result<PathBuf> {
        Ok(self.set_dir(set_id)?.join("assets"))
    }

    /// Directory generated outputs are written to.
    pub fn outputs_dir(&self, set_id: &SetId) -> Result<PathBuf> {
        Ok(self.set_dir(set_id)?.join("outputs"))
    }

    /// Look up a document set, failing with not-found.
    pub async fn require_set(&self, set_id: &str) -> Result<DocumentSet> {
        self.storage
            .get_document_set(set_id)
            .await?
            .ok_or_else(|| DocforgeError::not_found(format!("document set {set_id}")))
    }

    /// Catalog entry for a set's package.
    pub fn package_entry(&self, set: &DocumentSet) -> Result<&PackageEntry> {
        self.config.package(&set.package_code, &set.package_version)
    }

    /// Create a document set bound to a registered package version and seed
    /// its variable schema into the catalog tables.
    pub async fn create_document_set(
        &self,
        name: &str,
        package_code: &str,
        package_version: &str,
    ) -> Result<DocumentSet> {
        if name.trim().is_empty() {
            return Err(DocforgeError::validation("set name must not be empty"));
        }
        let entry = self.config.package(package_code, package_version)?;

        let schema_path = expand_home(&entry.variable_schema_path)?;
        let schema = catalog::load_variable_schema(&schema_path)?;

        let now = Utc::now();
        let set = DocumentSet {
            id: SetId::new(),
            name: name.trim().to_string(),
            package_code: package_code.to_string(),
            package_version: package_version.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_document_set(&set).await?;

        let seeded = catalog::seed_variable_keys(&self.storage, entry, &schema).await?;
        tracing::info!(
            set_id = %set.id,
            package = %package_code,
            version = %package_version,
            variables = seeded,
            "document set created"
        );
        Ok(set)
    }
}

/// Expand a catalog path that may start with `~/`.
pub(crate) fn resolve_path(raw: &str) -> Result<PathBuf> {
    expand_home(raw)
}

pub(crate) fn rel_path_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
