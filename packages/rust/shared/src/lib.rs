//! Shared types, error model, and configuration for docforge.
//!
//! This crate is the foundation depended on by all other docforge crates.
//! It provides:
//! - [`DocforgeError`] — the unified error type
//! - Domain types ([`DocumentSet`], [`AssetMeta`], [`ChunkRecord`],
//!   [`ResolvedValue`], [`PlaceholderRecord`], [`SetId`])
//! - Configuration ([`AppConfig`], package catalog entries, config loading)
//! - Content hashing and the [`FileStore`] byte-storage seam

pub mod config;
pub mod error;
pub mod fs;
pub mod hashing;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, OpenAiConfig, PackageEntry, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{DocforgeError, Result};
pub use fs::{FileStore, LocalFileStore};
pub use hashing::{file_sha256, sha256_bytes, sha256_text};
pub use types::{
    AssetMeta, AssetOrigin, AssetRole, ChunkRecord, DocumentSet, GenerationPolicy,
    PlaceholderRecord, PlaceholderStatus, ResolvedValue, RetrievalCandidate, RunKind, RunStatus,
    SetId, VariableKey, VariableSource,
};
