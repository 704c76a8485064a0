//! libSQL storage layer for docforge.
//!
//! The [`Storage`] struct wraps a libSQL database holding document sets,
//! assets, content-addressed chunks (with FTS5 over chunk text and JSON
//! embeddings), variable schemas and resolved values, placeholder snapshots,
//! and run history.
//!
//! **Access rules:**
//! - Pipelines: read-write (sole writer) via [`Storage::open`]
//! - Reporting/inspection tools: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use uuid::Uuid;

use docforge_shared::{
    AssetMeta, AssetOrigin, AssetRole, ChunkRecord, DocforgeError, DocumentSet, GenerationPolicy,
    PlaceholderRecord, PlaceholderStatus, ResolvedValue, Result, RetrievalCandidate, RunKind,
    RunStatus, SetId, VariableKey, VariableSource,
};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: impl std::fmt::Display) -> DocforgeError {
    DocforgeError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocforgeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    DocforgeError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DocforgeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Document set operations
    // -----------------------------------------------------------------------

    /// Insert a new document set record.
    pub async fn insert_document_set(&self, set: &DocumentSet) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO document_sets (id, name, package_code, package_version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    set.id.to_string(),
                    set.name.as_str(),
                    set.package_code.as_str(),
                    set.package_version.as_str(),
                    set.created_at.to_rfc3339(),
                    set.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a document set by ID.
    pub async fn get_document_set(&self, id: &str) -> Result<Option<DocumentSet>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, package_code, package_version, created_at, updated_at
                 FROM document_sets WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document_set(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all document sets, ordered by name.
    pub async fn list_document_sets(&self) -> Result<Vec<DocumentSet>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, package_code, package_version, created_at, updated_at
                 FROM document_sets ORDER BY name",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_document_set(&row)?);
        }
        Ok(results)
    }

    /// Update a document set's `updated_at` timestamp.
    pub async fn touch_document_set(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE document_sets SET updated_at = ?1 WHERE id = ?2",
                params![now.as_str(), id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Asset operations
    // -----------------------------------------------------------------------

    /// Upsert an asset keyed by `(set_id, rel_path, sha256)`.
    ///
    /// Returns the effective asset id and whether a new row was created.
    /// An existing row keeps its id; mutable fields are refreshed.
    pub async fn upsert_asset(&self, asset: &AssetMeta) -> Result<(String, bool)> {
        self.check_writable()?;

        let mut rows = self
            .conn
            .query(
                "SELECT id FROM assets WHERE set_id = ?1 AND rel_path = ?2 AND sha256 = ?3",
                params![
                    asset.set_id.as_str(),
                    asset.rel_path.as_str(),
                    asset.sha256.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;

        if let Ok(Some(row)) = rows.next().await {
            let existing_id: String = row.get(0).map_err(storage_err)?;
            self.conn
                .execute(
                    "UPDATE assets SET role = ?1, origin = ?2, local_path = ?3, mime = ?4,
                            file_ext = ?5, source_asset_id = ?6
                     WHERE id = ?7",
                    params![
                        asset.role.as_str(),
                        asset.origin.as_str(),
                        asset.local_path.as_str(),
                        asset.mime.as_str(),
                        asset.file_ext.as_str(),
                        asset.source_asset_id.as_deref(),
                        existing_id.as_str(),
                    ],
                )
                .await
                .map_err(storage_err)?;
            return Ok((existing_id, false));
        }

        self.conn
            .execute(
                "INSERT INTO assets (id, set_id, rel_path, role, origin, local_path, mime, file_ext, sha256, source_asset_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    asset.id.as_str(),
                    asset.set_id.as_str(),
                    asset.rel_path.as_str(),
                    asset.role.as_str(),
                    asset.origin.as_str(),
                    asset.local_path.as_str(),
                    asset.mime.as_str(),
                    asset.file_ext.as_str(),
                    asset.sha256.as_str(),
                    asset.source_asset_id.as_deref(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok((asset.id.clone(), true))
    }

    /// Get an asset by ID.
    pub async fn get_asset(&self, id: &str) -> Result<Option<AssetMeta>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, set_id, rel_path, role, origin, local_path, mime, file_ext, sha256, source_asset_id
                 FROM assets WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_asset(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all assets for a set, ordered by relative path.
    pub async fn list_assets(&self, set_id: &str) -> Result<Vec<AssetMeta>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, set_id, rel_path, role, origin, local_path, mime, file_ext, sha256, source_asset_id
                 FROM assets WHERE set_id = ?1 ORDER BY rel_path",
                params![set_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_asset(&row)?);
        }
        Ok(results)
    }

    /// List assets for a set filtered by role, ordered by relative path.
    pub async fn list_assets_by_role(
        &self,
        set_id: &str,
        role: AssetRole,
    ) -> Result<Vec<AssetMeta>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, set_id, rel_path, role, origin, local_path, mime, file_ext, sha256, source_asset_id
                 FROM assets WHERE set_id = ?1 AND role = ?2 ORDER BY rel_path",
                params![set_id, role.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_asset(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Delete all chunks belonging to an asset (used by forced re-index).
    pub async fn delete_chunks_for_asset(&self, asset_id: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM chunks WHERE asset_id = ?1", params![asset_id])
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Upsert a chunk by its content-addressed id.
    pub async fn upsert_chunk(&self, chunk: &ChunkRecord) -> Result<()> {
        self.check_writable()?;
        let metadata_json = serde_json::to_string(&chunk.metadata).map_err(storage_err)?;
        let embedding_json = match &chunk.embedding {
            Some(vector) => Some(serde_json::to_string(vector).map_err(storage_err)?),
            None => None,
        };
        self.conn
            .execute(
                "INSERT INTO chunks (id, asset_id, chunk_index, text, token_estimate, metadata_json, embedding_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   asset_id = excluded.asset_id,
                   chunk_index = excluded.chunk_index,
                   text = excluded.text,
                   token_estimate = excluded.token_estimate,
                   metadata_json = excluded.metadata_json",
                params![
                    chunk.id.as_str(),
                    chunk.asset_id.as_str(),
                    chunk.chunk_index as i64,
                    chunk.text.as_str(),
                    chunk.token_estimate as i64,
                    metadata_json.as_str(),
                    embedding_json.as_deref(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Store embedding vectors for a batch of chunk ids.
    pub async fn set_chunk_embeddings(&self, embeddings: &[(String, Vec<f32>)]) -> Result<()> {
        self.check_writable()?;
        for (chunk_id, vector) in embeddings {
            let embedding_json = serde_json::to_string(vector).map_err(storage_err)?;
            self.conn
                .execute(
                    "UPDATE chunks SET embedding_json = ?1 WHERE id = ?2",
                    params![embedding_json.as_str(), chunk_id.as_str()],
                )
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Count all chunks in a document set.
    pub async fn count_chunks(&self, set_id: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM chunks c JOIN assets a ON a.id = c.asset_id WHERE a.set_id = ?1",
                params![set_id],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as u64),
            _ => Ok(0),
        }
    }

    /// Load embedded chunks for a set as `(candidate, vector)` pairs, ordered
    /// by chunk id for deterministic downstream ranking. Optional role and
    /// asset-id filters narrow the candidate pool.
    pub async fn embedded_chunks(
        &self,
        set_id: &str,
        role: Option<AssetRole>,
        asset_ids: Option<&[String]>,
    ) -> Result<Vec<(RetrievalCandidate, Vec<f32>)>> {
        let (filter_sql, mut args) = candidate_filters(set_id, role, asset_ids);
        let sql = format!(
            "SELECT c.id, c.text, a.id, a.rel_path, a.role, c.embedding_json
             FROM chunks c JOIN assets a ON a.id = c.asset_id
             WHERE {filter_sql} AND c.embedding_json IS NOT NULL
             ORDER BY c.id"
        );

        let mut rows = self
            .conn
            .query(&sql, std::mem::take(&mut args))
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let candidate = row_to_candidate(&row)?;
            let embedding_json: String = row.get(5).map_err(storage_err)?;
            let vector: Vec<f32> =
                serde_json::from_str(&embedding_json).map_err(storage_err)?;
            results.push((candidate, vector));
        }
        Ok(results)
    }

    /// Full-text search over chunk text, ordered by relevance (best first),
    /// ties broken by ascending chunk id.
    pub async fn search_chunks(
        &self,
        set_id: &str,
        query: &str,
        role: Option<AssetRole>,
        asset_ids: Option<&[String]>,
        limit: u32,
    ) -> Result<Vec<RetrievalCandidate>> {
        let fts = fts_query(query);
        if fts.is_empty() {
            return Ok(vec![]);
        }

        let (filter_sql, mut args) = candidate_filters(set_id, role, asset_ids);
        args.push(libsql::Value::Text(fts));
        args.push(libsql::Value::Integer(i64::from(limit)));
        let sql = format!(
            "SELECT c.id, c.text, a.id, a.rel_path, a.role
             FROM chunks_fts fts
             JOIN chunks c ON c.rowid = fts.rowid
             JOIN assets a ON a.id = c.asset_id
             WHERE {filter_sql} AND chunks_fts MATCH ?
             ORDER BY rank, c.id ASC
             LIMIT ?"
        );

        let mut rows = self
            .conn
            .query(&sql, std::mem::take(&mut args))
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_candidate(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Variable schema operations
    // -----------------------------------------------------------------------

    /// Upsert a declared variable key.
    pub async fn upsert_variable_key(&self, key: &VariableKey) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO variable_keys (package_code, package_version, token, value_type, required, description, default_value, generation_policy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(package_code, package_version, token) DO UPDATE SET
                   value_type = excluded.value_type,
                   required = excluded.required,
                   description = excluded.description,
                   default_value = excluded.default_value,
                   generation_policy = excluded.generation_policy",
                params![
                    key.package_code.as_str(),
                    key.package_version.as_str(),
                    key.token.as_str(),
                    key.value_type.as_str(),
                    key.required as i64,
                    key.description.as_str(),
                    key.default_value.as_deref(),
                    key.generation_policy.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// List declared variable keys for a package version, ordered by token.
    pub async fn list_variable_keys(
        &self,
        package_code: &str,
        package_version: &str,
    ) -> Result<Vec<VariableKey>> {
        let mut rows = self
            .conn
            .query(
                "SELECT package_code, package_version, token, value_type, required, description, default_value, generation_policy
                 FROM variable_keys WHERE package_code = ?1 AND package_version = ?2
                 ORDER BY token",
                params![package_code, package_version],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_variable_key(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Resolved value operations
    // -----------------------------------------------------------------------

    /// Upsert a resolved value keyed by `(set_id, token)`. Last writer wins;
    /// precedence rules live in the resolver, not here.
    pub async fn upsert_variable_value(&self, value: &ResolvedValue) -> Result<()> {
        self.check_writable()?;
        let provenance_json = serde_json::to_string(&value.provenance).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO variable_values (set_id, token, value, source, confidence, provenance_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(set_id, token) DO UPDATE SET
                   value = excluded.value,
                   source = excluded.source,
                   confidence = excluded.confidence,
                   provenance_json = excluded.provenance_json,
                   updated_at = excluded.updated_at",
                params![
                    value.set_id.as_str(),
                    value.token.as_str(),
                    value.value.as_str(),
                    value.source.as_str(),
                    value.confidence,
                    provenance_json.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get the resolved value for one token, if any.
    pub async fn get_variable_value(
        &self,
        set_id: &str,
        token: &str,
    ) -> Result<Option<ResolvedValue>> {
        let mut rows = self
            .conn
            .query(
                "SELECT set_id, token, value, source, confidence, provenance_json
                 FROM variable_values WHERE set_id = ?1 AND token = ?2",
                params![set_id, token],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_resolved_value(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all resolved values for a set, ordered by token.
    pub async fn list_variable_values(&self, set_id: &str) -> Result<Vec<ResolvedValue>> {
        let mut rows = self
            .conn
            .query(
                "SELECT set_id, token, value, source, confidence, provenance_json
                 FROM variable_values WHERE set_id = ?1 ORDER BY token",
                params![set_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_resolved_value(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Placeholder snapshot operations
    // -----------------------------------------------------------------------

    /// Replace the placeholder snapshot for a template asset. Stale rows are
    /// purged before the new snapshot is written.
    pub async fn replace_placeholder_snapshot(
        &self,
        asset_id: &str,
        records: &[PlaceholderRecord],
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM template_placeholders WHERE asset_id = ?1",
                params![asset_id],
            )
            .await
            .map_err(storage_err)?;

        for record in records {
            self.conn
                .execute(
                    "INSERT INTO template_placeholders (id, asset_id, token, occurrences, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        record.id.as_str(),
                        record.asset_id.as_str(),
                        record.token.as_str(),
                        record.occurrences as i64,
                        record.status.as_str(),
                    ],
                )
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// List the placeholder snapshot for an asset, ordered by token.
    pub async fn list_placeholders(&self, asset_id: &str) -> Result<Vec<PlaceholderRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, asset_id, token, occurrences, status
                 FROM template_placeholders WHERE asset_id = ?1 ORDER BY token",
                params![asset_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_placeholder(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Insert a new run in QUEUED state. Returns the generated run ID.
    pub async fn insert_run(&self, set_id: &SetId, kind: RunKind) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, set_id, kind, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    set_id.to_string(),
                    kind.as_str(),
                    RunStatus::Queued.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Mark a run as RUNNING with a start timestamp.
    pub async fn mark_run_started(&self, run_id: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET status = ?1, started_at = ?2 WHERE id = ?3",
                params![RunStatus::Running.as_str(), now.as_str(), run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run finished with a terminal status and optional metrics.
    pub async fn mark_run_finished(
        &self,
        run_id: &str,
        status: RunStatus,
        metrics: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let metrics_json = match metrics {
            Some(value) => Some(serde_json::to_string(value).map_err(storage_err)?),
            None => None,
        };
        self.conn
            .execute(
                "UPDATE runs SET status = ?1, finished_at = ?2, metrics_json = ?3 WHERE id = ?4",
                params![status.as_str(), now.as_str(), metrics_json.as_deref(), run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Record the prompt version and model the run's planning step used.
    pub async fn set_run_plan_meta(
        &self,
        run_id: &str,
        prompt_version: &str,
        model: &str,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE runs SET prompt_version = ?1, model = ?2 WHERE id = ?3",
                params![prompt_version, model, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a run's current status.
    pub async fn get_run_status(&self, run_id: &str) -> Result<Option<RunStatus>> {
        let mut rows = self
            .conn
            .query("SELECT status FROM runs WHERE id = ?1", params![run_id])
            .await
            .map_err(storage_err)?;
        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row.get(0).map_err(storage_err)?;
                Ok(RunStatus::parse(&raw))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Append a structured event to a run's log.
    pub async fn insert_run_event(
        &self,
        run_id: &str,
        level: &str,
        message: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.check_writable()?;
        let payload_json = serde_json::to_string(payload).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO run_events (run_id, level, message, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![run_id, level, message, payload_json.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// List a run's events in insertion order as `(level, message, payload)`.
    pub async fn list_run_events(
        &self,
        run_id: &str,
    ) -> Result<Vec<(String, String, serde_json::Value)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT level, message, payload_json FROM run_events
                 WHERE run_id = ?1 ORDER BY id",
                params![run_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let level: String = row.get(0).map_err(storage_err)?;
            let message: String = row.get(1).map_err(storage_err)?;
            let payload_json: String = row.get(2).map_err(storage_err)?;
            let payload = serde_json::from_str(&payload_json).map_err(storage_err)?;
            results.push((level, message, payload));
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Query helpers
// ---------------------------------------------------------------------------

/// Build the shared candidate filter clause plus its positional args.
fn candidate_filters(
    set_id: &str,
    role: Option<AssetRole>,
    asset_ids: Option<&[String]>,
) -> (String, Vec<libsql::Value>) {
    let mut clauses = vec!["a.set_id = ?".to_string()];
    let mut args = vec![libsql::Value::Text(set_id.to_string())];

    if let Some(role) = role {
        clauses.push("a.role = ?".to_string());
        args.push(libsql::Value::Text(role.as_str().to_string()));
    }
    if let Some(ids) = asset_ids {
        if !ids.is_empty() {
            let marks = vec!["?"; ids.len()].join(", ");
            clauses.push(format!("a.id IN ({marks})"));
            for id in ids {
                args.push(libsql::Value::Text(id.clone()));
            }
        }
    }

    (clauses.join(" AND "), args)
}

/// Sanitize free text into an FTS5 query: each word quoted, implicit AND.
fn fts_query(raw: &str) -> String {
    raw.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| format!("\"{word}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn row_to_document_set(row: &libsql::Row) -> Result<DocumentSet> {
    Ok(DocumentSet {
        id: {
            let raw: String = row.get(0).map_err(storage_err)?;
            raw.parse().map_err(storage_err)?
        },
        name: row.get(1).map_err(storage_err)?,
        package_code: row.get(2).map_err(storage_err)?,
        package_version: row.get(3).map_err(storage_err)?,
        created_at: parse_datetime(&row.get::<String>(4).map_err(storage_err)?)?,
        updated_at: parse_datetime(&row.get::<String>(5).map_err(storage_err)?)?,
    })
}

fn row_to_asset(row: &libsql::Row) -> Result<AssetMeta> {
    let role_raw: String = row.get(3).map_err(storage_err)?;
    let origin_raw: String = row.get(4).map_err(storage_err)?;
    Ok(AssetMeta {
        id: row.get(0).map_err(storage_err)?,
        set_id: row.get(1).map_err(storage_err)?,
        rel_path: row.get(2).map_err(storage_err)?,
        role: AssetRole::parse(&role_raw)
            .ok_or_else(|| DocforgeError::Storage(format!("invalid asset role: {role_raw}")))?,
        origin: AssetOrigin::parse(&origin_raw)
            .ok_or_else(|| DocforgeError::Storage(format!("invalid asset origin: {origin_raw}")))?,
        local_path: row.get(5).map_err(storage_err)?,
        mime: row.get(6).map_err(storage_err)?,
        file_ext: row.get(7).map_err(storage_err)?,
        sha256: row.get(8).map_err(storage_err)?,
        source_asset_id: row.get::<String>(9).ok(),
    })
}

fn row_to_candidate(row: &libsql::Row) -> Result<RetrievalCandidate> {
    let role_raw: String = row.get(4).map_err(storage_err)?;
    Ok(RetrievalCandidate {
        chunk_id: row.get(0).map_err(storage_err)?,
        text: row.get(1).map_err(storage_err)?,
        asset_id: row.get(2).map_err(storage_err)?,
        asset_path: row.get(3).map_err(storage_err)?,
        role: AssetRole::parse(&role_raw)
            .ok_or_else(|| DocforgeError::Storage(format!("invalid asset role: {role_raw}")))?,
    })
}

fn row_to_variable_key(row: &libsql::Row) -> Result<VariableKey> {
    let policy_raw: String = row.get(7).map_err(storage_err)?;
    Ok(VariableKey {
        package_code: row.get(0).map_err(storage_err)?,
        package_version: row.get(1).map_err(storage_err)?,
        token: row.get(2).map_err(storage_err)?,
        value_type: row.get(3).map_err(storage_err)?,
        required: row.get::<i64>(4).map_err(storage_err)? != 0,
        description: row.get(5).map_err(storage_err)?,
        default_value: row.get::<String>(6).ok(),
        generation_policy: GenerationPolicy::parse(&policy_raw).ok_or_else(|| {
            DocforgeError::Storage(format!("invalid generation policy: {policy_raw}"))
        })?,
    })
}

fn row_to_resolved_value(row: &libsql::Row) -> Result<ResolvedValue> {
    let source_raw: String = row.get(3).map_err(storage_err)?;
    let provenance_json: String = row.get(5).map_err(storage_err)?;
    Ok(ResolvedValue {
        set_id: row.get(0).map_err(storage_err)?,
        token: row.get(1).map_err(storage_err)?,
        value: row.get(2).map_err(storage_err)?,
        source: VariableSource::parse(&source_raw).ok_or_else(|| {
            DocforgeError::Storage(format!("invalid variable source: {source_raw}"))
        })?,
        confidence: row.get::<f64>(4).ok(),
        provenance: serde_json::from_str(&provenance_json).map_err(storage_err)?,
    })
}

fn row_to_placeholder(row: &libsql::Row) -> Result<PlaceholderRecord> {
    let status_raw: String = row.get(4).map_err(storage_err)?;
    Ok(PlaceholderRecord {
        id: row.get(0).map_err(storage_err)?,
        asset_id: row.get(1).map_err(storage_err)?,
        token: row.get(2).map_err(storage_err)?,
        occurrences: row.get::<i64>(3).map_err(storage_err)? as usize,
        status: PlaceholderStatus::parse(&status_raw).ok_or_else(|| {
            DocforgeError::Storage(format!("invalid placeholder status: {status_raw}"))
        })?,
    })
}

fn parse_datetime(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| DocforgeError::Storage(format!("invalid date: {e}")))
}
