//! Package ingestion: vault scan, asset copy, chunk indexing, placeholder
//! snapshots, and batch embedding.
//!
//! Per-asset extraction failures are isolated and counted. Two conditions
//! abort the whole run: an embedding batch failure, and an index pass that
//! leaves the set with zero chunks.

use std::collections::BTreeSet;

use serde_json::json;
use uuid::Uuid;

use docforge_chunking::{ChunkConfig, estimate_token_count, split_text};
use docforge_placeholders::{count_tokens, raw_markup_text};
use docforge_shared::{
    AssetMeta, AssetOrigin, AssetRole, ChunkRecord, DocforgeError, DocumentSet, FileStore,
    LocalFileStore, PackageEntry, PlaceholderRecord, PlaceholderStatus, Result, RunKind,
    RunStatus, SetId, file_sha256, sha256_bytes, sha256_text,
};

use crate::events::RunLogger;
use crate::{Pipeline, catalog, extract, rel_path_str, resolve_path};

/// Chunks per embedding request.
const EMBED_BATCH: usize = 64;

/// Counters accumulated over one ingestion run.
#[derive(Debug, Default, Clone)]
pub struct IngestionStats {
    pub files_seen: usize,
    pub files_skipped: usize,
    pub assets_created: usize,
    pub assets_unchanged: usize,
    pub templates_indexed: usize,
    pub references_indexed: usize,
    pub extraction_failures: usize,
    pub chunks_written: usize,
    pub chunks_embedded: usize,
    pub placeholders_found: usize,
}

/// Result of one ingestion run.
#[derive(Debug)]
pub struct IngestionOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub stats: IngestionStats,
}

/// Ingest a set's package vault: scan, classify, copy, index, embed.
///
/// With `force` set, unchanged assets are re-indexed from scratch.
pub async fn ingest_package_for_set(
    pipeline: &Pipeline,
    set_id: &SetId,
    force: bool,
) -> Result<IngestionOutcome> {
    let set = pipeline.require_set(&set_id.to_string()).await?;
    let entry = pipeline.package_entry(&set)?.clone();

    let run_id = pipeline.storage.insert_run(set_id, RunKind::Ingestion).await?;
    pipeline.storage.mark_run_started(&run_id).await?;
    let logger = RunLogger::new(&pipeline.storage, run_id.clone());

    match ingest_inner(pipeline, &set, &entry, force, &logger).await {
        Ok(stats) => {
            let status = if stats.extraction_failures > 0 {
                RunStatus::Partial
            } else {
                RunStatus::Succeeded
            };
            let metrics = json!({
                "files_seen": stats.files_seen,
                "chunks_written": stats.chunks_written,
                "chunks_embedded": stats.chunks_embedded,
                "placeholders_found": stats.placeholders_found,
                "extraction_failures": stats.extraction_failures,
            });
            pipeline
                .storage
                .mark_run_finished(&run_id, status, Some(&metrics))
                .await?;
            pipeline.storage.touch_document_set(&set.id.to_string()).await?;
            Ok(IngestionOutcome {
                run_id,
                status,
                stats,
            })
        }
        Err(e) => {
            logger
                .error("ingestion aborted", json!({ "error": e.to_string() }))
                .await;
            pipeline
                .storage
                .mark_run_finished(&run_id, RunStatus::Failed, None)
                .await?;
            Err(e)
        }
    }
}

async fn ingest_inner(
    pipeline: &Pipeline,
    set: &DocumentSet,
    entry: &PackageEntry,
    force: bool,
    logger: &RunLogger<'_>,
) -> Result<IngestionStats> {
    let store = LocalFileStore;
    let source_dir = resolve_path(&entry.source_dir)?;
    let assets_dir = pipeline.assets_dir(&set.id)?;
    let set_id = set.id.to_string();

    let declared: BTreeSet<String> = pipeline
        .storage
        .list_variable_keys(&set.package_code, &set.package_version)
        .await?
        .into_iter()
        .map(|k| k.token)
        .collect();

    let files = store.list_files(&source_dir)?;
    if files.is_empty() {
        return Err(DocforgeError::not_found(format!(
            "package vault is empty: {}",
            source_dir.display()
        )));
    }

    logger
        .info(
            "vault scan complete",
            json!({ "files": files.len(), "source_dir": source_dir.display().to_string() }),
        )
        .await;
    pipeline.progress.begin("Ingesting package", files.len() as u64);

    let mut stats = IngestionStats::default();
    let chunk_config = ChunkConfig {
        target_chars: entry.target_chars,
        overlap_chars: entry.overlap_chars,
    };
    let mut pending_embed: Vec<(String, String)> = Vec::new();

    for path in &files {
        stats.files_seen += 1;
        let rel_path = rel_path_str(&source_dir, path);
        pipeline.progress.advance(&rel_path);

        let Some(role) = catalog::classify_asset(entry, &rel_path) else {
            stats.files_skipped += 1;
            continue;
        };
        let ext = catalog::path_ext(&rel_path);

        let sha = file_sha256(path)?;
        let local_path = assets_dir.join(&rel_path);
        store.write(&local_path, &store.read(path)?)?;

        let candidate = AssetMeta {
            id: Uuid::now_v7().to_string(),
            set_id: set_id.clone(),
            rel_path: rel_path.clone(),
            role,
            origin: AssetOrigin::PackageVault,
            local_path: local_path.to_string_lossy().into_owned(),
            mime: catalog::mime_for_ext(&ext).to_string(),
            file_ext: ext.clone(),
            sha256: sha,
            source_asset_id: None,
        };
        let (asset_id, created) = pipeline.storage.upsert_asset(&candidate).await?;
        if created {
            stats.assets_created += 1;
        } else if !force {
            stats.assets_unchanged += 1;
            continue;
        }

        match role {
            AssetRole::Template => {
                if let Err(e) =
                    index_template(pipeline, &asset_id, &local_path, &ext, &declared, &mut stats)
                        .await
                {
                    if e.is_run_fatal() {
                        return Err(e);
                    }
                    stats.extraction_failures += 1;
                    logger
                        .warn(
                            "template indexing failed",
                            json!({ "rel_path": rel_path, "error": e.to_string() }),
                        )
                        .await;
                }
            }
            AssetRole::Reference | AssetRole::CustomerReference => {
                match index_reference(
                    pipeline,
                    set,
                    entry,
                    &asset_id,
                    role,
                    &rel_path,
                    &local_path,
                    &ext,
                    &chunk_config,
                    force,
                )
                .await
                {
                    Ok(chunks) => {
                        stats.references_indexed += 1;
                        stats.chunks_written += chunks.len();
                        pending_embed.extend(chunks);
                    }
                    Err(e) if !e.is_run_fatal() => {
                        stats.extraction_failures += 1;
                        logger
                            .warn(
                                "reference extraction failed",
                                json!({ "rel_path": rel_path, "error": e.to_string() }),
                            )
                            .await;
                    }
                    Err(e) => return Err(e),
                }
            }
            AssetRole::GeneratedOutput => {}
        }
    }

    let total_chunks = pipeline.storage.count_chunks(&set_id).await?;
    if total_chunks == 0 {
        return Err(DocforgeError::ZeroChunks {
            set_id: set_id.clone(),
        });
    }

    // Embedding runs after all text is indexed; a batch failure is fatal.
    for batch in pending_embed.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let (vectors, model) = pipeline
            .embeddings
            .embed(&texts, &pipeline.config.openai.embed_model)
            .await?;
        let pairs: Vec<(String, Vec<f32>)> = batch
            .iter()
            .map(|(id, _)| id.clone())
            .zip(vectors)
            .collect();
        pipeline.storage.set_chunk_embeddings(&pairs).await?;
        stats.chunks_embedded += pairs.len();
        tracing::debug!(batch = pairs.len(), %model, "embedded chunk batch");
    }

    pipeline.progress.finish("Ingestion complete");
    logger
        .info(
            "ingestion complete",
            json!({
                "chunks_written": stats.chunks_written,
                "chunks_embedded": stats.chunks_embedded,
                "templates": stats.templates_indexed,
                "references": stats.references_indexed,
            }),
        )
        .await;
    Ok(stats)
}

/// Extract placeholder tokens from a template and replace its snapshot.
async fn index_template(
    pipeline: &Pipeline,
    asset_id: &str,
    local_path: &std::path::Path,
    ext: &str,
    declared: &BTreeSet<String>,
    stats: &mut IngestionStats,
) -> Result<()> {
    let bytes = std::fs::read(local_path).map_err(|e| DocforgeError::io(local_path, e))?;
    let markup = raw_markup_text(&bytes, ext)?;

    let records: Vec<PlaceholderRecord> = count_tokens(&markup)
        .into_iter()
        .map(|(token, occurrences)| PlaceholderRecord {
            id: sha256_text(&format!("{asset_id}:{token}")),
            asset_id: asset_id.to_string(),
            status: if declared.contains(&token) {
                PlaceholderStatus::Known
            } else {
                PlaceholderStatus::Unknown
            },
            token,
            occurrences,
        })
        .collect();

    pipeline
        .storage
        .replace_placeholder_snapshot(asset_id, &records)
        .await?;
    stats.templates_indexed += 1;
    stats.placeholders_found += records.len();
    Ok(())
}

/// Chunk one reference asset. Returns `(chunk_id, text)` pairs for the
/// embedding pass.
#[allow(clippy::too_many_arguments)]
async fn index_reference(
    pipeline: &Pipeline,
    set: &DocumentSet,
    entry: &PackageEntry,
    asset_id: &str,
    role: AssetRole,
    rel_path: &str,
    local_path: &std::path::Path,
    ext: &str,
    chunk_config: &ChunkConfig,
    force: bool,
) -> Result<Vec<(String, String)>> {
    let text = extract::extract_text(local_path, ext)?;
    if force {
        pipeline.storage.delete_chunks_for_asset(asset_id).await?;
    }

    let pieces = split_text(&text, chunk_config);
    let mut pending = Vec::with_capacity(pieces.len());
    for (index, piece) in pieces.into_iter().enumerate() {
        let token_estimate = estimate_token_count(&piece);
        let chunk = ChunkRecord {
            id: sha256_text(&format!("{asset_id}:{index}:{}", sha256_text(&piece))),
            asset_id: asset_id.to_string(),
            chunk_index: index,
            text: piece,
            token_estimate,
            metadata: json!({
                "package_code": set.package_code,
                "package_version": set.package_version,
                "set_id": set.id.to_string(),
                "asset_role": role.as_str(),
                "asset_path": rel_path,
                "language": entry.language,
            }),
            embedding: None,
        };
        pipeline.storage.upsert_chunk(&chunk).await?;
        pending.push((chunk.id, chunk.text));
    }
    Ok(pending)
}

/// Ingest a single customer-uploaded reference file into an existing set.
///
/// The file is copied under `assets/uploads/`, chunked, and embedded. Errors
/// are not isolated here; the caller handles the single file's outcome.
pub async fn ingest_uploaded_reference(
    pipeline: &Pipeline,
    set_id: &SetId,
    source_path: &std::path::Path,
) -> Result<IngestionStats> {
    let set = pipeline.require_set(&set_id.to_string()).await?;
    let entry = pipeline.package_entry(&set)?.clone();
    let store = LocalFileStore;

    let file_name = source_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DocforgeError::validation("upload path has no file name"))?;
    let rel_path = format!("uploads/{file_name}");
    let ext = catalog::path_ext(&rel_path);
    let local_path = pipeline.assets_dir(set_id)?.join(&rel_path);
    let bytes = store.read(source_path)?;
    store.write(&local_path, &bytes)?;

    let candidate = AssetMeta {
        id: Uuid::now_v7().to_string(),
        set_id: set_id.to_string(),
        rel_path: rel_path.clone(),
        role: AssetRole::CustomerReference,
        origin: AssetOrigin::Upload,
        local_path: local_path.to_string_lossy().into_owned(),
        mime: catalog::mime_for_ext(&ext).to_string(),
        file_ext: ext.clone(),
        sha256: sha256_bytes(&bytes),
        source_asset_id: None,
    };
    let (asset_id, _created) = pipeline.storage.upsert_asset(&candidate).await?;

    let chunk_config = ChunkConfig {
        target_chars: entry.target_chars,
        overlap_chars: entry.overlap_chars,
    };
    let pending = index_reference(
        pipeline,
        &set,
        &entry,
        &asset_id,
        AssetRole::CustomerReference,
        &rel_path,
        &local_path,
        &ext,
        &chunk_config,
        true,
    )
    .await?;

    let mut stats = IngestionStats {
        files_seen: 1,
        references_indexed: 1,
        chunks_written: pending.len(),
        ..Default::default()
    };

    for batch in pending.chunks(EMBED_BATCH) {
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let (vectors, _model) = pipeline
            .embeddings
            .embed(&texts, &pipeline.config.openai.embed_model)
            .await?;
        let pairs: Vec<(String, Vec<f32>)> = batch
            .iter()
            .map(|(id, _)| id.clone())
            .zip(vectors)
            .collect();
        pipeline.storage.set_chunk_embeddings(&pairs).await?;
        stats.chunks_embedded += pairs.len();
    }

    pipeline.storage.touch_document_set(&set_id.to_string()).await?;
    Ok(stats)
}
