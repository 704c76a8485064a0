//! Generation run execution.
//!
//! Plans outputs, resolves the variables the planned templates require,
//! and renders each planned template with the effective value map. Every
//! output is isolated: a render failure is recorded against that output
//! and the run continues. The run fails outright only when a storage or
//! planning step errors, or when every planned output failed.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use uuid::Uuid;

use docforge_placeholders::apply_values_to_archive;
use docforge_shared::{
    AssetMeta, AssetOrigin, AssetRole, DocumentSet, FileStore, LocalFileStore, Result, RunKind,
    RunStatus, SetId, sha256_bytes,
};

use crate::events::RunLogger;
use crate::planning::{self, GenerationPlan};
use crate::variables::{self, ResolutionReport, ResolutionRequest};
use crate::{Pipeline, catalog, resolve_path};

/// Caller-supplied inputs to one generation run.
#[derive(Debug, Default, Clone)]
pub struct GenerationRequest {
    /// Customer profile values (persisted as customer input).
    pub profile: BTreeMap<String, String>,
    /// Operator overrides (persisted as human overrides).
    pub overrides: BTreeMap<String, String>,
    /// Per-output overrides keyed by output path; applied only to that
    /// output's substitution map, never persisted.
    pub file_overrides: BTreeMap<String, BTreeMap<String, String>>,
    /// Template asset ids to generate; empty means every planned template.
    /// Deselected plan entries are reported as skips.
    pub selected_asset_ids: BTreeSet<String>,
    /// Refine the deterministic plan with a completion call.
    pub use_ai_plan: bool,
}

/// Outcome of one planned output.
#[derive(Debug, Clone)]
pub enum OutputResult {
    Generated {
        asset_id: String,
        /// Tokens left unsubstituted in the rendered document.
        unresolved: Vec<String>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct OutputOutcome {
    pub template_rel_path: String,
    pub output_rel_path: String,
    pub result: OutputResult,
}

/// Full report of one generation run.
#[derive(Debug)]
pub struct GenerationReport {
    pub run_id: String,
    pub status: RunStatus,
    pub generated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outputs: Vec<OutputOutcome>,
    pub resolution: ResolutionReport,
    /// Union of unresolved tokens across all rendered outputs.
    pub unresolved_tokens: BTreeSet<String>,
    /// Template tokens with no declared variable key.
    pub unknown_tokens: BTreeSet<String>,
}

/// Execute a generation run for a document set.
pub async fn execute_generation(
    pipeline: &Pipeline,
    set_id: &SetId,
    request: &GenerationRequest,
) -> Result<GenerationReport> {
    let set = pipeline.require_set(&set_id.to_string()).await?;

    let run_id = pipeline
        .storage
        .insert_run(set_id, RunKind::Generation)
        .await?;
    pipeline.storage.mark_run_started(&run_id).await?;
    let logger = RunLogger::new(&pipeline.storage, run_id.clone());

    match generate_inner(pipeline, &set, request, &logger).await {
        Ok(mut report) => {
            report.run_id = run_id.clone();
            let metrics = json!({
                "generated": report.generated,
                "failed": report.failed,
                "skipped": report.skipped,
                "unresolved_tokens": report.unresolved_tokens.len(),
                "unknown_tokens": report.unknown_tokens.len(),
            });
            pipeline
                .storage
                .mark_run_finished(&run_id, report.status, Some(&metrics))
                .await?;
            pipeline.storage.touch_document_set(&set.id.to_string()).await?;
            Ok(report)
        }
        Err(e) => {
            logger
                .error("generation aborted", json!({ "error": e.to_string() }))
                .await;
            pipeline
                .storage
                .mark_run_finished(&run_id, RunStatus::Failed, None)
                .await?;
            Err(e)
        }
    }
}

async fn generate_inner(
    pipeline: &Pipeline,
    set: &DocumentSet,
    request: &GenerationRequest,
    logger: &RunLogger<'_>,
) -> Result<GenerationReport> {
    let entry = pipeline.package_entry(set)?.clone();
    let store = LocalFileStore;
    let set_id = set.id.to_string();

    let playbook = catalog::load_playbook(&resolve_path(&entry.playbook_path)?)?;
    let templates = pipeline
        .storage
        .list_assets_by_role(&set_id, AssetRole::Template)
        .await?;
    let mut placeholders = BTreeMap::new();
    for template in &templates {
        placeholders.insert(
            template.id.clone(),
            pipeline.storage.list_placeholders(&template.id).await?,
        );
    }

    let base = planning::deterministic_plan(&playbook, &templates, &placeholders);
    let plan: GenerationPlan = if request.use_ai_plan {
        planning::refine_plan(pipeline, &playbook, &templates, &placeholders, base).await
    } else {
        base
    };
    if let (Some(prompt), Some(model)) = (&plan.prompt_version, &plan.model) {
        pipeline
            .storage
            .set_run_plan_meta(logger.run_id(), prompt, model)
            .await?;
    }
    logger
        .info(
            "plan ready",
            json!({
                "outputs": plan.outputs.len(),
                "required_tokens": plan.required_tokens.len(),
                "unknown_tokens": plan.unknown_tokens,
            }),
        )
        .await;

    let resolution = variables::resolve_variables(
        pipeline,
        set,
        &ResolutionRequest {
            profile: request.profile.clone(),
            overrides: request.overrides.clone(),
        },
        &plan.required_tokens,
        logger,
    )
    .await?;
    logger
        .info(
            "variables resolved",
            json!({
                "required": plan.required_tokens.len(),
                "kept": resolution.kept,
                "from_profile": resolution.from_profile,
                "from_defaults": resolution.from_defaults,
                "inferred": resolution.inferred,
                "drafted": resolution.drafted,
                "unresolved": resolution.unresolved,
            }),
        )
        .await;

    // Playbook entries the plan could not satisfy are reported as skips.
    let planned: BTreeSet<&str> = plan.outputs.iter().map(|o| o.template_rel_path.as_str()).collect();
    let mut outputs: Vec<OutputOutcome> = playbook
        .outputs
        .iter()
        .filter(|o| !planned.contains(o.template.as_str()))
        .map(|o| OutputOutcome {
            template_rel_path: o.template.clone(),
            output_rel_path: o.output.clone(),
            result: OutputResult::Skipped {
                reason: "template not ingested".into(),
            },
        })
        .collect();

    pipeline.progress.begin("Generating outputs", plan.outputs.len() as u64);

    let by_rel_path: BTreeMap<&str, &AssetMeta> = templates
        .iter()
        .map(|t| (t.rel_path.as_str(), t))
        .collect();
    let outputs_dir = pipeline.outputs_dir(&set.id)?;
    let mut unresolved_tokens = BTreeSet::new();
    let mut generated = 0usize;
    let mut failed = 0usize;

    for planned_output in &plan.outputs {
        pipeline.progress.advance(&planned_output.output_rel_path);
        let Some(template) = by_rel_path.get(planned_output.template_rel_path.as_str()) else {
            outputs.push(OutputOutcome {
                template_rel_path: planned_output.template_rel_path.clone(),
                output_rel_path: planned_output.output_rel_path.clone(),
                result: OutputResult::Skipped {
                    reason: "template not ingested".into(),
                },
            });
            continue;
        };
        if !request.selected_asset_ids.is_empty()
            && !request.selected_asset_ids.contains(&template.id)
        {
            outputs.push(OutputOutcome {
                template_rel_path: planned_output.template_rel_path.clone(),
                output_rel_path: planned_output.output_rel_path.clone(),
                result: OutputResult::Skipped {
                    reason: "deselected by caller".into(),
                },
            });
            continue;
        }

        let result = render_output(
            pipeline,
            &store,
            &set_id,
            template,
            &planned_output.output_rel_path,
            &outputs_dir,
            request,
        )
        .await;

        match result {
            Ok((asset_id, unresolved)) => {
                unresolved_tokens.extend(unresolved.iter().cloned());
                generated += 1;
                logger
                    .info(
                        "output generated",
                        json!({
                            "output": planned_output.output_rel_path,
                            "unresolved": unresolved,
                        }),
                    )
                    .await;
                outputs.push(OutputOutcome {
                    template_rel_path: planned_output.template_rel_path.clone(),
                    output_rel_path: planned_output.output_rel_path.clone(),
                    result: OutputResult::Generated {
                        asset_id,
                        unresolved,
                    },
                });
            }
            Err(e) => {
                failed += 1;
                logger
                    .warn(
                        "output failed",
                        json!({
                            "output": planned_output.output_rel_path,
                            "error": e.to_string(),
                        }),
                    )
                    .await;
                outputs.push(OutputOutcome {
                    template_rel_path: planned_output.template_rel_path.clone(),
                    output_rel_path: planned_output.output_rel_path.clone(),
                    result: OutputResult::Failed {
                        reason: e.to_string(),
                    },
                });
            }
        }
    }

    pipeline.progress.finish("Generation complete");
    let skipped = outputs
        .iter()
        .filter(|o| matches!(o.result, OutputResult::Skipped { .. }))
        .count();
    let status = classify_status(generated, failed);

    Ok(GenerationReport {
        run_id: String::new(), // filled by the caller
        status,
        generated,
        failed,
        skipped,
        outputs,
        resolution,
        unresolved_tokens,
        unknown_tokens: plan.unknown_tokens,
    })
}

/// A run fails outright only when every attempted output failed; any mix of
/// failures and successes is partial.
fn classify_status(generated: usize, failed: usize) -> RunStatus {
    if failed > 0 && generated == 0 {
        RunStatus::Failed
    } else if failed > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Succeeded
    }
}

/// Render one output: substitute values into the template archive, write
/// the file, and register the generated asset.
async fn render_output(
    pipeline: &Pipeline,
    store: &LocalFileStore,
    set_id: &str,
    template: &AssetMeta,
    output_rel_path: &str,
    outputs_dir: &std::path::Path,
    request: &GenerationRequest,
) -> Result<(String, Vec<String>)> {
    let effective = variables::build_effective_map(
        &pipeline.storage,
        set_id,
        &request.overrides,
        request.file_overrides.get(output_rel_path),
    )
    .await?;

    let template_bytes = store.read(std::path::Path::new(&template.local_path))?;
    let (rendered, unresolved) =
        apply_values_to_archive(&template_bytes, &template.file_ext, &effective)?;

    let output_path = outputs_dir.join(output_rel_path);
    store.write(&output_path, &rendered)?;

    let asset = AssetMeta {
        id: Uuid::now_v7().to_string(),
        set_id: set_id.to_string(),
        rel_path: format!("outputs/{output_rel_path}"),
        role: AssetRole::GeneratedOutput,
        origin: AssetOrigin::Generated,
        local_path: output_path.to_string_lossy().into_owned(),
        mime: catalog::mime_for_ext(&template.file_ext).to_string(),
        file_ext: template.file_ext.clone(),
        sha256: sha256_bytes(&rendered),
        source_asset_id: Some(template.id.clone()),
    };
    let (asset_id, _created) = pipeline.storage.upsert_asset(&asset).await?;

    Ok((asset_id, unresolved.into_iter().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use async_trait::async_trait;

    use docforge_ai::{CompletionClient, EmbeddingClient, JsonCompletion};
    use docforge_shared::{
        AppConfig, DocforgeError, PackageEntry, VariableSource,
    };
    use docforge_storage::Storage;

    use crate::events::SilentProgress;
    use crate::ingestion::{ingest_package_for_set, ingest_uploaded_reference};

    // -- fixtures ------------------------------------------------------------

    struct CannedCompletions;

    #[async_trait]
    impl CompletionClient for CannedCompletions {
        async fn complete_json(
            &self,
            model: &str,
            _system_prompt: &str,
            _user_prompt: &str,
            _temperature: f32,
            _max_tokens: u32,
            _retries: u32,
        ) -> docforge_shared::Result<JsonCompletion> {
            let payload = serde_json::json!({
                "values": {
                    "SCOPE": {"value": "Design and production of widgets", "confidence": 0.8}
                }
            });
            Ok(JsonCompletion {
                payload: payload.as_object().unwrap().clone(),
                model: model.to_string(),
            })
        }
    }

    struct FailingCompletions;

    #[async_trait]
    impl CompletionClient for FailingCompletions {
        async fn complete_json(
            &self,
            _model: &str,
            _system_prompt: &str,
            _user_prompt: &str,
            _temperature: f32,
            _max_tokens: u32,
            _retries: u32,
        ) -> docforge_shared::Result<JsonCompletion> {
            Err(DocforgeError::AiResponse(
                "no parseable JSON after retries".into(),
            ))
        }
    }

    struct CannedEmbedder;

    #[async_trait]
    impl EmbeddingClient for CannedEmbedder {
        async fn embed(
            &self,
            texts: &[String],
            model: &str,
        ) -> docforge_shared::Result<(Vec<Vec<f32>>, String)> {
            Ok((texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect(), model.to_string()))
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingClient for FailingEmbedder {
        async fn embed(
            &self,
            _texts: &[String],
            _model: &str,
        ) -> docforge_shared::Result<(Vec<Vec<f32>>, String)> {
            Err(DocforgeError::Embedding("service down".into()))
        }
    }

    fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();

        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(b"<Types/>").unwrap();

        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
            .collect();
        writer.start_file("word/document.xml", options).unwrap();
        writer
            .write_all(format!("<w:document><w:body>{body}</w:body></w:document>").as_bytes())
            .unwrap();
        writer.finish().unwrap();
        cursor.into_inner()
    }

    fn read_docx_body(bytes: &[u8]) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name("word/document.xml").unwrap();
        let mut content = String::new();
        std::io::Read::read_to_string(&mut file, &mut content).unwrap();
        content
    }

    /// Lay out a temp vault, schema, and playbook; return the config root.
    fn build_fixture(root: &Path) -> AppConfig {
        let vault = root.join("vault");
        std::fs::create_dir_all(vault.join("templates")).unwrap();
        std::fs::create_dir_all(vault.join("references")).unwrap();

        std::fs::write(
            vault.join("templates/manual.docx"),
            build_docx(&[
                "Quality manual for {{COMPANY_NAME}} in {{CITY}}.",
                "Scope: {{SCOPE}}",
                "Reviewer: {{UNKNOWN_REVIEWER}}",
            ]),
        )
        .unwrap();
        std::fs::write(
            vault.join("references/norm.txt"),
            "Context of the organization.\n\nThe scope of the quality management system \
             shall be documented.\n\nInternal audits are planned at defined intervals.",
        )
        .unwrap();

        let schema_path = root.join("schema.json");
        std::fs::write(
            &schema_path,
            serde_json::json!({
                "variables": [
                    {"token": "COMPANY_NAME", "required": true, "description": "Legal name"},
                    {"token": "CITY", "default_value": "Berlin"},
                    {"token": "SCOPE", "generation_policy": "ai_draft", "description": "QMS scope"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let playbook_path = root.join("playbook.json");
        std::fs::write(
            &playbook_path,
            serde_json::json!({
                "outputs": [
                    {"template": "templates/manual.docx", "output": "manual.docx"},
                    {"template": "templates/ghost.docx", "output": "ghost.docx"}
                ]
            })
            .to_string(),
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.defaults.data_root = root.join("sets").to_string_lossy().into_owned();
        config.packages.push(PackageEntry {
            code: "ISO9001".into(),
            version: "v1".into(),
            source_dir: vault.to_string_lossy().into_owned(),
            template_prefixes: vec!["templates".into()],
            reference_prefixes: vec!["references".into()],
            template_file_exts: vec!["docx".into()],
            reference_file_exts: vec!["txt".into(), "md".into()],
            language: "en".into(),
            target_chars: 200,
            overlap_chars: 40,
            variable_schema_path: schema_path.to_string_lossy().into_owned(),
            playbook_path: playbook_path.to_string_lossy().into_owned(),
        });
        config
    }

    async fn fixture_pipeline_with(
        root: &Path,
        completions: Arc<dyn CompletionClient>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Pipeline {
        let config = build_fixture(root);
        let storage = Storage::open(&root.join("docforge.db")).await.unwrap();
        Pipeline::new(storage, config, completions, embedder, Arc::new(SilentProgress))
    }

    async fn fixture_pipeline(root: &Path, embedder: Arc<dyn EmbeddingClient>) -> Pipeline {
        fixture_pipeline_with(root, Arc::new(CannedCompletions), embedder).await
    }

    fn temp_root() -> PathBuf {
        let root = std::env::temp_dir().join(format!("df_exec_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    // -- tests ---------------------------------------------------------------

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(2, 0), RunStatus::Succeeded);
        assert_eq!(classify_status(0, 0), RunStatus::Succeeded);
        assert_eq!(classify_status(2, 1), RunStatus::Partial);
        assert_eq!(classify_status(0, 3), RunStatus::Failed);
    }

    #[tokio::test]
    async fn ingest_then_generate_end_to_end() {
        let root = temp_root();
        let pipeline = fixture_pipeline(&root, Arc::new(CannedEmbedder)).await;

        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .expect("create set");

        let ingest = ingest_package_for_set(&pipeline, &set.id, false)
            .await
            .expect("ingest");
        assert_eq!(ingest.status, RunStatus::Succeeded);
        assert_eq!(ingest.stats.templates_indexed, 1);
        assert_eq!(ingest.stats.references_indexed, 1);
        assert!(ingest.stats.chunks_written > 0);
        assert_eq!(ingest.stats.chunks_embedded, ingest.stats.chunks_written);

        let mut request = GenerationRequest::default();
        request.profile.insert("COMPANY_NAME".into(), "Acme GmbH".into());
        let report = execute_generation(&pipeline, &set.id, &request)
            .await
            .expect("generate");

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.generated, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 1); // ghost.docx template was never ingested
        assert!(report.unresolved_tokens.contains("UNKNOWN_REVIEWER"));
        assert!(report.unknown_tokens.contains("UNKNOWN_REVIEWER"));

        // The rendered document carries substituted values and keeps the
        // undeclared token literal.
        let output_path = root
            .join("sets")
            .join(set.id.to_string())
            .join("outputs/manual.docx");
        let body = read_docx_body(&std::fs::read(&output_path).unwrap());
        assert!(body.contains("Acme GmbH"));
        assert!(body.contains("Berlin"));
        assert!(body.contains("Design and production of widgets"));
        assert!(body.contains("{{UNKNOWN_REVIEWER}}"));

        // Provenance per source
        let values = pipeline
            .storage
            .list_variable_values(&set.id.to_string())
            .await
            .unwrap();
        let source_of = |token: &str| {
            values
                .iter()
                .find(|v| v.token == token)
                .map(|v| v.source)
                .unwrap()
        };
        assert_eq!(source_of("COMPANY_NAME"), VariableSource::CustomerInput);
        assert_eq!(source_of("CITY"), VariableSource::Default);
        assert_eq!(source_of("SCOPE"), VariableSource::AiDrafted);

        // The output is registered as a generated asset with lineage.
        let generated = pipeline
            .storage
            .list_assets_by_role(&set.id.to_string(), AssetRole::GeneratedOutput)
            .await
            .unwrap();
        assert_eq!(generated.len(), 1);
        assert!(generated[0].source_asset_id.is_some());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn customer_input_survives_later_overrides() {
        let root = temp_root();
        let pipeline = fixture_pipeline(&root, Arc::new(CannedEmbedder)).await;
        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .unwrap();
        ingest_package_for_set(&pipeline, &set.id, false).await.unwrap();

        let mut first = GenerationRequest::default();
        first.profile.insert("COMPANY_NAME".into(), "Acme GmbH".into());
        execute_generation(&pipeline, &set.id, &first).await.unwrap();

        // A later run tries to override the customer's value.
        let mut second = GenerationRequest::default();
        second.overrides.insert("COMPANY_NAME".into(), "Evil Corp".into());
        execute_generation(&pipeline, &set.id, &second).await.unwrap();

        let value = pipeline
            .storage
            .get_variable_value(&set.id.to_string(), "COMPANY_NAME")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.value, "Acme GmbH");
        assert_eq!(value.source, VariableSource::CustomerInput);

        let output_path = root
            .join("sets")
            .join(set.id.to_string())
            .join("outputs/manual.docx");
        let body = read_docx_body(&std::fs::read(&output_path).unwrap());
        assert!(body.contains("Acme GmbH"));
        assert!(!body.contains("Evil Corp"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn embedding_failure_fails_the_ingestion_run() {
        let root = temp_root();
        let pipeline = fixture_pipeline(&root, Arc::new(FailingEmbedder)).await;
        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .unwrap();

        let err = ingest_package_for_set(&pipeline, &set.id, false)
            .await
            .unwrap_err();
        assert!(err.is_run_fatal());
        assert!(matches!(err, DocforgeError::Embedding(_)));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn empty_index_is_fatal() {
        let root = temp_root();
        let pipeline = fixture_pipeline(&root, Arc::new(CannedEmbedder)).await;
        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .unwrap();

        // Remove the only reference so the index pass produces no chunks.
        let vault = root.join("vault");
        std::fs::remove_file(vault.join("references/norm.txt")).unwrap();

        let err = ingest_package_for_set(&pipeline, &set.id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DocforgeError::ZeroChunks { .. }));
        assert!(err.is_run_fatal());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn per_output_overrides_do_not_persist() {
        let root = temp_root();
        let pipeline = fixture_pipeline(&root, Arc::new(CannedEmbedder)).await;
        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .unwrap();
        ingest_package_for_set(&pipeline, &set.id, false).await.unwrap();

        let mut request = GenerationRequest::default();
        request.profile.insert("COMPANY_NAME".into(), "Acme GmbH".into());
        request
            .file_overrides
            .entry("manual.docx".into())
            .or_default()
            .insert("CITY".into(), "Hamburg".into());
        execute_generation(&pipeline, &set.id, &request).await.unwrap();

        // The output used the per-file value...
        let output_path = root
            .join("sets")
            .join(set.id.to_string())
            .join("outputs/manual.docx");
        let body = read_docx_body(&std::fs::read(&output_path).unwrap());
        assert!(body.contains("Hamburg"));

        // ...but the persisted value is still the schema default.
        let value = pipeline
            .storage
            .get_variable_value(&set.id.to_string(), "CITY")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.value, "Berlin");
        assert_eq!(value.source, VariableSource::Default);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn ai_failure_leaves_tokens_unresolved() {
        let root = temp_root();
        let pipeline = fixture_pipeline_with(
            &root,
            Arc::new(FailingCompletions),
            Arc::new(CannedEmbedder),
        )
        .await;
        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .unwrap();
        ingest_package_for_set(&pipeline, &set.id, false).await.unwrap();

        let mut request = GenerationRequest::default();
        request.profile.insert("COMPANY_NAME".into(), "Acme GmbH".into());
        let report = execute_generation(&pipeline, &set.id, &request)
            .await
            .expect("a drafting failure must not abort the run");

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.generated, 1);
        assert!(report.resolution.unresolved.contains(&"SCOPE".to_string()));
        assert!(report.unresolved_tokens.contains("SCOPE"));

        // The document renders with the token left literal.
        let output_path = root
            .join("sets")
            .join(set.id.to_string())
            .join("outputs/manual.docx");
        let body = read_docx_body(&std::fs::read(&output_path).unwrap());
        assert!(body.contains("{{SCOPE}}"));
        assert!(body.contains("Acme GmbH"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn deselected_templates_are_skipped() {
        let root = temp_root();
        let pipeline = fixture_pipeline(&root, Arc::new(CannedEmbedder)).await;
        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .unwrap();
        ingest_package_for_set(&pipeline, &set.id, false).await.unwrap();

        let mut request = GenerationRequest::default();
        request.profile.insert("COMPANY_NAME".into(), "Acme GmbH".into());
        request.selected_asset_ids.insert("not-a-template-id".into());
        let report = execute_generation(&pipeline, &set.id, &request).await.unwrap();

        assert_eq!(report.generated, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.status, RunStatus::Succeeded);
        let manual = report
            .outputs
            .iter()
            .find(|o| o.output_rel_path == "manual.docx")
            .expect("manual outcome");
        assert!(matches!(
            &manual.result,
            OutputResult::Skipped { reason } if reason.contains("deselected")
        ));

        // Selecting the actual template renders it.
        let templates = pipeline
            .storage
            .list_assets_by_role(&set.id.to_string(), AssetRole::Template)
            .await
            .unwrap();
        let mut second = GenerationRequest::default();
        second.selected_asset_ids.insert(templates[0].id.clone());
        let report = execute_generation(&pipeline, &set.id, &second).await.unwrap();
        assert_eq!(report.generated, 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn blank_profile_value_does_not_lock_token() {
        let root = temp_root();
        let pipeline = fixture_pipeline(&root, Arc::new(CannedEmbedder)).await;
        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .unwrap();
        ingest_package_for_set(&pipeline, &set.id, false).await.unwrap();

        let mut first = GenerationRequest::default();
        first.profile.insert("COMPANY_NAME".into(), "   ".into());
        let report = execute_generation(&pipeline, &set.id, &first).await.unwrap();
        assert!(report
            .resolution
            .unresolved
            .contains(&"COMPANY_NAME".to_string()));
        assert!(pipeline
            .storage
            .get_variable_value(&set.id.to_string(), "COMPANY_NAME")
            .await
            .unwrap()
            .is_none());

        // A later real value still lands as customer input.
        let mut second = GenerationRequest::default();
        second.profile.insert("COMPANY_NAME".into(), "Acme GmbH".into());
        execute_generation(&pipeline, &set.id, &second).await.unwrap();

        let value = pipeline
            .storage
            .get_variable_value(&set.id.to_string(), "COMPANY_NAME")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value.value, "Acme GmbH");
        assert_eq!(value.source, VariableSource::CustomerInput);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn drafting_ignores_customer_uploads() {
        let root = temp_root();
        let pipeline = fixture_pipeline(&root, Arc::new(CannedEmbedder)).await;
        let set = pipeline
            .create_document_set("acme", "ISO9001", "v1")
            .await
            .unwrap();
        ingest_package_for_set(&pipeline, &set.id, false).await.unwrap();

        // A customer upload whose text matches the drafting query strongly.
        let upload = root.join("customer_notes.txt");
        std::fs::write(
            &upload,
            "SCOPE QMS scope notes.\n\nThe QMS scope the customer wants drafted \
             covers widget design and scope of production.",
        )
        .unwrap();
        ingest_uploaded_reference(&pipeline, &set.id, &upload).await.unwrap();

        let mut request = GenerationRequest::default();
        request.profile.insert("COMPANY_NAME".into(), "Acme GmbH".into());
        execute_generation(&pipeline, &set.id, &request).await.unwrap();

        let customer_chunks: BTreeSet<String> = pipeline
            .storage
            .embedded_chunks(&set.id.to_string(), Some(AssetRole::CustomerReference), None)
            .await
            .unwrap()
            .into_iter()
            .map(|(candidate, _)| candidate.chunk_id)
            .collect();
        assert!(!customer_chunks.is_empty());

        let scope = pipeline
            .storage
            .get_variable_value(&set.id.to_string(), "SCOPE")
            .await
            .unwrap()
            .unwrap();
        let grounding: Vec<String> = scope.provenance["grounding_chunks"]
            .as_array()
            .expect("grounding chunk list")
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
        assert!(!grounding.is_empty());
        assert!(grounding.iter().all(|id| !customer_chunks.contains(id)));

        let _ = std::fs::remove_dir_all(&root);
    }
}
