//! Variable resolution for a document set.
//!
//! Each token the planned templates require resolves through a fixed
//! precedence ladder:
//! persisted customer input, request profile values, persisted operator
//! overrides, request overrides, schema defaults, and finally the token's
//! generation policy (nothing, direct inference, or retrieval-grounded
//! drafting). Customer input, once persisted, is never overwritten.
//!
//! Resolution assumes one run per set at a time; concurrent runs racing on
//! the same token are last-writer-wins.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde_json::{Value, json};

use docforge_ai::get_prompt;
use docforge_retrieval::{RetrievalFilters, RetrievalOptions, retrieve_context};
use docforge_shared::{
    AssetRole, DocumentSet, GenerationPolicy, ResolvedValue, Result, VariableKey, VariableSource,
};
use docforge_storage::Storage;

use crate::Pipeline;
use crate::events::RunLogger;

const CHAT_TEMPERATURE: f32 = 0.2;
const INFER_MAX_TOKENS: u32 = 800;
const DRAFT_MAX_TOKENS: u32 = 600;
const JSON_RETRIES: u32 = 1;
/// Number of fused candidates grounding one drafted value.
const DRAFT_TOP_N: usize = 8;
/// Character budget for grounding context passed to the drafting prompt.
const DRAFT_CONTEXT_BUDGET: usize = 6000;

/// Caller-supplied inputs to one resolution pass.
#[derive(Debug, Default, Clone)]
pub struct ResolutionRequest {
    /// Customer profile values, persisted as customer input.
    pub profile: BTreeMap<String, String>,
    /// Operator overrides, persisted as human overrides.
    pub overrides: BTreeMap<String, String>,
}

/// Counters from one resolution pass.
#[derive(Debug, Default, Clone)]
pub struct ResolutionReport {
    /// Tokens kept from previously persisted values.
    pub kept: usize,
    pub from_profile: usize,
    pub from_overrides: usize,
    pub from_defaults: usize,
    pub inferred: usize,
    pub drafted: usize,
    /// Tokens with no value after the full ladder.
    pub unresolved: Vec<String>,
}

/// Resolve the tokens the planned templates require.
///
/// Tokens absent from the declared schema are skipped with a WARN event.
/// An AI step failure (retrieval or completion) is logged against the run
/// and leaves its tokens unresolved; it never fails the resolution pass.
pub async fn resolve_variables(
    pipeline: &Pipeline,
    set: &DocumentSet,
    request: &ResolutionRequest,
    required_tokens: &BTreeSet<String>,
    logger: &RunLogger<'_>,
) -> Result<ResolutionReport> {
    let set_id = set.id.to_string();
    let keys: BTreeMap<String, VariableKey> = pipeline
        .storage
        .list_variable_keys(&set.package_code, &set.package_version)
        .await?
        .into_iter()
        .map(|k| (k.token.clone(), k))
        .collect();

    let existing: BTreeMap<String, ResolvedValue> = pipeline
        .storage
        .list_variable_values(&set_id)
        .await?
        .into_iter()
        .map(|v| (v.token.clone(), v))
        .collect();

    let mut report = ResolutionReport::default();
    let mut pending_infer: Vec<VariableKey> = Vec::new();
    let mut pending_draft: Vec<VariableKey> = Vec::new();

    for token in required_tokens {
        if let Some(value) = existing.get(token) {
            if value.source == VariableSource::CustomerInput {
                report.kept += 1;
                continue;
            }
        }
        if let Some(value) = non_blank(request.profile.get(token)) {
            persist(
                &pipeline.storage,
                &set_id,
                token,
                value,
                VariableSource::CustomerInput,
                Some(1.0),
                json!({ "origin": "customer_profile" }),
            )
            .await?;
            report.from_profile += 1;
            continue;
        }
        if let Some(value) = existing.get(token) {
            if value.source == VariableSource::HumanOverride {
                report.kept += 1;
                continue;
            }
        }
        if let Some(value) = non_blank(request.overrides.get(token)) {
            persist(
                &pipeline.storage,
                &set_id,
                token,
                value,
                VariableSource::HumanOverride,
                Some(1.0),
                json!({ "origin": "request_override" }),
            )
            .await?;
            report.from_overrides += 1;
            continue;
        }

        let Some(key) = keys.get(token) else {
            logger
                .warn("unknown variable key", json!({ "token": token }))
                .await;
            continue;
        };
        if let Some(default) = key.default_value.as_deref().filter(|d| !d.trim().is_empty()) {
            persist(
                &pipeline.storage,
                &set_id,
                token,
                default,
                VariableSource::Default,
                Some(1.0),
                json!({ "origin": "schema_default" }),
            )
            .await?;
            report.from_defaults += 1;
            continue;
        }

        match key.generation_policy {
            GenerationPolicy::Deterministic => {
                tracing::warn!(%token, "deterministic variable has no value and no default");
                report.unresolved.push(token.clone());
            }
            GenerationPolicy::AiInfer => pending_infer.push(key.clone()),
            GenerationPolicy::AiDraft => pending_draft.push(key.clone()),
        }
    }

    if !pending_infer.is_empty() {
        infer_batch(pipeline, set, &pending_infer, request, logger, &mut report).await?;
    }
    for key in &pending_draft {
        draft_one(pipeline, set, key, logger, &mut report).await?;
    }

    Ok(report)
}

/// Trimmed value, or `None` when absent or whitespace-only.
fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

async fn persist(
    storage: &Storage,
    set_id: &str,
    token: &str,
    value: &str,
    source: VariableSource,
    confidence: Option<f64>,
    provenance: Value,
) -> Result<()> {
    storage
        .upsert_variable_value(&ResolvedValue {
            set_id: set_id.to_string(),
            token: token.to_string(),
            value: value.to_string(),
            source,
            confidence,
            provenance,
        })
        .await
}

/// Pull `values.TOKEN.{value,confidence}` out of a completion payload.
fn extract_value(payload: &serde_json::Map<String, Value>, token: &str) -> Option<(String, Option<f64>)> {
    let entry = payload.get("values")?.get(token)?;
    let value = entry.get("value")?.as_str()?.trim();
    if value.is_empty() {
        return None;
    }
    let confidence = entry.get("confidence").and_then(Value::as_f64);
    Some((value.to_string(), confidence))
}

/// Resolve all inference-policy tokens with one completion call. A failed
/// completion leaves every token in the batch unresolved.
async fn infer_batch(
    pipeline: &Pipeline,
    set: &DocumentSet,
    keys: &[VariableKey],
    request: &ResolutionRequest,
    logger: &RunLogger<'_>,
    report: &mut ResolutionReport,
) -> Result<()> {
    let (prompt_version, system_prompt) = get_prompt("infer_variables", "v1")?;
    let set_id = set.id.to_string();

    let variables: Vec<Value> = keys
        .iter()
        .map(|k| {
            json!({
                "token": k.token,
                "type": k.value_type,
                "description": k.description,
            })
        })
        .collect();
    let user_prompt = serde_json::to_string_pretty(&json!({
        "package": { "code": set.package_code, "version": set.package_version },
        "known_values": request.profile,
        "variables": variables,
    }))
    .unwrap_or_default();

    let completion = match pipeline
        .completions
        .complete_json(
            &pipeline.config.openai.chat_model,
            system_prompt,
            &user_prompt,
            CHAT_TEMPERATURE,
            INFER_MAX_TOKENS,
            JSON_RETRIES,
        )
        .await
    {
        Ok(c) => c,
        Err(e) => {
            let tokens: Vec<&str> = keys.iter().map(|k| k.token.as_str()).collect();
            logger
                .error(
                    "variable inference failed",
                    json!({ "tokens": tokens, "error": e.to_string() }),
                )
                .await;
            report
                .unresolved
                .extend(keys.iter().map(|k| k.token.clone()));
            return Ok(());
        }
    };

    for key in keys {
        match extract_value(&completion.payload, &key.token) {
            Some((value, confidence)) => {
                persist(
                    &pipeline.storage,
                    &set_id,
                    &key.token,
                    &value,
                    VariableSource::AiInferred,
                    confidence,
                    json!({
                        "origin": "ai_infer",
                        "model": completion.model,
                        "prompt": format!("infer_variables/{prompt_version}"),
                        "resolved_at": Utc::now().to_rfc3339(),
                    }),
                )
                .await?;
                report.inferred += 1;
            }
            None => {
                tracing::warn!(token = %key.token, "inference returned no value");
                report.unresolved.push(key.token.clone());
            }
        }
    }
    Ok(())
}

/// Resolve one drafting-policy token, grounded in retrieved reference text.
/// A retrieval or completion failure leaves the token unresolved.
async fn draft_one(
    pipeline: &Pipeline,
    set: &DocumentSet,
    key: &VariableKey,
    logger: &RunLogger<'_>,
    report: &mut ResolutionReport,
) -> Result<()> {
    let (prompt_version, system_prompt) = get_prompt("draft_variables", "v1")?;
    let set_id = set.id.to_string();

    // Drafting grounds on the package's reference material only; customer
    // uploads do not feed drafted values.
    let query = format!("{} {}", key.token, key.description);
    let filters = RetrievalFilters {
        role: Some(AssetRole::Reference),
        asset_ids: None,
    };
    let options = RetrievalOptions {
        top_n: DRAFT_TOP_N,
        ..Default::default()
    };
    let candidates = match retrieve_context(
        &pipeline.storage,
        pipeline.embeddings.as_ref(),
        &pipeline.config.openai.embed_model,
        &set_id,
        query.trim(),
        &filters,
        &options,
    )
    .await
    {
        Ok(c) => c,
        Err(e) => {
            logger
                .error(
                    "variable resolution failed",
                    json!({ "token": key.token, "error": e.to_string() }),
                )
                .await;
            report.unresolved.push(key.token.clone());
            return Ok(());
        }
    };

    let mut context = String::new();
    let mut chunk_ids = Vec::new();
    for candidate in &candidates {
        if context.len() + candidate.text.len() > DRAFT_CONTEXT_BUDGET {
            break;
        }
        context.push_str(&format!("[{}]\n{}\n\n", candidate.asset_path, candidate.text));
        chunk_ids.push(candidate.chunk_id.clone());
    }

    let user_prompt = serde_json::to_string_pretty(&json!({
        "variable": {
            "token": key.token,
            "type": key.value_type,
            "description": key.description,
        },
        "context": context,
    }))
    .unwrap_or_default();

    let completion = match pipeline
        .completions
        .complete_json(
            &pipeline.config.openai.chat_model,
            system_prompt,
            &user_prompt,
            CHAT_TEMPERATURE,
            DRAFT_MAX_TOKENS,
            JSON_RETRIES,
        )
        .await
    {
        Ok(c) => c,
        Err(e) => {
            logger
                .error(
                    "variable resolution failed",
                    json!({ "token": key.token, "error": e.to_string() }),
                )
                .await;
            report.unresolved.push(key.token.clone());
            return Ok(());
        }
    };

    match extract_value(&completion.payload, &key.token) {
        Some((value, confidence)) => {
            persist(
                &pipeline.storage,
                &set_id,
                &key.token,
                &value,
                VariableSource::AiDrafted,
                confidence,
                json!({
                    "origin": "ai_draft",
                    "model": completion.model,
                    "prompt": format!("draft_variables/{prompt_version}"),
                    "grounding_chunks": chunk_ids,
                    "resolved_at": Utc::now().to_rfc3339(),
                }),
            )
            .await?;
            report.drafted += 1;
        }
        None => {
            tracing::warn!(token = %key.token, "drafting returned no value");
            report.unresolved.push(key.token.clone());
        }
    }
    Ok(())
}

/// Build the effective substitution map for one output.
///
/// Starts from persisted values, then layers global request overrides and
/// per-file overrides on top. Tokens whose persisted source is customer
/// input are locked and skip both override layers; blank override values
/// are ignored rather than clobbering persisted text.
pub async fn build_effective_map(
    storage: &Storage,
    set_id: &str,
    global_overrides: &BTreeMap<String, String>,
    file_overrides: Option<&BTreeMap<String, String>>,
) -> Result<BTreeMap<String, String>> {
    let persisted = storage.list_variable_values(set_id).await?;

    let mut effective = BTreeMap::new();
    let mut locked = BTreeSet::new();
    for value in persisted {
        if value.source == VariableSource::CustomerInput {
            locked.insert(value.token.clone());
        }
        effective.insert(value.token, value.value);
    }

    let mut apply = |overrides: &BTreeMap<String, String>| {
        for (token, value) in overrides {
            let text = value.trim();
            if text.is_empty() || locked.contains(token) {
                continue;
            }
            effective.insert(token.clone(), text.to_string());
        }
    };
    apply(global_overrides);
    if let Some(overrides) = file_overrides {
        apply(overrides);
    }
    Ok(effective)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docforge_shared::SetId;

    #[tokio::test]
    async fn effective_map_precedence() {
        let dir = std::env::temp_dir().join(format!("df_vars_{}", uuid::Uuid::now_v7()));
        let storage = Storage::open(&dir.join("test.db")).await.unwrap();

        let set = DocumentSet {
            id: SetId::new(),
            name: "acme".into(),
            package_code: "ISO9001".into(),
            package_version: "v1".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        storage.insert_document_set(&set).await.unwrap();
        let set_id = set.id.to_string();

        let persist = |token: &str, value: &str, source: VariableSource| ResolvedValue {
            set_id: set_id.clone(),
            token: token.into(),
            value: value.into(),
            source,
            confidence: Some(1.0),
            provenance: json!({}),
        };
        for value in [
            persist("COMPANY_NAME", "Acme GmbH", VariableSource::CustomerInput),
            persist("CITY", "Berlin", VariableSource::Default),
            persist("SCOPE", "Widgets", VariableSource::AiDrafted),
            persist("DOC_OWNER", "QM", VariableSource::Default),
        ] {
            storage.upsert_variable_value(&value).await.unwrap();
        }

        let global: BTreeMap<String, String> = [
            ("COMPANY_NAME".to_string(), "Evil Corp".to_string()),
            ("CITY".to_string(), "Munich".to_string()),
            ("SCOPE".to_string(), "Gadgets".to_string()),
            ("DOC_OWNER".to_string(), "   ".to_string()),
        ]
        .into();
        let file: BTreeMap<String, String> = [
            ("COMPANY_NAME".to_string(), "Eviler Corp".to_string()),
            ("CITY".to_string(), "Hamburg".to_string()),
        ]
        .into();

        let effective = build_effective_map(&storage, &set_id, &global, Some(&file))
            .await
            .unwrap();

        // Customer input is immune to both override layers.
        assert_eq!(effective["COMPANY_NAME"], "Acme GmbH");
        // A file override beats the global one.
        assert_eq!(effective["CITY"], "Hamburg");
        // A global override alone still applies.
        assert_eq!(effective["SCOPE"], "Gadgets");
        // A blank override never clobbers a persisted value.
        assert_eq!(effective["DOC_OWNER"], "QM");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn blank_values_are_treated_as_absent() {
        let blank = "   ".to_string();
        let value = "  Acme GmbH ".to_string();
        assert_eq!(non_blank(Some(&blank)), None);
        assert_eq!(non_blank(Some(&value)), Some("Acme GmbH"));
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn value_extraction_from_payload() {
        let payload = serde_json::json!({
            "values": {
                "COMPANY_NAME": {"value": "Acme GmbH", "confidence": 0.9},
                "BLANK": {"value": "   "},
                "NO_VALUE": {"confidence": 0.5},
            }
        });
        let map = payload.as_object().unwrap();

        let (value, confidence) = extract_value(map, "COMPANY_NAME").expect("value");
        assert_eq!(value, "Acme GmbH");
        assert_eq!(confidence, Some(0.9));

        assert!(extract_value(map, "BLANK").is_none());
        assert!(extract_value(map, "NO_VALUE").is_none());
        assert!(extract_value(map, "MISSING").is_none());
    }
}
