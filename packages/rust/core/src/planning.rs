//! Generation planning.
//!
//! The deterministic plan maps playbook entries onto the templates actually
//! ingested for the set. Optionally the plan is refined by a completion
//! call; a refinement whose shape does not validate falls back to the
//! deterministic plan rather than failing the run.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use docforge_ai::get_prompt;
use docforge_shared::{AssetMeta, PlaceholderRecord, PlaceholderStatus, Result};

use crate::Pipeline;
use crate::catalog::Playbook;

const PLAN_TEMPERATURE: f32 = 0.2;
const PLAN_MAX_TOKENS: u32 = 1200;
const JSON_RETRIES: u32 = 1;

/// One output the run intends to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    /// Template path relative to the package root.
    pub template_rel_path: String,
    /// Output path relative to the set's output directory.
    pub output_rel_path: String,
    pub notes: String,
}

/// The plan a generation run executes.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub outputs: Vec<PlannedOutput>,
    /// Union of placeholder tokens across the planned templates.
    pub required_tokens: BTreeSet<String>,
    /// Planned-template tokens absent from the declared variable schema.
    pub unknown_tokens: BTreeSet<String>,
    /// Set when the plan went through AI refinement.
    pub prompt_version: Option<String>,
    pub model: Option<String>,
}

/// Union the placeholder snapshots of the planned templates into the
/// required-token set, collecting schema-unknown tokens separately.
fn collect_token_sets(
    outputs: &[PlannedOutput],
    templates: &[AssetMeta],
    placeholders: &BTreeMap<String, Vec<PlaceholderRecord>>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let id_by_rel_path: BTreeMap<&str, &str> = templates
        .iter()
        .map(|t| (t.rel_path.as_str(), t.id.as_str()))
        .collect();

    let mut required = BTreeSet::new();
    let mut unknown = BTreeSet::new();
    for output in outputs {
        let Some(asset_id) = id_by_rel_path.get(output.template_rel_path.as_str()) else {
            continue;
        };
        for record in placeholders.get(*asset_id).map(Vec::as_slice).unwrap_or(&[]) {
            required.insert(record.token.clone());
            if record.status == PlaceholderStatus::Unknown {
                unknown.insert(record.token.clone());
            }
        }
    }
    (required, unknown)
}

/// Build the plan from the playbook and the ingested templates only.
/// Playbook entries whose template was never ingested are dropped here and
/// surface as skips in the report.
pub fn deterministic_plan(
    playbook: &Playbook,
    templates: &[AssetMeta],
    placeholders: &BTreeMap<String, Vec<PlaceholderRecord>>,
) -> GenerationPlan {
    let known: BTreeSet<&str> = templates.iter().map(|t| t.rel_path.as_str()).collect();
    let outputs: Vec<PlannedOutput> = playbook
        .outputs
        .iter()
        .filter(|o| known.contains(o.template.as_str()))
        .map(|o| PlannedOutput {
            template_rel_path: o.template.clone(),
            output_rel_path: o.output.clone(),
            notes: o.notes.clone(),
        })
        .collect();
    let (required_tokens, unknown_tokens) = collect_token_sets(&outputs, templates, placeholders);
    GenerationPlan {
        outputs,
        required_tokens,
        unknown_tokens,
        prompt_version: None,
        model: None,
    }
}

/// Validate a refinement payload into planned outputs.
///
/// The payload must be an object carrying an `outputs` array of objects
/// with string `template` and `output` fields, and every template must be
/// one of the known template paths. Anything else rejects the refinement.
pub fn validate_plan_shape(
    payload: &Map<String, Value>,
    known_templates: &BTreeSet<String>,
) -> Option<Vec<PlannedOutput>> {
    let outputs = payload.get("outputs")?.as_array()?;
    if outputs.is_empty() {
        return None;
    }

    let mut planned = Vec::with_capacity(outputs.len());
    for item in outputs {
        let object = item.as_object()?;
        let template = object.get("template")?.as_str()?;
        let output = object.get("output")?.as_str()?;
        if template.is_empty() || output.is_empty() || !known_templates.contains(template) {
            return None;
        }
        planned.push(PlannedOutput {
            template_rel_path: template.to_string(),
            output_rel_path: output.to_string(),
            notes: object
                .get("notes")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    Some(planned)
}

/// Refine a deterministic plan with a completion call. A transport error or
/// an invalid refinement shape falls back to the base plan.
pub async fn refine_plan(
    pipeline: &Pipeline,
    playbook: &Playbook,
    templates: &[AssetMeta],
    placeholders: &BTreeMap<String, Vec<PlaceholderRecord>>,
    base: GenerationPlan,
) -> GenerationPlan {
    let (prompt_version, system_prompt) = match get_prompt("plan", "v1") {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "plan prompt missing, using deterministic plan");
            return base;
        }
    };

    let known: BTreeSet<String> = templates.iter().map(|t| t.rel_path.clone()).collect();
    let user_prompt = serde_json::to_string_pretty(&json!({
        "templates": templates.iter().map(|t| &t.rel_path).collect::<Vec<_>>(),
        "required_tokens": base.required_tokens,
        "unknown_tokens": base.unknown_tokens,
        "playbook": playbook.outputs.iter().map(|o| json!({
            "template": o.template,
            "output": o.output,
            "notes": o.notes,
        })).collect::<Vec<_>>(),
    }))
    .unwrap_or_default();

    let completion = match pipeline
        .completions
        .complete_json(
            &pipeline.config.openai.chat_model,
            system_prompt,
            &user_prompt,
            PLAN_TEMPERATURE,
            PLAN_MAX_TOKENS,
            JSON_RETRIES,
        )
        .await
    {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "plan refinement failed, using deterministic plan");
            return base;
        }
    };

    match validate_plan_shape(&completion.payload, &known) {
        Some(outputs) => {
            let (required_tokens, unknown_tokens) =
                collect_token_sets(&outputs, templates, placeholders);
            GenerationPlan {
                outputs,
                required_tokens,
                unknown_tokens,
                prompt_version: Some(format!("plan/{prompt_version}")),
                model: Some(completion.model),
            }
        }
        None => {
            tracing::warn!("plan refinement returned an invalid shape, using deterministic plan");
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PlaybookOutput;
    use docforge_shared::{AssetOrigin, AssetRole};

    fn template(rel_path: &str) -> AssetMeta {
        AssetMeta {
            id: rel_path.to_string(),
            set_id: "set".into(),
            rel_path: rel_path.into(),
            role: AssetRole::Template,
            origin: AssetOrigin::PackageVault,
            local_path: format!("/tmp/{rel_path}"),
            mime: "application/octet-stream".into(),
            file_ext: "docx".into(),
            sha256: "hash".into(),
            source_asset_id: None,
        }
    }

    fn playbook() -> Playbook {
        Playbook {
            outputs: vec![
                PlaybookOutput {
                    template: "templates/manual.docx".into(),
                    output: "manual.docx".into(),
                    notes: "quality manual".into(),
                },
                PlaybookOutput {
                    template: "templates/missing.docx".into(),
                    output: "missing.docx".into(),
                    notes: String::new(),
                },
            ],
        }
    }

    fn placeholder(asset_id: &str, token: &str, status: PlaceholderStatus) -> PlaceholderRecord {
        PlaceholderRecord {
            id: format!("{asset_id}:{token}"),
            asset_id: asset_id.to_string(),
            token: token.to_string(),
            occurrences: 1,
            status,
        }
    }

    #[test]
    fn deterministic_plan_drops_missing_templates() {
        let templates = vec![template("templates/manual.docx")];
        let plan = deterministic_plan(&playbook(), &templates, &BTreeMap::new());
        assert_eq!(plan.outputs.len(), 1);
        assert_eq!(plan.outputs[0].output_rel_path, "manual.docx");
        assert!(plan.model.is_none());
    }

    #[test]
    fn plan_collects_required_and_unknown_tokens() {
        let templates = vec![template("templates/manual.docx")];
        let placeholders: BTreeMap<String, Vec<PlaceholderRecord>> = [(
            "templates/manual.docx".to_string(),
            vec![
                placeholder("templates/manual.docx", "COMPANY_NAME", PlaceholderStatus::Known),
                placeholder("templates/manual.docx", "REVIEWER", PlaceholderStatus::Unknown),
            ],
        )]
        .into();

        let plan = deterministic_plan(&playbook(), &templates, &placeholders);
        assert_eq!(
            plan.required_tokens,
            ["COMPANY_NAME".to_string(), "REVIEWER".to_string()].into()
        );
        assert_eq!(plan.unknown_tokens, ["REVIEWER".to_string()].into());
    }

    #[test]
    fn plan_shape_validation() {
        let known: BTreeSet<String> = ["templates/manual.docx".to_string()].into();

        let valid = serde_json::json!({
            "outputs": [
                {"template": "templates/manual.docx", "output": "manual.docx", "notes": "x"}
            ]
        });
        let outputs = validate_plan_shape(valid.as_object().unwrap(), &known).expect("valid");
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].notes, "x");

        // Unknown template
        let unknown = serde_json::json!({
            "outputs": [{"template": "elsewhere.docx", "output": "o.docx"}]
        });
        assert!(validate_plan_shape(unknown.as_object().unwrap(), &known).is_none());

        // Wrong shapes
        for bad in [
            serde_json::json!({"outputs": []}),
            serde_json::json!({"outputs": "nope"}),
            serde_json::json!({"other": []}),
            serde_json::json!({"outputs": [{"template": "templates/manual.docx"}]}),
            serde_json::json!({"outputs": [["templates/manual.docx", "o.docx"]]}),
        ] {
            assert!(validate_plan_shape(bad.as_object().unwrap(), &known).is_none());
        }
    }
}
