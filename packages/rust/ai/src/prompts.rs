//! Versioned prompt registry.
//!
//! Prompt texts are compiled into the binary; lookup returns the version tag
//! alongside the text so runs can record which prompt produced a value.

use docforge_shared::{DocforgeError, Result};

/// All registered prompts as `(name, version, text)`.
const PROMPTS: &[(&str, &str, &str)] = &[
    ("plan", "v1", include_str!("../prompts/plan_v1.md")),
    (
        "infer_variables",
        "v1",
        include_str!("../prompts/infer_variables_v1.md"),
    ),
    (
        "draft_variables",
        "v1",
        include_str!("../prompts/draft_variables_v1.md"),
    ),
];

/// Look up a prompt by name and version. Returns `(version, text)`.
pub fn get_prompt(name: &str, version: &str) -> Result<(&'static str, &'static str)> {
    if !PROMPTS.iter().any(|(n, _, _)| *n == name) {
        return Err(DocforgeError::not_found(format!("unknown prompt: {name}")));
    }
    PROMPTS
        .iter()
        .find(|(n, v, _)| *n == name && *v == version)
        .map(|(_, v, text)| (*v, *text))
        .ok_or_else(|| {
            DocforgeError::not_found(format!("unknown prompt version: {name}/{version}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_prompts_resolve() {
        for name in ["plan", "infer_variables", "draft_variables"] {
            let (version, text) = get_prompt(name, "v1").expect("prompt");
            assert_eq!(version, "v1");
            assert!(text.contains("JSON"));
        }
    }

    #[test]
    fn unknown_name_and_version_fail() {
        assert!(get_prompt("bogus", "v1").is_err());
        let err = get_prompt("plan", "v9").unwrap_err();
        assert!(err.to_string().contains("plan/v9"));
    }
}
