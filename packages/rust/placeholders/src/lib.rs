//! Placeholder token extraction and substitution.
//!
//! Tokens use the fixed grammar `{{TOKEN}}` where `TOKEN` matches
//! `[A-Z0-9_]+`. Substitution never invents values: a token with no
//! non-blank value keeps its literal `{{TOKEN}}` form and is reported as
//! unresolved, so a partially-resolved document stays inspectable.

pub mod ooxml;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::{Captures, Regex};

pub use ooxml::{
    DocumentFormat, apply_values_to_archive, extract_tokens_from_archive, raw_markup_text,
};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Z0-9_]+)\}\}").expect("valid regex"));

/// Extract all placeholder tokens in source order, duplicates preserved.
pub fn extract_tokens(text: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Count placeholder occurrences per token.
pub fn count_tokens(text: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for token in extract_tokens(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

/// Replace each `{{TOKEN}}` with `values[TOKEN]` when that value is non-blank
/// after trimming; otherwise keep the literal and record the token as
/// unresolved. Returns the rendered text and the sorted unresolved set.
pub fn substitute(
    text: &str,
    values: &BTreeMap<String, String>,
) -> (String, BTreeSet<String>) {
    let mut unresolved = BTreeSet::new();
    let rendered = PLACEHOLDER_RE.replace_all(text, |cap: &Captures<'_>| {
        let token = &cap[1];
        match values.get(token) {
            Some(value) if !value.trim().is_empty() => value.clone(),
            _ => {
                unresolved.insert(token.to_string());
                cap[0].to_string()
            }
        }
    });
    (rendered.into_owned(), unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn extract_preserves_order_and_duplicates() {
        let tokens = extract_tokens("A {{COMPANY_NAME}} B {{SCOPE}} C {{COMPANY_NAME}}");
        assert_eq!(tokens, vec!["COMPANY_NAME", "SCOPE", "COMPANY_NAME"]);
    }

    #[test]
    fn count_aggregates_occurrences() {
        let counts = count_tokens("A {{COMPANY_NAME}} B {{SCOPE}} C {{COMPANY_NAME}}");
        assert_eq!(counts.get("COMPANY_NAME"), Some(&2));
        assert_eq!(counts.get("SCOPE"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn lowercase_and_malformed_tokens_are_ignored() {
        assert!(extract_tokens("{{lower}} {single}} {{MIXED case}}").is_empty());
        assert_eq!(extract_tokens("{{A_1}}"), vec!["A_1"]);
    }

    #[test]
    fn substitute_replaces_known_tokens() {
        let (out, unresolved) = substitute(
            "Dear {{COMPANY_NAME}}, scope: {{SCOPE}}",
            &values(&[("COMPANY_NAME", "Acme"), ("SCOPE", "full audit")]),
        );
        assert_eq!(out, "Dear Acme, scope: full audit");
        assert!(unresolved.is_empty());
    }

    #[test]
    fn blank_values_stay_unresolved_literals() {
        let (out, unresolved) = substitute(
            "{{A}} {{B}} {{C}}",
            &values(&[("A", "set"), ("B", "   ")]),
        );
        assert_eq!(out, "set {{B}} {{C}}");
        let expected: Vec<&str> = unresolved.iter().map(String::as_str).collect();
        assert_eq!(expected, vec!["B", "C"]);
    }

    #[test]
    fn substitute_without_tokens_is_identity() {
        let text = "no placeholders here";
        let (out, unresolved) = substitute(text, &BTreeMap::new());
        assert_eq!(out, text);
        assert!(unresolved.is_empty());
    }
}
