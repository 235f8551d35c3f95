//! `{{name}}` / `${name}` template variables.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}|\$\{(\w+)\}").expect("static variable regex"))
}

fn name<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}

/// Replaces every `{{name}}` and `${name}` with its value.
///
/// Names that are missing from `vars`, or registered with an empty value, are
/// left verbatim so a half-configured template still reads sensibly.
pub fn substitute(template: &str, vars: &BTreeMap<String, String>) -> String {
    pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            match name(caps).and_then(|n| vars.get(n)) {
                Some(v) if !v.is_empty() => v.clone(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Variable names referenced by `template`, in order of first appearance.
pub fn discover(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in pattern().captures_iter(template) {
        if let Some(n) = name(&caps) {
            if !seen.iter().any(|s: &String| s == n) {
                seen.push(n.to_string());
            }
        }
    }
    seen
}

/// Registers names newly referenced by `template` with an empty value.
/// Existing values are never touched. Returns the names that were added.
pub fn register_discovered(template: &str, vars: &mut BTreeMap<String, String>) -> Vec<String> {
    let mut added = Vec::new();
    for n in discover(template) {
        if !vars.contains_key(&n) {
            vars.insert(n.clone(), String::new());
            added.push(n);
        }
    }
    added
}
