//! Single-pass `{{name}}` template interpolation (spec §4.2).
//!
//! Unresolved placeholders are preserved verbatim — this function never
//! fails and never errors on a missing variable.

use std::collections::{HashMap, HashSet};

use crate::variables::VariableStore;

/// Replace every `{{name}}` occurrence in `template` with its current
/// value from `store`. Names are trimmed of surrounding whitespace before
/// lookup. If `template` contains no `"{{"` at all, it is returned
/// unchanged without touching the store (required fast path — spec §4.2,
/// scenario S6).
pub fn interpolate(template: &str, store: &VariableStore) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let names = distinct_names(template);
    let mut resolved: HashMap<&str, Option<String>> = HashMap::with_capacity(names.len());
    for name in &names {
        resolved.insert(name.as_str(), store.get(name).map(|v| v.value.clone()));
    }

    render(template, &resolved)
}

/// Scan `template` once, collecting the distinct trimmed names between
/// `{{` and `}}`. Malformed placeholders (no closing `}}`) are left as
/// literal text and contribute no name.
fn distinct_names(template: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else { break };
        let name = after_open[..end].trim();
        if !name.is_empty() && seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
        rest = &after_open[end + 2..];
    }

    names
}

/// Render the output string in a single pass, given pre-resolved values.
fn render(template: &str, resolved: &HashMap<&str, Option<String>>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + 2..];
                match after_open.find("}}") {
                    None => {
                        // Unterminated placeholder: emit the rest literally.
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let raw_name = &after_open[..end];
                        let name = raw_name.trim();
                        match resolved.get(name).and_then(|v| v.as_ref()) {
                            Some(value) => out.push_str(value),
                            None => {
                                out.push_str("{{");
                                out.push_str(raw_name);
                                out.push_str("}}");
                            }
                        }
                        rest = &after_open[end + 2..];
                    }
                }
            }
        }
    }

    out
}
