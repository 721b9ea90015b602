//! Defensive YAML front-matter extraction (spec.md §4.1).
//!
//! Parsing is fail-open by contract: malformed YAML never raises, it just yields an
//! empty front matter and leaves the body untouched.

use std::collections::BTreeMap;

use crate::types::{FrontMatter, FrontMatterValue};

/// Split `raw` into `(front_matter, body)`. If `raw` doesn't open with a `---` fence, or
/// the fenced block fails to parse as a YAML mapping, returns an empty front matter and
/// the full original text as the body.
pub fn extract_front_matter(raw: &str, path_for_log: &str) -> (FrontMatter, String) {
    let Some(rest) = raw.strip_prefix("---\n").or_else(|| raw.strip_prefix("---\r\n")) else {
        return (BTreeMap::new(), raw.to_string());
    };

    let Some(end) = find_closing_fence(rest) else {
        return (BTreeMap::new(), raw.to_string());
    };

    let (yaml_block, body) = rest.split_at(end);
    // Skip the closing `---` line itself.
    let body = body.splitn(2, '\n').nth(1).unwrap_or("");

    match parse_front_matter_yaml(yaml_block) {
        Ok(front_matter) => (front_matter, body.to_string()),
        Err(e) => {
            tracing::debug!(path = %path_for_log, error = %e, "front matter parse failed, treating as empty");
            (BTreeMap::new(), raw.to_string())
        }
    }
}

fn find_closing_fence(rest: &str) -> Option<usize> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == "---" {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Parse a YAML mapping, coercing every scalar/sequence value into a [`FrontMatterValue`].
/// Integer-looking tag values (e.g. `tags: [2024, retro]`) are coerced to strings per
/// spec.md §4.1's "scalar coercion must treat integer-looking tag values as strings."
fn parse_front_matter_yaml(yaml: &str) -> Result<FrontMatter, serde_yaml::Error> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    let mapping = match value {
        serde_yaml::Value::Mapping(m) => m,
        serde_yaml::Value::Null => return Ok(BTreeMap::new()),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected a YAML mapping, found {other:?}"
            )))
        }
    };

    let mut out = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = key.as_str() else { continue };
        out.insert(key.to_string(), coerce_value(value));
    }
    Ok(out)
}

fn coerce_value(value: serde_yaml::Value) -> FrontMatterValue {
    match value {
        serde_yaml::Value::Sequence(items) => {
            FrontMatterValue::List(items.into_iter().map(scalar_to_string).collect())
        }
        other => FrontMatterValue::String(scalar_to_string(other)),
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(&other).unwrap_or_default().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_well_formed_front_matter() {
        let raw = "---\ntitle: Hello\ntags:\n  - a\n  - b\n---\nBody text.\n";
        let (fm, body) = extract_front_matter(raw, "test.md");
        assert_eq!(fm.get("title").unwrap().as_str(), Some("Hello"));
        assert_eq!(fm.get("tags").unwrap().as_list(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(body, "Body text.\n");
    }

    #[test]
    fn coerces_integer_looking_tags_to_strings() {
        let raw = "---\ntags:\n  - 2024\n  - retro\n---\nBody.\n";
        let (fm, _) = extract_front_matter(raw, "test.md");
        assert_eq!(fm.get("tags").unwrap().as_list(), vec!["2024".to_string(), "retro".to_string()]);
    }

    #[test]
    fn malformed_yaml_yields_empty_front_matter_and_untouched_body() {
        let raw = "---\ntitle: [unterminated\n---\nBody.\n";
        let (fm, body) = extract_front_matter(raw, "test.md");
        assert!(fm.is_empty());
        assert_eq!(body, raw);
    }

    #[test]
    fn missing_fence_yields_empty_front_matter() {
        let raw = "No front matter here.\n";
        let (fm, body) = extract_front_matter(raw, "test.md");
        assert!(fm.is_empty());
        assert_eq!(body, raw);
    }

    #[test]
    fn unclosed_fence_yields_empty_front_matter() {
        let raw = "---\ntitle: Hello\nBody without closing fence.\n";
        let (fm, body) = extract_front_matter(raw, "test.md");
        assert!(fm.is_empty());
        assert_eq!(body, raw);
    }
}
