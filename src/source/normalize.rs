use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One named file of a multi-file verified source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFragment {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSource {
    pub text: String,
    /// Empty for a flat single-file source.
    pub fragments: Vec<SourceFragment>,
}

/// Turns an explorer `SourceCode` payload into one annotated source text.
///
/// Accepts a flat source string, a JSON map of `path -> content` (or `path -> {content}`),
/// standard-JSON input with a `sources` object, and the double-brace wrapped variant of either.
/// Fragments are ordered by path. Anything that does not yield fragments is returned verbatim.
pub fn normalize_source(raw: &str) -> NormalizedSource {
    let trimmed = raw.trim();

    let fragments = if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        json_fragments(&trimmed[1..trimmed.len() - 1])
    } else if trimmed.starts_with('{') && trimmed.ends_with('}') {
        json_fragments(trimmed)
    } else {
        Vec::new()
    };

    if fragments.is_empty() {
        return NormalizedSource {
            text: raw.to_string(),
            fragments,
        };
    }

    let text = fragments
        .iter()
        .map(|f| format!("// File: {}\n{}", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    NormalizedSource { text, fragments }
}

fn json_fragments(text: &str) -> Vec<SourceFragment> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };
    let Some(root) = value.as_object() else {
        return Vec::new();
    };

    let mut fragments: Vec<SourceFragment> = match root.get("sources").and_then(Value::as_object) {
        Some(sources) => sources
            .iter()
            .map(|(path, file)| SourceFragment {
                path: path.clone(),
                content: file
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect(),
        None => root
            .iter()
            .filter_map(|(path, file)| {
                let content = match file {
                    Value::String(s) => s.as_str(),
                    Value::Object(obj) => obj.get("content").and_then(Value::as_str).unwrap_or_default(),
                    _ => return None,
                };
                Some(SourceFragment {
                    path: path.clone(),
                    content: content.to_string(),
                })
            })
            .collect(),
    };

    fragments.sort_by(|a, b| a.path.cmp(&b.path));
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_source_is_verbatim() {
        let raw = "pragma solidity ^0.8.0;\ncontract A {}";
        let normalized = normalize_source(raw);
        assert_eq!(normalized.text, raw);
        assert!(normalized.fragments.is_empty());
    }

    #[test]
    fn test_direct_map_sorted_by_path() {
        let raw = r#"{"b/B.sol":{"content":"contract B {}"},"a/A.sol":"contract A {}"}"#;
        let normalized = normalize_source(raw);
        assert_eq!(
            normalized.text,
            "// File: a/A.sol\ncontract A {}\n\n// File: b/B.sol\ncontract B {}"
        );
        assert_eq!(normalized.fragments.len(), 2);
    }

    #[test]
    fn test_direct_map_keeps_files_without_content() {
        let raw = r#"{"a/A.sol":{"content":"contract A {}"},"b/B.sol":{"urls":["ipfs://x"]}}"#;
        let normalized = normalize_source(raw);
        let paths: Vec<_> = normalized.fragments.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["a/A.sol", "b/B.sol"]);
        assert_eq!(normalized.fragments[1].content, "");
        assert!(normalized.text.ends_with("// File: b/B.sol\n"));
    }

    #[test]
    fn test_double_brace_standard_json() {
        let raw = r#"{{"language":"Solidity","sources":{"src/Vault.sol":{"content":"contract Vault {}"},"src/Lib.sol":{"content":"library Lib {}"}},"settings":{}}}"#;
        let normalized = normalize_source(raw);
        assert_eq!(
            normalized.text,
            "// File: src/Lib.sol\nlibrary Lib {}\n\n// File: src/Vault.sol\ncontract Vault {}"
        );
        assert_eq!(normalized, normalize_source(raw));
    }

    #[test]
    fn test_braced_text_without_fragments_is_kept() {
        let raw = "{ not json at all }";
        assert_eq!(normalize_source(raw).text, raw);

        let raw = r#"{"version": 3}"#;
        assert_eq!(normalize_source(raw).text, raw);
    }
}
