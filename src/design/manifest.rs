//! Source manifest resolution: `.f` file lists and JSON design descriptions.
//!
//! A `.f` list holds one source path per line. A JSON manifest is an object
//! with a `sources` array and an optional `top`, possibly wrapped in an `rtl`
//! object. Paths are relative to the manifest's directory.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::errors::{HarnessError, Result};

/// Ordered sources plus the top-level module name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceManifest {
    pub path: PathBuf,
    pub sources: Vec<PathBuf>,
    pub top: String,
}

/// Resolve a manifest into its source list and top module.
///
/// `top_override` (the CLI `--top`) takes precedence over a JSON `top` key.
/// Every listed source must exist.
pub fn resolve(path: &Path, top_override: Option<&str>) -> Result<SourceManifest> {
    if !path.exists() {
        return Err(HarnessError::MissingSourceManifest {
            path: path.to_path_buf(),
        });
    }
    let raw = fs::read_to_string(path).map_err(|source| HarnessError::io(path, source))?;
    let root = path.parent().unwrap_or_else(|| Path::new(""));

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let (listed, manifest_top) = if is_json {
        parse_json(path, &raw)?
    } else {
        (parse_file_list(&raw), None)
    };

    if listed.is_empty() {
        return Err(HarnessError::EmptyManifest {
            path: path.to_path_buf(),
        });
    }

    let top = top_override
        .map(str::to_string)
        .or(manifest_top)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| HarnessError::MissingTop {
            path: path.to_path_buf(),
        })?;

    let sources: Vec<PathBuf> = listed.iter().map(|src| root.join(src)).collect();
    if let Some(missing) = sources.iter().find(|src| !src.exists()) {
        return Err(HarnessError::MissingSource {
            path: missing.clone(),
        });
    }

    Ok(SourceManifest {
        path: path.to_path_buf(),
        sources,
        top,
    })
}

/// Lines of a `.f` list, trimmed, skipping blanks and comment lines.
fn parse_file_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
        .map(str::to_string)
        .collect()
}

fn parse_json(path: &Path, raw: &str) -> Result<(Vec<String>, Option<String>)> {
    let malformed = |details: String| HarnessError::MalformedSourceManifest {
        path: path.to_path_buf(),
        details,
    };

    let doc: Value = serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?;
    let mut object = doc
        .as_object()
        .ok_or_else(|| malformed(format!("expected a JSON object, got {}", kind(&doc))))?;
    if let Some(rtl) = object.get("rtl") {
        object = rtl
            .as_object()
            .ok_or_else(|| malformed(format!("expected 'rtl' to be an object, got {}", kind(rtl))))?;
    }

    let sources = object
        .get("sources")
        .ok_or_else(|| malformed("expected a 'sources' key".to_string()))?
        .as_array()
        .ok_or_else(|| malformed("'sources' must be a list".to_string()))?
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed(format!("source entries must be strings, got {entry}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let top = object.get("top").and_then(Value::as_str).map(str::to_string);
    Ok((sources, top))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Turn a `./path/to/test_mod.py` argument into a dotted module name.
///
/// Anything else is returned unchanged.
#[must_use]
pub fn normalize_test_module(module: &str) -> String {
    match module
        .strip_prefix("./")
        .and_then(|rest| rest.strip_suffix(".py"))
    {
        Some(stem) => stem.replace(['/', std::path::MAIN_SEPARATOR], "."),
        None => module.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "module m; endmodule\n").unwrap();
    }

    #[test]
    fn file_list_resolves_relative_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "rtl/a.sv");
        touch(dir.path(), "rtl/b.sv");
        let list = dir.path().join("design.f");
        fs::write(&list, "rtl/a.sv\n\n  rtl/b.sv  \n# comment\n").unwrap();

        let manifest = resolve(&list, Some("aes")).unwrap();
        assert_eq!(
            manifest.sources,
            vec![dir.path().join("rtl/a.sv"), dir.path().join("rtl/b.sv")]
        );
        assert_eq!(manifest.top, "aes");
    }

    #[test]
    fn file_list_requires_top() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.sv");
        let list = dir.path().join("design.f");
        fs::write(&list, "a.sv\n").unwrap();

        let err = resolve(&list, None).unwrap_err();
        assert_eq!(err.code(), "TVH-1105");
    }

    #[test]
    fn json_manifest_with_rtl_wrapper_supplies_top() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/core.v");
        let json = dir.path().join("design.json");
        fs::write(
            &json,
            r#"{"name": "x", "rtl": {"sources": ["src/core.v"], "top": "core"}}"#,
        )
        .unwrap();

        let manifest = resolve(&json, None).unwrap();
        assert_eq!(manifest.top, "core");
        assert_eq!(manifest.sources, vec![dir.path().join("src/core.v")]);

        let overridden = resolve(&json, Some("other_top")).unwrap();
        assert_eq!(overridden.top, "other_top");
    }

    #[test]
    fn json_manifest_must_be_object_with_sources() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("design.json");

        fs::write(&json, "[1, 2]").unwrap();
        assert_eq!(resolve(&json, Some("t")).unwrap_err().code(), "TVH-1102");

        fs::write(&json, r#"{"top": "t"}"#).unwrap();
        let err = resolve(&json, None).unwrap_err();
        assert!(err.to_string().contains("'sources'"));
    }

    #[test]
    fn missing_manifest_and_missing_source_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(&dir.path().join("none.f"), Some("t")).unwrap_err();
        assert_eq!(err.code(), "TVH-1101");

        let list = dir.path().join("design.f");
        fs::write(&list, "ghost.sv\n").unwrap();
        match resolve(&list, Some("t")).unwrap_err() {
            HarnessError::MissingSource { path } => assert!(path.ends_with("ghost.sv")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_manifest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("design.f");
        fs::write(&list, "\n\n").unwrap();
        assert_eq!(resolve(&list, Some("t")).unwrap_err().code(), "TVH-1103");
    }

    #[test]
    fn test_module_paths_become_dotted_names() {
        assert_eq!(normalize_test_module("./tb/aes_tb.py"), "tb.aes_tb");
        assert_eq!(normalize_test_module("aes_tb"), "aes_tb");
        assert_eq!(normalize_test_module("tb/aes_tb.py"), "tb/aes_tb.py");
    }
}
