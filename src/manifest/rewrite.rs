//! In-place rewriting of descriptor hashes.
//!
//! Manifests are human-edited, so rewrites work on the source text line by
//! line instead of re-serializing the YAML: only the `sha256` value and its
//! `sha256_source` sibling change, and comments, ordering and quoting of
//! everything else survive untouched.

use crate::error::{RegistryError, Result};
use crate::manifest::digest::{Sha256Digest, TrustLevel};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Replace one declared hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRewrite {
    /// Hash text currently in the manifest
    pub declared: String,
    /// Which of the descriptors declaring `declared` (0-based, document order)
    pub occurrence: usize,
    pub digest: Sha256Digest,
    /// `Probed` writes a marker; `Verified` removes any marker
    pub trust: TrustLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Plain,
    Single,
    Double,
}

struct KeyLine<'a> {
    /// Column where the key starts
    col: usize,
    key: &'a str,
    prefix: &'a str,
    value: &'a str,
    quote: Quote,
    suffix: &'a str,
}

fn key_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?P<prefix>(?P<lead> *(?:- +)?)(?P<key>sha256_source|sha256): *)(?P<value>"[^"]*"|'[^']*'|[^\s#]+)(?P<suffix>.*)$"#,
        )
        .expect("static regex is valid")
    })
}

fn parse_key_line(line: &str) -> Option<KeyLine<'_>> {
    let caps = key_line_regex().captures(line)?;
    let raw = caps.name("value")?.as_str();
    let (value, quote) = if let Some(inner) = raw.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        (inner, Quote::Double)
    } else if let Some(inner) = raw.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')) {
        (inner, Quote::Single)
    } else {
        (raw, Quote::Plain)
    };

    Some(KeyLine {
        col: caps.name("lead")?.as_str().len(),
        key: caps.name("key")?.as_str(),
        prefix: caps.name("prefix")?.as_str(),
        value,
        quote,
        suffix: caps.name("suffix")?.as_str(),
    })
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_filler(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Whether the line starts a block sequence item (`- key: ...`)
fn opens_item(line: &str) -> bool {
    let trimmed = split_terminator(line).0.trim_start_matches(' ');
    trimmed == "-" || trimmed.starts_with("- ")
}

/// Split a line into content and terminator
fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Find the `sha256_source` key belonging to the same mapping as line `at`
fn find_marker(lines: &[String], at: usize, col: usize) -> Option<usize> {
    let is_marker = |line: &str| {
        parse_key_line(split_terminator(line).0)
            .is_some_and(|k| k.key == "sha256_source" && k.col == col)
    };

    for (j, line) in lines.iter().enumerate().skip(at + 1) {
        if is_filler(line) {
            continue;
        }
        let indent = leading_spaces(line);
        if indent < col {
            break;
        }
        if indent == col && is_marker(line) {
            return Some(j);
        }
    }

    // A list item's mapping starts at its `- ` line
    if opens_item(&lines[at]) {
        return None;
    }
    for j in (0..at).rev() {
        let line = &lines[j];
        if is_filler(line) {
            continue;
        }
        if is_marker(line) {
            return Some(j);
        }
        if leading_spaces(line) < col {
            break;
        }
    }

    None
}

fn apply_one(lines: &mut Vec<String>, rewrite: &HashRewrite) -> std::result::Result<(), String> {
    let at = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            parse_key_line(split_terminator(line).0)
                .is_some_and(|k| k.key == "sha256" && k.value == rewrite.declared)
        })
        .map(|(i, _)| i)
        .nth(rewrite.occurrence)
        .ok_or_else(|| {
            format!(
                "no sha256 line declaring '{}' (occurrence {})",
                rewrite.declared, rewrite.occurrence
            )
        })?;

    let (content, terminator) = split_terminator(&lines[at]);
    let terminator = if terminator.is_empty() { "\n" } else { terminator };
    let key = parse_key_line(content).ok_or_else(|| "sha256 line changed".to_string())?;
    let col = key.col;
    let quoted = match key.quote {
        Quote::Single => format!("'{}'", rewrite.digest),
        Quote::Plain | Quote::Double => format!("\"{}\"", rewrite.digest),
    };
    let replaced = format!("{}{quoted}{}{terminator}", key.prefix, key.suffix);
    let terminator = terminator.to_string();
    lines[at] = replaced;

    let marker = find_marker(lines, at, col);
    match (rewrite.trust, marker) {
        (TrustLevel::Probed, Some(j)) => {
            let (content, term) = split_terminator(&lines[j]);
            let updated = parse_key_line(content)
                .map(|k| format!("{}probed{}{term}", k.prefix, k.suffix))
                .ok_or_else(|| "sha256_source line changed".to_string())?;
            lines[j] = updated;
        }
        (TrustLevel::Probed, None) => {
            lines.insert(at + 1, format!("{}sha256_source: probed{terminator}", " ".repeat(col)));
        }
        (_, Some(j)) => {
            lines.remove(j);
        }
        (_, None) => {}
    }

    Ok(())
}

/// Apply hash rewrites to manifest source text
pub fn apply(source: &str, rewrites: &[HashRewrite]) -> std::result::Result<String, String> {
    let mut lines: Vec<String> = source.split_inclusive('\n').map(str::to_string).collect();

    // Later occurrences first so earlier rewrites cannot shift their index
    let mut ordered: Vec<&HashRewrite> = rewrites.iter().collect();
    ordered.sort_by(|a, b| b.occurrence.cmp(&a.occurrence));
    for rewrite in ordered {
        apply_one(&mut lines, rewrite)?;
    }

    let updated = lines.concat();
    serde_yaml::from_str::<serde_yaml::Value>(&updated)
        .map_err(|e| format!("rewrite produced invalid YAML: {e}"))?;
    Ok(updated)
}

/// Rewrite a manifest file in place, returning the new source
pub fn rewrite_file(path: &Path, source: &str, rewrites: &[HashRewrite]) -> Result<String> {
    let updated = apply(source, rewrites).map_err(|message| RegistryError::Rewrite {
        path: path.to_path_buf(),
        message,
    })?;
    write_atomic(path, &updated)?;
    tracing::info!("Rewrote {} hash(es) in {}", rewrites.len(), path.display());
    Ok(updated)
}

/// Write file atomically (tmp + rename)
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    // Atomic rename
    fs::rename(&tmp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn digest(seed: &[u8]) -> Sha256Digest {
        Sha256Digest::compute(seed)
    }

    fn rewrite(declared: &str, occurrence: usize, d: &Sha256Digest, trust: TrustLevel) -> HashRewrite {
        HashRewrite {
            declared: declared.to_string(),
            occurrence,
            digest: d.clone(),
            trust,
        }
    }

    const VARIANTS: &str = "\
id: flux-dev
name: FLUX.1 dev  # keep this comment
type: checkpoint
variants:
  - id: fp16
    url: https://huggingface.co/x/y/resolve/main/fp16.safetensors
    sha256: \"VERIFY_fp16\"
    size: 100
  - id: fp8
    url: https://huggingface.co/x/y/resolve/main/fp8.safetensors
    sha256: VERIFY_fp8   # todo
    size: 50
";

    #[test]
    fn test_replaces_only_target_value() {
        let d = digest(b"fp16");
        let out = apply(VARIANTS, &[rewrite("VERIFY_fp16", 0, &d, TrustLevel::Verified)]).unwrap();

        assert!(out.contains(&format!("    sha256: \"{d}\"\n")));
        assert!(out.contains("sha256: VERIFY_fp8   # todo"));
        assert!(out.contains("name: FLUX.1 dev  # keep this comment"));
        assert_eq!(out.lines().count(), VARIANTS.lines().count());
    }

    #[test]
    fn test_plain_value_becomes_quoted_and_keeps_comment() {
        let d = digest(b"fp8");
        let out = apply(VARIANTS, &[rewrite("VERIFY_fp8", 0, &d, TrustLevel::Verified)]).unwrap();
        assert!(out.contains(&format!("    sha256: \"{d}\"   # todo\n")));
    }

    #[test]
    fn test_probed_inserts_marker_at_key_column() {
        let d = digest(b"fp16");
        let out = apply(VARIANTS, &[rewrite("VERIFY_fp16", 0, &d, TrustLevel::Probed)]).unwrap();
        assert!(out.contains(&format!("    sha256: \"{d}\"\n    sha256_source: probed\n    size: 100")));

        let doc: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["variants"][0]["sha256_source"].as_str(), Some("probed"));
        assert!(doc["variants"][1].get("sha256_source").is_none());
    }

    #[test]
    fn test_verified_removes_marker() {
        let d = digest(b"weights");
        let source = format!(
            "id: vae\nfile:\n  url: https://example.test/vae.safetensors\n  sha256: \"{d}\"\n  sha256_source: probed\n  size: 10\n"
        );
        let out = apply(&source, &[rewrite(d.as_str(), 0, &d, TrustLevel::Verified)]).unwrap();
        assert!(!out.contains("sha256_source"));
        assert!(out.contains("  size: 10\n"));
    }

    #[test]
    fn test_marker_before_hash_is_found() {
        let d = digest(b"w");
        let source = "file:\n  sha256_source: verified\n  sha256: VERIFY_x\n  size: 1\n";
        let out = apply(source, &[rewrite("VERIFY_x", 0, &d, TrustLevel::Probed)]).unwrap();
        assert!(out.contains("  sha256_source: probed\n"));
        assert_eq!(out.matches("sha256_source").count(), 1);
    }

    #[test]
    fn test_marker_in_next_variant_not_touched() {
        let d = digest(b"a");
        let source = "\
variants:
  - id: a
    sha256: VERIFY_a
  - id: b
    sha256: VERIFY_b
    sha256_source: probed
";
        let out = apply(source, &[rewrite("VERIFY_a", 0, &d, TrustLevel::Verified)]).unwrap();
        assert!(out.contains("    sha256_source: probed\n"));
    }

    const LEADING_HASH: &str = "\
variants:
  - id: a
    sha256: \"aaaa\"
    sha256_source: probed
    size: 1
  - sha256: VERIFY_b
    id: b
    size: 2
";

    #[test]
    fn test_hash_opening_list_item_keeps_previous_marker() {
        let d = digest(b"b");
        let out = apply(LEADING_HASH, &[rewrite("VERIFY_b", 0, &d, TrustLevel::Verified)]).unwrap();

        let doc: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["variants"][0]["sha256_source"].as_str(), Some("probed"));
        assert!(doc["variants"][1].get("sha256_source").is_none());
        assert_eq!(doc["variants"][1]["sha256"].as_str(), Some(d.as_str()));
    }

    #[test]
    fn test_hash_opening_list_item_gets_own_marker() {
        let d = digest(b"b");
        let out = apply(LEADING_HASH, &[rewrite("VERIFY_b", 0, &d, TrustLevel::Probed)]).unwrap();
        assert!(out.contains(&format!("  - sha256: \"{d}\"\n    sha256_source: probed\n    id: b\n")));

        let doc: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["variants"][0]["sha256_source"].as_str(), Some("probed"));
        assert_eq!(doc["variants"][1]["sha256_source"].as_str(), Some("probed"));
    }

    #[test]
    fn test_marker_in_previous_item_not_taken() {
        let d = digest(b"b");
        let source = "\
variants:
  - id: a
    sha256_source: probed
  - id: b
    sha256: VERIFY_b
";
        let out = apply(source, &[rewrite("VERIFY_b", 0, &d, TrustLevel::Verified)]).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["variants"][0]["sha256_source"].as_str(), Some("probed"));
    }

    #[test]
    fn test_shared_placeholder_occurrence() {
        let first = digest(b"1");
        let second = digest(b"2");
        let source = "variants:\n  - id: a\n    sha256: VERIFY_same\n  - id: b\n    sha256: VERIFY_same\n";
        let out = apply(
            source,
            &[
                rewrite("VERIFY_same", 0, &first, TrustLevel::Verified),
                rewrite("VERIFY_same", 1, &second, TrustLevel::Verified),
            ],
        )
        .unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        assert_eq!(doc["variants"][0]["sha256"].as_str(), Some(first.as_str()));
        assert_eq!(doc["variants"][1]["sha256"].as_str(), Some(second.as_str()));
    }

    #[test]
    fn test_missing_line_is_error() {
        let d = digest(b"x");
        let result = apply(VARIANTS, &[rewrite("VERIFY_gone", 0, &d, TrustLevel::Verified)]);
        assert!(result.unwrap_err().contains("VERIFY_gone"));
    }

    #[test]
    fn test_no_trailing_newline() {
        let d = digest(b"x");
        let out = apply("file:\n  sha256: 'VERIFY_x'", &[rewrite("VERIFY_x", 0, &d, TrustLevel::Probed)]).unwrap();
        assert_eq!(out, format!("file:\n  sha256: '{d}'\n  sha256_source: probed\n"));
    }

    #[test]
    fn test_write_atomic() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/index.json");

        write_atomic(&path, "{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!path.with_extension("tmp").exists());
    }
}
