//! Content fingerprints
//!
//! A fingerprint is the SHA-256 of a canonical rendering of the document:
//! line endings are normalized to LF, `last-updated` is dropped, the cast
//! fields are emitted first with membership lists normalized, and remaining
//! keys are sorted. Re-serializing semantically unchanged content therefore
//! yields the same fingerprint.

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::frontmatter::{
    CastFile, FIELD_CODEBASES, FIELD_HSYNC, FIELD_ID, FIELD_LAST_UPDATED, FIELD_VERSION,
};

/// Fingerprint of a document's content (lowercase hex SHA-256)
pub fn fingerprint(content: &str) -> String {
    let canonical = canonicalize(content);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical text that the fingerprint is computed over
pub fn canonicalize(content: &str) -> String {
    let text = normalize_line_endings(content);

    let Some(mut file) = CastFile::parse(&text) else {
        return text;
    };
    file.migrate();

    let mut mapping = Mapping::new();
    if let Some(id) = file.id() {
        mapping.insert(Value::from(FIELD_ID), Value::from(id.as_str()));
    }
    if file.front_matter.contains_key(FIELD_HSYNC) {
        let members: Vec<Value> = file.membership().iter().map(|e| Value::from(e.to_string())).collect();
        mapping.insert(Value::from(FIELD_HSYNC), Value::Sequence(members));
    }
    if file.front_matter.contains_key(FIELD_CODEBASES) {
        let names: Vec<Value> = file.codebases().into_iter().map(Value::from).collect();
        mapping.insert(Value::from(FIELD_CODEBASES), Value::Sequence(names));
    }
    if let Some(version) = file.version() {
        mapping.insert(Value::from(FIELD_VERSION), Value::from(version));
    }

    let mut rest: Vec<(String, Value)> = file
        .front_matter
        .iter()
        .filter_map(|(k, v)| {
            let key = match k {
                Value::String(s) => s.clone(),
                other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
            };
            let managed = [FIELD_LAST_UPDATED, FIELD_ID, FIELD_HSYNC, FIELD_CODEBASES, FIELD_VERSION];
            (!managed.contains(&key.as_str())).then(|| (key, v.clone()))
        })
        .collect();
    rest.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in rest {
        mapping.insert(Value::from(k), v);
    }

    let yaml = serde_yaml::to_string(&Value::Mapping(mapping)).unwrap_or_default();
    format!("---\n{}---\n{}", yaml, file.body)
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "---\ncast-id: abc\ncast-hsync:\n- Alpha (live)\n- Beta (live)\ncast-version: 1\ntitle: T\n---\nBody\n";

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint(BASE);
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint(BASE));
    }

    #[test]
    fn test_ignores_line_endings() {
        assert_eq!(fingerprint(BASE), fingerprint(&BASE.replace('\n', "\r\n")));
    }

    #[test]
    fn test_ignores_last_updated_and_key_order() {
        let reordered = "---\ntitle: T\nlast-updated: 2024-01-01 10:00\ncast-version: 1\ncast-hsync:\n- Beta (live)\n- Alpha (live)\ncast-id: abc\n---\nBody\n";
        assert_eq!(fingerprint(BASE), fingerprint(reordered));
    }

    #[test]
    fn test_legacy_membership_field_matches() {
        let legacy = "---\ncast-id: abc\ncast-vaults:\n- Alpha (live)\n- Beta (live)\ncast-version: 1\ntitle: T\n---\nBody\n";
        assert_eq!(fingerprint(BASE), fingerprint(legacy));
    }

    #[test]
    fn test_body_change_changes_fingerprint() {
        assert_ne!(fingerprint(BASE), fingerprint(&BASE.replace("Body", "Edited")));
    }

    #[test]
    fn test_membership_change_changes_fingerprint() {
        assert_ne!(
            fingerprint(BASE),
            fingerprint(&BASE.replace("- Beta (live)", "- Beta (watch)"))
        );
    }

    #[test]
    fn test_plain_markdown_is_hashed_verbatim() {
        assert_eq!(canonicalize("# Plain\r\n"), "# Plain\n");
    }
}
