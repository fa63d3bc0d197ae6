//! YAML front matter parsing, migration and rendering
//!
//! A cast file is a Markdown document that starts with a `---` delimited YAML
//! block. Only files whose front matter carries at least one `cast-*` key take
//! part in sync.

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::model::{DocId, PeerEntry, normalize_codebases, normalize_membership};

pub const FIELD_LAST_UPDATED: &str = "last-updated";
pub const FIELD_ID: &str = "cast-id";
pub const FIELD_HSYNC: &str = "cast-hsync";
pub const FIELD_CODEBASES: &str = "cast-codebases";
pub const FIELD_VERSION: &str = "cast-version";

/// Pre-`cast-hsync` name of the membership list
pub const LEGACY_FIELD_HSYNC: &str = "cast-vaults";

/// Key order used when writing front matter
const CANONICAL_ORDER: [&str; 5] = [FIELD_LAST_UPDATED, FIELD_ID, FIELD_HSYNC, FIELD_CODEBASES, FIELD_VERSION];

static FRONT_MATTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").expect("front matter pattern is valid")
});

/// Split text into `(yaml, body)`; `None` when there is no front matter block
pub fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let caps = FRONT_MATTER_RE.captures(text)?;
    let whole = caps.get(0)?;
    let yaml = caps.get(1)?.as_str();
    Some((yaml, &text[whole.end()..]))
}

/// Parsed front matter plus body of one Markdown file
#[derive(Debug, Clone, PartialEq)]
pub struct CastFile {
    pub front_matter: Mapping,
    pub body: String,
}

impl CastFile {
    /// Parse a document; `None` if it has no front matter or the block is not a YAML mapping
    pub fn parse(text: &str) -> Option<Self> {
        let (yaml, body) = split_front_matter(text)?;
        let front_matter = match serde_yaml::from_str::<Value>(yaml) {
            Ok(Value::Mapping(m)) => m,
            _ => return None,
        };
        Some(Self {
            front_matter,
            body: body.to_string(),
        })
    }

    /// Whether any `cast-*` key is present
    pub fn has_cast_fields(&self) -> bool {
        self.front_matter
            .iter()
            .any(|(k, _)| k.as_str().is_some_and(|s| s.starts_with("cast-")))
    }

    /// Rewrite legacy keys in place; returns true if anything changed
    ///
    /// `cast-vaults` entries are folded into `cast-hsync`.
    pub fn migrate(&mut self) -> bool {
        let Some(legacy) = self.front_matter.get(LEGACY_FIELD_HSYNC).cloned() else {
            return false;
        };

        let mut entries = string_list(self.front_matter.get(FIELD_HSYNC));
        entries.extend(string_list(Some(&legacy)));

        let mut migrated = Mapping::new();
        for (k, v) in &self.front_matter {
            match k.as_str() {
                Some(LEGACY_FIELD_HSYNC) | Some(FIELD_HSYNC) => {}
                _ => {
                    migrated.insert(k.clone(), v.clone());
                }
            }
        }
        migrated.insert(
            Value::from(FIELD_HSYNC),
            Value::Sequence(entries.into_iter().map(Value::from).collect()),
        );
        self.front_matter = migrated;
        true
    }

    pub fn id(&self) -> Option<DocId> {
        match self.front_matter.get(FIELD_ID)? {
            Value::String(s) if !s.trim().is_empty() => Some(DocId::from(s.trim())),
            _ => None,
        }
    }

    pub fn set_id(&mut self, id: &DocId) {
        self.front_matter.insert(Value::from(FIELD_ID), Value::from(id.as_str()));
    }

    pub fn version(&self) -> Option<u64> {
        match self.front_matter.get(FIELD_VERSION)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn set_version(&mut self, version: u64) {
        self.front_matter.insert(Value::from(FIELD_VERSION), Value::from(version));
    }

    /// Raw membership strings as written
    pub fn membership_raw(&self) -> Vec<String> {
        string_list(self.front_matter.get(FIELD_HSYNC))
    }

    /// Parsed and normalized membership; unparseable entries are dropped
    pub fn membership(&self) -> Vec<PeerEntry> {
        let parsed = self.membership_raw().into_iter().filter_map(|raw| match raw.parse::<PeerEntry>() {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(entry = %raw, error = %e, "Ignoring invalid cast-hsync entry");
                None
            }
        });
        normalize_membership(parsed)
    }

    pub fn set_membership(&mut self, entries: &[PeerEntry]) {
        let seq = entries.iter().map(|e| Value::from(e.to_string())).collect();
        self.front_matter.insert(Value::from(FIELD_HSYNC), Value::Sequence(seq));
    }

    pub fn codebases(&self) -> Vec<String> {
        normalize_codebases(string_list(self.front_matter.get(FIELD_CODEBASES)))
    }

    pub fn set_codebases(&mut self, names: &[String]) {
        let seq = names.iter().map(|n| Value::from(n.as_str())).collect();
        self.front_matter.insert(Value::from(FIELD_CODEBASES), Value::Sequence(seq));
    }

    /// Normalize membership and codebase lists in place; returns true if the
    /// stored representation changed
    pub fn normalize_lists(&mut self) -> bool {
        let mut changed = false;

        if self.front_matter.contains_key(FIELD_HSYNC) {
            let normalized = self.membership();
            let rendered: Vec<String> = normalized.iter().map(|e| e.to_string()).collect();
            if rendered != self.membership_raw() || !is_sequence(self.front_matter.get(FIELD_HSYNC)) {
                self.set_membership(&normalized);
                changed = true;
            }
        }

        if self.front_matter.contains_key(FIELD_CODEBASES) {
            let normalized = self.codebases();
            if normalized != string_list(self.front_matter.get(FIELD_CODEBASES))
                || !is_sequence(self.front_matter.get(FIELD_CODEBASES))
            {
                self.set_codebases(&normalized);
                changed = true;
            }
        }

        changed
    }

    /// Front matter with `last-updated` and the cast fields first, in canonical order
    pub fn ordered_front_matter(&self) -> Mapping {
        let mut out = Mapping::new();
        for key in CANONICAL_ORDER {
            if let Some(v) = self.front_matter.get(key) {
                out.insert(Value::from(key), v.clone());
            }
        }
        for (k, v) in &self.front_matter {
            if k.as_str().is_some_and(|s| CANONICAL_ORDER.contains(&s)) {
                continue;
            }
            out.insert(k.clone(), v.clone());
        }
        out
    }

    /// Serialize back to Markdown text
    pub fn render(&self) -> String {
        let yaml = serde_yaml::to_string(&Value::Mapping(self.ordered_front_matter())).unwrap_or_default();
        format!("---\n{}---\n{}", yaml, self.body)
    }
}

fn is_sequence(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Sequence(_)))
}

/// Read a YAML scalar-or-sequence of strings
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Sequence(seq)) => seq.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeerMode;

    const NOTE: &str = "---\ntitle: Note\ncast-id: 11111111-1111-1111-1111-111111111111\ncast-hsync:\n- Beta (watch)\n- Alpha (live)\ncast-version: 1\n---\nHello\n";

    #[test]
    fn test_split_front_matter_lf_and_crlf() {
        let (yaml, body) = split_front_matter("---\na: 1\n---\nbody\n").unwrap();
        assert_eq!(yaml, "a: 1");
        assert_eq!(body, "body\n");

        let (yaml, body) = split_front_matter("---\r\na: 1\r\n---\r\nbody\r\n").unwrap();
        assert_eq!(yaml, "a: 1");
        assert_eq!(body, "body\r\n");
    }

    #[test]
    fn test_no_front_matter() {
        assert!(split_front_matter("# Title\n\nno yaml").is_none());
        assert!(CastFile::parse("---\n- just\n- a list\n---\nbody").is_none());
    }

    #[test]
    fn test_parse_fields() {
        let file = CastFile::parse(NOTE).unwrap();
        assert!(file.has_cast_fields());
        assert_eq!(file.id().unwrap().as_str(), "11111111-1111-1111-1111-111111111111");
        assert_eq!(file.version(), Some(1));
        let members = file.membership();
        assert_eq!(members[0].name, "Alpha");
        assert_eq!(members[1].mode, PeerMode::Watch);
        assert_eq!(file.body, "Hello\n");
    }

    #[test]
    fn test_migrate_legacy_vaults_field() {
        let text = "---\ncast-id: abc\ncast-vaults:\n- Alpha (live)\n---\nbody\n";
        let mut file = CastFile::parse(text).unwrap();
        assert!(file.migrate());
        assert!(file.front_matter.get(LEGACY_FIELD_HSYNC).is_none());
        assert_eq!(file.membership_raw(), vec!["Alpha (live)".to_string()]);
        assert!(!file.migrate());
    }

    #[test]
    fn test_normalize_lists_reports_change() {
        let mut file = CastFile::parse(NOTE).unwrap();
        assert!(file.normalize_lists());
        assert_eq!(
            file.membership_raw(),
            vec!["Alpha (live)".to_string(), "Beta (watch)".to_string()]
        );
        assert!(!file.normalize_lists());
    }

    #[test]
    fn test_render_orders_cast_fields_first() {
        let file = CastFile::parse(NOTE).unwrap();
        let rendered = file.render();
        let id_pos = rendered.find("cast-id").unwrap();
        let hsync_pos = rendered.find("cast-hsync").unwrap();
        let version_pos = rendered.find("cast-version").unwrap();
        let title_pos = rendered.find("title").unwrap();
        assert!(id_pos < hsync_pos && hsync_pos < version_pos && version_pos < title_pos);
        assert!(rendered.starts_with("---\n"));
        assert!(rendered.ends_with("---\nHello\n"));

        let reparsed = CastFile::parse(&rendered).unwrap();
        assert_eq!(reparsed.id(), file.id());
        assert_eq!(reparsed.body, file.body);
    }
}
