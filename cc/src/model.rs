//! Document model: identities, peer membership and codebase membership
//!
//! Membership lists are stored in front matter as `"<peer> (<mode>)"` strings.
//! They are kept alphabetically sorted and de-duplicated; when the same peer
//! appears with both modes, `live` wins.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable identity of a document, independent of its path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Mint a fresh identity
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Participation mode of a peer in a document's membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerMode {
    /// Push and pull
    Live,
    /// Pull only; never overwritten by the listing cast, deletions never propagate
    Watch,
}

impl PeerMode {
    pub fn is_live(self) -> bool {
        self == Self::Live
    }
}

impl fmt::Display for PeerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Watch => write!(f, "watch"),
        }
    }
}

impl FromStr for PeerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "watch" => Ok(Self::Watch),
            other => Err(format!("unknown peer mode: {}", other)),
        }
    }
}

/// One entry of a document's `cast-hsync` list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerEntry {
    pub name: String,
    pub mode: PeerMode,
}

impl PeerEntry {
    pub fn new(name: impl Into<String>, mode: PeerMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }

    pub fn live(name: impl Into<String>) -> Self {
        Self::new(name, PeerMode::Live)
    }

    pub fn watch(name: impl Into<String>) -> Self {
        Self::new(name, PeerMode::Watch)
    }
}

impl fmt::Display for PeerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.mode)
    }
}

impl FromStr for PeerEntry {
    type Err = String;

    /// Parse `"Name (live)"`, `"Name (watch)"`, or a bare `"Name"` (read as live)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty peer entry".to_string());
        }

        if let Some(open) = s.rfind('(')
            && s.ends_with(')')
        {
            let name = s[..open].trim();
            let mode: PeerMode = s[open + 1..s.len() - 1].parse()?;
            if name.is_empty() || name.contains('(') || name.contains(')') {
                return Err(format!("invalid peer name in entry: {}", s));
            }
            return Ok(Self::new(name, mode));
        }

        if s.contains('(') || s.contains(')') {
            return Err(format!("malformed peer entry: {}", s));
        }
        Ok(Self::live(s))
    }
}

/// Sort alphabetically by peer name and collapse duplicates, preferring `live`
pub fn normalize_membership(entries: impl IntoIterator<Item = PeerEntry>) -> Vec<PeerEntry> {
    let mut merged: BTreeMap<String, PeerMode> = BTreeMap::new();
    for entry in entries {
        merged
            .entry(entry.name)
            .and_modify(|mode| {
                if entry.mode.is_live() {
                    *mode = PeerMode::Live;
                }
            })
            .or_insert(entry.mode);
    }
    merged.into_iter().map(|(name, mode)| PeerEntry { name, mode }).collect()
}

/// Sort and de-duplicate codebase names, dropping blanks
pub fn normalize_codebases(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Look up the mode a membership list assigns to `name`
pub fn mode_of(entries: &[PeerEntry], name: &str) -> Option<PeerMode> {
    entries.iter().find(|e| e.name == name).map(|e| e.mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_peer_entry_with_mode() {
        let entry: PeerEntry = "Beta (watch)".parse().unwrap();
        assert_eq!(entry, PeerEntry::watch("Beta"));

        let entry: PeerEntry = "  My Vault (live) ".parse().unwrap();
        assert_eq!(entry, PeerEntry::live("My Vault"));
    }

    #[test]
    fn test_parse_bare_name_is_live() {
        let entry: PeerEntry = "Alpha".parse().unwrap();
        assert_eq!(entry.mode, PeerMode::Live);
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        assert!("Alpha (push)".parse::<PeerEntry>().is_err());
        assert!("Alpha (live".parse::<PeerEntry>().is_err());
        assert!("".parse::<PeerEntry>().is_err());
    }

    #[test]
    fn test_normalize_prefers_live_and_sorts() {
        let normalized = normalize_membership(vec![
            PeerEntry::watch("Charlie"),
            PeerEntry::live("Alpha"),
            PeerEntry::watch("Beta"),
            PeerEntry::live("Beta"),
            PeerEntry::watch("Alpha"),
        ]);

        assert_eq!(
            normalized,
            vec![
                PeerEntry::live("Alpha"),
                PeerEntry::live("Beta"),
                PeerEntry::watch("Charlie"),
            ]
        );
    }

    #[test]
    fn test_normalize_codebases() {
        let out = normalize_codebases(vec!["zeta".into(), "alpha".into(), " ".into(), "zeta".into()]);
        assert_eq!(out, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let entry = PeerEntry::watch("Field Notes");
        assert_eq!(entry.to_string(), "Field Notes (watch)");
        assert_eq!(entry.to_string().parse::<PeerEntry>().unwrap(), entry);
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent_and_unique(
            raw in proptest::collection::vec(("[a-e]", any::<bool>()), 0..12)
        ) {
            let entries: Vec<PeerEntry> = raw
                .iter()
                .map(|(n, live)| PeerEntry::new(n.clone(), if *live { PeerMode::Live } else { PeerMode::Watch }))
                .collect();
            let once = normalize_membership(entries.clone());
            let twice = normalize_membership(once.clone());
            prop_assert_eq!(&once, &twice);

            let names: Vec<&str> = once.iter().map(|e| e.name.as_str()).collect();
            let mut sorted = names.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(names, sorted);

            for entry in &once {
                let any_live = entries.iter().any(|e| e.name == entry.name && e.mode.is_live());
                prop_assert_eq!(entry.mode.is_live(), any_live);
            }
        }
    }
}
