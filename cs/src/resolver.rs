//! Conflict Resolver - turns a conflicting edge into a resolution
//!
//! The engine never prompts by itself; it asks an injected [`ConflictResolver`].
//! [`DefaultResolver`] applies the fixed policy, [`InteractiveResolver`] shows
//! a diff and asks through a [`Prompter`].

use std::collections::VecDeque;
use std::fmt;

use castcore::{DocId, PeerMode};
use colored::*;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde::Serialize;
use similar::TextDiff;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::merge::ConflictKind;

/// How a conflict is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Local version wins on both sides; the peer's version goes to a sidecar
    KeepLocal,
    /// Peer version wins on both sides; the local version goes to a sidecar
    KeepPeer,
    /// Local wins at the canonical path; the peer's version is forked next to it
    KeepBoth,
    /// Leave both sides and the baseline alone
    Skip,
}

impl Resolution {
    fn label(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep local",
            Self::KeepPeer => "keep peer",
            Self::KeepBoth => "keep both",
            Self::Skip => "skip (resolve later)",
        }
    }

    fn choice(self) -> &'static str {
        match self {
            Self::KeepLocal => "1",
            Self::KeepPeer => "2",
            Self::KeepBoth => "3",
            Self::Skip => "4",
        }
    }

    fn from_choice(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::KeepLocal),
            "2" => Some(Self::KeepPeer),
            "3" => Some(Self::KeepBoth),
            "4" => Some(Self::Skip),
            _ => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One conflict as presented to a resolver
#[derive(Debug, Clone)]
pub struct ConflictCase<'a> {
    pub id: &'a DocId,
    pub kind: ConflictKind,
    pub local_cast: &'a str,
    pub peer_cast: &'a str,
    pub local_path: Option<&'a str>,
    pub peer_path: Option<&'a str>,
    /// `None` when that side deleted the document
    pub local: Option<&'a str>,
    pub peer: Option<&'a str>,
    /// Mode the local document declares for the peer
    pub edge: PeerMode,
}

impl ConflictCase<'_> {
    /// Resolutions permitted on this edge; a watch edge may not write the peer
    pub fn allowed(&self) -> Vec<Resolution> {
        let live = self.edge.is_live();
        let mut out = Vec::with_capacity(4);
        if live {
            out.push(Resolution::KeepLocal);
        }
        out.push(Resolution::KeepPeer);
        if live && self.local.is_some() && self.peer.is_some() {
            out.push(Resolution::KeepBoth);
        }
        out.push(Resolution::Skip);
        out
    }

    /// Keep local on live edges, keep peer on watch edges
    pub fn default_resolution(&self) -> Resolution {
        if self.edge.is_live() {
            Resolution::KeepLocal
        } else {
            Resolution::KeepPeer
        }
    }

    /// Line diff of the two versions
    pub fn diff(&self) -> String {
        let local = self.local.unwrap_or("");
        let peer = self.peer.unwrap_or("");
        let local_header = format!("{} (local)", self.local_path.unwrap_or("<deleted>"));
        let peer_header = format!("{} ({})", self.peer_path.unwrap_or("<deleted>"), self.peer_cast);
        let diff = TextDiff::from_lines(local, peer);
        diff.unified_diff()
            .context_radius(3)
            .header(&local_header, &peer_header)
            .to_string()
    }
}

/// Decides how a conflict is settled
pub trait ConflictResolver {
    fn resolve(&mut self, case: &ConflictCase<'_>) -> Result<Resolution>;
}

/// Non-interactive fixed policy
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl ConflictResolver for DefaultResolver {
    fn resolve(&mut self, case: &ConflictCase<'_>) -> Result<Resolution> {
        let resolution = case.default_resolution();
        debug!(id = %case.id, peer = case.peer_cast, %resolution, "Default conflict resolution");
        Ok(resolution)
    }
}

/// Line-oriented I/O used by the interactive resolver
pub trait Prompter {
    fn say(&mut self, text: &str) -> Result<()>;

    /// Read one answer; `None` on end of input
    fn ask(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Prompter on the controlling terminal
pub struct TerminalPrompter {
    editor: DefaultEditor,
}

impl TerminalPrompter {
    pub fn new() -> Result<Self> {
        let editor = DefaultEditor::new().map_err(|e| SyncError::Prompt(e.to_string()))?;
        Ok(Self { editor })
    }
}

impl Prompter for TerminalPrompter {
    fn say(&mut self, text: &str) -> Result<()> {
        println!("{}", text);
        Ok(())
    }

    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Some(line)),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
            Err(e) => Err(SyncError::Prompt(e.to_string())),
        }
    }
}

/// Prompter fed from a list of answers, recording everything shown
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub transcript: String,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: String::new(),
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn say(&mut self, text: &str) -> Result<()> {
        self.transcript.push_str(text);
        self.transcript.push('\n');
        Ok(())
    }

    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        self.transcript.push_str(prompt);
        let answer = self.answers.pop_front();
        if let Some(a) = &answer {
            self.transcript.push_str(a);
        }
        self.transcript.push('\n');
        Ok(answer)
    }
}

/// Shows a diff and asks which version to keep
pub struct InteractiveResolver<P: Prompter> {
    prompter: P,
}

impl<P: Prompter> InteractiveResolver<P> {
    pub fn new(prompter: P) -> Self {
        Self { prompter }
    }

    pub fn into_inner(self) -> P {
        self.prompter
    }
}

impl<P: Prompter> ConflictResolver for InteractiveResolver<P> {
    fn resolve(&mut self, case: &ConflictCase<'_>) -> Result<Resolution> {
        let path = case.local_path.or(case.peer_path).unwrap_or("?");
        self.prompter.say(&format!(
            "{} {} ({}) between {} and {}",
            "Conflict:".red().bold(),
            path,
            describe(case.kind),
            case.local_cast.cyan(),
            case.peer_cast.cyan()
        ))?;
        for line in case.diff().lines() {
            let painted = if line.starts_with("+++") || line.starts_with("---") {
                line.bold().to_string()
            } else if line.starts_with('+') {
                line.green().to_string()
            } else if line.starts_with('-') {
                line.red().to_string()
            } else {
                line.to_string()
            };
            self.prompter.say(&painted)?;
        }

        let allowed = case.allowed();
        for option in &allowed {
            self.prompter.say(&format!("  [{}] {}", option.choice(), option))?;
        }

        loop {
            let Some(answer) = self.prompter.ask("Choose: ")? else {
                return Ok(Resolution::Skip);
            };
            match Resolution::from_choice(&answer) {
                Some(r) if allowed.contains(&r) => return Ok(r),
                Some(r) => self.prompter.say(&format!("'{}' is not allowed on this edge", r))?,
                None => self.prompter.say(&format!("Unrecognized choice '{}'", answer.trim()))?,
            }
        }
    }
}

fn describe(kind: ConflictKind) -> &'static str {
    match kind {
        ConflictKind::FirstContact => "both sides differ, never synced",
        ConflictKind::BothChanged => "both sides changed",
        ConflictKind::LocalChangedPeerDeleted => "changed locally, deleted at peer",
        ConflictKind::LocalDeletedPeerChanged => "deleted locally, changed at peer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case<'a>(id: &'a DocId, edge: PeerMode) -> ConflictCase<'a> {
        ConflictCase {
            id,
            kind: ConflictKind::BothChanged,
            local_cast: "Alpha",
            peer_cast: "Beta",
            local_path: Some("a.md"),
            peer_path: Some("a.md"),
            local: Some("line one\nlocal edit\n"),
            peer: Some("line one\npeer edit\n"),
            edge,
        }
    }

    #[test]
    fn test_allowed_resolutions_by_edge_mode() {
        let id = DocId::from("x");
        assert_eq!(
            case(&id, PeerMode::Live).allowed(),
            vec![
                Resolution::KeepLocal,
                Resolution::KeepPeer,
                Resolution::KeepBoth,
                Resolution::Skip
            ]
        );
        assert_eq!(
            case(&id, PeerMode::Watch).allowed(),
            vec![Resolution::KeepPeer, Resolution::Skip]
        );

        let mut deleted = case(&id, PeerMode::Live);
        deleted.peer = None;
        assert!(!deleted.allowed().contains(&Resolution::KeepBoth));
    }

    #[test]
    fn test_default_resolver_policy() {
        let id = DocId::from("x");
        let mut resolver = DefaultResolver;
        assert_eq!(resolver.resolve(&case(&id, PeerMode::Live)).unwrap(), Resolution::KeepLocal);
        assert_eq!(resolver.resolve(&case(&id, PeerMode::Watch)).unwrap(), Resolution::KeepPeer);
    }

    #[test]
    fn test_diff_shows_both_versions() {
        let id = DocId::from("x");
        let diff = case(&id, PeerMode::Live).diff();
        assert!(diff.contains("-local edit"));
        assert!(diff.contains("+peer edit"));
    }

    #[test]
    fn test_interactive_reprompts_on_disallowed_choice() {
        let id = DocId::from("x");
        let mut resolver = InteractiveResolver::new(ScriptedPrompter::new(["9", "1", "2"]));
        let resolution = resolver.resolve(&case(&id, PeerMode::Watch)).unwrap();
        assert_eq!(resolution, Resolution::KeepPeer);

        let transcript = resolver.into_inner().transcript;
        assert!(transcript.contains("Unrecognized choice '9'"));
        assert!(transcript.contains("not allowed"));
        assert!(transcript.contains("local edit"));
    }

    #[test]
    fn test_interactive_end_of_input_skips() {
        let id = DocId::from("x");
        let mut resolver = InteractiveResolver::new(ScriptedPrompter::new(Vec::<String>::new()));
        assert_eq!(resolver.resolve(&case(&id, PeerMode::Live)).unwrap(), Resolution::Skip);
    }

    #[test]
    fn test_interactive_keep_both() {
        let id = DocId::from("x");
        let mut resolver = InteractiveResolver::new(ScriptedPrompter::new(["3"]));
        assert_eq!(resolver.resolve(&case(&id, PeerMode::Live)).unwrap(), Resolution::KeepBoth);
    }
}
