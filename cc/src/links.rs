//! Link rewriting after renames
//!
//! When a document moves inside a vault, wiki links (`[[Folder/Note#h|alias]]`)
//! and relative Markdown links (`[text](../Folder/Note.md)`) that point at the
//! old location are rewritten to the new one. Only bodies are touched; the
//! front matter block is preserved byte for byte.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::error::Result;
use crate::frontmatter::split_front_matter;
use crate::fsutil::atomic_write;
use crate::index::{markdown_files, relpath_of};

static WIKI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]]+?)\]\]").expect("wiki link pattern is valid"));

static MD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(!?)\[([^\]]*?)\]\(([^)]+?)\)").expect("markdown link pattern is valid")
});

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").expect("scheme pattern is valid"));

/// One move within a vault, as vault-relative `/` paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameSpec {
    pub old_rel: String,
    pub new_rel: String,
}

impl RenameSpec {
    pub fn new(old_rel: impl AsRef<str>, new_rel: impl AsRef<str>) -> Self {
        Self {
            old_rel: norm_rel(old_rel.as_ref()),
            new_rel: norm_rel(new_rel.as_ref()),
        }
    }

    fn old_noext(&self) -> &str {
        strip_md(&self.old_rel)
    }

    fn new_noext(&self) -> &str {
        strip_md(&self.new_rel)
    }

    fn old_stem(&self) -> &str {
        file_name(self.old_noext())
    }

    fn new_stem(&self) -> &str {
        file_name(self.new_noext())
    }
}

/// Files touched by a rewrite pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRewriteReport {
    pub changes: Vec<(String, usize)>,
}

impl LinkRewriteReport {
    pub fn files_changed(&self) -> usize {
        self.changes.len()
    }

    pub fn total_replacements(&self) -> usize {
        self.changes.iter().map(|(_, n)| n).sum()
    }
}

/// Rewrite links across every Markdown file in `vault`
///
/// Files listed in `exclude` (vault-relative) are left alone.
pub fn update_links_for_renames(vault: &Path, renames: &[RenameSpec], exclude: &[String]) -> Result<LinkRewriteReport> {
    let renames: Vec<&RenameSpec> = renames.iter().filter(|r| r.old_rel != r.new_rel).collect();
    let mut report = LinkRewriteReport::default();
    if renames.is_empty() || !vault.exists() {
        return Ok(report);
    }

    for path in markdown_files(vault)? {
        let path = path.as_path();
        let rel = relpath_of(vault, path);
        if exclude.contains(&rel) {
            continue;
        }

        let Ok(content) = fs::read_to_string(path) else {
            debug!(path = %path.display(), "Skipping unreadable file during link rewrite");
            continue;
        };
        let (header, body) = match split_front_matter(&content) {
            Some((_, body)) => content.split_at(content.len() - body.len()),
            None => ("", content.as_str()),
        };

        let cur_dir = parent_dir(&rel);
        let (new_body, count) = rewrite_body(body, &renames, cur_dir);
        if count > 0 {
            let updated = format!("{}{}", header, new_body);
            atomic_write(path, updated.as_bytes())?;
            debug!(file = %rel, replacements = count, "Rewrote links");
            report.changes.push((rel, count));
        }
    }

    if !report.changes.is_empty() {
        info!(
            vault = %vault.display(),
            files = report.files_changed(),
            replacements = report.total_replacements(),
            "Updated links after rename"
        );
    }
    Ok(report)
}

/// Apply every rename to one body; `cur_dir` is the file's vault-relative directory
pub fn rewrite_body(body: &str, renames: &[&RenameSpec], cur_dir: &str) -> (String, usize) {
    let mut text = body.to_string();
    let mut total = 0;
    for spec in renames {
        let (wiki, a) = rewrite_wiki(&text, spec);
        let (md, b) = rewrite_md_links(&wiki, spec, cur_dir);
        text = md;
        total += a + b;
    }
    (text, total)
}

fn rewrite_wiki(body: &str, spec: &RenameSpec) -> (String, usize) {
    let mut count = 0;
    let out = WIKI_RE.replace_all(body, |caps: &Captures| {
        let inner = &caps[1];
        let (target, alias) = match inner.split_once('|') {
            Some((t, a)) => (t, Some(a)),
            None => (inner, None),
        };
        let (path_part, anchor) = match target.split_once('#') {
            Some((p, a)) => (p, format!("#{}", a)),
            None => (target, String::new()),
        };
        let norm = to_posix(path_part.trim());
        let noext = strip_md(&norm);

        let replacement = if noext.contains('/') {
            (noext == spec.old_noext()).then(|| spec.new_noext().to_string())
        } else {
            (noext == spec.old_stem() && spec.old_stem() != spec.new_stem()).then(|| spec.new_stem().to_string())
        };

        match replacement {
            Some(new_target) => {
                count += 1;
                match alias {
                    Some(a) => format!("[[{}{}|{}]]", new_target, anchor, a),
                    None => format!("[[{}{}]]", new_target, anchor),
                }
            }
            None => caps[0].to_string(),
        }
    });
    (out.into_owned(), count)
}

fn rewrite_md_links(body: &str, spec: &RenameSpec, cur_dir: &str) -> (String, usize) {
    let mut count = 0;
    let out = MD_LINK_RE.replace_all(body, |caps: &Captures| {
        if &caps[1] == "!" {
            return caps[0].to_string();
        }
        match rewrite_url(&caps[3], spec, cur_dir) {
            Some(url) => {
                count += 1;
                format!("[{}]({})", &caps[2], url)
            }
            None => caps[0].to_string(),
        }
    });
    (out.into_owned(), count)
}

fn rewrite_url(url: &str, spec: &RenameSpec, cur_dir: &str) -> Option<String> {
    let mut u = url.trim();
    if u.starts_with('#') || SCHEME_RE.is_match(u) {
        return None;
    }

    let had_angle = u.starts_with('<') && u.ends_with('>') && u.len() >= 2;
    if had_angle {
        u = &u[1..u.len() - 1];
    }

    let mut title = None;
    if let Some(quote) = u.rfind(['"', '\''])
        && let Some(space) = u[..quote].rfind(' ')
    {
        title = Some(u[space + 1..].trim());
        u = u[..space].trim_end();
    }

    let (path_and_anchor, query) = match u.split_once('?') {
        Some((p, q)) => (p, format!("?{}", q)),
        None => (u, String::new()),
    };
    let (path_inner, anchor) = match path_and_anchor.split_once('#') {
        Some((p, a)) => (p, format!("#{}", a)),
        None => (path_and_anchor, String::new()),
    };

    let decoded = percent_decode(path_inner);
    let resolved = normalize_join(cur_dir, &to_posix(&decoded));
    let has_ext = decoded.to_ascii_lowercase().ends_with(".md");
    let matches = strip_md(&resolved) == spec.old_noext() || (has_ext && resolved == spec.old_rel);
    if !matches {
        return None;
    }

    let mut new_path = relative_to(&spec.new_rel, cur_dir);
    if !has_ext {
        new_path = strip_md(&new_path).to_string();
    }
    if path_inner.contains('%') {
        new_path = percent_encode(&new_path);
    }

    let mut new_url = format!("{}{}{}", new_path, anchor, query);
    if had_angle {
        new_url = format!("<{}>", new_url);
    }
    if let Some(title) = title {
        new_url = format!("{} {}", new_url, title);
    }
    Some(new_url)
}

fn to_posix(s: &str) -> String {
    let mut out = s.replace('\\', "/");
    while out.contains("//") {
        out = out.replace("//", "/");
    }
    match out.strip_prefix("./") {
        Some(rest) => rest.to_string(),
        None => out,
    }
}

fn norm_rel(s: &str) -> String {
    to_posix(s.trim()).trim_matches('/').to_string()
}

fn strip_md(path: &str) -> &str {
    let cut = path.len().saturating_sub(3);
    match path.get(cut..) {
        Some(ext) if ext.eq_ignore_ascii_case(".md") => &path[..cut],
        _ => path,
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent_dir(rel: &str) -> &str {
    rel.rsplit_once('/').map(|(d, _)| d).unwrap_or("")
}

/// Join `rel` onto `base` and fold `.` and `..` without touching the filesystem
fn normalize_join(base: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for part in rel.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts.join("/")
}

/// `target` expressed relative to directory `start` (both vault-relative)
fn relative_to(target: &str, start: &str) -> String {
    let target: Vec<&str> = target.split('/').filter(|p| !p.is_empty()).collect();
    let start: Vec<&str> = start.split('/').filter(|p| !p.is_empty()).collect();
    let common = target.iter().zip(&start).take_while(|(a, b)| a == b).count();
    let mut parts: Vec<&str> = std::iter::repeat_n("..", start.len() - common).collect();
    parts.extend(&target[common..]);
    parts.join("/")
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]))
        {
            out.push(hi * 16 + lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'/' | b'@' | b':' | b'+' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rename() -> RenameSpec {
        RenameSpec::new("Notes/Old Name.md", "Docs/New Name.md")
    }

    #[test]
    fn test_wiki_links_with_path_alias_and_bare_name() {
        let spec = rename();
        let body = "See [[Notes/Old Name]] and [[Notes/Old Name#Intro|alias]].\nBare [[Old Name]].\nOther [[Unrelated]].\n";
        let (out, n) = rewrite_body(body, &[&spec], "Refs");
        assert_eq!(n, 3);
        assert!(out.contains("[[Docs/New Name]]"));
        assert!(out.contains("[[Docs/New Name#Intro|alias]]"));
        assert!(out.contains("[[New Name]]"));
        assert!(out.contains("[[Unrelated]]"));
    }

    #[test]
    fn test_non_ascii_link_targets() {
        let spec = RenameSpec::new("Notizen/Müll.md", "Notizen/Abfall.md");
        let (out, n) = rewrite_body("See [[Müll]] and [[Straße]] and [[ü]].\n", &[&spec], "");
        assert_eq!(n, 1);
        assert_eq!(out, "See [[Abfall]] and [[Straße]] and [[ü]].\n");

        assert_eq!(strip_md("Müll"), "Müll");
        assert_eq!(strip_md("Müll.MD"), "Müll");
        assert_eq!(strip_md("ü"), "ü");
    }

    #[test]
    fn test_bare_wiki_unchanged_when_only_folder_moves() {
        let spec = RenameSpec::new("A/Note.md", "B/Note.md");
        let (out, n) = rewrite_body("[[Note]]", &[&spec], "");
        assert_eq!(n, 0);
        assert_eq!(out, "[[Note]]");
    }

    #[test]
    fn test_markdown_links_are_relativized() {
        let spec = rename();
        let body = "[md](../Notes/Old%20Name.md#intro \"t\")\n[md2](../Notes/Old%20Name?x=y)\n[md3](<../Notes/Old Name.md#h1>)\n";
        let (out, n) = rewrite_body(body, &[&spec], "Refs");
        assert_eq!(n, 3);
        assert!(out.contains("[md](../Docs/New%20Name.md#intro \"t\")"));
        assert!(out.contains("[md2](../Docs/New%20Name?x=y)"));
        assert!(out.contains("[md3](<../Docs/New Name.md#h1>)"));
    }

    #[test]
    fn test_skips_images_urls_and_anchors() {
        let spec = RenameSpec::new("a.md", "b.md");
        let body = "![img](a.md) [web](https://x.test/a.md) [top](#a) [mail](mailto:a@b)";
        let (out, n) = rewrite_body(body, &[&spec], "");
        assert_eq!(n, 0);
        assert_eq!(out, body);
    }

    #[test]
    fn test_relative_to_and_normalize_join() {
        assert_eq!(relative_to("Docs/New.md", "Refs"), "../Docs/New.md");
        assert_eq!(relative_to("Docs/New.md", "Docs"), "New.md");
        assert_eq!(relative_to("New.md", ""), "New.md");
        assert_eq!(normalize_join("Refs", "../Notes/./Old.md"), "Notes/Old.md");
    }

    #[test]
    fn test_update_links_preserves_front_matter() {
        let temp = TempDir::new().unwrap();
        let vault = temp.path();
        fs::create_dir_all(vault.join("Refs")).unwrap();
        let header = "---\ncast-id: x\ntitle:   spaced\n---\n";
        fs::write(vault.join("Refs/r.md"), format!("{}Link [[Notes/Old Name]]\n", header)).unwrap();
        fs::write(vault.join("Refs/none.md"), "nothing here\n").unwrap();

        let report = update_links_for_renames(vault, &[rename()], &[]).unwrap();
        assert_eq!(report.files_changed(), 1);
        assert_eq!(report.total_replacements(), 1);

        let text = fs::read_to_string(vault.join("Refs/r.md")).unwrap();
        assert!(text.starts_with(header));
        assert!(text.contains("[[Docs/New Name]]"));
    }

    #[test]
    fn test_update_links_honors_exclusions() {
        let temp = TempDir::new().unwrap();
        let vault = temp.path();
        fs::write(vault.join("self.md"), "[[Old]]\n").unwrap();
        let spec = RenameSpec::new("Old.md", "New.md");

        let report = update_links_for_renames(vault, &[spec], &["self.md".to_string()]).unwrap();
        assert_eq!(report.files_changed(), 0);
    }
}
