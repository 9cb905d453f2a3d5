//! Patch transactions
//!
//! A transaction targets one file and carries an ordered list of blocks.
//! Blocks never consult a journal: whether a block already ran is decided
//! by looking at the target's current content.

use regex::{Captures, Regex};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Callback rewriting one regex match from its captures
pub type CapturesFn = Arc<dyn Fn(&Captures<'_>) -> String + Send + Sync>;

/// Callback rewriting a whole file
pub type ContentFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Where a block attaches
#[derive(Debug, Clone)]
pub enum Anchor {
    /// Exact text
    Literal(String),

    /// Regex; for line anchors the line holding the end of the match counts
    Pattern(Regex),
}

impl Anchor {
    /// Byte range of the first match
    fn find(&self, content: &str) -> Option<std::ops::Range<usize>> {
        match self {
            Self::Literal(text) => content.find(text.as_str()).map(|start| start..start + text.len()),
            Self::Pattern(regex) => regex.find(content).map(|m| m.range()),
        }
    }

    /// Every match, left to right
    fn find_all(&self, content: &str) -> Vec<std::ops::Range<usize>> {
        match self {
            Self::Literal(text) if text.is_empty() => Vec::new(),
            Self::Literal(text) => content
                .match_indices(text.as_str())
                .map(|(start, m)| start..start + m.len())
                .collect(),
            Self::Pattern(regex) => regex.find_iter(content).map(|m| m.range()).collect(),
        }
    }
}

/// How a block edits its target
#[derive(Clone)]
pub enum Strategy {
    /// Insert the payload as lines after the anchor line, shifted by `offset`
    /// (`-1` inserts directly above it)
    LineAnchor { offset: isize },

    /// Insert the payload right after every anchor match
    Join,

    /// Replace every anchor match with the payload
    Replace,

    /// Rewrite every match of the pattern anchor through a callback
    ReplaceUnsafe(CapturesFn),

    /// Rewrite the whole file through a callback
    ReplaceFull(ContentFn),

    /// Placeholder that never edits
    None,
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LineAnchor { offset } => f.debug_struct("LineAnchor").field("offset", offset).finish(),
            Self::Join => f.write_str("Join"),
            Self::Replace => f.write_str("Replace"),
            Self::ReplaceUnsafe(_) => f.write_str("ReplaceUnsafe(..)"),
            Self::ReplaceFull(_) => f.write_str("ReplaceFull(..)"),
            Self::None => f.write_str("None"),
        }
    }
}

/// What happened to one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Content changed
    Applied,

    /// Payload present, or the edit reproduces the current content
    AlreadyApplied,

    /// Anchor not found in the target
    AnchorMissing,

    /// Skipped because extension mode is on
    SkippedMode,

    /// `Strategy::None`
    Noop,
}

impl BlockOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl fmt::Display for BlockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Applied => "applied",
            Self::AlreadyApplied => "already applied",
            Self::AnchorMissing => "anchor missing",
            Self::SkippedMode => "skipped in extension mode",
            Self::Noop => "no-op",
        };
        f.write_str(text)
    }
}

/// One declarative edit
#[derive(Debug, Clone)]
pub struct Block {
    /// Name used in logs and reports
    pub name: String,

    strategy: Strategy,
    anchor: Option<Anchor>,
    payload: String,
    marker: Option<String>,
    skip_in_extension_mode: bool,
}

impl Block {
    fn with_strategy(name: impl Into<String>, strategy: Strategy, anchor: Option<Anchor>, payload: String) -> Self {
        Self {
            name: name.into(),
            strategy,
            anchor,
            payload,
            marker: None,
            skip_in_extension_mode: false,
        }
    }

    /// Insert `payload` after the first line matching `anchor`
    pub fn line_anchor(name: impl Into<String>, anchor: Anchor, payload: impl Into<String>) -> Self {
        Self::with_strategy(name, Strategy::LineAnchor { offset: 0 }, Some(anchor), payload.into())
    }

    /// Insert `payload` right after every match of `anchor`
    pub fn join(name: impl Into<String>, anchor: Anchor, payload: impl Into<String>) -> Self {
        Self::with_strategy(name, Strategy::Join, Some(anchor), payload.into())
    }

    /// Replace every match of `anchor` with `payload`
    pub fn replace(name: impl Into<String>, anchor: Anchor, payload: impl Into<String>) -> Self {
        Self::with_strategy(name, Strategy::Replace, Some(anchor), payload.into())
    }

    /// Rewrite every match of `pattern` through `rewrite`
    pub fn replace_unsafe<F>(name: impl Into<String>, pattern: Regex, rewrite: F) -> Self
    where
        F: Fn(&Captures<'_>) -> String + Send + Sync + 'static,
    {
        Self::with_strategy(
            name,
            Strategy::ReplaceUnsafe(Arc::new(rewrite)),
            Some(Anchor::Pattern(pattern)),
            String::new(),
        )
    }

    /// Rewrite the whole file through `rewrite`
    pub fn replace_full<F>(name: impl Into<String>, rewrite: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::with_strategy(name, Strategy::ReplaceFull(Arc::new(rewrite)), None, String::new())
    }

    pub fn none(name: impl Into<String>) -> Self {
        Self::with_strategy(name, Strategy::None, None, String::new())
    }

    /// Shift a line anchor insertion point
    pub fn with_offset(mut self, offset: isize) -> Self {
        if let Strategy::LineAnchor { .. } = self.strategy {
            self.strategy = Strategy::LineAnchor { offset };
        }
        self
    }

    /// Text whose presence means the block already ran (defaults to the payload)
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Skip this block when extension mode is selected
    pub fn skip_in_extension_mode(mut self) -> Self {
        self.skip_in_extension_mode = true;
        self
    }

    pub fn skips_in_extension_mode(&self) -> bool {
        self.skip_in_extension_mode
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Apply to `content`; the new text is returned only when it changed
    pub fn apply(&self, content: &str) -> (BlockOutcome, Option<String>) {
        if let Strategy::None = self.strategy {
            return (BlockOutcome::Noop, None);
        }

        let marker = self.marker.as_deref().unwrap_or(&self.payload);
        if !marker.is_empty() && content.contains(marker) {
            return (BlockOutcome::AlreadyApplied, None);
        }

        let updated = match (&self.strategy, &self.anchor) {
            (Strategy::ReplaceFull(rewrite), _) => rewrite(content),
            (_, None) => return (BlockOutcome::AnchorMissing, None),
            (strategy, Some(anchor)) => {
                let Some(first) = anchor.find(content) else {
                    return (BlockOutcome::AnchorMissing, None);
                };

                match strategy {
                    Strategy::LineAnchor { offset } => insert_lines(content, first.end, *offset, &self.payload),
                    Strategy::Join => splice_matches(content, &anchor.find_all(content), |m| format!("{}{}", m, self.payload)),
                    Strategy::Replace => splice_matches(content, &anchor.find_all(content), |_| self.payload.clone()),
                    Strategy::ReplaceUnsafe(rewrite) => match anchor {
                        Anchor::Pattern(regex) => regex.replace_all(content, |caps: &Captures<'_>| rewrite(caps)).into_owned(),
                        Anchor::Literal(_) => return (BlockOutcome::AnchorMissing, None),
                    },
                    Strategy::ReplaceFull(_) | Strategy::None => content.to_string(),
                }
            }
        };

        if updated == content {
            (BlockOutcome::AlreadyApplied, None)
        } else {
            (BlockOutcome::Applied, Some(updated))
        }
    }
}

/// Insert `payload` lines relative to the line holding byte `at`
fn insert_lines(content: &str, at: usize, offset: isize, payload: &str) -> String {
    let mut lines: Vec<&str> = content.split('\n').collect();
    let last_char = content[..at].char_indices().last().map_or(0, |(i, _)| i);
    let anchor_line = content[..last_char].matches('\n').count();

    // a trailing newline leaves an empty last element that must stay last
    let last = if content.ends_with('\n') { lines.len() - 1 } else { lines.len() };
    let position = (anchor_line as isize + 1 + offset).clamp(0, last as isize) as usize;

    let inserted: Vec<&str> = payload.split('\n').collect();
    lines.splice(position..position, inserted);
    lines.join("\n")
}

fn splice_matches(content: &str, ranges: &[std::ops::Range<usize>], replacement: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;

    for range in ranges {
        out.push_str(&content[last..range.start]);
        out.push_str(&replacement(&content[range.clone()]));
        last = range.end;
    }
    out.push_str(&content[last..]);
    out
}

/// Where a sentinel-guarded section goes when it is not yet present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Prologue,
    Epilogue,
}

/// Replace the section between `// {sentinel}:begin` and `// {sentinel}:end`,
/// or add it at the start or end of the file
pub fn splice_section(content: &str, sentinel: &str, section: &str, placement: Placement) -> String {
    let begin = format!("// {}:begin", sentinel);
    let end = format!("// {}:end", sentinel);
    let guarded = format!("{}\n{}\n{}", begin, section.trim_end_matches('\n'), end);

    if let Some(start) = content.find(&begin) {
        if let Some(stop) = content[start..].find(&end).map(|o| start + o + end.len()) {
            return format!("{}{}{}", &content[..start], guarded, &content[stop..]);
        }
    }

    match placement {
        Placement::Prologue => format!("{}\n{}", guarded, content),
        Placement::Epilogue if content.is_empty() || content.ends_with('\n') => format!("{}{}\n", content, guarded),
        Placement::Epilogue => format!("{}\n{}\n", content, guarded),
    }
}

/// Drop the section between `// {sentinel}:begin` and `// {sentinel}:end`
/// together with its line break
pub fn remove_section(content: &str, sentinel: &str) -> String {
    let begin = format!("// {}:begin", sentinel);
    let end = format!("// {}:end", sentinel);

    let Some(start) = content.find(&begin) else {
        return content.to_string();
    };
    let Some(stop) = content[start..].find(&end).map(|o| start + o + end.len()) else {
        return content.to_string();
    };

    let stop = if content[stop..].starts_with('\n') { stop + 1 } else { stop };
    format!("{}{}", &content[..start], &content[stop..])
}

/// Ordered blocks against one target file
#[derive(Debug, Clone)]
pub struct Transaction {
    path: PathBuf,
    blocks: Vec<Block>,
}

impl Transaction {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            blocks: Vec::new(),
        }
    }

    /// Append a block
    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
