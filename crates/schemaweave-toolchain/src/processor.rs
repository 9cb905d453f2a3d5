//! Batched transaction processing
//!
//! Every queued transaction is folded into an in-memory snapshot of its
//! target. Each target is read at most once per pass and written at most
//! once, after all blocks ran.

use schemaweave_core::{Diagnostic, DiagnosticCode, Location, Severity};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::transaction::{BlockOutcome, Transaction};

/// Outcome of one block in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReport {
    /// Target file
    pub path: PathBuf,

    /// Block name
    pub block: String,

    /// What happened
    pub outcome: BlockOutcome,
}

/// Result of one `process` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Per-block outcomes, in processing order
    pub blocks: Vec<BlockReport>,

    /// Files rewritten on disk
    pub files_written: usize,
}

impl ProcessSummary {
    /// Blocks that changed their target
    pub fn applied(&self) -> usize {
        self.blocks.iter().filter(|b| b.outcome.is_applied()).count()
    }

    /// Blocks that left their target alone
    pub fn skipped(&self) -> usize {
        self.blocks.len() - self.applied()
    }

    /// One diagnostic per block outcome
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.blocks
            .iter()
            .map(|report| {
                let code = match report.outcome {
                    BlockOutcome::Applied => DiagnosticCode::PatchApplied,
                    BlockOutcome::AlreadyApplied => DiagnosticCode::PatchAlreadyApplied,
                    BlockOutcome::AnchorMissing => DiagnosticCode::PatchAnchorMissing,
                    BlockOutcome::SkippedMode | BlockOutcome::Noop => DiagnosticCode::Info,
                };
                Diagnostic::new(code, Severity::Info, format!("{}: {}", report.block, report.outcome))
                    .with_location(Location::new(report.path.display().to_string()))
            })
            .collect()
    }
}

struct Snapshot {
    original: String,
    current: String,
}

/// Queue of transactions against generated artifacts
#[derive(Debug, Default)]
pub struct Toolchain {
    transactions: Vec<Transaction>,
    extension_mode: bool,
}

impl Toolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select extension-style integration; blocks marked for it are skipped
    pub fn with_extension_mode(mut self, enabled: bool) -> Self {
        self.extension_mode = enabled;
        self
    }

    pub fn extension_mode(&self) -> bool {
        self.extension_mode
    }

    /// Add a transaction to the next pass
    pub fn queue(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    /// Transactions waiting for the next pass
    pub fn pending(&self) -> usize {
        self.transactions.len()
    }

    /// Apply and drain every queued transaction
    ///
    /// Files are only written when their content changed. An I/O failure
    /// leaves every target untouched if it happens while reading.
    pub fn process(&mut self) -> Result<ProcessSummary, ToolchainError> {
        let transactions = std::mem::take(&mut self.transactions);
        let mut snapshots: BTreeMap<PathBuf, Snapshot> = BTreeMap::new();
        let mut summary = ProcessSummary::default();

        for transaction in &transactions {
            let path = transaction.path().to_path_buf();

            // targets whose blocks all belong to the other integration style are never read
            if self.extension_mode && transaction.blocks().iter().all(|b| b.skips_in_extension_mode()) {
                for block in transaction.blocks() {
                    summary.blocks.push(BlockReport {
                        path: path.clone(),
                        block: block.name.clone(),
                        outcome: BlockOutcome::SkippedMode,
                    });
                }
                continue;
            }

            if !snapshots.contains_key(&path) {
                let original = read_target(&path)?;
                snapshots.insert(
                    path.clone(),
                    Snapshot {
                        current: original.clone(),
                        original,
                    },
                );
            }

            let Some(snapshot) = snapshots.get_mut(&path) else {
                continue;
            };

            for block in transaction.blocks() {
                let outcome = if self.extension_mode && block.skips_in_extension_mode() {
                    BlockOutcome::SkippedMode
                } else {
                    let (outcome, updated) = block.apply(&snapshot.current);
                    if let Some(updated) = updated {
                        snapshot.current = updated;
                    }
                    outcome
                };

                debug!(path = %path.display(), block = %block.name, %outcome, "block processed");
                summary.blocks.push(BlockReport {
                    path: path.clone(),
                    block: block.name.clone(),
                    outcome,
                });
            }
        }

        for (path, snapshot) in &snapshots {
            if snapshot.current != snapshot.original {
                std::fs::write(path, &snapshot.current).map_err(|e| ToolchainError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                summary.files_written += 1;
            }
        }

        info!(
            applied = summary.applied(),
            skipped = summary.skipped(),
            files_written = summary.files_written,
            "toolchain pass complete"
        );

        Ok(summary)
    }
}

fn read_target(path: &Path) -> Result<String, ToolchainError> {
    let bytes = std::fs::read(path).map_err(|e| ToolchainError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    String::from_utf8(bytes).map_err(|e| ToolchainError::Malformed {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Fatal toolchain errors
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed target {path}: {message}")]
    Malformed { path: String, message: String },

    #[error(transparent)]
    Config(#[from] schemaweave_core::ConfigError),

    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{Anchor, Block};
    use pretty_assertions::assert_eq;

    fn note_block(name: &str, anchor: &str, payload: &str) -> Block {
        Block::line_anchor(name, Anchor::Literal(anchor.to_string()), payload)
    }

    #[test]
    fn blocks_for_one_file_are_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.d.ts");
        std::fs::write(&path, "a\nb\n").unwrap();

        let mut toolchain = Toolchain::new();
        toolchain.queue(Transaction::new(&path).block(note_block("after a", "a", "a2")));
        toolchain.queue(Transaction::new(&path).block(note_block("after b", "b", "b2")));

        let summary = toolchain.process().unwrap();
        assert_eq!(summary.files_written, 1);
        assert_eq!(summary.applied(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\na2\nb\nb2\n");
        assert_eq!(toolchain.pending(), 0);
    }

    #[test]
    fn second_pass_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.js");
        std::fs::write(&path, "start\n").unwrap();

        let transaction = Transaction::new(&path).block(note_block("note", "start", "// weave"));

        let mut toolchain = Toolchain::new();
        toolchain.queue(transaction.clone());
        toolchain.process().unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        toolchain.queue(transaction);
        let summary = toolchain.process().unwrap();

        assert_eq!(summary.files_written, 0);
        assert_eq!(summary.blocks[0].outcome, BlockOutcome::AlreadyApplied);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn extension_mode_skips_marked_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.js");
        std::fs::write(&path, "start\n").unwrap();

        let mut toolchain = Toolchain::new().with_extension_mode(true);
        toolchain.queue(
            Transaction::new(&path)
                .block(note_block("classic", "start", "// classic").skip_in_extension_mode())
                .block(note_block("always", "start", "// always")),
        );

        let summary = toolchain.process().unwrap();
        assert_eq!(summary.blocks[0].outcome, BlockOutcome::SkippedMode);
        assert_eq!(summary.blocks[1].outcome, BlockOutcome::Applied);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("classic"));
    }

    #[test]
    fn fully_skipped_target_is_not_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut toolchain = Toolchain::new().with_extension_mode(true);
        toolchain.queue(
            Transaction::new(dir.path().join("absent.d.ts"))
                .block(note_block("classic", "start", "// classic").skip_in_extension_mode()),
        );

        let summary = toolchain.process().unwrap();
        assert_eq!(summary.blocks[0].outcome, BlockOutcome::SkippedMode);
        assert_eq!(summary.files_written, 0);
    }

    #[test]
    fn missing_target_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut toolchain = Toolchain::new();
        toolchain.queue(Transaction::new(dir.path().join("absent.js")).block(Block::none("noop")));

        assert!(matches!(toolchain.process(), Err(ToolchainError::Io { .. })));
    }

    #[test]
    fn binary_target_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.js");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let mut toolchain = Toolchain::new();
        toolchain.queue(Transaction::new(&path).block(Block::none("noop")));

        assert!(matches!(toolchain.process(), Err(ToolchainError::Malformed { .. })));
    }

    #[test]
    fn outcomes_become_diagnostics() {
        let summary = ProcessSummary {
            blocks: vec![BlockReport {
                path: PathBuf::from("index.d.ts"),
                block: "field type".to_string(),
                outcome: BlockOutcome::AnchorMissing,
            }],
            files_written: 0,
        };

        let diagnostics = summary.diagnostics();
        assert_eq!(diagnostics[0].code, DiagnosticCode::PatchAnchorMissing);
        assert_eq!(diagnostics[0].severity, Severity::Info);
    }
}
