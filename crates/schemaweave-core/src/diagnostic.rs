//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Configuration (1xxx)
    /// No base document configured or it could not be read
    ConfigMissingBase,

    /// Base document has no generator block
    ConfigMissingGenerator,

    /// Base document has no datasource block
    ConfigMissingDatasource,

    /// A feature is enabled but one of its required fields is absent
    ConfigMissingField,

    // Merge / resolution (2xxx)
    /// Two fragments declare the same model or enum name
    MergeNameConflict,

    /// A relation crosses fragments while cross-file relations are disabled
    MergeCrossFileRelation,

    /// A conflict was left without a resolution
    MergeUnresolvedConflict,

    /// An action was applied to the model store
    MergeActionApplied,

    /// Introspection rules did not converge within the pass budget
    MergeIntrospectionDiverged,

    // Patch toolchain (3xxx)
    /// Block inserted into a generated artifact
    PatchApplied,

    /// Block payload already present in the target
    PatchAlreadyApplied,

    /// Block anchor not found in the target
    PatchAnchorMissing,

    // Feature registries (4xxx)
    /// Feature file rewritten because its content hash changed
    FeatureWritten,

    /// Feature file left untouched because its content hash matched
    FeatureUnchanged,

    // General warnings (9xxx)
    /// General informational message
    Info,

    /// General warning message
    Warning,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigMissingBase => "CONFIG_MISSING_BASE",
            Self::ConfigMissingGenerator => "CONFIG_MISSING_GENERATOR",
            Self::ConfigMissingDatasource => "CONFIG_MISSING_DATASOURCE",
            Self::ConfigMissingField => "CONFIG_MISSING_FIELD",
            Self::MergeNameConflict => "MERGE_NAME_CONFLICT",
            Self::MergeCrossFileRelation => "MERGE_CROSS_FILE_RELATION",
            Self::MergeUnresolvedConflict => "MERGE_UNRESOLVED_CONFLICT",
            Self::MergeActionApplied => "MERGE_ACTION_APPLIED",
            Self::MergeIntrospectionDiverged => "MERGE_INTROSPECTION_DIVERGED",
            Self::PatchApplied => "PATCH_APPLIED",
            Self::PatchAlreadyApplied => "PATCH_ALREADY_APPLIED",
            Self::PatchAnchorMissing => "PATCH_ANCHOR_MISSING",
            Self::FeatureWritten => "FEATURE_WRITTEN",
            Self::FeatureUnchanged => "FEATURE_UNCHANGED",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - the run cannot continue
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Source location in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path relative to project root
    pub file: String,

    /// Optional line number (1-indexed)
    pub line: Option<usize>,
}

impl Location {
    /// Create a new location with just a file path
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
        }
    }

    /// Create a location with file and line number
    pub fn with_line(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}", self.file, line),
            None => write!(f, "{}", self.file),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Model keys involved (`file:Name`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            subjects: Vec::new(),
        }
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the model keys this diagnostic is about
    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        assert_eq!(DiagnosticCode::MergeNameConflict.as_str(), "MERGE_NAME_CONFLICT");
        assert_eq!(DiagnosticCode::PatchAnchorMissing.as_str(), "PATCH_ANCHOR_MISSING");
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::new(
            DiagnosticCode::MergeCrossFileRelation,
            Severity::Error,
            "Post.author points into another fragment",
        )
        .with_location(Location::with_line("blog.prisma", 12))
        .with_subjects(vec!["blog.prisma:Post".to_string()]);

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("MERGE_CROSS_FILE_RELATION"));
        assert!(json.contains("error"));
        assert!(json.contains("blog.prisma:Post"));
    }

    #[test]
    fn location_display() {
        assert_eq!(Location::new("a.prisma").to_string(), "a.prisma");
        assert_eq!(Location::with_line("a.prisma", 3).to_string(), "a.prisma:3");
    }
}
