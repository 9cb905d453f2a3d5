//! SchemaWeave Core
//!
//! Domain model shared by the engine, the toolchain and the binary.
//! Never rename diagnostic codes - they are part of the public API.

pub mod diagnostic;
pub mod schema;
pub mod report;
pub mod config;

pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use schema::{Action, Column, ColumnKey, Directive, EnumDef, FileModel, ItemKind, KeyError};
pub use report::{RunReport, ReportSummary, ReportVersion};
pub use config::{
    Config, ConfigError, ExtraGenerator, FtsConfig, FtsField, IntrospectionConfig,
    IntrospectionRule, OutputConfig, ResolveRule,
};
