//! SchemaWeave toolchain - post-processing of generated artifacts
//!
//! This crate implements:
//! - Idempotent patch transactions over generator output
//! - Batched, single-write processing per target file
//! - Hash-gated feature registries
//! - Config-driven feature builders

pub mod transaction;
pub mod processor;
pub mod registry;
pub mod features;

pub use transaction::{remove_section, splice_section, Anchor, Block, BlockOutcome, Placement, Strategy, Transaction};
pub use processor::{BlockReport, ProcessSummary, Toolchain, ToolchainError};
pub use registry::{content_hash, FeatureRegistry, MaterializeSummary, RegistryError};
pub use features::{build_features, FeatureOutcome, FeaturePlan};
