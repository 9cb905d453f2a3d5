//! SchemaWeave engine - schema aggregation and conflict resolution
//!
//! This crate implements the merge pipeline:
//! - Fragment loading into the model store
//! - Name conflict detection across fragments
//! - Action-driven resolution with relation repair
//! - Enhanced introspection rewrite rules
//! - Merged document emission

pub mod block;
pub mod store;
pub mod conflict;
pub mod session;
pub mod resolver;
pub mod introspection;
pub mod emit;

pub use block::{extract_blocks, Block, BlockError};
pub use store::{FragmentSource, LoadError, Loader, ModelEntry, EnumEntry, ModelStore};
pub use conflict::{detect_conflicts, Conflict};
pub use session::{Choice, Mutation, MutationLog, Resolution, ResolutionState, ResolveError, Session, Step};
pub use resolver::{Resolver, RuleResolver};
pub use introspection::{IntrospectionRules, RuleMatch};
pub use emit::{EmittedSchema, Emitter};
