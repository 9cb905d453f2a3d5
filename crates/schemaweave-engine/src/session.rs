//! Resolution session
//!
//! The session owns the pristine store loaded from disk and a queue of
//! actions. `apply_patches` never mutates the pristine store: it replays the
//! whole queue onto a fresh copy, so repeated calls are deterministic and
//! the introspection pass can restart the replay from scratch.

use schemaweave_core::{Action, ColumnKey, Config, ConfigError, FileModel, ItemKind};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::conflict::{detect_conflicts, Conflict};
use crate::introspection::IntrospectionRules;
use crate::resolver::Resolver;
use crate::store::ModelStore;

/// Where the resolution loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    /// Conflicts are being recomputed
    AwaitingResolution,

    /// Remaps were queued from the configured relation table
    AutoMapped,

    /// A choice is waiting for the resolver
    UserChoice,

    /// No conflicts remain
    Done,
}

/// A conflict presented to the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// The conflict being resolved
    pub conflict: Conflict,

    /// Sides the resolver may act on (skip or rename)
    pub candidates: Vec<FileModel>,

    /// Sides whose inbound relations were remapped automatically
    pub auto_mapped: Vec<FileModel>,

    /// Relation columns referring to the shared name
    pub references: Vec<ColumnKey>,
}

/// Outcome of one step of the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing left to resolve
    Done,

    /// The resolver must pick an action
    Choice(Choice),
}

/// One effect of replaying the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Item removed by a skip
    Removed { key: FileModel, item: ItemKind },

    /// Item re-keyed; `retyped` columns now use the new name
    Renamed {
        from: FileModel,
        to: FileModel,
        retyped: usize,
    },

    /// Remapper entry installed
    Remapped {
        from: ColumnKey,
        to: FileModel,
        shadowed: Option<FileModel>,
    },

    /// Attribute line added by an introspection rule
    AttributeAdded { key: FileModel, attribute: String },

    /// Target no longer exists; the action had nothing to do
    Absent { key: FileModel, action: Action },

    /// Rename refused because the fragment already declares the new name
    NameTaken { key: FileModel, name: String },
}

/// Everything one replay did, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationLog {
    pub entries: Vec<Mutation>,
}

impl MutationLog {
    fn push(&mut self, mutation: Mutation) {
        debug!(?mutation, "applied");
        self.entries.push(mutation);
    }

    /// Number of recorded effects
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing happened
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of driving the loop to completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Choices answered by the resolver
    pub resolved: usize,

    /// Introspection passes that changed the store
    pub introspection_passes: usize,
}

/// Merge state carried through the pipeline
#[derive(Debug, Clone)]
pub struct Session {
    pristine: ModelStore,
    store: ModelStore,
    mapper: Vec<(ColumnKey, FileModel)>,
    links: Vec<(FileModel, FileModel)>,
    cross_file_relations: bool,
    rules: IntrospectionRules,
    max_passes: usize,
    queue: Vec<(FileModel, Action)>,
    attributes: Vec<(String, String)>,
    remapper: Vec<(ColumnKey, FileModel)>,
    shadows: Vec<(FileModel, FileModel)>,
    extended: Vec<(FileModel, FileModel)>,
    log: MutationLog,
    state: ResolutionState,
}

impl Session {
    /// Start a session over a loaded store
    pub fn new(store: ModelStore) -> Self {
        Self {
            store: store.clone(),
            pristine: store,
            mapper: Vec::new(),
            links: Vec::new(),
            cross_file_relations: false,
            rules: IntrospectionRules::default(),
            max_passes: schemaweave_core::config::DEFAULT_MAX_PASSES,
            queue: Vec::new(),
            attributes: Vec::new(),
            remapper: Vec::new(),
            shadows: Vec::new(),
            extended: Vec::new(),
            log: MutationLog::default(),
            state: ResolutionState::AwaitingResolution,
        }
    }

    /// Start a session with the relation, inheritance and introspection
    /// settings of a configuration
    pub fn from_config(store: ModelStore, config: &Config) -> Result<Self, ResolveError> {
        let mut session = Self::new(store)
            .with_cross_file_relations(config.cross_file_relations)
            .with_rules(IntrospectionRules::from_config(&config.introspection)?, config.introspection.max_passes);

        for (from, to) in config.relation_table()? {
            session = session.with_mapping(from, to);
        }
        for (child, parent) in config.extended_table()? {
            if !session.pristine.contains(&parent) {
                warn!(child = %child, parent = %parent, "extended parent not loaded");
            }
            session = session.with_extended(child, parent);
        }

        session.apply_patches();
        Ok(session)
    }

    /// Allow relations that point into another fragment
    pub fn with_cross_file_relations(mut self, enabled: bool) -> Self {
        self.cross_file_relations = enabled;
        self
    }

    /// Add a configured relation target
    pub fn with_mapping(mut self, from: ColumnKey, to: FileModel) -> Self {
        upsert(&mut self.mapper, from, to);
        self
    }

    /// Add an inheritance link
    pub fn with_extended(mut self, child: FileModel, parent: FileModel) -> Self {
        upsert(&mut self.links, child, parent);
        self.extended = self.links.clone();
        self
    }

    /// Set introspection rules and the pass budget
    pub fn with_rules(mut self, rules: IntrospectionRules, max_passes: usize) -> Self {
        self.rules = rules;
        self.max_passes = max_passes;
        self
    }

    /// Current (patched) store
    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Active remapper entries
    pub fn remapper(&self) -> &[(ColumnKey, FileModel)] {
        &self.remapper
    }

    /// Shadowed model to the model that replaces it
    pub fn shadows(&self) -> &[(FileModel, FileModel)] {
        &self.shadows
    }

    /// Child to parent inheritance links, after renames
    pub fn extended_links(&self) -> &[(FileModel, FileModel)] {
        &self.extended
    }

    /// Queued actions
    pub fn queue(&self) -> &[(FileModel, Action)] {
        &self.queue
    }

    /// Log of the latest replay
    pub fn log(&self) -> &MutationLog {
        &self.log
    }

    /// Loop state
    pub fn state(&self) -> ResolutionState {
        self.state
    }

    /// Items that take part in neither conflicts nor emission
    pub fn hidden(&self) -> HashSet<FileModel> {
        self.shadows
            .iter()
            .map(|(shadow, _)| shadow.clone())
            .chain(self.extended.iter().map(|(_, parent)| parent.clone()))
            .collect()
    }

    /// Queue an action against an item
    pub fn suggest(&mut self, target: FileModel, action: Action) {
        debug!(target = %target, action = %action, "queued");
        self.queue.push((target, action));
    }

    /// Current conflicts, recomputed from the patched store
    pub fn conflicts(&self) -> Vec<Conflict> {
        detect_conflicts(&self.store, &self.hidden())
    }

    /// Relation columns, in any visible model, whose type names this item
    pub fn referred_relations(&self, target: &FileModel) -> Vec<ColumnKey> {
        let hidden = self.hidden();

        self.store
            .models()
            .iter()
            .filter(|m| !hidden.contains(&m.key))
            .flat_map(|m| {
                m.columns
                    .iter()
                    .filter(|c| !c.is_raw() && c.is_relation() && c.base_type() == target.name)
                    .map(move |c| m.key.column(c.name.clone()))
            })
            .collect()
    }

    /// Configured mappings that send this item's inbound relations to it
    pub fn can_fix_cross_file_with_mapper(&self, target: &FileModel) -> Vec<(ColumnKey, FileModel)> {
        self.referred_relations(target)
            .into_iter()
            .filter_map(|column| {
                self.mapper
                    .iter()
                    .find(|(from, to)| from == &column && to == target)
                    .map(|(from, to)| (from.clone(), to.clone()))
            })
            .collect()
    }

    /// Re-derive the working store by replaying the queue onto the
    /// pristine store
    pub fn apply_patches(&mut self) -> &MutationLog {
        let mut store = self.pristine.clone();
        let mut remapper: Vec<(ColumnKey, FileModel)> = Vec::new();
        let mut shadows: Vec<(FileModel, FileModel)> = Vec::new();
        let mut extended = self.links.clone();
        let mut log = MutationLog::default();

        for (target, action) in &self.queue {
            match action {
                Action::Skip { item } => {
                    let removed = match item {
                        ItemKind::Model => store.remove_model(target).is_some(),
                        ItemKind::Enum => store.remove_enum(target).is_some(),
                    };
                    if removed {
                        log.push(Mutation::Removed {
                            key: target.clone(),
                            item: *item,
                        });
                    } else {
                        log.push(Mutation::Absent {
                            key: target.clone(),
                            action: action.clone(),
                        });
                    }
                }
                Action::Rename { new_name, item } | Action::RenameRel { new_name, item } => {
                    if new_name != &target.name && store.declares(&target.file, new_name) {
                        log.push(Mutation::NameTaken {
                            key: target.clone(),
                            name: new_name.clone(),
                        });
                        continue;
                    }
                    if !store.rekey(target, *item, new_name) {
                        log.push(Mutation::Absent {
                            key: target.clone(),
                            action: action.clone(),
                        });
                        continue;
                    }

                    let repair = matches!(action, Action::RenameRel { .. });
                    let retyped = retype_references(&mut store, target, new_name, repair);
                    let renamed = target.renamed(new_name.clone());

                    for (from, to) in remapper.iter_mut() {
                        if &from.model == target {
                            from.model = renamed.clone();
                        }
                        if to == target {
                            *to = renamed.clone();
                        }
                    }
                    shadows.retain(|(shadow, _)| shadow != target);
                    for (_, replacement) in shadows.iter_mut() {
                        if replacement == target {
                            *replacement = renamed.clone();
                        }
                    }
                    for (child, parent) in extended.iter_mut() {
                        if child == target {
                            *child = renamed.clone();
                        }
                        if parent == target {
                            *parent = renamed.clone();
                        }
                    }

                    log.push(Mutation::Renamed {
                        from: target.clone(),
                        to: renamed,
                        retyped,
                    });
                }
                Action::Remap { from, to, .. } => {
                    let shadowed = store
                        .model(&from.model)
                        .and_then(|m| m.column(&from.column))
                        .map(|c| from.model.renamed(c.base_type()))
                        .filter(|s| s != to && store.model(s).is_some());

                    upsert(&mut remapper, from.clone(), to.clone());
                    if let Some(shadow) = &shadowed {
                        upsert(&mut shadows, shadow.clone(), to.clone());
                    }

                    log.push(Mutation::Remapped {
                        from: from.clone(),
                        to: to.clone(),
                        shadowed,
                    });
                }
            }
        }

        for (name, attribute) in &self.attributes {
            let column = schemaweave_core::Column::parse_line(attribute);
            for model in store.models_mut().iter_mut().filter(|m| &m.key.name == name) {
                if !model.has_line(&column) {
                    model.columns.push(column.clone());
                    log.push(Mutation::AttributeAdded {
                        key: model.key.clone(),
                        attribute: attribute.clone(),
                    });
                }
            }
        }

        self.store = store;
        self.remapper = remapper;
        self.shadows = shadows;
        self.extended = extended;
        self.log = log;
        &self.log
    }

    /// Advance the loop by one conflict
    ///
    /// Conflicts that disappear once configured remaps are applied never
    /// reach the resolver.
    pub fn next_step(&mut self) -> Result<Step, ResolveError> {
        loop {
            self.state = ResolutionState::AwaitingResolution;
            self.apply_patches();

            let Some(conflict) = self.conflicts().into_iter().next() else {
                self.state = ResolutionState::Done;
                return Ok(Step::Done);
            };

            let sides = [conflict.left.clone(), conflict.right.clone()];
            let references = self.referred_relations(&conflict.left);

            if !self.cross_file_relations {
                for side in &sides {
                    if let Some(column) = references.iter().find(|r| r.model.file != side.file) {
                        return Err(ResolveError::CrossFileRelation {
                            column: column.clone(),
                            target: side.clone(),
                        });
                    }
                }
            }

            let mut auto_mapped = Vec::new();
            for side in &sides {
                let fixes = self.can_fix_cross_file_with_mapper(side);
                if fixes.is_empty() {
                    continue;
                }

                auto_mapped.push(side.clone());
                for (from, to) in fixes {
                    let active = self.remapper.iter().any(|(f, t)| f == &from && t == &to);
                    if !active {
                        self.suggest(
                            to.clone(),
                            Action::Remap {
                                from,
                                to,
                                item: ItemKind::Model,
                            },
                        );
                    }
                }
            }

            if !auto_mapped.is_empty() {
                self.state = ResolutionState::AutoMapped;
                self.apply_patches();

                if !self.conflicts().contains(&conflict) {
                    debug!(conflict = %conflict, "resolved by configured relations");
                    continue;
                }
            }

            let candidates = if auto_mapped.len() == 1 {
                sides.into_iter().filter(|s| s != &auto_mapped[0]).collect()
            } else {
                sides.to_vec()
            };

            self.state = ResolutionState::UserChoice;
            return Ok(Step::Choice(Choice {
                conflict,
                candidates,
                auto_mapped,
                references,
            }));
        }
    }

    /// Resolve every conflict through `resolver`, then run introspection
    /// rules to a fixed point
    pub fn resolve(&mut self, resolver: &mut dyn Resolver) -> Result<Resolution, ResolveError> {
        let mut outcome = Resolution::default();

        loop {
            outcome.resolved += self.resolve_conflicts(resolver)?;

            if !self.run_introspection() {
                break;
            }

            outcome.introspection_passes += 1;
            if outcome.introspection_passes > self.max_passes {
                return Err(ResolveError::IntrospectionDiverged {
                    passes: self.max_passes,
                });
            }
        }

        info!(
            resolved = outcome.resolved,
            introspection_passes = outcome.introspection_passes,
            queued = self.queue.len(),
            "resolution converged"
        );
        Ok(outcome)
    }

    fn resolve_conflicts(&mut self, resolver: &mut dyn Resolver) -> Result<usize, ResolveError> {
        let mut resolved = 0;
        let mut previous: Option<Conflict> = None;

        loop {
            let choice = match self.next_step()? {
                Step::Done => return Ok(resolved),
                Step::Choice(choice) => choice,
            };

            if previous.as_ref() == Some(&choice.conflict) {
                return Err(ResolveError::Stalled(choice.conflict.to_string()));
            }

            let (target, action) = resolver
                .choose(&choice)
                .ok_or_else(|| ResolveError::Unresolved(choice.conflict.to_string()))?;

            if !choice.candidates.contains(&target) {
                return Err(ResolveError::InvalidChoice {
                    target: target.to_string(),
                    conflict: choice.conflict.to_string(),
                });
            }

            if let Action::Rename { new_name, .. } | Action::RenameRel { new_name, .. } = &action {
                if new_name != &target.name && self.store.declares(&target.file, new_name) {
                    return Err(ResolveError::NameTaken {
                        target: target.to_string(),
                        name: new_name.clone(),
                    });
                }
            }

            self.suggest(target, action);
            resolved += 1;
            previous = Some(choice.conflict);
        }
    }

    /// One introspection pass; true when a rule changed anything
    pub fn run_introspection(&mut self) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let hidden = self.hidden();
        let mut names: Vec<String> = Vec::new();
        for model in self.store.models().iter().filter(|m| !hidden.contains(&m.key)) {
            if !names.contains(&model.key.name) {
                names.push(model.key.name.clone());
            }
        }

        let mut changed = false;
        for name in names {
            let Some(found) = self.rules.match_name(&name) else {
                continue;
            };

            let final_name = found.new_name.clone().unwrap_or_else(|| name.clone());
            for attribute in found.attributes {
                let entry = (final_name.clone(), attribute);
                if !self.attributes.contains(&entry) {
                    self.attributes.push(entry);
                    changed = true;
                }
            }

            if let Some(new_name) = found.new_name.filter(|n| n != &name) {
                let targets: Vec<FileModel> = self
                    .store
                    .models()
                    .iter()
                    .filter(|m| m.key.name == name)
                    .map(|m| m.key.clone())
                    .collect();

                for target in targets {
                    self.suggest(
                        target,
                        Action::RenameRel {
                            new_name: new_name.clone(),
                            item: ItemKind::Model,
                        },
                    );
                    changed = true;
                }
            }
        }

        if changed {
            self.apply_patches();
        }
        changed
    }
}

/// Rewrite column types naming the renamed item
///
/// Without repair only the item's own fragment is touched. With repair every
/// fragment is, except fragments that still declare their own item under
/// the old name.
fn retype_references(store: &mut ModelStore, target: &FileModel, new_name: &str, repair: bool) -> usize {
    let old = target.name.as_str();
    let own_declarations: HashSet<String> = store
        .models()
        .iter()
        .map(|m| &m.key)
        .chain(store.enums().iter().map(|e| &e.key))
        .filter(|k| k.name == old)
        .map(|k| k.file.clone())
        .collect();

    let mut retyped = 0;
    for model in store.models_mut().iter_mut() {
        let in_scope = model.key.file == target.file
            || (repair && !own_declarations.contains(&model.key.file));
        if !in_scope {
            continue;
        }

        for column in model.columns.iter_mut().filter(|c| !c.is_raw() && c.base_type() == old) {
            column.retype(new_name);
            retyped += 1;
        }
    }

    retyped
}

fn upsert<K: PartialEq, V>(entries: &mut Vec<(K, V)>, key: K, value: V) {
    match entries.iter_mut().find(|(k, _)| k == &key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

/// Fatal resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("relation {column} points at {target} across fragments, but cross-file relations are disabled")]
    CrossFileRelation { column: ColumnKey, target: FileModel },

    #[error("no resolution for conflict: {0}")]
    Unresolved(String),

    #[error("{target} is not a candidate for conflict: {conflict}")]
    InvalidChoice { target: String, conflict: String },

    #[error("cannot rename {target} to '{name}': the fragment already declares it")]
    NameTaken { target: String, name: String },

    #[error("resolution did not change conflict: {0}")]
    Stalled(String),

    #[error("introspection rules still rewriting after {passes} passes")]
    IntrospectionDiverged { passes: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
