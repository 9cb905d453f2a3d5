//! Name conflict detection across fragments

use schemaweave_core::{FileModel, ItemKind};
use std::collections::HashSet;

use crate::store::ModelStore;

/// Two fragments declaring the same bare name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Conflict {
    /// Side declared first
    pub left: FileModel,

    /// Side declared later
    pub right: FileModel,

    /// Enum when either side is an enum
    pub kind: ItemKind,
}

impl Conflict {
    /// The shared bare name
    pub fn name(&self) -> &str {
        &self.left.name
    }

    /// Both sides, declaration order
    pub fn sides(&self) -> [&FileModel; 2] {
        [&self.left, &self.right]
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}' declared in {} and {}", self.kind, self.left.name, self.left.file, self.right.file)
    }
}

/// Every unordered pair of visible items sharing a bare name
///
/// Items in `hidden` (shadowed models, extended parents) take no part.
/// Ordering follows load order: groups by first appearance of the name,
/// pairs by declaration order inside the group.
pub fn detect_conflicts(store: &ModelStore, hidden: &HashSet<FileModel>) -> Vec<Conflict> {
    let mut groups: Vec<(&str, Vec<&FileModel>)> = Vec::new();

    let keys = store
        .models()
        .iter()
        .map(|m| &m.key)
        .chain(store.enums().iter().map(|e| &e.key))
        .filter(|key| !hidden.contains(*key));

    for key in keys {
        match groups.iter_mut().find(|(name, _)| *name == key.name) {
            Some((_, members)) => members.push(key),
            None => groups.push((key.name.as_str(), vec![key])),
        }
    }

    let mut conflicts = Vec::new();
    for (_, members) in groups.into_iter().filter(|(_, m)| m.len() > 1) {
        for (i, left) in members.iter().enumerate() {
            for right in &members[i + 1..] {
                let kind = if [left, right].iter().any(|k| store.kind_of(k) == Some(ItemKind::Enum)) {
                    ItemKind::Enum
                } else {
                    ItemKind::Model
                };

                conflicts.push(Conflict {
                    left: (*left).clone(),
                    right: (*right).clone(),
                    kind,
                });
            }
        }
    }

    conflicts
}
