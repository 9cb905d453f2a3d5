//! Conflict resolvers
//!
//! The session asks a resolver for one action per presented conflict. The
//! binary uses `RuleResolver`, fed from `[[resolve]]` tables; tests and
//! embedders can pass any closure.

use schemaweave_core::{Action, Config, ConfigError, FileModel};

use crate::session::Choice;

/// Answers presented conflicts
pub trait Resolver {
    /// Pick an action for one of `choice.candidates`; `None` leaves the
    /// conflict unresolved
    fn choose(&mut self, choice: &Choice) -> Option<(FileModel, Action)>;
}

impl<F> Resolver for F
where
    F: FnMut(&Choice) -> Option<(FileModel, Action)>,
{
    fn choose(&mut self, choice: &Choice) -> Option<(FileModel, Action)> {
        self(choice)
    }
}

/// Resolver backed by a fixed list of `target -> action` answers
#[derive(Debug, Clone, Default)]
pub struct RuleResolver {
    rules: Vec<(FileModel, Action)>,
}

impl RuleResolver {
    pub fn new(rules: Vec<(FileModel, Action)>) -> Self {
        Self { rules }
    }

    /// Build from the `[[resolve]]` tables of a configuration
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let rules = config
            .resolve
            .iter()
            .map(|rule| rule.to_action())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(rules))
    }

    /// Number of configured answers
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Resolver for RuleResolver {
    fn choose(&mut self, choice: &Choice) -> Option<(FileModel, Action)> {
        // first candidate with an answer wins
        choice.candidates.iter().find_map(|candidate| {
            self.rules
                .iter()
                .find(|(target, _)| target == candidate)
                .cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::Conflict;
    use schemaweave_core::ItemKind;

    fn choice(left: &str, right: &str) -> Choice {
        Choice {
            conflict: Conflict {
                left: FileModel::parse(left).unwrap(),
                right: FileModel::parse(right).unwrap(),
                kind: ItemKind::Model,
            },
            candidates: vec![FileModel::parse(left).unwrap(), FileModel::parse(right).unwrap()],
            auto_mapped: Vec::new(),
            references: Vec::new(),
        }
    }

    #[test]
    fn picks_rule_for_a_candidate() {
        let mut resolver = RuleResolver::new(vec![(
            FileModel::new("b.prisma", "User"),
            Action::Skip { item: ItemKind::Model },
        )]);

        let picked = resolver.choose(&choice("a.prisma:User", "b.prisma:User")).unwrap();
        assert_eq!(picked.0, FileModel::new("b.prisma", "User"));
    }

    #[test]
    fn no_rule_means_unresolved() {
        let mut resolver = RuleResolver::new(vec![(
            FileModel::new("c.prisma", "User"),
            Action::Skip { item: ItemKind::Model },
        )]);

        assert!(resolver.choose(&choice("a.prisma:User", "b.prisma:User")).is_none());
    }

    #[test]
    fn from_config_reads_resolve_tables() {
        let config = Config::from_toml(
            r#"
base = "base.prisma"

[[resolve]]
target = "b.prisma:User"
action = "rename-rel"
name = "Member"
"#,
        )
        .unwrap();

        let mut resolver = RuleResolver::from_config(&config).unwrap();
        assert_eq!(resolver.len(), 1);

        let (_, action) = resolver.choose(&choice("a.prisma:User", "b.prisma:User")).unwrap();
        assert_eq!(
            action,
            Action::RenameRel {
                new_name: "Member".to_string(),
                item: ItemKind::Model,
            }
        );
    }
}
