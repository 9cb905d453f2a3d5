//! Enhanced introspection rules
//!
//! Name-mapping rules that run after conflict resolution. A matching rule
//! may rename the model (with relation repair) and add attribute lines to
//! every model that ends up with the matched name.

use regex::Regex;
use schemaweave_core::{ConfigError, IntrospectionConfig};

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Pattern(Regex),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    matcher: Matcher,
    rename: Option<String>,
    attributes: Vec<String>,
}

/// What a rule does to one model name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Replacement name, if the rule renames
    pub new_name: Option<String>,

    /// Attribute lines to add
    pub attributes: Vec<String>,
}

/// Compiled rule list, first match wins
#[derive(Debug, Clone, Default)]
pub struct IntrospectionRules {
    rules: Vec<CompiledRule>,
}

impl IntrospectionRules {
    pub fn from_config(config: &IntrospectionConfig) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(config.rules.len());

        for (i, rule) in config.rules.iter().enumerate() {
            let matcher = match (&rule.name, &rule.pattern) {
                (Some(name), _) => Matcher::Exact(name.clone()),
                (None, Some(pattern)) => Matcher::Pattern(
                    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern(pattern.clone(), e.to_string()))?,
                ),
                (None, None) => {
                    return Err(ConfigError::MissingField(format!(
                        "introspection.rules[{}].name or pattern",
                        i
                    )))
                }
            };

            rules.push(CompiledRule {
                matcher,
                rename: rule.rename.clone(),
                attributes: rule.attributes.iter().map(|a| a.trim().to_string()).collect(),
            });
        }

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Apply the first rule matching `name`
    pub fn match_name(&self, name: &str) -> Option<RuleMatch> {
        self.rules.iter().find_map(|rule| {
            let new_name = match &rule.matcher {
                Matcher::Exact(exact) if exact == name => rule.rename.clone(),
                Matcher::Pattern(regex) if regex.is_match(name) => rule
                    .rename
                    .as_ref()
                    .map(|template| regex.replace(name, template.as_str()).into_owned()),
                _ => return None,
            };

            Some(RuleMatch {
                new_name: new_name.filter(|n| !n.is_empty()),
                attributes: rule.attributes.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemaweave_core::IntrospectionRule;

    fn rules(rules: Vec<IntrospectionRule>) -> IntrospectionRules {
        IntrospectionRules::from_config(&IntrospectionConfig {
            max_passes: 4,
            rules,
        })
        .unwrap()
    }

    #[test]
    fn exact_rule_renames() {
        let rules = rules(vec![IntrospectionRule {
            name: Some("users".to_string()),
            rename: Some("User".to_string()),
            attributes: vec!["@@map(\"users\")".to_string()],
            ..Default::default()
        }]);

        let found = rules.match_name("users").unwrap();
        assert_eq!(found.new_name.as_deref(), Some("User"));
        assert_eq!(found.attributes, vec!["@@map(\"users\")"]);
        assert!(rules.match_name("posts").is_none());
    }

    #[test]
    fn pattern_rule_uses_capture_groups() {
        let rules = rules(vec![IntrospectionRule {
            pattern: Some("^tbl_(\\w+)$".to_string()),
            rename: Some("$1".to_string()),
            ..Default::default()
        }]);

        let found = rules.match_name("tbl_orders").unwrap();
        assert_eq!(found.new_name.as_deref(), Some("orders"));
    }

    #[test]
    fn first_rule_wins() {
        let rules = rules(vec![
            IntrospectionRule {
                pattern: Some("^Audit".to_string()),
                attributes: vec!["@@schema(\"audit\")".to_string()],
                ..Default::default()
            },
            IntrospectionRule {
                name: Some("AuditLog".to_string()),
                rename: Some("Log".to_string()),
                ..Default::default()
            },
        ]);

        let found = rules.match_name("AuditLog").unwrap();
        assert_eq!(found.new_name, None);
        assert_eq!(found.attributes.len(), 1);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = IntrospectionRules::from_config(&IntrospectionConfig {
            max_passes: 4,
            rules: vec![IntrospectionRule {
                pattern: Some("(".to_string()),
                ..Default::default()
            }],
        })
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidPattern(..)));
    }
}
