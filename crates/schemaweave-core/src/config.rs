//! Configuration schema (schemaweave.toml)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::schema::{Action, ColumnKey, FileModel, ItemKind, KeyError};

/// Default bound on introspection fixed-point passes
pub const DEFAULT_MAX_PASSES: usize = 16;

/// What a configured resolution does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveKind {
    Skip,
    Rename,
    RenameRel,
}

/// A pre-configured answer for one side of a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRule {
    /// `file:Name` the action applies to
    pub target: String,

    /// Action to take
    pub action: ResolveKind,

    /// New name (rename actions only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Model or enum
    #[serde(default = "default_kind")]
    pub kind: ItemKind,
}

fn default_kind() -> ItemKind {
    ItemKind::Model
}

impl ResolveRule {
    /// Convert into a queued action
    pub fn to_action(&self) -> Result<(FileModel, Action), ConfigError> {
        let target = FileModel::parse(&self.target)?;
        let item = self.kind;

        let action = match self.action {
            ResolveKind::Skip => Action::Skip { item },
            ResolveKind::Rename | ResolveKind::RenameRel => {
                let new_name = self
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| ConfigError::MissingField(format!("resolve[{}].name", self.target)))?;

                if self.action == ResolveKind::Rename {
                    Action::Rename { new_name, item }
                } else {
                    Action::RenameRel { new_name, item }
                }
            }
        };

        Ok((target, action))
    }
}

/// One name-mapping rule for the enhanced introspection pass
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntrospectionRule {
    /// Exact model name to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Regex the model name must match (anchored by the author)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// New name; regex replacement syntax (`$1`) when `pattern` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,

    /// Attribute lines added to every model sharing the matched name
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// Enhanced introspection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionConfig {
    /// Hard bound on re-running the patch loop
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,

    /// Rules, applied in order
    #[serde(default)]
    pub rules: Vec<IntrospectionRule>,
}

fn default_max_passes() -> usize {
    DEFAULT_MAX_PASSES
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            rules: Vec::new(),
        }
    }
}

/// Extra generator block appended to the merged document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraGenerator {
    /// Block name
    pub name: String,

    /// Provider command
    pub provider: String,

    /// Output path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Feature toggle
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ExtraGenerator {
    /// Render as a generator block
    pub fn render(&self) -> String {
        let mut block = format!("generator {} {{\n  provider = \"{}\"\n", self.name, self.provider);
        if let Some(output) = &self.output {
            block.push_str(&format!("  output   = \"{}\"\n", output));
        }
        block.push('}');
        block
    }
}

/// One weighted field of a full-text index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtsField {
    /// Column name
    pub name: String,

    /// Postgres weight class (A-D)
    #[serde(default = "default_weight")]
    pub weight: String,
}

fn default_weight() -> String {
    "A".to_string()
}

/// Full-text search index configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtsConfig {
    /// Database schema holding the indexed tables (required when enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Text search configuration
    #[serde(default = "default_language")]
    pub language: String,

    /// `file:Model` to indexed fields
    #[serde(default)]
    pub indexes: BTreeMap<String, Vec<FtsField>>,
}

fn default_language() -> String {
    "english".to_string()
}

impl Default for FtsConfig {
    fn default() -> Self {
        Self {
            schema: None,
            language: default_language(),
            indexes: BTreeMap::new(),
        }
    }
}

impl FtsConfig {
    /// Whether any index is configured
    pub fn is_enabled(&self) -> bool {
        !self.indexes.is_empty()
    }
}

/// Where artifacts are read and written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Merged document, read by the downstream generator
    #[serde(default = "default_schema_path")]
    pub schema: PathBuf,

    /// Directory of the generated client that the toolchain patches
    #[serde(default = "default_client_dir")]
    pub client: PathBuf,

    /// Root of the materialized feature packages
    #[serde(default = "default_features_dir")]
    pub features: PathBuf,

    /// Use extension-style wrapping instead of patching the client
    #[serde(default)]
    pub extension_mode: bool,

    /// Generator command; `{schema}` is replaced by the merged document path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_command: Option<String>,
}

fn default_schema_path() -> PathBuf {
    PathBuf::from(".schemaweave/schema.prisma")
}

fn default_client_dir() -> PathBuf {
    PathBuf::from("node_modules/.prisma/client")
}

fn default_features_dir() -> PathBuf {
    PathBuf::from(".schemaweave/features")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            schema: default_schema_path(),
            client: default_client_dir(),
            features: default_features_dir(),
            extension_mode: false,
            generate_command: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base fragment; its generator and datasource blocks head the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    /// Additional fragments (files or directories)
    #[serde(default)]
    pub include: Vec<String>,

    /// `file:Name` keys (globs allowed) dropped at load time
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Allow relations that point into another fragment
    #[serde(default)]
    pub cross_file_relations: bool,

    /// Remap table: `file:Model.column` to `file:Model`
    #[serde(default)]
    pub relations: BTreeMap<String, String>,

    /// Inheritance table: child `file:Model` to parent `file:Model`
    #[serde(default)]
    pub extended: BTreeMap<String, String>,

    /// Pre-configured conflict resolutions
    #[serde(default)]
    pub resolve: Vec<ResolveRule>,

    /// Enhanced introspection rules
    #[serde(default)]
    pub introspection: IntrospectionConfig,

    /// Extra generator blocks
    #[serde(default)]
    pub generators: Vec<ExtraGenerator>,

    /// Full-text search indexes
    #[serde(default)]
    pub fts: FtsConfig,

    /// `Model.field` to client type override
    #[serde(default)]
    pub field_types: BTreeMap<String, String>,

    /// `Model.field` to deprecation message
    #[serde(default)]
    pub deprecated: BTreeMap<String, String>,

    /// `Model` to default row limit
    #[serde(default)]
    pub static_take: BTreeMap<String, u32>,

    /// Output locations
    #[serde(default)]
    pub output: OutputConfig,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base: None,
            include: Vec::new(),
            exclude: Vec::new(),
            cross_file_relations: false,
            relations: BTreeMap::new(),
            extended: BTreeMap::new(),
            resolve: Vec::new(),
            introspection: IntrospectionConfig::default(),
            generators: Vec::new(),
            fts: FtsConfig::default(),
            field_types: BTreeMap::new(),
            deprecated: BTreeMap::new(),
            static_take: BTreeMap::new(),
            output: OutputConfig::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_toml(&contents)?;

        // Project root is the config file's directory, always absolute
        let cwd = std::env::current_dir()
            .map_err(|e| ConfigError::IoError(format!("current directory: {}", e)))?;
        config.project_root = project_root_of(path, &cwd);

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Check every field the pipeline requires
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingField("base".to_string()));
        }

        if self.fts.is_enabled() && self.fts.schema.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingField("fts.schema".to_string()));
        }

        for key in self.fts.indexes.keys() {
            FileModel::parse(key)?;
        }

        self.relation_table()?;
        self.extended_table()?;

        for rule in &self.resolve {
            rule.to_action()?;
        }

        for (i, rule) in self.introspection.rules.iter().enumerate() {
            if rule.name.is_none() && rule.pattern.is_none() {
                return Err(ConfigError::MissingField(format!(
                    "introspection.rules[{}].name or pattern",
                    i
                )));
            }
            if let Some(pattern) = &rule.pattern {
                regex::Regex::new(pattern)
                    .map_err(|e| ConfigError::InvalidPattern(pattern.clone(), e.to_string()))?;
            }
        }

        if self.introspection.max_passes == 0 {
            return Err(ConfigError::MissingField("introspection.max_passes".to_string()));
        }

        Ok(())
    }

    /// Parsed remap table
    pub fn relation_table(&self) -> Result<Vec<(ColumnKey, FileModel)>, ConfigError> {
        self.relations
            .iter()
            .map(|(from, to)| Ok((ColumnKey::parse(from)?, FileModel::parse(to)?)))
            .collect()
    }

    /// Parsed inheritance table
    pub fn extended_table(&self) -> Result<Vec<(FileModel, FileModel)>, ConfigError> {
        self.extended
            .iter()
            .map(|(child, parent)| Ok((FileModel::parse(child)?, FileModel::parse(parent)?)))
            .collect()
    }

    /// Whether a `file:Name` key is excluded
    pub fn is_excluded(&self, key: &FileModel) -> bool {
        let key = key.to_string();
        self.exclude.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, &key)
            } else {
                pattern == &key
            }
        })
    }

    /// Resolve a path relative to the project root
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }
}

fn project_root_of(config_path: &Path, cwd: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or_else(|| Path::new(""));
    if parent.is_absolute() {
        parent.to_path_buf()
    } else {
        cwd.join(parent)
    }
}

/// Simple glob matching (supports a single `*`)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }

    if let Some(star_pos) = pattern.find('*') {
        let prefix = &pattern[..star_pos];
        let suffix = &pattern[star_pos + 1..];

        text.len() >= prefix.len() + suffix.len()
            && text.starts_with(prefix)
            && text.ends_with(suffix)
    } else {
        pattern == text
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Missing required field '{0}'")]
    MissingField(String),

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    #[error("Invalid pattern '{0}': {1}")]
    InvalidPattern(String, String),
}
