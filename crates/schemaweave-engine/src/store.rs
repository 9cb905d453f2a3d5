//! Model store: every loaded fragment's models, columns and enums
//!
//! Entries are keyed by `file:name` and kept in load order, which is the
//! order conflicts are reported and models are emitted in.

use schemaweave_core::{Column, Config, ConfigError, EnumDef, FileModel, FtsConfig, ItemKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::block::{extract_blocks, BlockError};

/// Name of the synthesized full-text column
pub const FTS_COLUMN: &str = "textSearch";

/// Extension of fragment files picked up from included directories
pub const FRAGMENT_EXTENSION: &str = "prisma";

/// Where a fragment comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentSource {
    /// File on disk; `id` is the name used in `file:name` keys
    Path { id: String, path: PathBuf },

    /// Text synthesized by a generator stage
    Inline { id: String, text: String },
}

impl FragmentSource {
    /// Fragment identifier
    pub fn id(&self) -> &str {
        match self {
            Self::Path { id, .. } | Self::Inline { id, .. } => id,
        }
    }

    fn read(&self) -> Result<String, LoadError> {
        match self {
            Self::Path { path, .. } => std::fs::read_to_string(path).map_err(|e| LoadError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
            Self::Inline { text, .. } => Ok(text.clone()),
        }
    }
}

/// A model and its columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    /// `file:name`
    pub key: FileModel,

    /// Columns in declaration order
    pub columns: Vec<Column>,

    /// 1-indexed line of the declaration
    pub line: usize,
}

impl ModelEntry {
    /// Find a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| !c.is_raw() && c.name == name)
    }

    /// Whether an identical line is already present
    pub fn has_line(&self, column: &Column) -> bool {
        let line = column.format();
        self.columns.iter().any(|c| c.format() == line)
    }
}

/// An enum and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumEntry {
    /// `file:name`
    pub key: FileModel,

    /// Values
    pub def: EnumDef,

    /// 1-indexed line of the declaration
    pub line: usize,
}

/// In-memory tables of all loaded fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStore {
    base: String,
    generator: String,
    datasource: String,
    files: Vec<String>,
    models: Vec<ModelEntry>,
    enums: Vec<EnumEntry>,
}

impl ModelStore {
    /// Parse fragments; the first source is the base document
    ///
    /// Models and enums whose key satisfies `is_excluded` are dropped entirely.
    pub fn from_sources(
        sources: &[FragmentSource],
        is_excluded: impl Fn(&FileModel) -> bool,
    ) -> Result<Self, LoadError> {
        let base = sources.first().ok_or(LoadError::MissingBase)?;

        let mut store = Self {
            base: base.id().to_string(),
            generator: String::new(),
            datasource: String::new(),
            files: Vec::new(),
            models: Vec::new(),
            enums: Vec::new(),
        };

        for (index, source) in sources.iter().enumerate() {
            let text = source.read()?;
            store.add_fragment(source.id(), &text, index == 0, &is_excluded)?;
        }

        if store.generator.is_empty() {
            return Err(LoadError::MissingGenerator(store.base.clone()));
        }
        if store.datasource.is_empty() {
            return Err(LoadError::MissingDatasource(store.base.clone()));
        }

        Ok(store)
    }

    fn add_fragment(
        &mut self,
        file: &str,
        text: &str,
        is_base: bool,
        is_excluded: &impl Fn(&FileModel) -> bool,
    ) -> Result<(), LoadError> {
        let blocks = extract_blocks(text).map_err(|source| LoadError::Block {
            file: file.to_string(),
            source,
        })?;

        if !self.files.iter().any(|f| f == file) {
            self.files.push(file.to_string());
        }

        for block in blocks {
            let key = FileModel::new(file, block.name.clone());

            match block.keyword.as_str() {
                "generator" | "datasource" if !is_base => {
                    debug!(file, name = %block.name, "ignoring {} outside the base document", block.keyword);
                }
                "generator" => {
                    if self.generator.is_empty() {
                        self.generator = block.text;
                    } else {
                        warn!(file, name = %block.name, "extra generator block in base document ignored");
                    }
                }
                "datasource" => {
                    if self.datasource.is_empty() {
                        self.datasource = block.text;
                    } else {
                        warn!(file, name = %block.name, "extra datasource block in base document ignored");
                    }
                }
                "model" | "enum" if is_excluded(&key) => {
                    debug!(key = %key, "excluded");
                }
                "model" | "enum" if self.contains(&key) => {
                    warn!(key = %key, line = block.line, "duplicate declaration ignored");
                }
                "model" => {
                    let columns = block.body_lines().map(Column::parse_line).collect();
                    self.models.push(ModelEntry {
                        key,
                        columns,
                        line: block.line,
                    });
                }
                "enum" => {
                    let values = block.body_lines().map(str::to_string).collect();
                    self.enums.push(EnumEntry {
                        def: EnumDef::new(block.name.clone(), values),
                        key,
                        line: block.line,
                    });
                }
                other => {
                    debug!(file, keyword = other, name = %block.name, "unsupported block ignored");
                }
            }
        }

        Ok(())
    }

    /// Append the synthesized full-text column and its index to each
    /// configured model
    ///
    /// Indexes on excluded models are skipped.
    pub fn add_fts_columns(
        &mut self,
        fts: &FtsConfig,
        is_excluded: impl Fn(&FileModel) -> bool,
    ) -> Result<(), LoadError> {
        for (key, fields) in &fts.indexes {
            let key = FileModel::parse(key).map_err(ConfigError::from)?;
            if is_excluded(&key) {
                warn!(key = %key, "full-text index on an excluded model skipped");
                continue;
            }
            let language = fts.language.clone();

            let model = self
                .model_mut(&key)
                .ok_or_else(|| LoadError::UnknownModel(key.to_string()))?;

            if model.column(FTS_COLUMN).is_some() {
                continue;
            }

            let expression = fields
                .iter()
                .map(|f| {
                    format!(
                        "setweight(to_tsvector('{}', coalesce({}, '')), '{}')",
                        language, f.name, f.weight
                    )
                })
                .collect::<Vec<_>>()
                .join(" || ");

            model.columns.push(
                Column::new(FTS_COLUMN, "Unsupported(\"tsvector\")?")
                    .with_constraint(format!("@default(dbgenerated(\"{}\"))", expression)),
            );
            model
                .columns
                .push(Column::raw(format!("@@index([{}], type: Gin)", FTS_COLUMN)));
        }

        Ok(())
    }

    /// Fragment identifier of the base document
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Verbatim generator block of the base document
    pub fn generator(&self) -> &str {
        &self.generator
    }

    /// Verbatim datasource block of the base document
    pub fn datasource(&self) -> &str {
        &self.datasource
    }

    /// Loaded fragment identifiers, in load order
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// All models, in load order
    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    /// All enums, in load order
    pub fn enums(&self) -> &[EnumEntry] {
        &self.enums
    }

    /// Mutable access to every model
    pub fn models_mut(&mut self) -> &mut [ModelEntry] {
        &mut self.models
    }

    /// Look up a model
    pub fn model(&self, key: &FileModel) -> Option<&ModelEntry> {
        self.models.iter().find(|m| &m.key == key)
    }

    /// Look up a model mutably
    pub fn model_mut(&mut self, key: &FileModel) -> Option<&mut ModelEntry> {
        self.models.iter_mut().find(|m| &m.key == key)
    }

    /// Look up an enum
    pub fn enum_entry(&self, key: &FileModel) -> Option<&EnumEntry> {
        self.enums.iter().find(|e| &e.key == key)
    }

    /// Look up an enum mutably
    pub fn enum_entry_mut(&mut self, key: &FileModel) -> Option<&mut EnumEntry> {
        self.enums.iter_mut().find(|e| &e.key == key)
    }

    /// Whether a model or enum with this key exists
    pub fn contains(&self, key: &FileModel) -> bool {
        self.kind_of(key).is_some()
    }

    /// Whether this key names a model or an enum (enums take precedence)
    pub fn kind_of(&self, key: &FileModel) -> Option<ItemKind> {
        if self.enum_entry(key).is_some() {
            Some(ItemKind::Enum)
        } else if self.model(key).is_some() {
            Some(ItemKind::Model)
        } else {
            None
        }
    }

    /// Whether `file` declares a model or enum called `name`
    pub fn declares(&self, file: &str, name: &str) -> bool {
        self.contains(&FileModel::new(file, name))
    }

    /// Whether any fragment declares a model called `name`
    pub fn is_model_name(&self, name: &str) -> bool {
        self.models.iter().any(|m| m.key.name == name)
    }

    /// Remove a model and all its columns
    pub fn remove_model(&mut self, key: &FileModel) -> Option<ModelEntry> {
        let index = self.models.iter().position(|m| &m.key == key)?;
        Some(self.models.remove(index))
    }

    /// Remove an enum
    pub fn remove_enum(&mut self, key: &FileModel) -> Option<EnumEntry> {
        let index = self.enums.iter().position(|e| &e.key == key)?;
        Some(self.enums.remove(index))
    }

    /// Re-key a model or enum in place
    ///
    /// False when the item is absent or its fragment already declares
    /// `new_name`.
    pub fn rekey(&mut self, key: &FileModel, item: ItemKind, new_name: &str) -> bool {
        if new_name != key.name && self.declares(&key.file, new_name) {
            return false;
        }

        match item {
            ItemKind::Model => match self.model_mut(key) {
                Some(model) => {
                    model.key = key.renamed(new_name);
                    true
                }
                None => false,
            },
            ItemKind::Enum => match self.enum_entry_mut(key) {
                Some(entry) => {
                    entry.key = key.renamed(new_name);
                    entry.def.name = new_name.to_string();
                    true
                }
                None => false,
            },
        }
    }
}

/// Builds the fragment list from configuration and loads the store
pub struct Loader<'a> {
    config: &'a Config,
    synthesized: Vec<FragmentSource>,
}

impl<'a> Loader<'a> {
    /// Create a loader for a validated configuration
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            synthesized: Vec::new(),
        }
    }

    /// Add a fragment produced by a generator stage
    pub fn with_fragment(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.synthesized.push(FragmentSource::Inline {
            id: id.into(),
            text: text.into(),
        });
        self
    }

    /// Base first, then includes (directories expanded, sorted), then
    /// synthesized fragments
    pub fn sources(&self) -> Result<Vec<FragmentSource>, LoadError> {
        let base = self
            .config
            .base
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or(LoadError::MissingBase)?;

        let base_path = self.config.resolve_path(base);
        if !base_path.is_file() {
            return Err(LoadError::Io {
                path: base_path.display().to_string(),
                message: "base document not found".to_string(),
            });
        }

        let mut sources = vec![FragmentSource::Path {
            id: base.to_string(),
            path: base_path,
        }];

        for include in &self.config.include {
            let path = self.config.resolve_path(include);
            if path.is_dir() {
                for (id, file) in walk_fragments(&self.config.project_root, &path) {
                    push_unique(&mut sources, FragmentSource::Path { id, path: file });
                }
            } else {
                push_unique(
                    &mut sources,
                    FragmentSource::Path {
                        id: include.clone(),
                        path,
                    },
                );
            }
        }

        sources.extend(self.synthesized.iter().cloned());
        Ok(sources)
    }

    /// Load every fragment and apply the full-text columns
    pub fn load(&self) -> Result<ModelStore, LoadError> {
        self.config.validate()?;

        let sources = self.sources()?;
        let mut store = ModelStore::from_sources(&sources, |key| self.config.is_excluded(key))?;
        store.add_fts_columns(&self.config.fts, |key| self.config.is_excluded(key))?;

        debug!(
            fragments = store.files().len(),
            models = store.models().len(),
            enums = store.enums().len(),
            "model store loaded"
        );

        Ok(store)
    }
}

fn push_unique(sources: &mut Vec<FragmentSource>, source: FragmentSource) {
    if !sources.iter().any(|s| s.id() == source.id()) {
        sources.push(source);
    }
}

fn walk_fragments(root: &Path, dir: &Path) -> Vec<(String, PathBuf)> {
    let mut found: Vec<(String, PathBuf)> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == FRAGMENT_EXTENSION))
        .map(|e| {
            let path = e.into_path();
            let id = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            (id, path)
        })
        .collect();

    found.sort();
    found
}

/// Fatal load errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no base document configured")]
    MissingBase,

    #[error("base document '{0}' has no generator block")]
    MissingGenerator(String),

    #[error("base document '{0}' has no datasource block")]
    MissingDatasource(String),

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("{file}: {source}")]
    Block {
        file: String,
        #[source]
        source: BlockError,
    },

    #[error("'{0}' is configured but no such model was loaded")]
    UnknownModel(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
