//! Schema types: model identity, columns, directives, enums and actions

use serde::{Deserialize, Serialize};

/// Composite identity of a model or enum: `file:name`
///
/// Plain names are only unique inside one fragment, so every table in the
/// engine is keyed by this pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileModel {
    /// Fragment identifier (the path as configured)
    pub file: String,

    /// Bare model or enum name
    pub name: String,
}

impl FileModel {
    /// Create a new key
    pub fn new(file: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            name: name.into(),
        }
    }

    /// Parse `file:name`
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let (file, name) = key
            .rsplit_once(':')
            .ok_or_else(|| KeyError::MissingSeparator(key.to_string()))?;

        if file.is_empty() || name.is_empty() {
            return Err(KeyError::EmptyPart(key.to_string()));
        }

        Ok(Self::new(file, name))
    }

    /// Same file, different name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self::new(self.file.clone(), name)
    }

    /// Key of a column of this model
    pub fn column(&self, column: impl Into<String>) -> ColumnKey {
        ColumnKey {
            model: self.clone(),
            column: column.into(),
        }
    }
}

impl std::fmt::Display for FileModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.name)
    }
}

impl TryFrom<String> for FileModel {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FileModel> for String {
    fn from(value: FileModel) -> Self {
        value.to_string()
    }
}

/// Identity of one column: `file:Model.column`
///
/// This is the key type of the remapper.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ColumnKey {
    /// Owning model
    pub model: FileModel,

    /// Column name
    pub column: String,
}

impl ColumnKey {
    /// Parse `file:Model.column`
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let (file, rest) = key
            .rsplit_once(':')
            .ok_or_else(|| KeyError::MissingSeparator(key.to_string()))?;
        let (model, column) = rest
            .split_once('.')
            .ok_or_else(|| KeyError::MissingColumn(key.to_string()))?;

        if file.is_empty() || model.is_empty() || column.is_empty() {
            return Err(KeyError::EmptyPart(key.to_string()));
        }

        Ok(Self {
            model: FileModel::new(file, model),
            column: column.to_string(),
        })
    }
}

impl std::fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.model, self.column)
    }
}

impl TryFrom<String> for ColumnKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ColumnKey> for String {
    fn from(value: ColumnKey) -> Self {
        value.to_string()
    }
}

/// Malformed `file:name` or `file:Model.column` key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key '{0}' is missing the ':' between file and name")]
    MissingSeparator(String),

    #[error("key '{0}' is missing the '.' before the column name")]
    MissingColumn(String),

    #[error("key '{0}' has an empty file, model or column part")]
    EmptyPart(String),
}

/// A known attribute directive, or the raw token when unrecognised
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Directive {
    /// `@id`
    Id,

    /// `@unique`
    Unique,

    /// `@default(...)` with the raw argument text
    Default(String),

    /// `@relation(...)` with the raw argument text (may be empty)
    Relation(String),

    /// `@map(...)`
    Map(String),

    /// `@updatedAt`
    UpdatedAt,

    /// `@ignore`
    Ignore,

    /// Anything else, forwarded verbatim
    Opaque(String),
}

impl Directive {
    /// Classify one constraint token
    pub fn parse(token: &str) -> Self {
        if is_bare_or_call(token, "@id") {
            Self::Id
        } else if is_bare_or_call(token, "@unique") {
            Self::Unique
        } else if token.starts_with("@default") {
            Self::Default(call_args(token, "@default"))
        } else if token.starts_with("@relation") {
            Self::Relation(call_args(token, "@relation"))
        } else if token.starts_with("@map") {
            Self::Map(call_args(token, "@map"))
        } else if token == "@updatedAt" {
            Self::UpdatedAt
        } else if token == "@ignore" {
            Self::Ignore
        } else {
            Self::Opaque(token.to_string())
        }
    }
}

fn is_bare_or_call(token: &str, name: &str) -> bool {
    token == name || token.strip_prefix(name).is_some_and(|rest| rest.starts_with('('))
}

fn call_args(token: &str, name: &str) -> String {
    token
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or_default()
        .to_string()
}

/// A column of a model body
///
/// A column with an empty `ty` is a raw attribute line (block attributes such
/// as `@@index(...)`, or comments) kept in place and emitted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Column name, or the whole line for raw columns
    pub name: String,

    /// Declared type including `?` / `[]` modifiers
    #[serde(rename = "type")]
    pub ty: String,

    /// Attribute tokens in declaration order
    pub constraints: Vec<String>,
}

impl Column {
    /// Create a new column
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            constraints: Vec::new(),
        }
    }

    /// Create a raw attribute line
    pub fn raw(line: impl Into<String>) -> Self {
        Self::new(line, "")
    }

    /// Add a constraint token
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Parse one non-blank body line
    pub fn parse_line(line: &str) -> Self {
        let line = line.trim();
        if line.starts_with("@@") || line.starts_with("//") {
            return Self::raw(line);
        }

        let mut tokens = tokenize(line).into_iter();
        let name = tokens.next().unwrap_or_default();
        let ty = tokens.next().unwrap_or_default();

        Self {
            name,
            ty,
            constraints: tokens.collect(),
        }
    }

    /// Whether this is a raw attribute line
    pub fn is_raw(&self) -> bool {
        self.ty.is_empty()
    }

    /// Type without `?` and `[]` modifiers
    pub fn base_type(&self) -> &str {
        let ty = self.ty.strip_suffix('?').unwrap_or(&self.ty);
        ty.strip_suffix("[]").unwrap_or(ty)
    }

    /// The `?` / `[]` modifier suffix of the type
    pub fn type_suffix(&self) -> &str {
        &self.ty[self.base_type().len()..]
    }

    /// Replace the base type, keeping modifiers
    pub fn retype(&mut self, base: &str) {
        self.ty = format!("{}{}", base, self.type_suffix());
    }

    /// Classified constraints
    pub fn directives(&self) -> Vec<Directive> {
        self.constraints.iter().map(|c| Directive::parse(c)).collect()
    }

    /// Whether the column carries a `@relation` directive
    pub fn is_relation(&self) -> bool {
        self.directives().iter().any(|d| matches!(d, Directive::Relation(_)))
    }

    /// Whether the column carries a `@default` directive
    pub fn has_default(&self) -> bool {
        self.directives().iter().any(|d| matches!(d, Directive::Default(_)))
    }

    /// Whether the column is an identifier (`@id`, or a raw `@@id` line)
    pub fn is_id(&self) -> bool {
        if self.is_raw() {
            return self.name.starts_with("@@id");
        }
        self.directives().contains(&Directive::Id)
    }

    /// Render as one body line (without indentation)
    pub fn format(&self) -> String {
        if self.is_raw() {
            return self.name.clone();
        }

        let mut out = format!("{} {}", self.name, self.ty);
        for constraint in &self.constraints {
            out.push(' ');
            out.push_str(constraint);
        }
        out
    }
}

/// Split on whitespace outside of parentheses, brackets and string quotes
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for ch in line.chars() {
        if in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                current.push(ch);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// An enum block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumDef {
    /// Enum name
    pub name: String,

    /// Value lines in declaration order
    pub values: Vec<String>,
}

impl EnumDef {
    /// Create a new enum
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Whether an action or conflict concerns a model or an enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Model,
    Enum,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Enum => write!(f, "enum"),
        }
    }
}

/// A resolution instruction queued against one `FileModel`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    /// Drop the item from emission
    Skip { item: ItemKind },

    /// Rename inside its own fragment only
    Rename { new_name: String, item: ItemKind },

    /// Rename and retarget every relation column that referenced the old name
    RenameRel { new_name: String, item: ItemKind },

    /// Point a relation column at a resolved model without deleting anything
    Remap {
        from: ColumnKey,
        to: FileModel,
        item: ItemKind,
    },
}

impl Action {
    /// Kind of item the action targets
    pub fn item(&self) -> ItemKind {
        match self {
            Self::Skip { item }
            | Self::Rename { item, .. }
            | Self::RenameRel { item, .. }
            | Self::Remap { item, .. } => *item,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip { item } => write!(f, "skip {}", item),
            Self::Rename { new_name, item } => write!(f, "rename {} to {}", item, new_name),
            Self::RenameRel { new_name, item } => {
                write!(f, "rename {} to {} (with relations)", item, new_name)
            }
            Self::Remap { from, to, .. } => write!(f, "remap {} to {}", from, to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_model_keys() {
        let key = FileModel::parse("blog/posts.prisma:Post").unwrap();
        assert_eq!(key.file, "blog/posts.prisma");
        assert_eq!(key.name, "Post");
        assert_eq!(key.to_string(), "blog/posts.prisma:Post");
        assert!(FileModel::parse("Post").is_err());
        assert!(FileModel::parse("a.prisma:").is_err());
    }

    #[test]
    fn column_keys_with_dotted_file_names() {
        let key = ColumnKey::parse("b.prisma:Post.author").unwrap();
        assert_eq!(key.model, FileModel::new("b.prisma", "Post"));
        assert_eq!(key.column, "author");
        assert_eq!(key.to_string(), "b.prisma:Post.author");
        assert_eq!(
            ColumnKey::parse("b.prisma:Post"),
            Err(KeyError::MissingColumn("b.prisma:Post".to_string()))
        );
    }

    #[test]
    fn parse_relation_line_keeps_directive_whole() {
        let col = Column::parse_line(
            "  author   User?  @relation(fields: [authorId], references: [id]) @map(\"author\")",
        );

        assert_eq!(col.name, "author");
        assert_eq!(col.ty, "User?");
        assert_eq!(
            col.constraints,
            vec![
                "@relation(fields: [authorId], references: [id])".to_string(),
                "@map(\"author\")".to_string(),
            ]
        );
        assert!(col.is_relation());
        assert_eq!(col.base_type(), "User");
        assert_eq!(col.type_suffix(), "?");
    }

    #[test]
    fn block_attributes_are_raw() {
        let col = Column::parse_line("@@index([title, body])");
        assert!(col.is_raw());
        assert_eq!(col.format(), "@@index([title, body])");

        let id = Column::parse_line("@@id([a, b])");
        assert!(id.is_id());
    }

    #[test]
    fn directive_classification() {
        assert_eq!(Directive::parse("@id"), Directive::Id);
        assert_eq!(Directive::parse("@default(now())"), Directive::Default("now()".to_string()));
        assert_eq!(Directive::parse("@relation"), Directive::Relation(String::new()));
        assert_eq!(Directive::parse("@updatedAt"), Directive::UpdatedAt);
        assert_eq!(Directive::parse("@identity"), Directive::Opaque("@identity".to_string()));
        assert_eq!(Directive::parse("@db.VarChar(40)"), Directive::Opaque("@db.VarChar(40)".to_string()));
    }

    #[test]
    fn default_with_spaces_in_string() {
        let col = Column::parse_line("title String @default(\"hello world\")");
        assert!(col.has_default());
        assert_eq!(col.format(), "title String @default(\"hello world\")");
    }

    #[test]
    fn retype_keeps_modifiers() {
        let mut col = Column::parse_line("posts Post[]");
        col.retype("Article");
        assert_eq!(col.ty, "Article[]");
    }

    #[test]
    fn action_serialization() {
        let action = Action::RenameRel {
            new_name: "Author".to_string(),
            item: ItemKind::Model,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"rename-rel\""));
        assert_eq!(action.to_string(), "rename model to Author (with relations)");
    }
}
