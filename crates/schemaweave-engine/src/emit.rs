//! Merged document emission
//!
//! Output order: header comment, generator, datasource, every visible model
//! in load order, every visible enum, then extra generator blocks.

use schemaweave_core::{Column, Directive, FileModel};
use std::path::Path;
use tracing::info;

use crate::session::Session;
use crate::store::{ModelEntry, ModelStore};

/// First line of every merged document
pub const HEADER: &str = "// Merged by schemaweave. Edit the source fragments, not this file.";

/// The rendered document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedSchema {
    /// Document text
    pub text: String,

    /// Models written
    pub models: usize,

    /// Enums written
    pub enums: usize,
}

impl EmittedSchema {
    /// Write the document, creating parent directories
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.text)?;

        info!(path = %path.display(), models = self.models, enums = self.enums, "merged schema written");
        Ok(())
    }
}

/// Renders a resolved session
pub struct Emitter<'a> {
    session: &'a Session,
    blocks: Vec<String>,
}

impl<'a> Emitter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            blocks: Vec::new(),
        }
    }

    /// Append a block after the enums
    pub fn with_block(mut self, block: impl Into<String>) -> Self {
        self.blocks.push(block.into());
        self
    }

    /// Append several blocks after the enums
    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = String>) -> Self {
        self.blocks.extend(blocks);
        self
    }

    pub fn emit(&self) -> EmittedSchema {
        let store = self.session.store();
        let hidden = self.session.hidden();

        let mut sections = vec![
            HEADER.to_string(),
            store.generator().to_string(),
            store.datasource().to_string(),
        ];

        let mut models = 0;
        for model in store.models().iter().filter(|m| !hidden.contains(&m.key)) {
            let columns = self.columns_for(store, model);
            sections.push(render_model(&model.key, &columns));
            models += 1;
        }

        let mut enums = 0;
        for entry in store.enums().iter().filter(|e| !hidden.contains(&e.key)) {
            let mut text = format!("// source: {}\nenum {} {{\n", entry.key.file, entry.def.name);
            for value in &entry.def.values {
                text.push_str("  ");
                text.push_str(value);
                text.push('\n');
            }
            text.push('}');
            sections.push(text);
            enums += 1;
        }

        sections.extend(self.blocks.iter().map(|b| b.trim().to_string()));

        let mut text = sections.join("\n\n");
        text.push('\n');

        EmittedSchema { text, models, enums }
    }

    fn columns_for(&self, store: &ModelStore, model: &ModelEntry) -> Vec<Column> {
        let mut columns = model.columns.clone();

        for column in columns.iter_mut().filter(|c| !c.is_raw()) {
            let remapped = self
                .session
                .remapper()
                .iter()
                .find(|(from, _)| from.model == model.key && from.column == column.name);

            if let Some((_, to)) = remapped {
                column.retype(&to.name);
                continue;
            }

            // references to a shadow in the same fragment follow the shadow's replacement
            let shadowed = self
                .session
                .shadows()
                .iter()
                .find(|(shadow, _)| shadow.file == model.key.file && shadow.name == column.base_type());

            if let Some((_, to)) = shadowed {
                column.retype(&to.name);
            }
        }

        // inverse relations carried by shadows move onto their replacement
        for (shadow, _) in self.session.shadows().iter().filter(|(_, to)| to == &model.key) {
            let Some(source) = store.model(shadow) else {
                continue;
            };

            for column in &source.columns {
                let inverse = !column.is_raw()
                    && !column.is_id()
                    && store.is_model_name(column.base_type())
                    && !has_relation_fields(column);

                if inverse && !has_column(&columns, &column.name) {
                    insert_field(&mut columns, column.clone());
                }
            }
        }

        for (_, parent) in self.session.extended_links().iter().filter(|(child, _)| child == &model.key) {
            let Some(parent) = store.model(parent) else {
                continue;
            };

            for column in &parent.columns {
                let donated = !column.is_raw()
                    && !column.is_id()
                    && !column.is_relation()
                    && !store.is_model_name(column.base_type());

                if donated && !has_column(&columns, &column.name) {
                    insert_field(&mut columns, column.clone());
                }
            }
        }

        columns
    }
}

fn render_model(key: &FileModel, columns: &[Column]) -> String {
    let mut text = format!("// source: {}\nmodel {} {{\n", key.file, key.name);
    for column in columns {
        text.push_str("  ");
        text.push_str(&column.format());
        text.push('\n');
    }
    text.push('}');
    text
}

fn has_column(columns: &[Column], name: &str) -> bool {
    columns.iter().any(|c| !c.is_raw() && c.name == name)
}

fn has_relation_fields(column: &Column) -> bool {
    column
        .directives()
        .iter()
        .any(|d| matches!(d, Directive::Relation(args) if args.contains("fields:")))
}

/// Insert a field before the trailing block attributes
fn insert_field(columns: &mut Vec<Column>, column: Column) {
    let at = columns
        .iter()
        .position(|c| c.is_raw() && c.name.starts_with("@@"))
        .unwrap_or(columns.len());
    columns.insert(at, column);
}
