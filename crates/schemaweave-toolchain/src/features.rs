//! Feature builders
//!
//! Turns the feature tables of a configuration into patch transactions on
//! the generated client and registry features, in one declarative list.
//! Both integration styles are described together; the extension-mode
//! switch decides which half runs.

use regex::Regex;
use schemaweave_core::{Config, ConfigError, FileModel, KeyError};
use std::collections::BTreeMap;
use std::path::Path;

use crate::processor::{ProcessSummary, Toolchain, ToolchainError};
use crate::registry::{FeatureRegistry, MaterializeSummary};
use crate::transaction::{remove_section, splice_section, Anchor, Block, Placement, Transaction};

/// Package wired into the client by the epilogue
pub const MIDDLEWARE_PACKAGE: &str = "middleware";

/// Package imported by hand in extension mode
pub const EXTENSIONS_PACKAGE: &str = "extensions";

/// Sentinel guarding the generated client section
pub const SENTINEL: &str = "schemaweave";

const TYPES_FILE: &str = "index.d.ts";
const ENTRY_FILE: &str = "index.js";

const STATIC_TAKE_MIDDLEWARE: &str = r#"'use strict';

const limits = __LIMITS__;

module.exports = async (params, next) => {
  const limit = limits[params.model];
  if (limit !== undefined && params.action === 'findMany' && (params.args || {}).take === undefined) {
    params.args = { ...params.args, take: limit };
  }
  return next(params);
};
"#;

const STATIC_TAKE_EXTENSION: &str = r#"'use strict';

const { Prisma } = require('@prisma/client');

const limits = __LIMITS__;

module.exports = Prisma.defineExtension({
  name: 'staticTake',
  query: {
    $allModels: {
      findMany({ model, args, query }) {
        const limit = limits[model];
        if (limit !== undefined && args.take === undefined) {
          args.take = limit;
        }
        return query(args);
      },
    },
  },
});
"#;

const FTS_MIDDLEWARE: &str = r#"'use strict';

const indexes = __INDEXES__;

function statement(model) {
  const index = indexes[model];
  if (!index) {
    throw new Error(`no full-text index for ${model}`);
  }
  return `SELECT * FROM "${index.schema}"."${index.table}" WHERE "textSearch" @@ plainto_tsquery('${index.language}', $1)`;
}

module.exports.search = (client, model, query) => client.$queryRawUnsafe(statement(model), query);
"#;

const FTS_EXTENSION: &str = r#"'use strict';

const { Prisma } = require('@prisma/client');

const indexes = __INDEXES__;

module.exports = Prisma.defineExtension({
  name: 'fullTextSearch',
  model: {
    $allModels: {
      search(query) {
        const context = Prisma.getExtensionContext(this);
        const index = indexes[context.$name];
        if (!index) {
          throw new Error(`no full-text index for ${context.$name}`);
        }
        return context.$parent.$queryRawUnsafe(
          `SELECT * FROM "${index.schema}"."${index.table}" WHERE "textSearch" @@ plainto_tsquery('${index.language}', $1)`,
          query,
        );
      },
    },
  },
});
"#;

const CLIENT_EPILOGUE: &str = r#"const __schemaweave = require(__PACKAGE__);
const __PrismaClient = exports.PrismaClient;
exports.PrismaClient = class PrismaClient extends __PrismaClient {
  constructor(...args) {
    super(...args);
    for (const middleware of Object.values(__schemaweave)) {
      if (typeof middleware === 'function') this.$use(middleware);
    }
  }
};"#;

/// Everything the post-generation stage will do
#[derive(Debug)]
pub struct FeaturePlan {
    /// Patches against the generated client
    pub toolchain: Toolchain,

    /// Materialized feature packages
    pub registry: FeatureRegistry,
}

/// Result of running a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureOutcome {
    pub patches: ProcessSummary,
    pub features: MaterializeSummary,
}

impl FeaturePlan {
    /// Materialize the registry, then apply the patches
    pub fn execute(mut self) -> Result<FeatureOutcome, ToolchainError> {
        let features = self.registry.materialize()?;
        let patches = self.toolchain.process()?;
        Ok(FeatureOutcome { patches, features })
    }
}

/// Build the plan for a configuration
pub fn build_features(config: &Config) -> Result<FeaturePlan, ToolchainError> {
    let extension_mode = config.output.extension_mode;
    let client = config.resolve_path(&config.output.client);
    let mut toolchain = Toolchain::new().with_extension_mode(extension_mode);
    let mut registry = FeatureRegistry::new(config.resolve_path(&config.output.features));

    let mut types = Transaction::new(client.join(TYPES_FILE));
    for (key, ty) in &config.field_types {
        let (model, field) = split_field_key(key)?;
        types = types.block(field_type_block(model, field, ty)?);
    }
    for (key, message) in &config.deprecated {
        let (model, field) = split_field_key(key)?;
        types = types.block(deprecation_block(model, field, message)?);
    }
    if !types.is_empty() {
        toolchain.queue(types);
    }

    let package = if extension_mode {
        EXTENSIONS_PACKAGE
    } else {
        MIDDLEWARE_PACKAGE
    };

    if !config.static_take.is_empty() {
        let limits = to_json(&config.static_take)?;
        let template = if extension_mode {
            STATIC_TAKE_EXTENSION
        } else {
            STATIC_TAKE_MIDDLEWARE
        };
        registry.register(package, "staticTake", template.replace("__LIMITS__", &limits))?;
    }

    if config.fts.is_enabled() {
        let schema = config
            .fts
            .schema
            .clone()
            .ok_or_else(|| ConfigError::MissingField("fts.schema".to_string()))?;

        let mut indexes = BTreeMap::new();
        for key in config.fts.indexes.keys() {
            let model = FileModel::parse(key).map_err(ConfigError::from)?;
            if config.is_excluded(&model) {
                continue;
            }
            indexes.insert(
                model.name.clone(),
                serde_json::json!({
                    "schema": schema,
                    "table": model.name,
                    "language": config.fts.language,
                }),
            );
        }

        let template = if extension_mode { FTS_EXTENSION } else { FTS_MIDDLEWARE };
        registry.register(package, "fullTextSearch", template.replace("__INDEXES__", &to_json(&indexes)?))?;
    }

    let entry = client.join(ENTRY_FILE);
    if !registry.features(MIDDLEWARE_PACKAGE).is_empty() {
        let package_dir = registry.package_dir(MIDDLEWARE_PACKAGE);
        toolchain.queue(Transaction::new(&entry).block(epilogue_block(&package_dir)?));
    } else if entry.is_file() {
        // the middleware package is gone; so must be its require
        toolchain.queue(Transaction::new(&entry).block(Block::replace_full("client epilogue removal", |content| {
            remove_section(content, SENTINEL)
        })));
    }

    Ok(FeaturePlan { toolchain, registry })
}

/// `Model.field` key
fn split_field_key(key: &str) -> Result<(&str, &str), ConfigError> {
    let (model, field) = key
        .split_once('.')
        .ok_or_else(|| KeyError::MissingColumn(key.to_string()))?;

    if model.is_empty() || field.is_empty() {
        return Err(KeyError::EmptyPart(key.to_string()).into());
    }
    Ok((model, field))
}

/// Field line inside `export type Model = { ... }`, up to the type
fn field_pattern(model: &str, field: &str) -> String {
    format!(
        r"(?m)(export type {} = \{{[^}}]*?\n[ \t]*{}\??: )",
        regex::escape(model),
        regex::escape(field)
    )
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern(pattern.to_string(), e.to_string()))
}

fn field_type_block(model: &str, field: &str, ty: &str) -> Result<Block, ConfigError> {
    let regex = compile(&format!("{}([^\\n]+)", field_pattern(model, field)))?;
    let ty = ty.to_string();

    Ok(Block::replace_unsafe(format!("field type {}.{}", model, field), regex, move |caps| {
        format!("{}{}", &caps[1], ty)
    })
    .skip_in_extension_mode())
}

fn deprecation_block(model: &str, field: &str, message: &str) -> Result<Block, ConfigError> {
    let regex = compile(&field_pattern(model, field))?;

    Ok(Block::line_anchor(
        format!("deprecate {}.{}", model, field),
        Anchor::Pattern(regex),
        format!("  /** @deprecated {} ({}.{}) */", message, model, field),
    )
    .with_offset(-1)
    .skip_in_extension_mode())
}

fn epilogue_block(package_dir: &Path) -> Result<Block, ToolchainError> {
    // relative requires resolve from the client directory, not the project
    let package_dir = if package_dir.is_absolute() {
        package_dir.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| ToolchainError::Io {
                path: package_dir.display().to_string(),
                message: e.to_string(),
            })?
            .join(package_dir)
    };
    let require = to_json(&package_dir.display().to_string())?;
    let section = CLIENT_EPILOGUE.replace("__PACKAGE__", &require);

    Ok(Block::replace_full("client epilogue", move |content| {
        splice_section(content, SENTINEL, &section, Placement::Epilogue)
    })
    .skip_in_extension_mode())
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, ToolchainError> {
    serde_json::to_string(value).map_err(|e| ToolchainError::Config(ConfigError::SerializeError(e.to_string())))
}
