//! Feature registries
//!
//! Named code snippets grouped into packages and materialized as
//! `<root>/<package>/<feature>.js` plus an `index.js` and `manifest.json`
//! per package. Feature files are only rewritten when their SHA-256 differs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// File names owned by the registry itself
pub const RESERVED_NAMES: [&str; 2] = ["index", "manifest"];

const FEATURE_EXTENSION: &str = "js";
const MANIFEST_FILE: &str = "manifest.json";
const INDEX_FILE: &str = "index.js";

/// Hex SHA-256 of some content
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

fn name_regex() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("name regex is valid"))
}

/// Package manifest (manifest.json)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Package name
    pub package: String,

    /// Feature names, sorted
    pub features: Vec<String>,

    /// Feature name to content hash
    pub hashes: BTreeMap<String, String>,
}

/// Counts from one `materialize` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeSummary {
    /// Packages on disk
    pub packages: usize,

    /// Feature files rewritten
    pub written: usize,

    /// Feature files whose hash matched
    pub unchanged: usize,

    /// Stale packages and feature files deleted
    pub removed: usize,
}

impl MaterializeSummary {
    /// Whether any feature file was rewritten or deleted
    pub fn changed(&self) -> bool {
        self.written > 0 || self.removed > 0
    }
}

/// Catalog of packages and their features
#[derive(Debug, Clone)]
pub struct FeatureRegistry {
    root: PathBuf,
    packages: BTreeMap<String, BTreeMap<String, String>>,
}

impl FeatureRegistry {
    /// Registry materializing under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            packages: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register (or replace) a feature
    pub fn register(
        &mut self,
        package: &str,
        feature: &str,
        code: impl Into<String>,
    ) -> Result<(), RegistryError> {
        for name in [package, feature] {
            if !name_regex().is_match(name) {
                return Err(RegistryError::InvalidName(name.to_string()));
            }
        }
        if RESERVED_NAMES.contains(&feature) {
            return Err(RegistryError::ReservedName {
                package: package.to_string(),
                feature: feature.to_string(),
            });
        }

        let code = code.into();
        let features = self.packages.entry(package.to_string()).or_default();
        if features.get(feature) != Some(&code) {
            debug!(package, feature, "feature registered");
            features.insert(feature.to_string(), code);
        }
        Ok(())
    }

    /// Feature names of a package, sorted
    pub fn features(&self, package: &str) -> Vec<&str> {
        self.packages
            .get(package)
            .map(|f| f.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Registered package names, sorted
    pub fn packages(&self) -> Vec<&str> {
        self.packages
            .iter()
            .filter(|(_, features)| !features.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Directory a package materializes into
    pub fn package_dir(&self, package: &str) -> PathBuf {
        self.root.join(package)
    }

    /// Bring the on-disk tree in line with the registered features
    pub fn materialize(&self) -> Result<MaterializeSummary, RegistryError> {
        let mut summary = MaterializeSummary::default();

        if self.root.is_dir() {
            for entry in read_dir(&self.root)? {
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.path().is_dir() && !self.packages().contains(&name.as_str()) {
                    debug!(package = %name, "removing unregistered package");
                    std::fs::remove_dir_all(entry.path()).map_err(|e| io_error(&entry.path(), e))?;
                    summary.removed += 1;
                }
            }
        }

        for (package, features) in self.packages.iter().filter(|(_, f)| !f.is_empty()) {
            let dir = self.package_dir(package);
            std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

            summary.removed += remove_stale_features(&dir, features)?;

            let mut hashes = BTreeMap::new();
            for (feature, code) in features {
                let path = dir.join(format!("{}.{}", feature, FEATURE_EXTENSION));
                let hash = content_hash(code.as_bytes());

                let current = std::fs::read(&path).ok().map(|bytes| content_hash(&bytes));
                if current.as_deref() == Some(hash.as_str()) {
                    summary.unchanged += 1;
                } else {
                    std::fs::write(&path, code).map_err(|e| io_error(&path, e))?;
                    summary.written += 1;
                }

                hashes.insert(feature.clone(), hash);
            }

            let manifest = Manifest {
                package: package.clone(),
                features: features.keys().cloned().collect(),
                hashes,
            };
            let json = serde_json::to_string_pretty(&manifest)
                .map_err(|e| RegistryError::Serialize(e.to_string()))?;
            write_file(&dir.join(MANIFEST_FILE), &json)?;
            write_file(&dir.join(INDEX_FILE), &render_index(features.keys()))?;

            summary.packages += 1;
        }

        info!(
            packages = summary.packages,
            written = summary.written,
            unchanged = summary.unchanged,
            removed = summary.removed,
            "feature registry materialized"
        );

        Ok(summary)
    }
}

fn render_index<'a>(features: impl Iterator<Item = &'a String>) -> String {
    let mut out = String::from("'use strict';\n\nmodule.exports = {\n");
    for feature in features {
        out.push_str(&format!("  '{}': require('./{}'),\n", feature, feature));
    }
    out.push_str("};\n");
    out
}

fn remove_stale_features(dir: &Path, features: &BTreeMap<String, String>) -> Result<usize, RegistryError> {
    let mut removed = 0;

    for entry in read_dir(dir)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(FEATURE_EXTENSION) {
            continue;
        }

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if RESERVED_NAMES.contains(&stem) || features.contains_key(stem) {
            continue;
        }

        debug!(path = %path.display(), "removing stale feature");
        std::fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
        removed += 1;
    }

    Ok(removed)
}

fn read_dir(dir: &Path) -> Result<Vec<std::fs::DirEntry>, RegistryError> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(|e| io_error(dir, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io_error(dir, e))?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn write_file(path: &Path, contents: &str) -> Result<(), RegistryError> {
    std::fs::write(path, contents).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, e: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("'{feature}' is reserved and cannot be registered in package '{package}'")]
    ReservedName { package: String, feature: String },

    #[error("invalid package or feature name '{0}'")]
    InvalidName(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn reserved_and_invalid_names_are_rejected() {
        let mut registry = FeatureRegistry::new("unused");
        assert!(matches!(
            registry.register("middleware", "index", "x"),
            Err(RegistryError::ReservedName { .. })
        ));
        assert!(matches!(
            registry.register("../escape", "feature", "x"),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn materialize_writes_features_index_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = FeatureRegistry::new(dir.path());
        registry.register("middleware", "staticTake", "module.exports = 1;\n").unwrap();
        registry.register("middleware", "audit", "module.exports = 2;\n").unwrap();

        let summary = registry.materialize().unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.packages, 1);

        let package = dir.path().join("middleware");
        let index = std::fs::read_to_string(package.join("index.js")).unwrap();
        assert_eq!(
            index,
            "'use strict';\n\nmodule.exports = {\n  'audit': require('./audit'),\n  'staticTake': require('./staticTake'),\n};\n"
        );

        let manifest: Manifest =
            serde_json::from_str(&std::fs::read_to_string(package.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest.features, vec!["audit", "staticTake"]);
        assert_eq!(manifest.hashes["audit"], content_hash(b"module.exports = 2;\n"));
    }

    #[test]
    fn unchanged_features_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = FeatureRegistry::new(dir.path());
        registry.register("middleware", "staticTake", "module.exports = 1;\n").unwrap();

        registry.materialize().unwrap();
        let summary = registry.materialize().unwrap();

        assert_eq!(summary.written, 0);
        assert_eq!(summary.unchanged, 1);
        assert!(!summary.changed());
    }

    #[test]
    fn stale_packages_and_features_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut old = FeatureRegistry::new(dir.path());
        old.register("middleware", "staticTake", "a").unwrap();
        old.register("middleware", "fullTextSearch", "b").unwrap();
        old.register("extensions", "staticTake", "c").unwrap();
        old.materialize().unwrap();

        let mut current = FeatureRegistry::new(dir.path());
        current.register("middleware", "staticTake", "a").unwrap();
        let summary = current.materialize().unwrap();

        assert_eq!(summary.removed, 2);
        assert!(!dir.path().join("extensions").exists());
        assert!(!dir.path().join("middleware/fullTextSearch.js").exists());
        assert!(dir.path().join("middleware/index.js").exists());
    }
}
