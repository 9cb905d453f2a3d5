//! Post-generation pipeline against a fake generated client

use pretty_assertions::assert_eq;
use schemaweave_core::Config;
use schemaweave_toolchain::{build_features, BlockOutcome};
use std::path::Path;

const INDEX_D_TS: &str = r#"export type User = {
  id: number
  email: string
  settings: JsonValue | null
}

export type Post = {
  id: number
  legacyTitle: string | null
}
"#;

const INDEX_JS: &str = r#"Object.defineProperty(exports, "__esModule", { value: true });
exports.PrismaClient = class PrismaClient {};
"#;

fn project(extension_mode: bool) -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let client = dir.path().join("node_modules/.prisma/client");
    std::fs::create_dir_all(&client).unwrap();
    std::fs::write(client.join("index.d.ts"), INDEX_D_TS).unwrap();
    std::fs::write(client.join("index.js"), INDEX_JS).unwrap();

    let mut config = Config::from_toml(&format!(
        r#"
base = "schema.prisma"

[field_types]
"User.settings" = "UserSettings | null"

[deprecated]
"Post.legacyTitle" = "use title"

[static_take]
Post = 50

[output]
extension_mode = {}
"#,
        extension_mode
    ))
    .unwrap();
    config.project_root = dir.path().to_path_buf();

    (dir, config)
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn classic_mode_patches_the_client() {
    let (dir, config) = project(false);
    let client = dir.path().join("node_modules/.prisma/client");

    let outcome = build_features(&config).unwrap().execute().unwrap();
    assert_eq!(outcome.patches.applied(), 3);
    assert_eq!(outcome.patches.files_written, 2);
    assert_eq!(outcome.features.written, 1);

    let types = read(&client.join("index.d.ts"));
    assert!(types.contains("  settings: UserSettings | null\n"));
    assert!(types.contains("  /** @deprecated use title (Post.legacyTitle) */\n  legacyTitle: string | null\n"));

    let entry = read(&client.join("index.js"));
    assert!(entry.starts_with(INDEX_JS));
    assert!(entry.contains("// schemaweave:begin\n"));
    assert!(entry.trim_end().ends_with("// schemaweave:end"));

    let feature = read(&dir.path().join(".schemaweave/features/middleware/staticTake.js"));
    assert!(feature.contains(r#"const limits = {"Post":50};"#));
}

#[test]
fn second_run_is_a_no_op() {
    let (dir, config) = project(false);
    let client = dir.path().join("node_modules/.prisma/client");

    build_features(&config).unwrap().execute().unwrap();
    let types = read(&client.join("index.d.ts"));
    let entry = read(&client.join("index.js"));

    let outcome = build_features(&config).unwrap().execute().unwrap();
    assert_eq!(outcome.patches.applied(), 0);
    assert_eq!(outcome.patches.files_written, 0);
    assert_eq!(outcome.features.written, 0);
    assert_eq!(outcome.features.unchanged, 1);
    assert!(outcome
        .patches
        .blocks
        .iter()
        .all(|b| b.outcome == BlockOutcome::AlreadyApplied));

    assert_eq!(read(&client.join("index.d.ts")), types);
    assert_eq!(read(&client.join("index.js")), entry);
}

#[test]
fn extension_mode_leaves_the_client_alone() {
    let (dir, config) = project(true);
    let client = dir.path().join("node_modules/.prisma/client");

    let outcome = build_features(&config).unwrap().execute().unwrap();
    assert_eq!(outcome.patches.applied(), 0);
    assert_eq!(outcome.patches.files_written, 0);
    assert!(outcome
        .patches
        .blocks
        .iter()
        .all(|b| matches!(b.outcome, BlockOutcome::SkippedMode | BlockOutcome::AlreadyApplied)));

    assert_eq!(read(&client.join("index.d.ts")), INDEX_D_TS);
    assert_eq!(read(&client.join("index.js")), INDEX_JS);

    let feature = read(&dir.path().join(".schemaweave/features/extensions/staticTake.js"));
    assert!(feature.contains("Prisma.defineExtension"));
}

#[test]
fn switching_modes_removes_the_old_package() {
    let (dir, config) = project(false);
    let entry = dir.path().join("node_modules/.prisma/client/index.js");
    build_features(&config).unwrap().execute().unwrap();
    assert!(dir.path().join(".schemaweave/features/middleware").exists());
    assert!(read(&entry).contains("features/middleware"));

    let mut config = config;
    config.output.extension_mode = true;
    let outcome = build_features(&config).unwrap().execute().unwrap();

    assert_eq!(outcome.features.removed, 1);
    assert!(!dir.path().join(".schemaweave/features/middleware").exists());
    assert!(dir.path().join(".schemaweave/features/extensions/index.js").exists());

    let client = read(&entry);
    assert_eq!(client, INDEX_JS);
    assert!(!client.contains("middleware"));
}

#[test]
fn dropping_every_middleware_feature_unwires_the_client() {
    let (dir, mut config) = project(false);
    let entry = dir.path().join("node_modules/.prisma/client/index.js");
    build_features(&config).unwrap().execute().unwrap();

    config.static_take.clear();
    build_features(&config).unwrap().execute().unwrap();

    assert_eq!(read(&entry), INDEX_JS);
    assert!(!dir.path().join(".schemaweave/features/middleware").exists());
}
