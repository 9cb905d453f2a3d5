//! End-to-end merge tests: config on disk, load, resolve, emit

mod fixtures;

use fixtures::{Project, ACCOUNTS, BLOG};
use pretty_assertions::assert_eq;
use schemaweave_core::{Action, FileModel, ItemKind};
use schemaweave_engine::{
    Choice, Emitter, Loader, Mutation, ResolutionState, ResolveError, Resolver, RuleResolver, Session,
};

fn session(project: &Project, toml: &str) -> (Session, RuleResolver) {
    let config = project.config(toml);
    let store = Loader::new(&config).load().unwrap();
    let session = Session::from_config(store, &config).unwrap();
    let resolver = RuleResolver::from_config(&config).unwrap();
    (session, resolver)
}

#[test]
fn cross_file_relation_without_permission_is_fatal() {
    let project = Project::new();
    project.write("schema/accounts.prisma", ACCOUNTS);
    project.write("schema/blog.prisma", BLOG);

    let (mut session, mut resolver) = session(
        &project,
        r#"include = ["schema/accounts.prisma", "schema/blog.prisma"]"#,
    );

    let err = session.resolve(&mut resolver).unwrap_err();
    match err {
        ResolveError::CrossFileRelation { column, target } => {
            assert_eq!(column.to_string(), "schema/blog.prisma:Post.author");
            assert_eq!(target, FileModel::new("schema/accounts.prisma", "User"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn mapped_conflict_needs_no_prompt() {
    let project = Project::new();
    project.write("schema/accounts.prisma", ACCOUNTS);
    project.write("schema/blog.prisma", BLOG);

    let (mut session, _) = session(
        &project,
        r#"
include = ["schema/accounts.prisma", "schema/blog.prisma"]
cross_file_relations = true

[relations]
"schema/blog.prisma:Post.author" = "schema/accounts.prisma:User"
"#,
    );

    let mut unanswered = |_: &Choice| -> Option<(FileModel, Action)> { None };
    let outcome = session.resolve(&mut unanswered).unwrap();
    assert_eq!(outcome.resolved, 0);
    assert!(session.conflicts().is_empty());
    assert_eq!(session.state(), ResolutionState::Done);

    let emitted = Emitter::new(&session).emit();
    assert_eq!(emitted.text.matches("model User {").count(), 1);
    assert!(emitted.text.contains("author User @relation(fields: [authorId], references: [id])"));
    assert!(emitted.text.contains("posts Post[]"));
    assert!(!emitted.text.contains("source: schema/blog.prisma\nmodel User"));
}

#[test]
fn mapped_side_is_not_prompted() {
    let project = Project::new();
    project.write("schema/accounts.prisma", ACCOUNTS);
    project.write("schema/legacy.prisma", ACCOUNTS);
    project.write(
        "schema/blog.prisma",
        "model Post {\n  id       Int  @id\n  author   User @relation(fields: [authorId], references: [id])\n  authorId Int\n}\n",
    );

    let (mut session, mut resolver) = session(
        &project,
        r#"
include = ["schema/accounts.prisma", "schema/legacy.prisma", "schema/blog.prisma"]
cross_file_relations = true

[relations]
"schema/blog.prisma:Post.author" = "schema/accounts.prisma:User"

[[resolve]]
target = "schema/legacy.prisma:User"
action = "skip"
"#,
    );

    let mut prompted = Vec::new();
    let mut recording = |choice: &Choice| {
        prompted.push((choice.candidates.clone(), choice.auto_mapped.clone()));
        resolver.choose(choice)
    };
    let outcome = session.resolve(&mut recording).unwrap();

    assert_eq!(outcome.resolved, 1);
    assert_eq!(
        prompted,
        vec![(
            vec![FileModel::new("schema/legacy.prisma", "User")],
            vec![FileModel::new("schema/accounts.prisma", "User")],
        )]
    );

    let emitted = Emitter::new(&session).emit();
    assert_eq!(emitted.text.matches("model User {").count(), 1);
    assert!(emitted.text.contains("source: schema/accounts.prisma\nmodel User"));
}

#[test]
fn rename_rel_repairs_the_fragment() {
    let project = Project::new();
    project.write("schema/accounts.prisma", ACCOUNTS);
    project.write("schema/blog.prisma", BLOG);

    let (mut session, mut resolver) = session(
        &project,
        r#"
include = ["schema/accounts.prisma", "schema/blog.prisma"]
cross_file_relations = true

[[resolve]]
target = "schema/blog.prisma:User"
action = "rename-rel"
name = "Author"
"#,
    );

    session.resolve(&mut resolver).unwrap();
    assert!(session.conflicts().is_empty());

    let emitted = Emitter::new(&session).emit();
    assert!(emitted.text.contains("model Author {\n  id Int @id\n  posts Post[]\n}"));
    assert!(emitted.text.contains("author Author @relation(fields: [authorId], references: [id])"));
    assert_eq!(emitted.models, 3);
}

#[test]
fn excluded_models_never_conflict() {
    let project = Project::new();
    project.write("schema/accounts.prisma", ACCOUNTS);
    project.write("schema/blog.prisma", BLOG);

    let (mut session, mut resolver) = session(
        &project,
        r#"
include = ["schema/accounts.prisma", "schema/blog.prisma"]
exclude = ["schema/blog.prisma:User"]
"#,
    );

    assert!(session.conflicts().is_empty());
    assert_eq!(session.resolve(&mut resolver).unwrap().resolved, 0);
    assert!(session.store().model(&FileModel::new("schema/blog.prisma", "User")).is_none());
}

#[test]
fn included_directories_load_in_sorted_order() {
    let project = Project::new();
    project.write("schema/fragments/b_shop.prisma", "model Order {\n  id Int @id\n}\n");
    project.write("schema/fragments/a_users.prisma", ACCOUNTS);
    project.write("schema/fragments/notes.txt", "model Ignored {\n}\n");

    let config = project.config(r#"include = ["schema/fragments"]"#);
    let store = Loader::new(&config).load().unwrap();

    let keys: Vec<String> = store.models().iter().map(|m| m.key.to_string()).collect();
    assert_eq!(
        keys,
        vec![
            "schema/fragments/a_users.prisma:User".to_string(),
            "schema/fragments/b_shop.prisma:Order".to_string(),
        ]
    );
}

#[test]
fn three_way_conflict_resolves_pairwise() {
    let project = Project::new();
    let role = "enum Role {\n  USER\n}\n";
    project.write("schema/a.prisma", role);
    project.write("schema/b.prisma", role);
    project.write("schema/c.prisma", role);

    let (mut session, mut resolver) = session(
        &project,
        r#"
include = ["schema/a.prisma", "schema/b.prisma", "schema/c.prisma"]

[[resolve]]
target = "schema/b.prisma:Role"
action = "skip"
kind = "enum"

[[resolve]]
target = "schema/c.prisma:Role"
action = "rename"
name = "LegacyRole"
kind = "enum"
"#,
    );

    assert_eq!(session.conflicts().len(), 3);
    assert!(session.conflicts().iter().all(|c| c.kind == ItemKind::Enum));

    let outcome = session.resolve(&mut resolver).unwrap();
    assert_eq!(outcome.resolved, 2);

    let emitted = Emitter::new(&session).emit();
    assert!(emitted.text.contains("enum Role {"));
    assert!(emitted.text.contains("enum LegacyRole {"));
    assert_eq!(emitted.enums, 2);
}

#[test]
fn introspection_renames_and_maps() {
    let project = Project::new();
    project.write(
        "schema/legacy.prisma",
        "model users {\n  id Int @id\n  posts posts[]\n}\n\nmodel posts {\n  id Int @id\n  owner users @relation(fields: [ownerId], references: [id])\n  ownerId Int\n}\n",
    );

    let (mut session, mut resolver) = session(
        &project,
        r#"
include = ["schema/legacy.prisma"]

[[introspection.rules]]
name = "users"
rename = "User"
attributes = ['@@map("users")']

[[introspection.rules]]
pattern = "^posts$"
rename = "Post"
attributes = ['@@map("posts")']
"#,
    );

    let outcome = session.resolve(&mut resolver).unwrap();
    assert_eq!(outcome.introspection_passes, 1);

    let emitted = Emitter::new(&session).emit();
    assert!(emitted.text.contains(
        "model User {\n  id Int @id\n  posts Post[]\n  @@map(\"users\")\n}"
    ));
    assert!(emitted.text.contains("owner User @relation(fields: [ownerId], references: [id])"));
    assert_eq!(emitted.text.matches("@@map(\"posts\")").count(), 1);
}

#[test]
fn runaway_introspection_is_bounded() {
    let project = Project::new();
    project.write("schema/legacy.prisma", "model users {\n  id Int @id\n}\n");

    let (mut session, mut resolver) = session(
        &project,
        r#"
include = ["schema/legacy.prisma"]

[introspection]
max_passes = 3

[[introspection.rules]]
pattern = "^(.*)$"
rename = "X$1"
"#,
    );

    assert!(matches!(
        session.resolve(&mut resolver),
        Err(ResolveError::IntrospectionDiverged { passes: 3 })
    ));
}

#[test]
fn extended_parent_donates_columns() {
    let project = Project::new();
    project.write(
        "schema/mixins.prisma",
        "model Timestamps {\n  id Int @id\n  createdAt DateTime @default(now())\n  updatedAt DateTime @updatedAt\n}\n",
    );
    project.write("schema/shop.prisma", "model Order {\n  id Int @id\n  total Decimal\n}\n");

    let (session, _) = session(
        &project,
        r#"
include = ["schema/mixins.prisma", "schema/shop.prisma"]

[extended]
"schema/shop.prisma:Order" = "schema/mixins.prisma:Timestamps"
"#,
    );

    let emitted = Emitter::new(&session).emit();
    assert!(emitted.text.contains(
        "model Order {\n  id Int @id\n  total Decimal\n  createdAt DateTime @default(now())\n  updatedAt DateTime @updatedAt\n}"
    ));
    assert!(!emitted.text.contains("model Timestamps"));
    assert_eq!(emitted.models, 1);
}

#[test]
fn full_text_columns_are_synthesized() {
    let project = Project::new();
    project.write("schema/blog.prisma", "model Post {\n  id Int @id\n  title String\n  body String\n}\n");

    let (session, _) = session(
        &project,
        r#"
include = ["schema/blog.prisma"]

[fts]
schema = "public"

[fts.indexes]
"schema/blog.prisma:Post" = [{ name = "title" }, { name = "body", weight = "B" }]
"#,
    );

    let emitted = Emitter::new(&session).emit();
    assert!(emitted.text.contains("textSearch Unsupported(\"tsvector\")?"));
    assert!(emitted.text.contains("coalesce(body, '')), 'B')"));
    assert!(emitted.text.contains("@@index([textSearch], type: Gin)"));
}

#[test]
fn replay_after_resolution_is_stable() {
    let project = Project::new();
    project.write("schema/accounts.prisma", ACCOUNTS);
    project.write("schema/blog.prisma", "model User {\n  id Int @id\n}\n");

    let (mut session, mut resolver) = session(
        &project,
        r#"
include = ["schema/accounts.prisma", "schema/blog.prisma"]

[[resolve]]
target = "schema/blog.prisma:User"
action = "skip"
"#,
    );

    session.resolve(&mut resolver).unwrap();
    let first = Emitter::new(&session).emit();

    let log = session.apply_patches().clone();
    assert!(log.entries.iter().any(|m| matches!(m, Mutation::Removed { .. })));
    assert_eq!(first, Emitter::new(&session).emit());
}
