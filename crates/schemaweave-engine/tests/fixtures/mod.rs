//! Fragment fixtures for merge integration tests
//!
//! A `Project` is a temporary directory holding a `schemaweave.toml` and
//! the fragments it names.

use schemaweave_core::Config;
use std::path::Path;
use tempfile::TempDir;

pub const BASE: &str = r#"generator client {
  provider = "prisma-client-js"
}

datasource db {
  provider = "postgresql"
  url      = env("DATABASE_URL")
}
"#;

/// Users fragment with a self-contained `User`
pub const ACCOUNTS: &str = r#"model User {
  id    Int    @id @default(autoincrement())
  email String @unique
}
"#;

/// Blog fragment carrying its own `User` and a relation to it
pub const BLOG: &str = r#"model User {
  id    Int    @id
  posts Post[]
}

model Post {
  id       Int   @id
  title    String
  author   User  @relation(fields: [authorId], references: [id])
  authorId Int
}
"#;

pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let project = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        project.write("schema/base.prisma", BASE);
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// Write `schemaweave.toml` and load it back
    pub fn config(&self, toml: &str) -> Config {
        let path = self.dir.path().join("schemaweave.toml");
        std::fs::write(&path, format!("base = \"schema/base.prisma\"\n{}", toml)).unwrap();
        Config::from_file(&path).unwrap()
    }
}
