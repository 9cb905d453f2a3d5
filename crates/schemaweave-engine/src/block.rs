//! Top-level block extraction (`keyword Name { ... }`)

use regex::Regex;
use std::sync::OnceLock;

/// One top-level block of a fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Lower-cased keyword (`model`, `enum`, `generator`, `datasource`, ...)
    pub keyword: String,

    /// Block name
    pub name: String,

    /// Text between the braces
    pub body: String,

    /// Whole block, keyword to closing brace
    pub text: String,

    /// 1-indexed line of the keyword
    pub line: usize,
}

impl Block {
    /// Non-blank body lines, trimmed
    pub fn body_lines(&self) -> impl Iterator<Item = &str> {
        self.body.lines().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Block that never closes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{keyword} '{name}' opened on line {line} is never closed")]
pub struct BlockError {
    pub keyword: String,
    pub name: String,
    pub line: usize,
}

fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*([a-z]+)[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]*\{")
            .expect("block header regex is valid")
    })
}

/// Extract every top-level block, in document order
///
/// Keywords match case-insensitively. Braces inside string literals and
/// line comments do not count towards nesting.
pub fn extract_blocks(text: &str) -> Result<Vec<Block>, BlockError> {
    let mut blocks = Vec::new();
    let mut search_from = 0;

    while let Some(caps) = header_regex().captures_at(text, search_from) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let keyword = caps[1].to_ascii_lowercase();
        let name = caps[2].to_string();
        let line = text[..whole.start].matches('\n').count() + 1;

        let body_start = whole.end;
        let close = find_closing_brace(&text[body_start..]).ok_or_else(|| BlockError {
            keyword: keyword.clone(),
            name: name.clone(),
            line,
        })?;

        let body_end = body_start + close;
        let start = text[whole.start..].find(|c: char| !c.is_whitespace()).map_or(whole.start, |o| whole.start + o);

        blocks.push(Block {
            keyword,
            name,
            body: text[body_start..body_end].to_string(),
            text: text[start..=body_end].to_string(),
            line,
        });

        search_from = body_end + 1;
    }

    Ok(blocks)
}

/// Offset of the brace closing an already-opened block
fn find_closing_brace(text: &str) -> Option<usize> {
    let mut depth: usize = 1;
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if in_string {
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
            '"' => in_string = true,
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                // skip to end of line
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
generator client {
  provider = "prisma-client-js"
}

DATASOURCE db {
  provider = "postgresql"
  url      = env("DATABASE_URL")
}

// model Commented { }

model User {
  id    Int    @id
  name  String @default("{braces}")
  posts Post[] // has {many}
}

enum Role {
  USER
  ADMIN
}
"#;

    #[test]
    fn extracts_blocks_in_order() {
        let blocks = extract_blocks(DOC).unwrap();
        let names: Vec<_> = blocks.iter().map(|b| (b.keyword.as_str(), b.name.as_str())).collect();

        assert_eq!(
            names,
            vec![
                ("generator", "client"),
                ("datasource", "db"),
                ("model", "User"),
                ("enum", "Role"),
            ]
        );
    }

    #[test]
    fn braces_in_strings_and_comments_are_ignored() {
        let blocks = extract_blocks(DOC).unwrap();
        let user = &blocks[2];

        assert_eq!(user.body_lines().count(), 3);
        assert!(user.text.starts_with("model User {"));
        assert!(user.text.ends_with('}'));
        assert_eq!(user.line, 13);
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let err = extract_blocks("model Broken {\n  id Int\n").unwrap_err();
        assert_eq!(err.name, "Broken");
        assert_eq!(err.line, 1);
    }
}
