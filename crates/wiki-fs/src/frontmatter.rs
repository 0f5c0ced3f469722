//! YAML frontmatter for mirrored wiki pages
//!
//! Every page file may start with a metadata block:
//! ```markdown
//! ---
//! parent: Home
//! id: 42
//! created: '2024-03-01T09:30:00+00:00'
//! updated: '2024-03-02T17:05:12+00:00'
//! ---
//!
//! Page body here...
//! ```
//!
//! The four keys above are typed; anything else a user writes into the block
//! is kept in [`Frontmatter::extra`] and written back untouched.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

pub const DELIMITER: &str = "---";

const PARENT: &str = "parent";
const ID: &str = "id";
const CREATED: &str = "created";
const UPDATED: &str = "updated";

/// Typed page metadata plus an open bag for unknown keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    /// Title of the parent page
    pub parent: Option<String>,
    /// Stable identifier of the page in the document store
    pub id: Option<u64>,
    /// Creation timestamp (RFC 3339)
    pub created: Option<String>,
    /// Last update timestamp (RFC 3339)
    pub updated: Option<String>,
    /// Keys this crate does not interpret, in file order
    pub extra: Mapping,
}

impl Frontmatter {
    /// True when nothing would be written by [`build`].
    pub fn is_empty(&self) -> bool {
        self.clean_mapping().is_empty()
    }

    /// Shallow merge: every field set on `other` replaces ours.
    pub fn merge(&mut self, other: &Frontmatter) {
        if other.parent.is_some() {
            self.parent = other.parent.clone();
        }
        if other.id.is_some() {
            self.id = other.id;
        }
        if other.created.is_some() {
            self.created = other.created.clone();
        }
        if other.updated.is_some() {
            self.updated = other.updated.clone();
        }
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    /// Build from a parsed YAML mapping.
    ///
    /// Known keys with an unexpected type are kept in `extra` so nothing the
    /// user wrote gets lost on the next write.
    pub fn from_mapping(map: Mapping) -> Self {
        let mut fm = Frontmatter::default();

        for (key, value) in map {
            let Value::String(name) = key else {
                fm.extra.insert(key, value);
                continue;
            };

            if value.is_null() && is_known_key(&name) {
                continue;
            }

            let slot = match name.as_str() {
                PARENT => &mut fm.parent,
                CREATED => &mut fm.created,
                UPDATED => &mut fm.updated,
                ID => {
                    match id_value(&value) {
                        Some(id) => fm.id = Some(id),
                        None => {
                            fm.extra.insert(Value::String(name), value);
                        }
                    }
                    continue;
                }
                _ => {
                    fm.extra.insert(Value::String(name), value);
                    continue;
                }
            };

            match scalar_string(&value) {
                Some(s) => *slot = Some(s),
                None => {
                    fm.extra.insert(Value::String(name), value);
                }
            }
        }

        fm
    }

    /// Mapping with null and blank values removed, known keys first.
    fn clean_mapping(&self) -> Mapping {
        fn put(map: &mut Mapping, key: &str, value: Option<&String>) {
            if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
                map.insert(Value::String(key.to_string()), Value::String(v.clone()));
            }
        }

        let mut map = Mapping::new();
        put(&mut map, PARENT, self.parent.as_ref());
        if let Some(id) = self.id {
            map.insert(Value::String(ID.to_string()), Value::Number(id.into()));
        }
        put(&mut map, CREATED, self.created.as_ref());
        put(&mut map, UPDATED, self.updated.as_ref());

        for (key, value) in &self.extra {
            if is_blank(value) {
                continue;
            }
            map.insert(key.clone(), value.clone());
        }

        map
    }
}

fn is_known_key(name: &str) -> bool {
    matches!(name, PARENT | ID | CREATED | UPDATED)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A page file split into metadata and body.
///
/// `content` borrows from the raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote<'a> {
    pub metadata: Frontmatter,
    /// Body after the block with leading whitespace removed, or the whole
    /// text when no valid block was found
    pub content: &'a str,
    /// Whether a well-formed block (possibly empty) was present
    pub has_block: bool,
}

/// Split raw text into the YAML between the delimiters and the text after
/// the closing delimiter line.
///
/// Both delimiter lines must consist of `---` with optional trailing
/// whitespace. Returns `None` when the text does not open with a delimiter
/// line or the block is never closed.
pub fn split_frontmatter(raw: &str) -> Option<(&str, &str)> {
    let mut lines = raw.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != DELIMITER {
        return None;
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end() == DELIMITER {
            return Some((&raw[yaml_start..offset], &raw[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Parse a page file. Never fails: anything that is not a well-formed
/// mapping block yields empty metadata and the original text.
pub fn parse(raw: &str) -> ParsedNote<'_> {
    let verbatim = ParsedNote {
        metadata: Frontmatter::default(),
        content: raw,
        has_block: false,
    };

    let Some((yaml, rest)) = split_frontmatter(raw) else {
        return verbatim;
    };

    let metadata = match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Null) => Frontmatter::default(),
        Ok(Value::Mapping(map)) => Frontmatter::from_mapping(map),
        Ok(_) | Err(_) => return verbatim,
    };

    ParsedNote {
        metadata,
        content: rest.trim_start(),
        has_block: true,
    }
}

/// Body of a page file without its metadata block.
pub fn strip_frontmatter(raw: &str) -> &str {
    parse(raw).content
}

/// Render metadata and body into a page file.
///
/// Returns `content` unchanged when no non-blank metadata remains.
pub fn build(metadata: &Frontmatter, content: &str) -> Result<String, FrontmatterError> {
    let map = metadata.clean_mapping();
    if map.is_empty() {
        return Ok(content.to_string());
    }

    let yaml = serde_yaml::to_string(&Value::Mapping(map))?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n\n{content}"))
}

/// Merge `partial` over the metadata already in `raw` and rebuild the file.
pub fn update_metadata(raw: &str, partial: &Frontmatter) -> Result<String, FrontmatterError> {
    let parsed = parse(raw);
    let mut metadata = parsed.metadata;
    metadata.merge(partial);
    build(&metadata, parsed.content)
}

#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error("Failed to serialize frontmatter: {0}")]
    Serialization(#[from] serde_yaml::Error),
}
