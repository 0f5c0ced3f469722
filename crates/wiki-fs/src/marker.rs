//! `.project` marker files.
//!
//! A marker sits at the root of every project folder and ties the folder to
//! a project record even after either side is renamed:
//! ```text
//! ---
//! id: engineering
//! name: "Engineering Wiki"
//! created: "2024-03-01T09:30:00+00:00"
//! ---
//! ```

use serde_yaml::Value;

use crate::frontmatter::split_frontmatter;

pub const MARKER_FILE: &str = ".project";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMarker {
    /// Project identifier, the durable join key
    pub id: String,
    /// Display name at the time the marker was written
    pub name: String,
    pub created: String,
}

impl ProjectMarker {
    pub fn new(id: impl Into<String>, name: impl Into<String>, created: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created: created.into(),
        }
    }

    /// Render the marker file contents.
    pub fn to_file_contents(&self) -> String {
        format!(
            "---\nid: {}\nname: \"{}\"\ncreated: \"{}\"\n---\n",
            self.id,
            escape_double_quoted(&self.name),
            escape_double_quoted(&self.created)
        )
    }

    /// Read a marker back. Returns `None` unless the block parses and
    /// carries an `id`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (yaml, _) = split_frontmatter(raw)?;
        let Ok(Value::Mapping(map)) = serde_yaml::from_str::<Value>(yaml) else {
            return None;
        };

        let field = |key: &str| -> Option<String> {
            match map.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            }
        };

        let id = field("id").filter(|id| !id.trim().is_empty())?;
        Some(Self {
            id,
            name: field("name").unwrap_or_default(),
            created: field("created").unwrap_or_default(),
        })
    }
}

fn escape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}
