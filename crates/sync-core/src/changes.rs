//! Working-tree deltas reported by `git status`.

use serde::Serialize;
use tracing::debug;

/// Classified result of one status query. Produced fresh on every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// `(old, new)` pairs
    pub renamed: Vec<(String, String)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    /// Parse `git status --porcelain=v1 -z` output.
    ///
    /// Rename and copy entries carry the original path as the next
    /// NUL-separated field. Directory entries (nested repositories) and
    /// unmerged paths are ignored.
    pub fn from_porcelain_z(output: &str) -> Self {
        let mut changes = ChangeSet::default();
        let mut fields = output.split('\0').filter(|f| !f.is_empty());

        while let Some(entry) = fields.next() {
            let Some((code, path)) = split_entry(entry) else {
                debug!("Ignoring malformed status entry {:?}", entry);
                continue;
            };
            let mut flags = code.chars();
            let x = flags.next().unwrap_or(' ');
            let y = flags.next().unwrap_or(' ');

            if matches!(x, 'R' | 'C') {
                let Some(original) = fields.next() else {
                    debug!("Status entry {:?} is missing its source path", entry);
                    continue;
                };
                if x == 'R' {
                    changes.renamed.push((original.to_string(), path.to_string()));
                } else {
                    changes.added.push(path.to_string());
                }
                continue;
            }

            if path.ends_with('/') {
                continue;
            }

            match (x, y) {
                ('?', '?') | ('A', _) => changes.added.push(path.to_string()),
                ('D', _) | (' ', 'D') => changes.deleted.push(path.to_string()),
                ('U', _) | (_, 'U') | ('!', '!') => {
                    debug!("Skipping {} ({}{})", path, x, y);
                }
                ('M', _) | ('T', _) | (_, 'M') | (_, 'T') => {
                    changes.modified.push(path.to_string())
                }
                _ => debug!("Unhandled status {}{} for {}", x, y, path),
            }
        }

        changes
    }
}

fn split_entry(entry: &str) -> Option<(&str, &str)> {
    if entry.len() < 4 || !entry.is_char_boundary(2) || !entry.is_char_boundary(3) {
        return None;
    }
    let (code, rest) = entry.split_at(2);
    let path = rest.strip_prefix(' ')?;
    Some((code, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_staged_entries() {
        let output = "A  New.md\0M  Edited.md\0D  Gone.md\0R  Renamed.md\0Original.md\0";
        let changes = ChangeSet::from_porcelain_z(output);

        assert_eq!(changes.added, vec!["New.md"]);
        assert_eq!(changes.modified, vec!["Edited.md"]);
        assert_eq!(changes.deleted, vec!["Gone.md"]);
        assert_eq!(
            changes.renamed,
            vec![("Original.md".to_string(), "Renamed.md".to_string())]
        );
    }

    #[test]
    fn classifies_unstaged_entries() {
        let output = "?? Draft.md\0 M Edited.md\0 D Gone.md\0MM Both.md\0";
        let changes = ChangeSet::from_porcelain_z(output);

        assert_eq!(changes.added, vec!["Draft.md"]);
        assert_eq!(changes.modified, vec!["Edited.md", "Both.md"]);
        assert_eq!(changes.deleted, vec!["Gone.md"]);
    }

    #[test]
    fn keeps_spaces_and_arrows_in_paths() {
        let output = "R  a -> b.md\0old name.md\0";
        let changes = ChangeSet::from_porcelain_z(output);
        assert_eq!(
            changes.renamed,
            vec![("old name.md".to_string(), "a -> b.md".to_string())]
        );
    }

    #[test]
    fn ignores_nested_repositories_and_conflicts() {
        let output = "?? child/\0UU Conflict.md\0";
        assert!(ChangeSet::from_porcelain_z(output).is_empty());
    }

    #[test]
    fn empty_output_is_empty() {
        assert!(ChangeSet::from_porcelain_z("").is_empty());
    }
}
