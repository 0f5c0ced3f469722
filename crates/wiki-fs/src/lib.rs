//! Naming and frontmatter utilities for wiki pages mirrored to disk
//!
//! Handles title ↔ file name mapping, the fixed list of legacy naming
//! variants, relative-path validation, project slugs, `.project` markers and
//! YAML frontmatter. These are pure functions with no I/O; reading and
//! writing files stays in `sync-core`.

pub mod frontmatter;
pub mod marker;

pub use frontmatter::{
    build, parse, split_frontmatter, strip_frontmatter, update_metadata, Frontmatter,
    FrontmatterError, ParsedNote, DELIMITER,
};
pub use marker::{ProjectMarker, MARKER_FILE};

use thiserror::Error;

/// Extension of page files
pub const MARKDOWN_EXT: &str = ".md";

/// Folder holding mirrored attachments inside a project folder
pub const ATTACHMENTS_DIR: &str = "_attachments";

/// Folder holding quarantined folders and discarded files
pub const ORPHANED_DIR: &str = "_orphaned";

/// Optional container for nested project folders
pub const PROJECTS_DIR: &str = "_projects";

/// Folders that never map to pages or projects
pub const RESERVED_DIRS: &[&str] = &[ATTACHMENTS_DIR, ORPHANED_DIR, PROJECTS_DIR];

fn is_kept_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Canonical file stem for a title: spaces become underscores and every
/// character other than letters, digits, `_` and `-` is dropped.
pub fn sanitize_filename(title: &str) -> String {
    title
        .replace(' ', "_")
        .chars()
        .filter(|&c| is_kept_char(c))
        .collect()
}

/// Like [`sanitize_filename`] but keeps `/` so a page path such as
/// `Parent/Child Page` stays hierarchical.
pub fn sanitize_path(path: &str) -> String {
    let kept: String = path
        .replace(' ', "_")
        .chars()
        .filter(|&c| is_kept_char(c) || c == '/')
        .collect();

    kept.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// File stems to try, in priority order, when looking for an existing page
/// file: sanitized, as-is, hyphenated, minimally sanitized, lower-case
/// sanitized, lower-case hyphenated.
///
/// Duplicates are removed and candidates that are not a single safe path
/// component are skipped.
pub fn title_variants(title: &str) -> Vec<String> {
    let sanitized = sanitize_filename(title);
    let candidates = [
        sanitized.clone(),
        title.to_string(),
        title.replace(' ', "-"),
        title
            .chars()
            .filter(|&c| is_kept_char(c) || c.is_whitespace())
            .collect(),
        sanitized.to_lowercase(),
        title.to_lowercase().replace(' ', "-"),
    ];

    let mut variants: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if is_safe_component(&candidate) && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// True when `name` can be joined onto a directory without escaping it.
pub fn is_safe_component(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// File name for a new page file.
pub fn title_to_file_name(title: &str) -> String {
    format!("{}{}", sanitize_filename(title), MARKDOWN_EXT)
}

/// Title implied by a page file name or relative path: the extension is
/// dropped and underscores read as spaces.
pub fn file_to_title(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stem = name.strip_suffix(MARKDOWN_EXT).unwrap_or(name);
    stem.replace('_', " ")
}

/// Whether a relative path names a page file at the root of a project
/// folder (not hidden, not inside a sub-folder).
pub fn is_top_level_page(path: &str) -> bool {
    path.ends_with(MARKDOWN_EXT) && !path.contains('/') && !path.starts_with('.')
}

/// Project identifier derived from a folder name: lower-cased, with every
/// character outside `[a-z0-9-]` replaced by `-`.
pub fn project_slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Validate that a relative path is safe (no directory traversal)
pub fn validate_relative_path(path: &str) -> Result<String, PathValidationError> {
    let clean_path = path.strip_prefix('/').unwrap_or(path);

    if clean_path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(PathValidationError::DirectoryTraversal);
    }

    if clean_path.starts_with('/') {
        return Err(PathValidationError::AbsolutePath);
    }

    Ok(clean_path.to_string())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathValidationError {
    #[error("Path contains directory traversal")]
    DirectoryTraversal,
    #[error("Path is absolute")]
    AbsolutePath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_spaces_and_drops_punctuation() {
        assert_eq!(sanitize_filename("Meeting Notes (Q1)!"), "Meeting_Notes_Q1");
        assert_eq!(sanitize_filename("a/b\\c"), "abc");
        assert_eq!(sanitize_filename("Straße über"), "Straße_über");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for title in ["Kroko isst Schoko", "  spaced  ", "x/../y", "Ünïcode – dash", "a_b-c"] {
            let once = sanitize_filename(title);
            assert_eq!(sanitize_filename(&once), once, "not stable for {title:?}");
        }
    }

    #[test]
    fn sanitize_path_keeps_hierarchy() {
        assert_eq!(sanitize_path("Parent Page/Child: One"), "Parent_Page/Child_One");
        assert_eq!(sanitize_path("/a//b/"), "a/b");
        assert_eq!(sanitize_path("../etc"), "etc");
    }

    #[test]
    fn variants_are_ordered_and_deduplicated() {
        assert_eq!(
            title_variants("My Page!"),
            vec!["My_Page", "My Page!", "My-Page!", "My Page", "my_page", "my-page!"]
        );
        assert_eq!(title_variants("home"), vec!["home"]);
    }

    #[test]
    fn variants_skip_unsafe_candidates() {
        let variants = title_variants("a/b");
        assert_eq!(variants, vec!["ab"]);
        assert!(title_variants("..").is_empty());
    }

    #[test]
    fn file_name_and_title_mapping() {
        assert_eq!(title_to_file_name("Release Plan"), "Release_Plan.md");
        assert_eq!(file_to_title("Release_Plan.md"), "Release Plan");
        assert_eq!(file_to_title("sub/Deep_Page.md"), "Deep Page");
        assert_eq!(file_to_title("NoExt"), "NoExt");
    }

    #[test]
    fn top_level_pages() {
        assert!(is_top_level_page("Notes.md"));
        assert!(!is_top_level_page("child/Notes.md"));
        assert!(!is_top_level_page(".hidden.md"));
        assert!(!is_top_level_page("image.png"));
    }

    #[test]
    fn slug_from_folder_name() {
        assert_eq!(project_slug("Kroko isst Schoko"), "kroko-isst-schoko");
        assert_eq!(project_slug("Team_2024"), "team-2024");
        assert_eq!(project_slug("Ärger"), "-rger");
    }

    #[test]
    fn validate_rejects_directory_traversal() {
        assert_eq!(
            validate_relative_path("../secret"),
            Err(PathValidationError::DirectoryTraversal)
        );
        assert_eq!(
            validate_relative_path("a/../../b"),
            Err(PathValidationError::DirectoryTraversal)
        );
    }

    #[test]
    fn validate_allows_dots_inside_names() {
        assert_eq!(validate_relative_path("v1..2.md"), Ok("v1..2.md".to_string()));
        assert_eq!(validate_relative_path("/Notes.md"), Ok("Notes.md".to_string()));
    }
}
