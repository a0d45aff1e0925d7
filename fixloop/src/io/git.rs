//! Working-tree change detection from `git status --porcelain` output.
//!
//! The status command itself runs through the configured [`CommandRunner`] so
//! it shares timeouts and test doubles with every other external call.
//!
//! [`CommandRunner`]: crate::io::command::CommandRunner

use tracing::warn;

use crate::io::command::CommandSpec;

/// Default change-check command: tracked and untracked changes, one per line.
pub fn default_status_command() -> CommandSpec {
    CommandSpec::exec(["git", "status", "--porcelain=v1", "-uall"])
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Parse porcelain output into entries, one per non-blank line.
///
/// Lines that do not look like porcelain entries are still reported as
/// changes (with an empty code) so unexpected output never hides edits.
pub fn parse_porcelain(output: &str) -> Vec<StatusEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            parse_status_line(line).unwrap_or_else(|| {
                warn!(line, "unexpected porcelain line");
                StatusEntry {
                    code: String::new(),
                    path: line.trim().to_string(),
                }
            })
        })
        .collect()
}

fn parse_status_line(line: &str) -> Option<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Some(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    let bytes = line.as_bytes();
    let (code, rest) = if bytes.len() >= 4 && bytes[2] == b' ' && line.is_char_boundary(2) {
        (line[..2].to_string(), &line[3..])
    } else if bytes.len() >= 3 && bytes[1] == b' ' && line.is_char_boundary(1) {
        // Leading space of an unstaged entry lost to trimming: " M path" became "M path".
        (format!(" {}", &line[..1]), &line[2..])
    } else {
        return None;
    };
    let mut path = rest.trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Some(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M src/main.rs").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: " M".to_string(),
                path: "src/main.rs".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn clean_tree_has_no_entries() {
        assert!(parse_porcelain("").is_empty());
        assert!(parse_porcelain("\n  \n").is_empty());
    }

    #[test]
    fn odd_lines_still_count_as_changes() {
        let entries = parse_porcelain("?? notes.md\nxx");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].code, "??");
        assert_eq!(entries[1].code, "");
        assert_eq!(entries[1].path, "xx");
    }

    #[test]
    fn recovers_entry_whose_leading_space_was_trimmed() {
        let entries = parse_porcelain("M src/lib.rs\n M src/main.rs");
        assert_eq!(
            entries,
            vec![
                StatusEntry {
                    code: " M".to_string(),
                    path: "src/lib.rs".to_string()
                },
                StatusEntry {
                    code: " M".to_string(),
                    path: "src/main.rs".to_string()
                },
            ]
        );
    }
}
