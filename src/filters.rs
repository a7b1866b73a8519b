//! Pre-dispatch document filters
//!
//! Decide whether a document is worth handing to the tool at all: notebook
//! cells, text that does not parse, standard-library sources and excluded paths
//! are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::SyntaxCheckKind;
use crate::utils::path_utils::is_within;

/// URI prefix of unsaved notebook cells
pub const NOTEBOOK_CELL_URI_PREFIX: &str = "vscode-notebook-cell";

/// Why a document was not dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotebookCell,
    InvalidSource(String),
    StandardLibrary,
    Excluded,
}

pub fn is_notebook_cell(uri: &str) -> bool {
    uri.starts_with(NOTEBOOK_CELL_URI_PREFIX)
}

/// Whether `path` belongs to one of the runtime's standard-library roots
pub fn is_stdlib_file(path: &Path, stdlib_roots: &[PathBuf]) -> bool {
    stdlib_roots.iter().any(|root| is_within(path, root))
}

/// Decides whether document text is valid input for the tool
pub trait SyntaxCheck: Send + Sync {
    /// `Err` carries a short description of the first problem found
    fn check(&self, source: &str) -> Result<(), String>;
}

impl<F> SyntaxCheck for F
where
    F: Fn(&str) -> Result<(), String> + Send + Sync,
{
    fn check(&self, source: &str) -> Result<(), String> {
        self(source)
    }
}

/// Accepts everything
pub struct AcceptAll;

impl SyntaxCheck for AcceptAll {
    fn check(&self, _source: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Requires `()`, `[]` and `{}` to balance outside of double-quoted strings
pub struct BalancedDelimiters;

impl SyntaxCheck for BalancedDelimiters {
    fn check(&self, source: &str) -> Result<(), String> {
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut in_string: Option<usize> = None;
        let mut escaped = false;
        let mut line = 1;

        for c in source.chars() {
            if c == '\n' {
                line += 1;
            }
            if in_string.is_some() {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = None,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = Some(line),
                '(' | '[' | '{' => stack.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, opened_on)) => {
                            return Err(format!(
                                "line {line}: '{c}' does not close '{open}' opened on line {opened_on}"
                            ));
                        }
                        None => return Err(format!("line {line}: unexpected '{c}'")),
                    }
                }
                _ => {}
            }
        }

        if let Some(opened_on) = in_string {
            return Err(format!("unterminated string starting on line {opened_on}"));
        }
        if let Some((open, opened_on)) = stack.pop() {
            return Err(format!("unclosed '{open}' opened on line {opened_on}"));
        }
        Ok(())
    }
}

pub fn syntax_check_for(kind: SyntaxCheckKind) -> Arc<dyn SyntaxCheck> {
    match kind {
        SyntaxCheckKind::None => Arc::new(AcceptAll),
        SyntaxCheckKind::Delimiters => Arc::new(BalancedDelimiters),
    }
}

/// Compiled `exclude` globs
///
/// Patterns are matched against the absolute document path and against the path
/// relative to the workspace root.
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    set: Option<GlobSet>,
}

impl ExcludeMatcher {
    /// Invalid patterns are dropped with a warning.
    pub fn new(patterns: &[String]) -> Self {
        if patterns.is_empty() {
            return Self { set: None };
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => log::warn!("Ignoring invalid exclude pattern '{pattern}': {e}"),
            }
        }
        match builder.build() {
            Ok(set) => Self { set: Some(set) },
            Err(e) => {
                log::warn!("Failed to compile exclude patterns: {e}");
                Self { set: None }
            }
        }
    }

    pub fn is_excluded(&self, path: &Path, workspace_root: &Path) -> bool {
        let Some(set) = &self.set else {
            return false;
        };
        set.is_match(path) || path.strip_prefix(workspace_root).is_ok_and(|relative| set.is_match(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notebook_cell_prefix() {
        assert!(is_notebook_cell("vscode-notebook-cell:/nb.ipynb#W0sZmlsZQ"));
        assert!(!is_notebook_cell("file:///nb.ipynb"));
    }

    #[test]
    fn test_stdlib_roots() {
        let roots = vec![PathBuf::from("/usr/lib/runtime/std")];
        assert!(is_stdlib_file(Path::new("/usr/lib/runtime/std/io/mod.src"), &roots));
        assert!(!is_stdlib_file(Path::new("/home/me/proj/io.src"), &roots));
        assert!(!is_stdlib_file(Path::new("/home/me/proj/io.src"), &[]));
    }

    #[test]
    fn test_balanced_delimiters() {
        let check = BalancedDelimiters;
        assert!(check.check("fn main() { let v = [1, 2]; }").is_ok());
        assert!(check.check(r#"print(")(")"#).is_ok());
        assert!(check.check(r#"s = "esc \" ("; f()"#).is_ok());
        assert_eq!(check.check("f(\n]").unwrap_err(), "line 2: ']' does not close '(' opened on line 1");
        assert_eq!(check.check("}").unwrap_err(), "line 1: unexpected '}'");
        assert_eq!(check.check("{\n(\n)").unwrap_err(), "unclosed '{' opened on line 1");
        assert!(check.check("x = \"open").unwrap_err().contains("unterminated"));
    }

    #[test]
    fn test_closure_syntax_check() {
        let check = |source: &str| if source.contains("@@") { Err("marker".to_string()) } else { Ok(()) };
        assert!(check.check("fine").is_ok());
        assert!(SyntaxCheck::check(&check, "bad @@").is_err());
    }

    #[test]
    fn test_exclude_matcher() {
        let matcher = ExcludeMatcher::new(&["generated/**".to_string(), "**/*.min.src".to_string()]);
        let root = Path::new("/proj");
        assert!(matcher.is_excluded(Path::new("/proj/generated/a.src"), root));
        assert!(matcher.is_excluded(Path::new("/other/x.min.src"), root));
        assert!(!matcher.is_excluded(Path::new("/proj/src/a.src"), root));
    }

    #[test]
    fn test_invalid_exclude_pattern_is_dropped() {
        let matcher = ExcludeMatcher::new(&["a/{b".to_string(), "*.tmp".to_string()]);
        assert!(matcher.is_excluded(Path::new("x.tmp"), Path::new("/")));
    }
}
