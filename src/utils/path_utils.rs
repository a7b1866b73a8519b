//! Path helpers shared by settings resolution, strategy selection and filters.
//!
//! All comparisons here are lexical so they stay usable for paths that do not
//! exist on disk (editors happily send those).

use std::path::{Component, Path, PathBuf};

use url::Url;

/// Resolve `.` and `..` components without touching the filesystem.
///
/// `..` never climbs above the root of an absolute path.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !path.has_root() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// The process's current directory, or `.` when it cannot be determined.
pub fn current_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|e| {
        log::warn!("Unable to read current directory: {e}");
        PathBuf::from(".")
    })
}

/// Make `path` absolute against the current directory and normalize it.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&current_dir().join(path))
    }
}

/// Compare two paths after normalization, ignoring case where the platform does.
pub fn same_path(a: &Path, b: &Path) -> bool {
    comparable(&normalize(a)) == comparable(&normalize(b))
}

/// Whether `path` is `root` or lies below it.
pub fn is_within(path: &Path, root: &Path) -> bool {
    let path = comparable(&normalize(path));
    let root = comparable(&normalize(root));
    Path::new(&path).starts_with(Path::new(&root))
}

#[cfg(windows)]
fn comparable(path: &Path) -> String {
    path.to_string_lossy().replace('/', "\\").to_lowercase()
}

#[cfg(not(windows))]
fn comparable(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Convert a workspace identifier from the editor into a filesystem path.
///
/// Accepts `file:` URIs and plain paths; other URI schemes have no path.
pub fn path_from_workspace_uri(workspace: &str) -> Option<PathBuf> {
    match Url::parse(workspace) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        // Single letters are Windows drive prefixes, not schemes
        Ok(url) if url.scheme().len() > 1 => None,
        _ => Some(PathBuf::from(workspace)),
    }
}

/// Render a path as a `file:` URI, falling back to its display form.
pub fn uri_from_path(path: &Path) -> String {
    Url::from_file_path(path)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| path.display().to_string())
}
