use percent_encoding::percent_decode_str;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Errors that can occur while resolving a caller-supplied path
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Access forbidden: '{path}' resolves outside the workspace")]
    Forbidden { path: String },

    #[error("Workspace root '{path}' is unusable: {source}")]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PathError {
    fn invalid(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    fn forbidden(path: &str) -> Self {
        Self::Forbidden {
            path: path.to_string(),
        }
    }
}

/// Confines caller-supplied paths to a single workspace root.
///
/// Resolution is lexical: `.` and `..` are collapsed without consulting the
/// filesystem, and the result must be the root itself or lie below it,
/// compared component by component. When symlink confinement is on, the
/// deepest existing ancestor of the result is additionally canonicalized
/// and must still be inside the (canonical) root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    confine_symlinks: bool,
}

impl PathGuard {
    /// Create a guard for an existing directory.
    ///
    /// The root is canonicalized once here and never changes afterwards.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| PathError::InvalidRoot {
            path: root.to_path_buf(),
            source: e,
        })?;

        if !canonical.is_dir() {
            return Err(PathError::InvalidRoot {
                path: root.to_path_buf(),
                source: io::Error::other("not a directory"),
            });
        }

        Ok(Self {
            root: canonical,
            confine_symlinks: true,
        })
    }

    /// Create a guard that never touches the filesystem.
    ///
    /// The root must be absolute; it is normalized lexically. Symlink
    /// confinement is disabled.
    pub fn lexical(root: impl AsRef<Path>) -> Result<Self, PathError> {
        let root = root.as_ref();
        if !root.is_absolute() {
            return Err(PathError::InvalidRoot {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "root must be absolute"),
            });
        }

        Ok(Self {
            root: normalize_lexically(root),
            confine_symlinks: false,
        })
    }

    /// Enable or disable the symlink confinement check.
    pub fn with_symlink_confinement(mut self, enabled: bool) -> Self {
        self.confine_symlinks = enabled;
        self
    }

    /// The absolute workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `sub_path` against the workspace root.
    ///
    /// * empty input resolves to the root itself
    /// * input is percent-decoded first; undecodable input is `InvalidPath`
    /// * relative input is joined to the root, absolute input is kept as is
    /// * anything that ends up outside the root is `Forbidden`
    pub fn resolve(&self, sub_path: &str) -> Result<PathBuf, PathError> {
        if sub_path.is_empty() {
            return Ok(self.root.clone());
        }

        let decoded = percent_decode_str(sub_path)
            .decode_utf8()
            .map_err(|e| PathError::invalid(sub_path, format!("not valid UTF-8 ({e})")))?;

        if decoded.contains('\0') {
            return Err(PathError::invalid(sub_path, "contains a NUL byte"));
        }

        let candidate = normalize_lexically(&self.root.join(decoded.as_ref()));

        if !is_within_root(&candidate, &self.root) {
            warn!("Unsafe path access attempted: {:?}", candidate);
            return Err(PathError::forbidden(sub_path));
        }

        if self.confine_symlinks && !self.existing_ancestor_within_root(&candidate) {
            warn!("Path escapes the workspace through a symlink: {:?}", candidate);
            return Err(PathError::forbidden(sub_path));
        }

        Ok(candidate)
    }

    /// Whether an already-resolved path is the workspace root itself.
    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    /// Render a resolved path relative to the root, for messages.
    pub fn display_relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    fn existing_ancestor_within_root(&self, candidate: &Path) -> bool {
        let mut probe = Some(candidate);
        while let Some(current) = probe {
            match current.canonicalize() {
                Ok(real) => return is_within_root(&real, &self.root),
                Err(_) => probe = current.parent(),
            }
        }
        true
    }
}

/// Checks if a path is within (or equal to) a root directory.
///
/// `Path::starts_with` compares whole components, so `/workspace2` is not
/// considered to be inside `/work`.
fn is_within_root(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` at the filesystem root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn lexical_guard(root: &str) -> PathGuard {
        PathGuard::lexical(root).unwrap()
    }

    #[test]
    fn test_empty_path_resolves_to_root() {
        let guard = lexical_guard("/work");
        assert_eq!(guard.resolve("").unwrap(), PathBuf::from("/work"));
    }

    #[test]
    fn test_relative_path_within_root() {
        let guard = lexical_guard("/work");
        assert_eq!(
            guard.resolve("notes/a.txt").unwrap(),
            PathBuf::from("/work/notes/a.txt")
        );
        assert_eq!(
            guard.resolve("./notes/./b.txt").unwrap(),
            PathBuf::from("/work/notes/b.txt")
        );
    }

    #[test]
    fn test_dotdot_inside_root_is_collapsed() {
        let guard = lexical_guard("/work");
        assert_eq!(
            guard.resolve("notes/../a.txt").unwrap(),
            PathBuf::from("/work/a.txt")
        );
        assert_eq!(guard.resolve("notes/..").unwrap(), PathBuf::from("/work"));
    }

    #[test]
    fn test_path_traversal_blocked() {
        let guard = lexical_guard("/work");
        for attempt in [
            "..",
            "../etc/passwd",
            "notes/../../etc/passwd",
            "a/b/../../../x",
            "../../../../../../",
        ] {
            assert!(
                matches!(guard.resolve(attempt), Err(PathError::Forbidden { .. })),
                "{attempt} should be forbidden"
            );
        }
    }

    #[test]
    fn test_traversal_never_escapes_root() {
        let guard = lexical_guard("/work/area");
        let segments = ["..", ".", "a", "b", "..", "c"];
        // Every combination of three segments either stays inside or fails
        for x in segments {
            for y in segments {
                for z in segments {
                    let candidate = format!("{x}/{y}/{z}");
                    match guard.resolve(&candidate) {
                        Ok(path) => assert!(path.starts_with("/work/area"), "{candidate}"),
                        Err(e) => assert!(matches!(e, PathError::Forbidden { .. })),
                    }
                }
            }
        }
    }

    #[test]
    fn test_sibling_with_extended_name_rejected() {
        let guard = lexical_guard("/work");
        assert!(matches!(
            guard.resolve("../workspace2"),
            Err(PathError::Forbidden { .. })
        ));
        assert!(matches!(
            guard.resolve("/workspace2/file.txt"),
            Err(PathError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_absolute_path_inside_root_accepted() {
        let guard = lexical_guard("/work");
        assert_eq!(
            guard.resolve("/work/a/b.txt").unwrap(),
            PathBuf::from("/work/a/b.txt")
        );
        assert!(matches!(
            guard.resolve("/etc/passwd"),
            Err(PathError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_percent_encoded_traversal_blocked() {
        let guard = lexical_guard("/work");
        assert!(matches!(
            guard.resolve("%2e%2e/%2e%2e/etc/passwd"),
            Err(PathError::Forbidden { .. })
        ));
        assert_eq!(
            guard.resolve("my%20file.txt").unwrap(),
            PathBuf::from("/work/my file.txt")
        );
    }

    #[test]
    fn test_undecodable_path_is_invalid() {
        let guard = lexical_guard("/work");
        assert!(matches!(
            guard.resolve("bad%ff%fe.txt"),
            Err(PathError::InvalidPath { .. })
        ));
        assert!(matches!(
            guard.resolve("nul%00byte"),
            Err(PathError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_lexical_requires_absolute_root() {
        assert!(matches!(
            PathGuard::lexical("relative/root"),
            Err(PathError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_missing_root_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            PathGuard::new(&missing),
            Err(PathError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_file_as_root_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            PathGuard::new(&file),
            Err(PathError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_nonexistent_path_inside_root_resolves() {
        let temp_dir = TempDir::new().unwrap();
        let guard = PathGuard::new(temp_dir.path()).unwrap();
        let resolved = guard.resolve("not/yet/created.txt").unwrap();
        assert_eq!(resolved, guard.root().join("not/yet/created.txt"));
    }

    #[test]
    fn test_display_relative() {
        let guard = lexical_guard("/work");
        assert_eq!(guard.display_relative(Path::new("/work")), ".");
        assert_eq!(guard.display_relative(Path::new("/work/a/b")), "a/b");
        assert!(guard.is_root(&guard.resolve("a/..").unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_within_root() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().unwrap();
        let guard = PathGuard::new(temp_dir.path()).unwrap();
        let target = guard.root().join("target.txt");
        fs::write(&target, "test").unwrap();
        symlink(&target, guard.root().join("link.txt")).unwrap();

        assert!(guard.resolve("link.txt").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_outside_root_blocked() {
        use std::os::unix::fs::symlink;

        let root_dir = TempDir::new().unwrap();
        let outside_dir = TempDir::new().unwrap();
        fs::write(outside_dir.path().join("secret.txt"), "test").unwrap();

        let guard = PathGuard::new(root_dir.path()).unwrap();
        symlink(outside_dir.path(), guard.root().join("escape")).unwrap();

        assert!(matches!(
            guard.resolve("escape/secret.txt"),
            Err(PathError::Forbidden { .. })
        ));
        assert!(matches!(
            guard.resolve("escape/new.txt"),
            Err(PathError::Forbidden { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_confinement_can_be_disabled() {
        use std::os::unix::fs::symlink;

        let root_dir = TempDir::new().unwrap();
        let outside_dir = TempDir::new().unwrap();

        let guard = PathGuard::new(root_dir.path())
            .unwrap()
            .with_symlink_confinement(false);
        symlink(outside_dir.path(), guard.root().join("escape")).unwrap();

        assert!(guard.resolve("escape/file.txt").is_ok());
    }
}
