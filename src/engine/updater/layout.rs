//! Filesystem Layout
//!
//! Directory layout used by the file-backed store, staging cache and installer.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Base directory layout:
///
/// ```text
/// <base>/
///   updater.config.json
///   state/      applied state + snapshot
///   staging/    downloaded, not yet installed
///   app/        installed application files
/// ```
#[derive(Debug, Clone)]
pub struct UpdaterLayout {
    base_dir: PathBuf,
}

impl UpdaterLayout {
    /// Linux: ~/.local/share/updatekit/
    /// Windows: %LOCALAPPDATA%\UpdateKit\
    /// macOS: ~/Library/Application Support/UpdateKit/
    pub fn new() -> Result<Self, LayoutError> {
        let base_dir = Self::get_base_dir()?;
        Ok(Self { base_dir })
    }

    /// Create with custom base directory
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn get_base_dir() -> Result<PathBuf, LayoutError> {
        #[cfg(target_os = "windows")]
        {
            let local_app_data = dirs::data_local_dir().ok_or(LayoutError::NoHomeDir)?;
            Ok(local_app_data.join("UpdateKit"))
        }

        #[cfg(target_os = "macos")]
        {
            let app_support = dirs::data_dir().ok_or(LayoutError::NoHomeDir)?;
            Ok(app_support.join("UpdateKit"))
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let home = dirs::home_dir().ok_or(LayoutError::NoHomeDir)?;
            Ok(home.join(".local/share/updatekit"))
        }
    }

    /// Create all directories
    pub fn init(&self) -> Result<(), LayoutError> {
        fs::create_dir_all(self.state_dir())?;
        fs::create_dir_all(self.staging_dir())?;
        fs::create_dir_all(self.app_dir())?;
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base_dir.join("state")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.base_dir.join("staging")
    }

    pub fn app_dir(&self) -> PathBuf {
        self.base_dir.join("app")
    }
}

/// Resolve a manifest path below `root`.
///
/// Absolute paths, `..` and empty paths are rejected.
pub fn resolve_relative(root: &Path, relative: &str) -> Result<PathBuf, LayoutError> {
    let candidate = Path::new(relative);
    if relative.is_empty() || relative.contains('\\') {
        return Err(LayoutError::UnsafePath(relative.to_string()));
    }

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in candidate.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return Err(LayoutError::UnsafePath(relative.to_string())),
        }
    }

    if depth == 0 {
        return Err(LayoutError::UnsafePath(relative.to_string()));
    }
    Ok(resolved)
}

/// Layout errors
#[derive(Debug)]
pub enum LayoutError {
    NoHomeDir,
    IoError(io::Error),
    UnsafePath(String),
}

impl From<io::Error> for LayoutError {
    fn from(e: io::Error) -> Self {
        Self::IoError(e)
    }
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoHomeDir => write!(f, "Could not determine home directory"),
            Self::IoError(e) => write!(f, "IO error: {}", e),
            Self::UnsafePath(p) => write!(f, "Refusing unsafe path: {}", p),
        }
    }
}

impl std::error::Error for LayoutError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_init() {
        let dir = tempdir().unwrap();
        let layout = UpdaterLayout::with_base_dir(dir.path().to_path_buf());
        layout.init().unwrap();

        assert!(layout.state_dir().exists());
        assert!(layout.staging_dir().exists());
        assert!(layout.app_dir().exists());
    }

    #[test]
    fn test_resolve_relative() {
        let root = Path::new("/srv/app");
        assert_eq!(
            resolve_relative(root, "js/app.bundle.js").unwrap(),
            PathBuf::from("/srv/app/js/app.bundle.js")
        );
        assert_eq!(
            resolve_relative(root, "./index.html").unwrap(),
            PathBuf::from("/srv/app/index.html")
        );
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/srv/app");
        assert!(resolve_relative(root, "../etc/passwd").is_err());
        assert!(resolve_relative(root, "js/../../x").is_err());
        assert!(resolve_relative(root, "/etc/passwd").is_err());
        assert!(resolve_relative(root, "").is_err());
        assert!(resolve_relative(root, ".").is_err());
        assert!(resolve_relative(root, "js\\app.js").is_err());
    }
}
