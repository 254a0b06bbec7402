//! Asset Discovery
//!
//! Finds component and pipeline entry files. Roots that do not exist are
//! skipped rather than reported.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::locator::DecoratorKind;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to walk {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{kind:?} path must be under {}: {}", .root.display(), .path.display())]
    OutsideRoot {
        kind: DecoratorKind,
        root: PathBuf,
        path: PathBuf,
    },

    #[error("Path must point to {expected}: {}", .path.display())]
    WrongFile { expected: &'static str, path: PathBuf },

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),
}

impl DecoratorKind {
    /// Entry file name of an asset of this kind.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Component => "component.py",
            Self::Pipeline => "pipeline.py",
        }
    }

    /// Top-level catalog directory of this kind.
    pub fn root_dir(self) -> &'static str {
        match self {
            Self::Component => "components",
            Self::Pipeline => "pipelines",
        }
    }
}

/// One catalog asset at `<root>/<category>/<name>/<kind>.py`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub kind: DecoratorKind,
    pub category: String,
    pub name: String,
    pub path: PathBuf,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('_') || name.starts_with('.')
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let io_err = |source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let visible = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !is_hidden(n));
        if visible && path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Assets laid out as `<base_dir>/<category>/<name>/<kind>.py`.
pub fn discover_assets(base_dir: &Path, kind: DecoratorKind) -> Result<Vec<Asset>, DiscoveryError> {
    if !base_dir.exists() {
        debug!(dir = %base_dir.display(), "asset root missing, skipping");
        return Ok(Vec::new());
    }

    let mut assets = Vec::new();
    for category_dir in sorted_subdirs(base_dir)? {
        for asset_dir in sorted_subdirs(&category_dir)? {
            let path = asset_dir.join(kind.file_name());
            if path.is_file() {
                assets.push(Asset {
                    kind,
                    category: dir_name(&category_dir),
                    name: dir_name(&asset_dir),
                    path,
                });
            }
        }
    }
    Ok(assets)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Resolve a targeted asset given as a directory or entry file, relative to
/// `repo_root` unless absolute, and check it lives under the kind's root.
pub fn resolve_asset(repo_root: &Path, raw: &Path, kind: DecoratorKind) -> Result<Asset, DiscoveryError> {
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        repo_root.join(raw)
    };
    let mut path = joined.canonicalize().map_err(|_| DiscoveryError::NotFound(joined.clone()))?;
    if path.is_dir() {
        path = path.join(kind.file_name());
    }
    if path.file_name().and_then(|n| n.to_str()) != Some(kind.file_name()) {
        return Err(DiscoveryError::WrongFile {
            expected: kind.file_name(),
            path,
        });
    }
    if !path.is_file() {
        return Err(DiscoveryError::NotFound(path));
    }

    let root = repo_root.join(kind.root_dir());
    let root = root.canonicalize().unwrap_or(root);
    let outside = || DiscoveryError::OutsideRoot {
        kind,
        root: root.clone(),
        path: path.clone(),
    };
    let rel = path.strip_prefix(&root).map_err(|_| outside())?;
    let parts: Vec<String> = rel.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    if parts.len() < 3 {
        return Err(outside());
    }

    Ok(Asset {
        kind,
        category: parts[0].clone(),
        name: parts[1].clone(),
        path,
    })
}

/// Recursively collect files under each existing root that satisfy `keep`,
/// sorted by path.
fn walk_files(directories: &[PathBuf], keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut files = Vec::new();
    for dir in directories {
        if !dir.exists() {
            debug!(dir = %dir.display(), "directory missing, skipping");
            continue;
        }
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| DiscoveryError::Io {
                path: dir.clone(),
                source: e.into(),
            })?;
            if entry.file_type().is_file() && keep(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Every `component.py` / `pipeline.py` below the roots, with the kind implied by its name.
pub fn candidate_asset_files(directories: &[PathBuf]) -> Result<Vec<(DecoratorKind, PathBuf)>, DiscoveryError> {
    let files = walk_files(directories, |p| kind_of_file(p).is_some())?;
    Ok(files
        .into_iter()
        .filter_map(|p| kind_of_file(&p).map(|kind| (kind, p)))
        .collect())
}

/// Every `.py` file below the roots.
pub fn python_files(directories: &[PathBuf]) -> Result<Vec<PathBuf>, DiscoveryError> {
    walk_files(directories, |p| p.extension().is_some_and(|e| e == "py"))
}

fn kind_of_file(path: &Path) -> Option<DecoratorKind> {
    match path.file_name()?.to_str()? {
        "component.py" => Some(DecoratorKind::Component),
        "pipeline.py" => Some(DecoratorKind::Pipeline),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_discover_assets_layout() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("components");
        touch(&root.join("training/trainer/component.py"));
        touch(&root.join("data/loader/component.py"));
        touch(&root.join("_private/hidden/component.py"));
        touch(&root.join("data/no_entry/README.md"));

        let assets = discover_assets(&root, DecoratorKind::Component).unwrap();
        let names: Vec<_> = assets.iter().map(|a| format!("{}/{}", a.category, a.name)).collect();
        assert_eq!(names, vec!["data/loader", "training/trainer"]);

        assert!(discover_assets(&tmp.path().join("missing"), DecoratorKind::Pipeline)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_candidate_files_sorted_and_missing_roots_skipped() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("b/x/pipeline.py"));
        touch(&tmp.path().join("a/y/component.py"));
        touch(&tmp.path().join("a/y/helpers.py"));

        let dirs = vec![tmp.path().to_path_buf(), tmp.path().join("nope")];
        let found = candidate_asset_files(&dirs).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, DecoratorKind::Component);
        assert_eq!(found[1].0, DecoratorKind::Pipeline);

        assert_eq!(python_files(&dirs).unwrap().len(), 3);
    }

    #[test]
    fn test_resolve_asset() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("components/training/trainer/component.py"));
        touch(&tmp.path().join("pipelines/training/flow/pipeline.py"));

        let asset = resolve_asset(tmp.path(), Path::new("components/training/trainer"), DecoratorKind::Component).unwrap();
        assert_eq!(asset.category, "training");
        assert_eq!(asset.name, "trainer");

        let err = resolve_asset(
            tmp.path(),
            Path::new("pipelines/training/flow/pipeline.py"),
            DecoratorKind::Component,
        )
        .unwrap_err();
        assert!(matches!(err, DiscoveryError::WrongFile { .. }));

        touch(&tmp.path().join("pipelines/training/flow/component.py"));
        let err = resolve_asset(tmp.path(), Path::new("pipelines/training/flow"), DecoratorKind::Component).unwrap_err();
        assert!(matches!(err, DiscoveryError::OutsideRoot { .. }));

        let asset = resolve_asset(tmp.path(), Path::new("pipelines/training/flow"), DecoratorKind::Pipeline).unwrap();
        assert_eq!(asset.kind, DecoratorKind::Pipeline);

        let err = resolve_asset(tmp.path(), Path::new("components/nothing"), DecoratorKind::Component).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
    }
}
