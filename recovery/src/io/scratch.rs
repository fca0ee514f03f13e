//! Session-namespaced scratch directories and session identifiers.
//!
//! Every session builds in its own directory under the configured scratch
//! root, so concurrent sessions never see each other's files. The directory
//! is removed when the [`ScratchDir`] is dropped.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tempfile::TempDir;
use tracing::debug;

use crate::core::types::SourceTree;

/// Generate a session id: `<utc timestamp>_<6 lowercase alphanumerics>`.
pub fn new_session_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("{timestamp}_{suffix}")
}

/// Scratch directory owned by one session.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create `<scratch_root>/<session_id>-XXXXXX`.
    pub fn create(scratch_root: &Path, session_id: &str) -> Result<Self> {
        fs::create_dir_all(scratch_root)
            .with_context(|| format!("create scratch root {}", scratch_root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{session_id}-"))
            .tempdir_in(scratch_root)
            .with_context(|| format!("create scratch dir under {}", scratch_root.display()))?;
        debug!(path = %dir.path().display(), "created scratch dir");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Replace the contents of `root` with `tree`.
///
/// Files left over from an earlier attempt are removed first so a tree that
/// shrank (e.g. after the fallback) does not build against stale sources.
pub fn materialize_tree(root: &Path, tree: &SourceTree) -> Result<()> {
    clear_dir(root)?;
    for (rel, content) in tree.iter() {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create source dir {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    }
    debug!(files = tree.len(), root = %root.display(), "materialized source tree");
    Ok(())
}

fn clear_dir(root: &Path) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_have_stable_shape() {
        let id = new_session_id();
        let (timestamp, suffix) = id.rsplit_once('_').expect("suffix");
        assert_eq!(timestamp.len(), "20250101_120000".len());
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn scratch_dirs_are_unique_per_session_and_removed_on_drop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let a = ScratchDir::create(temp.path(), "s1").expect("a");
        let b = ScratchDir::create(temp.path(), "s1").expect("b");
        assert_ne!(a.path(), b.path());
        let a_path = a.path().to_path_buf();
        assert!(
            a_path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("s1-"))
        );
        drop(a);
        assert!(!a_path.exists());
        assert!(b.path().exists());
    }

    #[test]
    fn materialize_removes_stale_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first =
            SourceTree::from_files([("Sources/A.swift", "a"), ("B.swift", "b")]).expect("tree");
        materialize_tree(temp.path(), &first).expect("first");
        assert!(temp.path().join("Sources/A.swift").is_file());

        let second = SourceTree::from_files([("Main.swift", "m")]).expect("tree");
        materialize_tree(temp.path(), &second).expect("second");
        assert!(!temp.path().join("Sources").exists());
        assert!(!temp.path().join("B.swift").exists());
        assert_eq!(
            fs::read_to_string(temp.path().join("Main.swift")).expect("read"),
            "m"
        );
    }
}
