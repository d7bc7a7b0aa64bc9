// Copyright (c) The CloudTest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ExecutionManager`: owns the filesystem artifact root and hands out
//! numbered log files and per-test artifact folders.
//!
//! Grounded in `original_source/pkg/execmanager/manager.go`: every category
//! (typically a cluster-instance id) gets its own monotonically increasing
//! step counter, so repeated calls to `open_file`/`add_log` for the same
//! category produce `001-{op}.log`, `002-{op}.log`, etc. This guarantees the
//! "shared-resource policy" in `spec.md` §5: concurrent writers never
//! collide because each call allocates a fresh, unique path.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::Mutex;

/// Owns the artifact root for one run and allocates unique file paths.
pub trait ExecutionManager: Send + Sync {
    /// Opens a fresh numbered log file for `category`/`operation`, e.g.
    /// `{root}/{category}/001-{operation}.log`.
    fn open_file(&self, category: &str, operation: &str) -> std::io::Result<(Utf8PathBuf, File)>;

    /// Opens a fresh numbered log file for a specific test's operation, e.g.
    /// `{root}/{category}/001-{test}-{operation}.log`.
    fn open_file_test(
        &self,
        category: &str,
        test_name: &str,
        operation: &str,
    ) -> std::io::Result<(Utf8PathBuf, File)>;

    /// Writes `content` to a fresh numbered log file in one call.
    fn add_log(&self, category: &str, operation: &str, content: &str) -> std::io::Result<Utf8PathBuf> {
        let (path, mut file) = self.open_file(category, operation)?;
        file.write_all(content.as_bytes())?;
        Ok(path)
    }

    /// Creates (and returns the absolute path of) a per-test artifact folder.
    fn add_folder(&self, category: &str, name: &str) -> std::io::Result<Utf8PathBuf>;

    /// Returns a unique root directory under `self.root()` named after
    /// `root` (appending `-2`, `-3`, ... on collision), creating it.
    fn get_root(&self, root: &str) -> std::io::Result<Utf8PathBuf>;

    fn root(&self) -> &Utf8Path;
}

/// The default, filesystem-backed implementation.
pub struct FsExecutionManager {
    root: Utf8PathBuf,
    steps: Mutex<HashMap<String, u32>>,
}

impl FsExecutionManager {
    /// Creates a new execution manager rooted at `root`, clearing any
    /// pre-existing contents (matches `NewExecutionManager`'s `ClearFolder`).
    pub fn new(root: impl Into<Utf8PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        if root.exists() {
            std::fs::remove_dir_all(&root)?;
        }
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            steps: Mutex::new(HashMap::new()),
        })
    }

    fn next_step(&self, category: &str) -> u32 {
        let mut steps = self.steps.lock().expect("exec manager mutex poisoned");
        let entry = steps.entry(category.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }
}

impl ExecutionManager for FsExecutionManager {
    fn open_file(&self, category: &str, operation: &str) -> std::io::Result<(Utf8PathBuf, File)> {
        let step = self.next_step(category);
        let dir = self.root.join(category);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{step:03}-{operation}.log"));
        let file = File::create(&path)?;
        Ok((path, file))
    }

    fn open_file_test(
        &self,
        category: &str,
        test_name: &str,
        operation: &str,
    ) -> std::io::Result<(Utf8PathBuf, File)> {
        let step = self.next_step(category);
        let dir = self.root.join(category);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{step:03}-{test_name}-{operation}.log"));
        let file = File::create(&path)?;
        Ok((path, file))
    }

    fn add_folder(&self, category: &str, name: &str) -> std::io::Result<Utf8PathBuf> {
        let dir = self.root.join(category).join(name);
        std::fs::create_dir_all(&dir)?;
        dir.canonicalize_utf8().or(Ok(dir))
    }

    fn get_root(&self, root: &str) -> std::io::Result<Utf8PathBuf> {
        let mut candidate = self.root.join(root);
        if !candidate.exists() {
            std::fs::create_dir_all(&candidate)?;
            return candidate.canonicalize_utf8().or(Ok(candidate));
        }
        let mut index = 2;
        loop {
            candidate = self.root.join(format!("{root}-{index}"));
            if !candidate.exists() {
                std::fs::create_dir_all(&candidate)?;
                return candidate.canonicalize_utf8().or(Ok(candidate));
            }
            index += 1;
        }
    }

    fn root(&self) -> &Utf8Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_file_numbers_sequentially() {
        let tmp = camino_tempdir();
        let mgr = FsExecutionManager::new(tmp.join("artifacts")).unwrap();
        let (p1, _) = mgr.open_file("a_provider-0", "start").unwrap();
        let (p2, _) = mgr.open_file("a_provider-0", "stop").unwrap();
        assert!(p1.as_str().ends_with("001-start.log"));
        assert!(p2.as_str().ends_with("002-stop.log"));
    }

    #[test]
    fn get_root_deduplicates() {
        let tmp = camino_tempdir();
        let mgr = FsExecutionManager::new(tmp.join("artifacts")).unwrap();
        let r1 = mgr.get_root("simple").unwrap();
        let r2 = mgr.get_root("simple").unwrap();
        assert_ne!(r1, r2);
        assert!(r2.as_str().ends_with("simple-2"));
    }

    fn camino_tempdir() -> Utf8PathBuf {
        let dir = std::env::temp_dir().join(format!("cloudtest-test-{}", uuid::Uuid::new_v4()));
        Utf8PathBuf::from_path_buf(dir).expect("temp dir must be utf8")
    }
}
