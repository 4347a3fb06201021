//! FileTreeStore: one JSON file per named tree
//!
//! Layout: `<dir>/<name>.json`, holding the nested [`TreeDocument`] form.
//!
//! # Atomicity
//!
//! Every write goes to `<name>.json.tmp`, is fsynced, and is then renamed
//! over the destination. Rename is atomic on POSIX filesystems, so a reader
//! opening the file sees either the old or the new tree. Within the process,
//! a `RwLock` orders publishes against the parsed-tree cache.
//!
//! [`TreeDocument`]: cfgd_core::TreeDocument

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use cfgd_core::{CfgdError, CfgdResult, ConfigTree, TreeStore};

const EXTENSION: &str = "json";

/// Directory-backed store
#[derive(Debug)]
pub struct FileTreeStore {
    dir: PathBuf,
    cache: RwLock<FxHashMap<String, Arc<ConfigTree>>>,
}

impl FileTreeStore {
    /// Open (creating if needed) a store rooted at `dir`
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> CfgdResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(FileTreeStore {
            dir,
            cache: RwLock::new(FxHashMap::default()),
        })
    }

    /// Directory holding the tree files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> CfgdResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(CfgdError::storage(format!("invalid tree name '{}'", name)));
        }
        Ok(self.dir.join(format!("{}.{}", name, EXTENSION)))
    }

    fn read_tree(path: &Path) -> CfgdResult<ConfigTree> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> CfgdResult<()> {
        let tmp = path.with_extension(format!("{}.tmp", EXTENSION));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl TreeStore for FileTreeStore {
    fn get(&self, name: &str) -> CfgdResult<Arc<ConfigTree>> {
        if let Some(tree) = self.cache.read().get(name) {
            return Ok(Arc::clone(tree));
        }
        let path = self.path_for(name)?;
        let mut cache = self.cache.write();
        if let Some(tree) = cache.get(name) {
            return Ok(Arc::clone(tree));
        }
        if !path.exists() {
            return Err(CfgdError::TreeNotFound(name.to_string()));
        }
        let tree = Arc::new(Self::read_tree(&path)?);
        cache.insert(name.to_string(), Arc::clone(&tree));
        Ok(tree)
    }

    fn put(&self, name: &str, mut tree: ConfigTree) -> CfgdResult<()> {
        let path = self.path_for(name)?;
        tree.clear_flags();
        tree.compact();
        let bytes = serde_json::to_vec_pretty(&tree)?;
        let mut cache = self.cache.write();
        Self::write_atomic(&path, &bytes)?;
        cache.insert(name.to_string(), Arc::new(tree));
        debug!(target: "cfgd::store", tree = name, bytes = bytes.len(), "Tree written");
        Ok(())
    }

    fn copy(&self, src: &str, dst: &str) -> CfgdResult<()> {
        let src_path = self.path_for(src)?;
        let dst_path = self.path_for(dst)?;
        let mut cache = self.cache.write();
        if !src_path.exists() {
            return Err(CfgdError::TreeNotFound(src.to_string()));
        }
        let bytes = fs::read(&src_path)?;
        Self::write_atomic(&dst_path, &bytes)?;
        match cache.get(src).cloned() {
            Some(tree) => {
                cache.insert(dst.to_string(), tree);
            }
            None => {
                cache.remove(dst);
            }
        }
        debug!(target: "cfgd::store", src, dst, "Tree copied");
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.cache.read().contains_key(name)
            || self.path_for(name).map_or(false, |p| p.exists())
    }

    fn delete(&self, name: &str) -> CfgdResult<()> {
        let path = self.path_for(name)?;
        let mut cache = self.cache.write();
        cache.remove(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CfgdError::TreeNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn names(&self) -> CfgdResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => names.push(stem.to_string()),
                None => warn!(target: "cfgd::store", path = %path.display(), "Skipping non-UTF-8 file name"),
            }
        }
        names.sort();
        Ok(names)
    }
}
