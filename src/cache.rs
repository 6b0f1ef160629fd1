//! Compiled-template cache: one flat file per template id under the
//! cache directory, named by the blake3 digest of the id. Freshness is
//! mtime-based; a cache entry older than its source is recompiled.

use std::fs;
use std::path::PathBuf;
use std::time::SystemTime;

use log::debug;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct CompileCache {
    root: PathBuf,
}

impl CompileCache {
    pub fn new(root: PathBuf) -> Self {
        CompileCache { root }
    }

    /// The artifact path for a template id. Hashing the id flattens
    /// nested and namespaced ids into a single directory and keeps
    /// the filename safe regardless of what the id contains.
    pub fn artifact(&self, id: &str) -> PathBuf {
        self.root.join(blake3::hash(id.as_bytes()).to_hex().as_str())
    }

    /// True when a cached artifact exists and is at least as new as
    /// the source.
    pub fn fresh(&self, id: &str, source_modified: SystemTime) -> bool {
        let Ok(meta) = fs::metadata(self.artifact(id)) else {
            return false;
        };
        match meta.modified() {
            Ok(cached) => cached >= source_modified,
            Err(_) => false,
        }
    }

    pub fn load(&self, id: &str) -> Result<String> {
        debug!("cache hit for '{id}'");
        Ok(fs::read_to_string(self.artifact(id))?)
    }

    pub fn store(&self, id: &str, compiled: &str) -> Result<()> {
        debug!("cache store for '{id}'");
        fs::write(self.artifact(id), compiled)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_roundtrip_and_freshness() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path().to_path_buf());
        let before = SystemTime::now();
        assert!(!cache.fresh("a/b", before));
        cache.store("a/b", "compiled").unwrap();
        assert_eq!(cache.load("a/b").unwrap(), "compiled");
        assert!(cache.fresh("a/b", before - std::time::Duration::from_secs(5)));
        assert!(!cache.fresh(
            "a/b",
            SystemTime::now() + std::time::Duration::from_secs(5)
        ));
    }

    #[test]
    fn t_distinct_ids_distinct_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompileCache::new(dir.path().to_path_buf());
        assert_ne!(cache.artifact("a"), cache.artifact("b"));
    }
}
