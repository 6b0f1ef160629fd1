//! Mapping template identifiers to files on disk. Identifiers are
//! slash-separated paths without the `.scy.html` suffix; a `ns::name`
//! prefix switches the lookup root to a registered namespace.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use kstring::KString;

use crate::error::{Result, ScytheError};

pub const SUFFIX: &str = ".scy.html";

/// The view roots: one default plus any number of named namespaces.
#[derive(Debug, Clone)]
pub struct Views {
    root: PathBuf,
    namespaces: BTreeMap<KString, PathBuf>,
}

impl Views {
    pub fn new(root: PathBuf) -> Self {
        Views {
            root,
            namespaces: BTreeMap::new(),
        }
    }

    pub fn add_namespace(&mut self, name: KString, path: PathBuf) {
        self.namespaces.insert(name, path);
    }

    pub fn namespaces(&self) -> &BTreeMap<KString, PathBuf> {
        &self.namespaces
    }

    /// The file a template id refers to, whether or not it exists.
    pub fn locate(&self, id: &str) -> Result<PathBuf> {
        let (root, name) = match id.split_once("::") {
            Some((ns, rest)) => {
                let root = self
                    .namespaces
                    .get(ns)
                    .ok_or_else(|| ScytheError::NamespaceNotDefined(ns.to_string()))?;
                (root.as_path(), rest)
            }
            None => (self.root.as_path(), id),
        };
        Ok(root.join(format!("{}{}", name.trim_start_matches('/'), SUFFIX)))
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.locate(id)?.is_file())
    }

    /// Source text of a template, or `TemplateNotFound`.
    pub fn contents(&self, id: &str) -> Result<String> {
        let path = self.locate(id)?;
        if !path.is_file() {
            return Err(ScytheError::TemplateNotFound(id.to_string()));
        }
        Ok(fs::read_to_string(&path)?)
    }

    /// Modification time of a template's source file.
    pub fn modified(&self, id: &str) -> Result<std::time::SystemTime> {
        let path = self.locate(id)?;
        let meta = fs::metadata(&path)
            .map_err(|_| ScytheError::TemplateNotFound(id.to_string()))?;
        Ok(meta.modified()?)
    }
}

/// Directory must exist and be readable for views, exist and be
/// writable for the cache. Checked once at construction so later
/// failures cannot be misconfiguration.
pub fn check_dir(path: &Path, write: bool) -> Result<()> {
    if !path.is_dir() {
        return Err(if write {
            ScytheError::CachePathNotFound(path.to_path_buf())
        } else {
            ScytheError::ViewsPathNotFound(path.to_path_buf())
        });
    }
    if write {
        let probe = path.join(".scythe-write-probe");
        fs::write(&probe, b"")
            .map_err(|_| ScytheError::CachePathNotWritable(path.to_path_buf()))?;
        let _ = fs::remove_file(&probe);
    } else if fs::read_dir(path).is_err() {
        return Err(ScytheError::ViewsPathNotReadable(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_locate() {
        let mut v = Views::new(PathBuf::from("/views"));
        v.add_namespace(KString::from_ref("mail"), PathBuf::from("/mail"));
        assert_eq!(
            v.locate("users/show").unwrap(),
            PathBuf::from("/views/users/show.scy.html")
        );
        assert_eq!(
            v.locate("/users/show").unwrap(),
            PathBuf::from("/views/users/show.scy.html")
        );
        assert_eq!(
            v.locate("mail::welcome").unwrap(),
            PathBuf::from("/mail/welcome.scy.html")
        );
        assert!(matches!(
            v.locate("nope::welcome"),
            Err(ScytheError::NamespaceNotDefined(_))
        ));
    }
}
