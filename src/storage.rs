use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::{Error, Result};

/// Where profile pictures live. Names are flat (no directories) and chosen
/// by the caller.
pub trait FileStore: Send + Sync {
    /// Directory the stored files are served from.
    fn root(&self) -> &Path;

    /// Replaces the file called `name` with `bytes` in one step; readers see
    /// either the old or the new content, never a partial file.
    fn save(&self, name : &str, bytes : &[u8]) -> Result<()>;

    /// Removes `name`. Removing a file that is not there succeeds.
    fn delete(&self, name : &str) -> Result<()>;
}

pub struct DiskStore {
    root : PathBuf,
}

impl DiskStore {
    pub fn new<P : Into<PathBuf>>(root : P) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        Ok(Self {
            root,
        })
    }

    fn path(&self, name : &str) -> Result<PathBuf> {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(|c : char| c == '/' || c == '\\');

        if !plain {
            return Err(Error::Validation(format!("bad file name: {}", name)));
        }

        Ok(self.root.join(name))
    }
}

impl FileStore for DiskStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn save(&self, name : &str, bytes : &[u8]) -> Result<()> {
        let path = self.path(name)?;

        // same directory, so the rename below never crosses filesystems
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|err| err.error)?;

        Ok(())
    }

    fn delete(&self, name : &str) -> Result<()> {
        match std::fs::remove_file(self.path(name)?) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            res => Ok(res?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_replaces_and_leaves_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("uploads")).unwrap();

        store.save("user_1.png", b"first").unwrap();
        store.save("user_1.png", b"second").unwrap();

        let path = store.root().join("user_1.png");
        assert_eq!(std::fs::read(path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path()).unwrap();

        store.save("user_1.jpg", b"x").unwrap();
        store.delete("user_1.jpg").unwrap();
        store.delete("user_1.jpg").unwrap();

        assert!(!dir.path().join("user_1.jpg").exists());
    }

    #[test]
    fn names_cannot_leave_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path()).unwrap();

        for name in ["../evil.png", "a/b.png", ".hidden", ""] {
            assert!(
                matches!(store.save(name, b"x"), Err(Error::Validation(_))),
                "{}",
                name
            );
        }
    }
}
