//! Named blob storage for the engine's persisted artefacts.
//!
//! Bus configs, presets and LED profiles all live as CBOR files under one
//! data directory. Access goes through a process-wide shared/exclusive
//! lock: readers take it shared, writers exclusive, matching the flash
//! filesystem on the target where concurrent writes are unsafe.
//!
//! Writes are atomic: the new content goes to a temporary file which is
//! synced and renamed into place; any error removes the partial file so a
//! half-written artefact is never observed.

pub mod cbor;
pub mod names;
pub mod outcome;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, error, info};

pub use outcome::Outcome;

pub struct FileStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Read a file's full contents. `Ok(None)` when it does not exist.
    pub fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let _shared = self.lock.read().expect("file lock poisoned");

        match fs::read(self.path(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!(target: "fs", file = name, error = %e, "read failed");
                Err(e)
            }
        }
    }

    /// Atomically replace `name` with `bytes`.
    pub fn write(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let _exclusive = self.lock.write().expect("file lock poisoned");

        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path(&format!("{name}.tmp"));
        let result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, &path)
        })();

        match result {
            Ok(()) => {
                debug!(target: "fs", file = name, bytes = bytes.len(), "written");
                Ok(())
            }
            Err(e) => {
                error!(target: "fs", file = name, error = %e, "write failed, removing partial file");
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        let _shared = self.lock.read().expect("file lock poisoned");
        self.path(name).exists()
    }

    /// Remove a file; `Ok(false)` when it did not exist.
    pub fn remove(&self, name: &str) -> io::Result<bool> {
        let _exclusive = self.lock.write().expect("file lock poisoned");

        match fs::remove_file(self.path(name)) {
            Ok(()) => {
                info!(target: "fs", file = name, "removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Rename `from` to `to`, replacing any existing file at `to`.
    /// Returns whether a file at `to` was replaced.
    pub fn rename(&self, from: &str, to: &str) -> io::Result<bool> {
        let _exclusive = self.lock.write().expect("file lock poisoned");

        let from_path = self.path(from);
        let to_path = self.path(to);

        if !from_path.exists() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "rename source missing"));
        }

        let replaced = to_path.exists();
        if replaced {
            info!(target: "fs", file = to, "removing before rename");
            fs::remove_file(&to_path)?;
        }

        info!(target: "fs", from = from, to = to, "renamed");
        fs::rename(&from_path, &to_path)?;
        Ok(replaced)
    }

    /// List file stems under `dir` with extension `ext` (leading dot
    /// included), restricted to safe names, sorted.
    pub fn list(&self, dir: &str, ext: &str) -> io::Result<Vec<String>> {
        let _shared = self.lock.read().expect("file lock poisoned");

        let mut names = Vec::new();
        let entries = match fs::read_dir(self.path(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(stem) = file_name.strip_suffix(ext)
                && names::allowed_file_name(stem)
            {
                names.push(stem.to_owned());
            }
        }

        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileStore::new(dir.path().join("data")).unwrap();
        (dir, fs)
    }

    #[test]
    fn read_missing_is_none() {
        let (_dir, fs) = store();
        assert_eq!(fs.read("buses/strip.cbor").unwrap(), None);
    }

    #[test]
    fn write_read_round_trip() {
        let (_dir, fs) = store();
        fs.write("presets/glow.cbor", b"payload").unwrap();
        assert_eq!(fs.read("presets/glow.cbor").unwrap().as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn write_leaves_no_temporary_file() {
        let (_dir, fs) = store();
        fs.write("presets/glow.cbor", b"payload").unwrap();
        assert!(!fs.exists("presets/glow.cbor.tmp"));
    }

    #[test]
    fn remove_reports_existence() {
        let (_dir, fs) = store();
        fs.write("a.cbor", b"x").unwrap();
        assert!(fs.remove("a.cbor").unwrap());
        assert!(!fs.remove("a.cbor").unwrap());
    }

    #[test]
    fn rename_replaces_destination() {
        let (_dir, fs) = store();
        fs.write("presets/a.cbor", b"a").unwrap();
        fs.write("presets/b.cbor", b"b").unwrap();

        assert!(fs.rename("presets/a.cbor", "presets/b.cbor").unwrap());
        assert!(!fs.exists("presets/a.cbor"));
        assert_eq!(fs.read("presets/b.cbor").unwrap().as_deref(), Some(&b"a"[..]));
    }

    #[test]
    fn rename_missing_source_fails() {
        let (_dir, fs) = store();
        let err = fs.rename("presets/nope.cbor", "presets/other.cbor").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn list_filters_extension_and_sorts() {
        let (_dir, fs) = store();
        fs.write("presets/zebra.cbor", b"").unwrap();
        fs.write("presets/alpha.cbor", b"").unwrap();
        fs.write("presets/readme.txt", b"").unwrap();

        assert_eq!(fs.list("presets", ".cbor").unwrap(), vec!["alpha", "zebra"]);
        assert_eq!(fs.list("missing-dir", ".cbor").unwrap(), Vec::<String>::new());
    }
}
