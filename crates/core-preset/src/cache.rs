//! Preset description cache.
//!
//! Listing presets in the shell shows each one's description; reading
//! every file for that would hammer the filesystem, so the engine keeps
//! a name → description map, refreshed from disk at startup and updated
//! on every save, rename and remove.

use std::collections::BTreeMap;
use std::sync::Mutex;

use minicbor::Decoder;
use tracing::debug;

use core_fs::{FileStore, cbor};

use crate::{DIRECTORY_NAME, FILENAME_EXT, MAX_DESCRIPTION_LENGTH};

#[derive(Default)]
pub struct DescriptionCache {
    map: Mutex<BTreeMap<String, String>>,
}

impl DescriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, description: &str) {
        self.map
            .lock()
            .expect("description cache poisoned")
            .insert(name.to_owned(), description.to_owned());
    }

    pub fn remove(&self, name: &str) {
        self.map.lock().expect("description cache poisoned").remove(name);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.map.lock().expect("description cache poisoned").get(name).cloned()
    }

    /// All known `(name, description)` pairs, sorted by name.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.map
            .lock()
            .expect("description cache poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Rebuild the cache from the stored preset files.
    pub fn refresh(&self, fs: &FileStore) {
        let mut map = BTreeMap::new();

        for name in fs.list(DIRECTORY_NAME, FILENAME_EXT).unwrap_or_default() {
            let filename = format!("{DIRECTORY_NAME}/{name}{FILENAME_EXT}");
            match fs.read(&filename) {
                Ok(Some(bytes)) => {
                    if let Some(description) = read_description(&bytes) {
                        map.insert(name, description);
                    } else {
                        debug!(target: "preset", file = filename.as_str(), "no readable description");
                    }
                }
                _ => {
                    debug!(target: "preset", file = filename.as_str(), "unreadable preset file");
                }
            }
        }

        *self.map.lock().expect("description cache poisoned") = map;
    }
}

/// Pull just the `desc` entry out of a preset file.
fn read_description(bytes: &[u8]) -> Option<String> {
    let mut dec = Decoder::new(bytes);
    cbor::expect_self_describe(&mut dec).ok()?;
    let entries = cbor::expect_definite_map(&mut dec).ok()?;

    for _ in 0..entries {
        let key = cbor::read_text(&mut dec).ok()?;
        if key == "desc" {
            let mut description = cbor::read_text(&mut dec).ok()?;
            description.truncate(MAX_DESCRIPTION_LENGTH);
            return Some(description);
        }
        dec.skip().ok()?;
    }

    Some(String::new())
}
