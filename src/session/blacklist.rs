use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::store::{read_json, write_json_atomic};

const BLACKLIST_FILE: &str = "blacklist.json";

/// Plugin paths that were mid-load when the application last died.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Blacklist {
    pub paths: BTreeSet<String>,
    #[serde(skip)]
    file_path: PathBuf,
}

impl Blacklist {
    /// Load from `<data_dir>/blacklist.json`; unreadable files start empty.
    pub fn open(data_dir: &Path) -> Self {
        let file_path = data_dir.join(BLACKLIST_FILE);
        let mut list = match read_json::<Blacklist>(&file_path) {
            Ok(Some(list)) => list,
            Ok(None) => Blacklist::default(),
            Err(e) => {
                log::error!("Failed to read blacklist: {}", e);
                Blacklist::default()
            }
        };
        list.file_path = file_path;
        list
    }

    fn save(&self) {
        if let Err(e) = write_json_atomic(&self.file_path, self) {
            log::error!("Failed to save blacklist: {}", e);
        }
    }

    pub fn add(&mut self, path: &str) {
        if self.paths.insert(path.to_string()) {
            log::warn!("Blacklisting plugin: {}", path);
            self.save();
        }
    }

    pub fn remove(&mut self, path: &str) -> bool {
        let removed = self.paths.remove(path);
        if removed {
            log::info!("Removing plugin from blacklist: {}", path);
            self.save();
        }
        removed
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn clear(&mut self) {
        self.paths.clear();
        self.save();
        log::info!("Blacklist cleared.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_blacklist_persists() {
        let dir = TempDir::new().unwrap();
        {
            let mut list = Blacklist::open(dir.path());
            list.add("bad.vst3");
            list.add("bad.vst3");
            assert!(list.contains("bad.vst3"));
        }

        let mut reopened = Blacklist::open(dir.path());
        assert!(reopened.contains("bad.vst3"));
        assert_eq!(reopened.paths.len(), 1);

        assert!(reopened.remove("bad.vst3"));
        assert!(!reopened.remove("bad.vst3"));
        assert!(!Blacklist::open(dir.path()).contains("bad.vst3"));
    }

    #[test]
    fn test_corrupt_blacklist_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(BLACKLIST_FILE), "[1,2").unwrap();
        let list = Blacklist::open(dir.path());
        assert!(list.paths.is_empty());
    }
}
