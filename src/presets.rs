//! Named presets and chain templates

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::session::snapshot::SnapshotEntry;
use crate::session::store::{read_json, remove_if_exists, write_json_atomic};

/// A saved chain, by user-chosen name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub plugins: Vec<SnapshotEntry>,
}

/// A starting-point chain shipped with or dropped into the templates folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub plugins: Vec<SnapshotEntry>,
}

/// Durable named presets
pub trait PresetStore: Send + Sync {
    fn list(&self) -> Result<Vec<String>, StorageError>;
    fn save(&self, preset: &Preset) -> Result<(), StorageError>;
    fn load(&self, name: &str) -> Result<Preset, StorageError>;
    fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Write the preset to an arbitrary file, e.g. for sharing.
    fn export(&self, name: &str, destination: &Path) -> Result<(), StorageError> {
        let preset = self.load(name)?;
        write_json_atomic(destination, &preset)
    }

    /// Read a preset file and store it under its own name.
    fn import(&self, source: &Path) -> Result<String, StorageError> {
        let preset: Preset = read_json(source)?.ok_or_else(|| {
            StorageError::read_file(
                source,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            )
        })?;
        self.save(&preset)?;
        Ok(preset.name)
    }
}

/// One `<name>.json` file per preset
pub struct FilePresetStore {
    dir: PathBuf,
}

impl FilePresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

/// Names become file names; keep them inside the presets folder.
fn validate_name(name: &str) -> Result<(), StorageError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.contains(['/', '\\', ':'])
        || name.starts_with('.')
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Sorted stems of the `*.json` files in `dir`.
fn json_stems(dir: &Path) -> Result<Vec<String>, StorageError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| StorageError::read_file(dir, e))?;
    let mut names: Vec<String> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    names.sort();
    Ok(names)
}

impl PresetStore for FilePresetStore {
    fn list(&self) -> Result<Vec<String>, StorageError> {
        json_stems(&self.dir)
    }

    fn save(&self, preset: &Preset) -> Result<(), StorageError> {
        let file = self.file_for(&preset.name)?;
        write_json_atomic(&file, preset)?;
        log::info!("Saved preset '{}' ({} plugins)", preset.name, preset.plugins.len());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Preset, StorageError> {
        let file = self.file_for(name)?;
        read_json(&file)?.ok_or_else(|| StorageError::PresetNotFound(name.to_string()))
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        let file = self.file_for(name)?;
        remove_if_exists(&file)?;
        log::info!("Deleted preset '{}'", name);
        Ok(())
    }
}

/// Read-only folder of `*.json` chain templates
pub struct TemplateLibrary {
    dir: PathBuf,
}

impl TemplateLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        json_stems(&self.dir)
    }

    /// Every template that parses; broken files are logged and left out.
    pub fn all(&self) -> Result<Vec<ChainTemplate>, StorageError> {
        let mut templates = Vec::new();
        for stem in self.list()? {
            let path = self.dir.join(format!("{}.json", stem));
            match read_json::<ChainTemplate>(&path) {
                Ok(Some(t)) => templates.push(t),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping template {}: {}", stem, e),
            }
        }
        Ok(templates)
    }

    pub fn get(&self, name: &str) -> Result<ChainTemplate, StorageError> {
        validate_name(name)?;
        read_json(&self.dir.join(format!("{}.json", name)))?
            .ok_or_else(|| StorageError::PresetNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::PluginDescriptor;
    use tempfile::TempDir;

    fn preset(name: &str) -> Preset {
        Preset {
            name: name.to_string(),
            plugins: vec![
                SnapshotEntry::from_descriptor(&PluginDescriptor::new("eq.vst3", "EQ")),
                SnapshotEntry::from_descriptor(&PluginDescriptor::new("comp.vst3", "Comp")),
            ],
        }
    }

    #[test]
    fn test_save_list_load_delete() {
        let dir = TempDir::new().unwrap();
        let store = FilePresetStore::new(dir.path().join("presets"));

        assert!(store.list().unwrap().is_empty());
        store.save(&preset("vocal")).unwrap();
        store.save(&preset("bass")).unwrap();
        assert_eq!(store.list().unwrap(), vec!["bass", "vocal"]);
        assert_eq!(store.load("vocal").unwrap(), preset("vocal"));

        store.delete("vocal").unwrap();
        assert_eq!(store.list().unwrap(), vec!["bass"]);
        assert!(matches!(
            store.load("vocal"),
            Err(StorageError::PresetNotFound(_))
        ));
        // Deleting twice is fine
        store.delete("vocal").unwrap();
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let store = FilePresetStore::new(dir.path());
        assert!(matches!(
            store.save(&preset("../escape")),
            Err(StorageError::InvalidName(_))
        ));
        assert!(store.load("").is_err());
        assert!(store.delete(" padded").is_err());
    }

    #[test]
    fn test_export_then_import_elsewhere() {
        let dir = TempDir::new().unwrap();
        let a = FilePresetStore::new(dir.path().join("a"));
        let b = FilePresetStore::new(dir.path().join("b"));
        a.save(&preset("live")).unwrap();

        let file = dir.path().join("live.fxchain-preset.json");
        a.export("live", &file).unwrap();
        let name = b.import(&file).unwrap();
        assert_eq!(name, "live");
        assert_eq!(b.load("live").unwrap(), preset("live"));

        assert!(b.import(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_template_library_skips_broken_files() {
        let dir = TempDir::new().unwrap();
        let template = ChainTemplate {
            name: "Podcast".into(),
            description: Some("Gate, EQ, compressor".into()),
            plugins: preset("x").plugins,
        };
        fs::write(
            dir.path().join("podcast.json"),
            serde_json::to_string(&template).unwrap(),
        )
        .unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();

        let library = TemplateLibrary::new(dir.path());
        assert_eq!(library.list().unwrap(), vec!["broken", "podcast"]);
        assert_eq!(library.all().unwrap(), vec![template.clone()]);
        assert_eq!(library.get("podcast").unwrap(), template);
    }
}
