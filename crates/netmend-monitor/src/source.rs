//! Where the device list comes from.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use netmend_core::{ConfigResult, NetmendConfig};

/// Supplies the configuration re-read at the start of every cycle.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> ConfigResult<NetmendConfig>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// Reads a TOML file on every load.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> ConfigResult<NetmendConfig> {
        NetmendConfig::from_file(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An in-memory configuration that can be swapped at runtime.
pub struct StaticConfigSource {
    config: RwLock<NetmendConfig>,
}

impl StaticConfigSource {
    pub fn new(config: NetmendConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn replace(&self, config: NetmendConfig) {
        *self.config.write() = config;
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> ConfigResult<NetmendConfig> {
        Ok(self.config.read().clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_rereads_on_every_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netmend.toml");
        std::fs::write(
            &path,
            "[[labs]]\nid = \"lab_1\"\nname = \"Lab 1\"\n[[labs.devices]]\nip = \"10.0.0.1\"\nlabel = \"pc1\"\n",
        )
        .unwrap();

        let source = FileConfigSource::new(&path);
        assert_eq!(source.load().unwrap().devices().devices.len(), 1);

        std::fs::write(&path, "not = [valid").unwrap();
        assert!(source.load().is_err());
        assert_eq!(source.describe(), path.display().to_string());
    }
}
