//! Persistent defaults and packages
//!
//! The whole configuration lives in one YAML file. Reads never fail: a
//! missing or malformed file yields an empty [`Config`]. Writes go through
//! [`ConfigStore::update`], which reads the whole file, applies one mutation
//! and writes the whole file back.

mod resolve;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Per-field VM preferences shared by `defaults` and every package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_storage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,
    /// Memory in MB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    /// Disk size in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl Preferences {
    /// Value of one preference key as text; `None` for unset and non-preference keys
    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::IsoStorage => self.iso_storage.clone(),
            ConfigKey::VmStorage => self.vm_storage.clone(),
            ConfigKey::Bridge => self.bridge.clone(),
            ConfigKey::Cores => self.cores.map(|v| v.to_string()),
            ConfigKey::Memory => self.memory.map(|v| v.to_string()),
            ConfigKey::Disk => self.disk.map(|v| v.to_string()),
            ConfigKey::Node => self.node.clone(),
            ConfigKey::Package | ConfigKey::SavePreferences => None,
        }
    }

    /// Set preference keys in display order
    pub fn entries(&self) -> Vec<(ConfigKey, String)> {
        ConfigKey::ALL
            .into_iter()
            .filter_map(|k| self.get(k).map(|v| (k, v)))
            .collect()
    }
}

/// A named, reusable preset
pub type Package = Preferences;

/// The `defaults` section: global preferences plus the default package name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(flatten)]
    pub values: Preferences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
}

impl Defaults {
    pub fn is_empty(&self) -> bool {
        self == &Defaults::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPrefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_preferences: Option<bool>,
}

impl UiPrefs {
    pub fn is_empty(&self) -> bool {
        self.save_preferences.is_none()
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Defaults::is_empty")]
    pub defaults: Defaults,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, Package>,
    #[serde(default, skip_serializing_if = "UiPrefs::is_empty")]
    pub ui: UiPrefs,
}

impl Config {
    /// Whether wizard steps may persist freshly discovered defaults (default: yes)
    pub fn save_preferences(&self) -> bool {
        self.ui.save_preferences != Some(false)
    }

    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::Package => self.defaults.package.clone(),
            ConfigKey::SavePreferences => self.ui.save_preferences.map(|v| v.to_string()),
            _ => self.defaults.values.get(key),
        }
    }

    /// Set (`Some`) or clear (`None`) one key, parsing numeric and boolean values
    pub fn set(&mut self, key: ConfigKey, value: Option<&str>) -> Result<()> {
        let text = value.map(str::to_string);
        let d = &mut self.defaults.values;
        match key {
            ConfigKey::IsoStorage => d.iso_storage = text,
            ConfigKey::VmStorage => d.vm_storage = text,
            ConfigKey::Bridge => d.bridge = text,
            ConfigKey::Node => d.node = text,
            ConfigKey::Package => self.defaults.package = text,
            ConfigKey::Cores => d.cores = parse_number(key, value)?,
            ConfigKey::Memory => d.memory = parse_number(key, value)?,
            ConfigKey::Disk => d.disk = parse_number(key, value)?,
            ConfigKey::SavePreferences => {
                self.ui.save_preferences = value
                    .map(|v| {
                        v.parse::<bool>()
                            .map_err(|_| anyhow!("{} must be true or false, got {:?}", key, v))
                    })
                    .transpose()?;
            }
        }
        Ok(())
    }
}

/// Numeric keys take the same values the wizard accepts for the field
fn parse_number(key: ConfigKey, value: Option<&str>) -> Result<Option<u32>> {
    use crate::vm::spec;

    let (parse, min, max): (fn(&str) -> Option<u32>, u32, u32) = match key {
        ConfigKey::Memory => (spec::parse_memory, spec::MIN_MEMORY_MB, spec::MAX_MEMORY_MB),
        ConfigKey::Disk => (spec::parse_disk_size, 1, spec::MAX_DISK_GB),
        _ => (spec::parse_cores, 1, spec::MAX_CORES),
    };
    value
        .map(|v| {
            parse(v).ok_or_else(|| {
                anyhow!(
                    "{} must be a whole number between {} and {}, got {:?}",
                    key,
                    min,
                    max,
                    v
                )
            })
        })
        .transpose()
}

/// Keys addressable by `config set/unset` and the field-level helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    IsoStorage,
    VmStorage,
    Bridge,
    Cores,
    Memory,
    Disk,
    Node,
    Package,
    SavePreferences,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 9] = [
        ConfigKey::IsoStorage,
        ConfigKey::VmStorage,
        ConfigKey::Bridge,
        ConfigKey::Cores,
        ConfigKey::Memory,
        ConfigKey::Disk,
        ConfigKey::Node,
        ConfigKey::Package,
        ConfigKey::SavePreferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::IsoStorage => "isoStorage",
            ConfigKey::VmStorage => "vmStorage",
            ConfigKey::Bridge => "bridge",
            ConfigKey::Cores => "cores",
            ConfigKey::Memory => "memory",
            ConfigKey::Disk => "disk",
            ConfigKey::Node => "node",
            ConfigKey::Package => "package",
            ConfigKey::SavePreferences => "savePreferences",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ConfigKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<_> = ConfigKey::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown key '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Old single-field format kept only for one-time migration
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyConfig {
    #[serde(default)]
    iso_storage: Option<String>,
}

#[derive(Debug, Clone)]
enum Backend {
    File { path: PathBuf, legacy_path: PathBuf },
    /// Holds the serialized file contents, so reads and writes behave like the file backend
    #[cfg(test)]
    Memory(Arc<Mutex<Option<String>>>),
}

/// Handle to the persisted configuration, passed explicitly to every component
#[derive(Debug, Clone)]
pub struct ConfigStore {
    backend: Backend,
}

impl ConfigStore {
    /// Store at the standard per-user locations
    pub fn default_paths() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        Self::at(
            base.join("pxc").join("config.yaml"),
            base.join("pve-cli").join("config.json"),
        )
    }

    pub fn at(path: impl Into<PathBuf>, legacy_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File {
                path: path.into(),
                legacy_path: legacy_path.into(),
            },
        }
    }

    /// Store with no filesystem behind it
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(None))),
        }
    }

    /// Location of the config file, for display
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File { path, .. } => Some(path),
            #[cfg(test)]
            Backend::Memory(_) => None,
        }
    }

    /// Load the configuration, migrating the legacy file on first use.
    ///
    /// Never fails; any read or parse problem yields an empty config.
    pub fn load(&self) -> Config {
        match self.read_current() {
            Ok(Some(config)) => config,
            Ok(None) => self.migrate_legacy().unwrap_or_default(),
            Err(e) => {
                tracing::warn!("ignoring unreadable config: {:#}", e);
                Config::default()
            }
        }
    }

    fn read_current(&self) -> Result<Option<Config>> {
        let content = match &self.backend {
            Backend::File { path, .. } => {
                if !path.exists() {
                    return Ok(None);
                }
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?
            }
            #[cfg(test)]
            Backend::Memory(cell) => match cell.lock() {
                Ok(guard) => match guard.as_ref() {
                    Some(content) => content.clone(),
                    None => return Ok(None),
                },
                Err(_) => return Ok(None),
            },
        };

        if content.trim().is_empty() {
            return Ok(Some(Config::default()));
        }
        let config = serde_yaml::from_str(&content).context("Failed to parse config")?;
        Ok(Some(config))
    }

    fn migrate_legacy(&self) -> Option<Config> {
        let legacy_path = match &self.backend {
            Backend::File { legacy_path, .. } => legacy_path,
            #[cfg(test)]
            Backend::Memory(_) => return None,
        };
        if !legacy_path.exists() {
            return None;
        }

        let legacy: LegacyConfig = match std::fs::read_to_string(legacy_path)
            .map_err(anyhow::Error::from)
            .and_then(|c| serde_json::from_str(&c).map_err(anyhow::Error::from))
        {
            Ok(legacy) => legacy,
            Err(e) => {
                tracing::warn!("ignoring unreadable legacy config {:?}: {:#}", legacy_path, e);
                return None;
            }
        };

        let mut config = Config::default();
        config.defaults.values.iso_storage = legacy.iso_storage;
        config.ui.save_preferences = Some(true);

        if let Err(e) = self.save(&config) {
            tracing::warn!("failed to persist migrated config: {:#}", e);
        } else {
            tracing::info!("migrated legacy config from {:?}", legacy_path);
        }
        Some(config)
    }

    /// Save the full configuration, creating the directory if needed
    pub fn save(&self, config: &Config) -> Result<()> {
        let content = serde_yaml::to_string(config).context("Failed to serialize config")?;

        match &self.backend {
            Backend::File { path, .. } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create config directory {:?}", parent)
                    })?;
                }
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write config to {:?}", path))?;
            }
            #[cfg(test)]
            Backend::Memory(cell) => {
                let mut guard = cell
                    .lock()
                    .map_err(|_| anyhow!("in-memory config poisoned"))?;
                *guard = Some(content);
            }
        }
        Ok(())
    }

    /// Read-modify-write the whole configuration.
    ///
    /// This is the only write path. It does not lock across processes, so
    /// two concurrent invocations can lose an update (last writer wins).
    pub fn update<T>(&self, f: impl FnOnce(&mut Config) -> Result<T>) -> Result<T> {
        let mut config = self.load();
        let out = f(&mut config)?;
        self.save(&config)?;
        Ok(out)
    }

    pub fn get_default(&self, key: ConfigKey) -> Option<String> {
        self.load().get(key)
    }

    pub fn set_default(&self, key: ConfigKey, value: &str) -> Result<()> {
        self.update(|config| config.set(key, Some(value)))
    }

    pub fn unset_default(&self, key: ConfigKey) -> Result<()> {
        self.update(|config| config.set(key, None))
    }

    pub fn should_save_preferences(&self) -> bool {
        self.load().save_preferences()
    }

    pub fn package(&self, name: &str) -> Option<Package> {
        self.load().packages.get(name).cloned()
    }

    pub fn set_package(&self, name: &str, package: Package) -> Result<()> {
        self.update(|config| {
            config.packages.insert(name.to_string(), package);
            Ok(())
        })
    }

    /// Remove a package; returns whether it existed
    pub fn delete_package(&self, name: &str) -> Result<bool> {
        self.update(|config| Ok(config.packages.remove(name).is_some()))
    }

    /// Merge global defaults with a package (explicit name, else the configured default package)
    pub fn resolve_defaults(&self, package: Option<&str>) -> Preferences {
        self.load().resolve(package)
    }
}
