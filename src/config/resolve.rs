//! Defaults resolution: global defaults overridden field-by-field by a package

use super::{Config, Preferences};

impl Preferences {
    /// Fields set in `over` win; fields unset in `over` keep this value
    pub fn overridden_by(&self, over: &Preferences) -> Preferences {
        Preferences {
            iso_storage: over.iso_storage.clone().or_else(|| self.iso_storage.clone()),
            vm_storage: over.vm_storage.clone().or_else(|| self.vm_storage.clone()),
            bridge: over.bridge.clone().or_else(|| self.bridge.clone()),
            cores: over.cores.or(self.cores),
            memory: over.memory.or(self.memory),
            disk: over.disk.or(self.disk),
            node: over.node.clone().or_else(|| self.node.clone()),
        }
    }
}

impl Config {
    /// Resolve the effective preferences for `package`, or for the configured
    /// default package when none is given. An unknown package name resolves
    /// to the plain defaults.
    pub fn resolve(&self, package: Option<&str>) -> Preferences {
        let name = package.or(self.defaults.package.as_deref());
        let base = &self.defaults.values;

        match name {
            Some(name) => match self.packages.get(name) {
                Some(pkg) => base.overridden_by(pkg),
                None => {
                    tracing::warn!(package = name, "unknown package, using plain defaults");
                    base.clone()
                }
            },
            None => base.clone(),
        }
    }
}
