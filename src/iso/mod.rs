//! ISO image management
//!
//! List, upload, download and delete installation images on the node's
//! ISO-capable storages.

pub mod download;
pub mod progress;

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;

use crate::commands::pvesm;
use crate::config::{ConfigKey, ConfigStore};
use crate::node::NodeInventory;

pub use progress::{TransferProgress, TransferProgressTracker};

/// An image stored on the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoImage {
    pub volid: String,
    pub filename: String,
    pub size: u64,
    pub storage: String,
}

impl IsoImage {
    pub fn from_volid(volid: &str, size: u64) -> Self {
        let (storage, path) = volid.split_once(':').unwrap_or(("", volid));
        let filename = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            volid: volid.to_string(),
            filename,
            size,
            storage: storage.to_string(),
        }
    }
}

/// Storage chosen for an upload or download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStorage {
    pub name: String,
    /// The choice was discovered and persisted as the new `isoStorage` default
    pub saved_as_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(IsoImage),
    NotFound,
}

/// Volume id an ISO named `filename` gets on `storage`
pub fn iso_volid(storage: &str, filename: &str) -> String {
    format!("{}:iso/{}", storage, filename)
}

/// First image matching by exact volid, exact filename or case-insensitive filename.
///
/// Ties are not broken beyond listing order, so two images with the same
/// filename on different storages resolve to whichever is listed first.
pub fn find_image<'a>(images: &'a [IsoImage], query: &str) -> Option<&'a IsoImage> {
    images.iter().find(|i| {
        i.filename == query || i.volid == query || i.filename.eq_ignore_ascii_case(query)
    })
}

pub struct ImageManager {
    inventory: NodeInventory,
    store: ConfigStore,
}

impl ImageManager {
    pub fn new(inventory: NodeInventory, store: ConfigStore) -> Self {
        Self { inventory, store }
    }

    /// Images on every ISO-capable storage, de-duplicated by volume id
    pub fn list(&self) -> Vec<IsoImage> {
        let mut seen = HashSet::new();
        let mut images = Vec::new();

        for pool in self.inventory.iso_storages() {
            for (volid, size) in self.inventory.iso_volumes(&pool.name) {
                if seen.insert(volid.clone()) {
                    images.push(IsoImage::from_volid(&volid, size));
                }
            }
        }
        images
    }

    /// Images on one storage
    pub fn list_storage(&self, storage: &str) -> Vec<IsoImage> {
        self.inventory
            .iso_volumes(storage)
            .into_iter()
            .map(|(volid, size)| IsoImage::from_volid(&volid, size))
            .collect()
    }

    /// Pick the storage for a new image: explicit, else the configured
    /// `isoStorage`, else the first ISO-capable storage (persisted as the new
    /// default when preference saving is on).
    pub fn resolve_target_storage(&self, explicit: Option<&str>) -> Result<TargetStorage> {
        if let Some(name) = explicit {
            return Ok(TargetStorage {
                name: name.to_string(),
                saved_as_default: false,
            });
        }

        if let Some(name) = self.store.resolve_defaults(None).iso_storage {
            return Ok(TargetStorage {
                name,
                saved_as_default: false,
            });
        }

        let Some(first) = self.inventory.iso_storages().into_iter().next() else {
            bail!("No ISO-capable storage found");
        };

        let mut saved_as_default = false;
        if self.store.should_save_preferences() {
            self.store
                .set_default(ConfigKey::IsoStorage, &first.name)
                .context("Failed to save default ISO storage")?;
            saved_as_default = true;
            tracing::info!(storage = %first.name, "saved default ISO storage");
        }

        Ok(TargetStorage {
            name: first.name,
            saved_as_default,
        })
    }

    /// Local path an ISO will occupy on `storage`; fails if it already exists
    fn target_path(&self, storage: &str, filename: &str) -> Result<(String, std::path::PathBuf)> {
        let volid = iso_volid(storage, filename);
        let path = pvesm::path(self.inventory.runner().as_ref(), &volid)?;
        if path.exists() {
            bail!("{} already exists", volid);
        }
        Ok((volid, path))
    }

    /// Copy a local file into `storage`; returns the new volume id
    pub fn upload(&self, file: &Path, storage: &str) -> Result<String> {
        if !file.is_file() {
            bail!("File not found: {}", file.display());
        }
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid file name: {:?}", file))?;

        let (volid, dest) = self.target_path(storage, filename)?;
        tracing::info!(src = %file.display(), %volid, "uploading ISO");

        std::fs::copy(file, &dest)
            .with_context(|| format!("Failed to copy {} to {:?}", file.display(), dest))?;
        Ok(volid)
    }

    /// Download `url` into `storage`, feeding progress samples to `on_progress`
    pub fn download<F>(
        &self,
        url: &str,
        storage: &str,
        filename: Option<&str>,
        mut on_progress: F,
    ) -> Result<String>
    where
        F: FnMut(&TransferProgress),
    {
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| download::filename_from_url(url));
        let (volid, dest) = self.target_path(storage, &filename)?;

        let mut tracker = TransferProgressTracker::new();
        download::download_to(url, &dest, |downloaded, total, elapsed| {
            on_progress(tracker.record(downloaded, total, elapsed));
        })?;
        Ok(volid)
    }

    /// Delete the first image matching `query` (see [`find_image`])
    pub fn delete(&self, query: &str) -> Result<DeleteOutcome> {
        let images = self.list();
        let Some(image) = find_image(&images, query).cloned() else {
            return Ok(DeleteOutcome::NotFound);
        };

        tracing::info!(volid = %image.volid, "deleting ISO");
        pvesm::free(self.inventory.runner().as_ref(), &image.volid)?;
        Ok(DeleteOutcome::Deleted(image))
    }
}
