//! Save directory layout and the per-save descriptor.
//!
//! ```text
//! <root>/<name>.json        descriptor: { name, mods, settings }
//! <root>/<name>/chunks/     one file per chunk (see `world::chunk`)
//! <root>/<name>/inventory/  inventory files (owned by the inventory layer)
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::world::referrer::BlockReferrer;

const CHUNK_DIR: &str = "chunks";
const INVENTORY_DIR: &str = "inventory";

/// Contents of `<root>/<name>.json`. `name` and `mods` are mandatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveDescriptor {
    pub name: String,
    /// Mod namespaces whose block ids this save's chunks refer to.
    pub mods: Vec<String>,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl SaveDescriptor {
    pub fn new(name: impl Into<String>, mods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            mods: mods.into_iter().map(Into::into).collect(),
            settings: serde_json::Map::new(),
        }
    }
}

/// An opened save.
#[derive(Debug, Clone)]
pub struct SaveDir {
    root: PathBuf,
    descriptor: SaveDescriptor,
}

impl SaveDir {
    /// Create a new save (directories and descriptor), overwriting any
    /// existing descriptor of the same name.
    pub fn create(root: impl Into<PathBuf>, descriptor: SaveDescriptor) -> Result<Self> {
        if descriptor.name.trim().is_empty() {
            bail!("save name must not be empty");
        }
        let save = Self {
            root: root.into(),
            descriptor,
        };
        for dir in [save.chunk_dir(), save.dir().join(INVENTORY_DIR)] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating save directory {}", dir.display()))?;
        }
        save.write_descriptor()?;
        tracing::info!("Created save '{}' in {}", save.descriptor.name, save.root.display());
        Ok(save)
    }

    /// Open an existing save. A missing or malformed descriptor is an error.
    pub fn open(root: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let root = root.into();
        let path = descriptor_path(&root, name);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading save descriptor {}", path.display()))?;
        let descriptor: SaveDescriptor = serde_json::from_str(&text)
            .with_context(|| format!("corrupt save descriptor {}", path.display()))?;
        if descriptor.name != name {
            bail!(
                "save descriptor {} names save '{}', expected '{}'",
                path.display(),
                descriptor.name,
                name
            );
        }
        tracing::info!(
            "Opened save '{}' (mods: {})",
            descriptor.name,
            descriptor.mods.join(", ")
        );
        Ok(Self { root, descriptor })
    }

    /// Open `name` if its descriptor exists, otherwise create it requiring `mods`.
    pub fn open_or_create<'a>(
        root: impl Into<PathBuf>,
        name: &str,
        mods: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        let root = root.into();
        match fs::metadata(descriptor_path(&root, name)) {
            Ok(_) => Self::open(root, name),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Self::create(root, SaveDescriptor::new(name, mods))
            }
            Err(e) => Err(e).context("checking for save descriptor"),
        }
    }

    /// Fail unless every mod this save requires has registered blocks.
    pub fn check_mods(&self, referrer: &BlockReferrer) -> Result<()> {
        let loaded: BTreeSet<&str> = referrer.namespaces();
        let missing: Vec<&str> = self
            .descriptor
            .mods
            .iter()
            .map(String::as_str)
            .filter(|m| !loaded.contains(m))
            .collect();
        if !missing.is_empty() {
            bail!(
                "save '{}' requires mods that are not loaded: {}",
                self.descriptor.name,
                missing.join(", ")
            );
        }
        Ok(())
    }

    pub fn write_descriptor(&self) -> Result<()> {
        let path = self.descriptor_path();
        let text = serde_json::to_string_pretty(&self.descriptor)
            .context("serializing save descriptor")?;
        fs::write(&path, text)
            .with_context(|| format!("writing save descriptor {}", path.display()))
    }

    pub fn descriptor(&self) -> &SaveDescriptor {
        &self.descriptor
    }

    pub fn settings_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
        &mut self.descriptor.settings
    }

    pub fn descriptor_path(&self) -> PathBuf {
        descriptor_path(&self.root, &self.descriptor.name)
    }

    /// Per-save subdirectory.
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.descriptor.name)
    }

    pub fn chunk_dir(&self) -> PathBuf {
        self.dir().join(CHUNK_DIR)
    }
}

fn descriptor_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.json"))
}
