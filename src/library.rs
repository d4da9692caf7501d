//! On-disk catalog of reusable node snapshots.
//!
//! A [`Library`] is a directory under `<root>/Libraries/<name>/`. Its
//! `.library` manifest lists every entry's [`NodeInfo`]; each entry is a
//! package written by [`crate::archive`] at a path derived from the node's
//! kind and name:
//!
//! | item       | path                                  |
//! |------------|---------------------------------------|
//! | rack       | `racks/<name>.crack`                  |
//! | machine    | `machines/<machine type>/<name>.cmachine` |
//! | effect     | `effects/<name>.ceffect`              |
//! | pattern    | `patterns/<name>.cpattern`            |
//! | master     | `masters/<name>.cmaster`              |
//!
//! The library never holds live nodes. Adding a node stores a deep copy
//! made through the codec, and loading one returns a fresh, uninitialized
//! node.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::archive::{self, Package, PresetFile};
use crate::codec::{Codec, Tagged};
use crate::config::RuntimeConfig;
use crate::error::LibraryError;
use crate::node::{Node, NodeInfo, NodeKind};
use crate::state::{EffectNode, MachineNode, MasterNode, PatternNode, RackNode};

/// Library manifest file name.
pub const MANIFEST: &str = ".library";

// ═══════════════════════════════════════════════════════════════════
// Library items
// ═══════════════════════════════════════════════════════════════════

/// A node type that can be stored in a library.
pub trait LibraryItem: Node + Tagged {
    /// Package file extension, without the dot.
    const EXTENSION: &'static str;

    /// Directory under the library root, `/`-separated.
    fn folder(&self) -> String;

    /// Name the package file is derived from.
    fn item_name(&self) -> Option<String> {
        self.base().name().map(str::to_string)
    }

    /// Preset bytes to store beside the node, as `(extension, data)`.
    fn preset_file(&self) -> Option<(&'static str, &[u8])> {
        None
    }

    /// Take back preset bytes read from a package.
    fn restore_preset(&mut self, _data: Vec<u8>) {}
}

impl LibraryItem for RackNode {
    const EXTENSION: &'static str = "crack";

    fn folder(&self) -> String {
        "racks".into()
    }

    fn item_name(&self) -> Option<String> {
        self.name().map(str::to_string)
    }
}

impl LibraryItem for MachineNode {
    const EXTENSION: &'static str = "cmachine";

    fn folder(&self) -> String {
        format!("machines/{}", self.machine_type().engine_name())
    }

    fn preset_file(&self) -> Option<(&'static str, &[u8])> {
        let preset = self.preset();
        preset
            .has_data()
            .then(|| (self.machine_type().preset_extension(), preset.data()))
    }

    fn restore_preset(&mut self, data: Vec<u8>) {
        let name = self.preset().preset_name().map(str::to_string);
        self.preset_mut().set_local(name, data);
    }
}

impl LibraryItem for EffectNode {
    const EXTENSION: &'static str = "ceffect";

    fn folder(&self) -> String {
        "effects".into()
    }
}

impl LibraryItem for PatternNode {
    const EXTENSION: &'static str = "cpattern";

    fn folder(&self) -> String {
        "patterns".into()
    }
}

impl LibraryItem for MasterNode {
    const EXTENSION: &'static str = "cmaster";

    fn folder(&self) -> String {
        "masters".into()
    }
}

/// Keep names safe as file names on every platform.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".into()
    } else {
        cleaned
    }
}

/// Library-relative path of `node`'s package.
pub fn resolve_path<T: LibraryItem>(node: &T) -> Result<String, LibraryError> {
    let name = node
        .item_name()
        .filter(|n| !n.trim().is_empty())
        .ok_or(LibraryError::Unnamed(node.id()))?;
    Ok(format!("{}/{}.{}", node.folder(), sanitize(&name), T::EXTENSION))
}

// ═══════════════════════════════════════════════════════════════════
// Library
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    info: NodeInfo,
    entries: Vec<NodeInfo>,
}

pub struct Library {
    info: NodeInfo,
    directory: PathBuf,
    temp_root: PathBuf,
    codec: Codec,
    index: BTreeMap<NodeKind, BTreeMap<Uuid, NodeInfo>>,
}

impl Library {
    /// Create an empty library, or fail if one already exists there.
    pub fn create(config: &RuntimeConfig, name: &str, codec: Codec) -> Result<Self, LibraryError> {
        let directory = config.libraries_dir().join(sanitize(name));
        if directory.join(MANIFEST).exists() {
            return Err(LibraryError::IllegalState(format!(
                "library {} already exists",
                directory.display()
            )));
        }
        fs::create_dir_all(&directory)?;
        let library = Self {
            info: NodeInfo::new(NodeKind::Library, name),
            directory,
            temp_root: config.temp_dir(),
            codec,
            index: BTreeMap::new(),
        };
        library.write_manifest()?;
        log::info!("created library {}", library.directory.display());
        Ok(library)
    }

    /// Open an existing library.
    pub fn open(config: &RuntimeConfig, name: &str, codec: Codec) -> Result<Self, LibraryError> {
        let directory = config.libraries_dir().join(sanitize(name));
        let path = directory.join(MANIFEST);
        if !path.exists() {
            return Err(LibraryError::NotFound(path));
        }
        let manifest: Manifest =
            serde_json::from_slice(&fs::read(&path)?).map_err(|e| LibraryError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let mut index: BTreeMap<NodeKind, BTreeMap<Uuid, NodeInfo>> = BTreeMap::new();
        for entry in manifest.entries {
            index.entry(entry.kind).or_default().insert(entry.id, entry);
        }
        log::info!("opened library {}", directory.display());
        Ok(Self {
            info: manifest.info,
            directory,
            temp_root: config.temp_dir(),
            codec,
            index,
        })
    }

    /// Open the library, creating it if missing.
    pub fn open_or_create(config: &RuntimeConfig, name: &str, codec: Codec) -> Result<Self, LibraryError> {
        match Self::open(config, name, codec.clone()) {
            Err(LibraryError::NotFound(_)) => Self::create(config, name, codec),
            other => other,
        }
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name.as_deref().unwrap_or_default()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(MANIFEST)
    }

    pub fn len(&self) -> usize {
        self.index.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, node: &impl Node) -> bool {
        let info = node.info();
        self.index
            .get(&info.kind)
            .is_some_and(|entries| entries.contains_key(&info.id))
    }

    /// Entry by id.
    ///
    /// Scans every kind; fine for catalogs of hundreds of entries.
    pub fn get(&self, id: Uuid) -> Option<&NodeInfo> {
        self.index
            .values()
            .flat_map(BTreeMap::values)
            .find(|info| info.id == id)
    }

    pub fn find_all(&self, kind: NodeKind) -> Vec<&NodeInfo> {
        self.index
            .get(&kind)
            .map(|entries| entries.values().collect())
            .unwrap_or_default()
    }

    /// Every entry, grouped by kind.
    pub fn entries(&self) -> impl Iterator<Item = &NodeInfo> {
        self.index.values().flat_map(BTreeMap::values)
    }

    /// Store a deep copy of `node`.
    ///
    /// Returns `false` if the library already holds a node with this id.
    pub fn add<T: LibraryItem>(&mut self, node: &T) -> Result<bool, LibraryError> {
        if self.contains(node) {
            return Ok(false);
        }
        let path = resolve_path(node)?;
        if let Some(existing) = self
            .entries()
            .find(|e| e.relative_path.as_deref() == Some(path.as_str()))
        {
            return Err(LibraryError::PathConflict {
                path,
                existing: existing.id,
            });
        }

        let copy: T = self.codec.clone_via_roundtrip(node)?;
        let mut info = copy.info().with_path(path);
        info.name = copy.item_name();
        self.write_entry(&copy, &info)?;
        self.index
            .entry(info.kind)
            .or_default()
            .insert(info.id, info);
        self.write_manifest()?;
        Ok(true)
    }

    /// Delete `node`'s package and drop it from the index.
    ///
    /// Returns `false` if the library does not hold it. The index is only
    /// touched once the package file is gone.
    pub fn remove(&mut self, node: &impl Node) -> Result<bool, LibraryError> {
        let key = node.info();
        let Some(info) = self
            .index
            .get(&key.kind)
            .and_then(|entries| entries.get(&key.id))
        else {
            return Ok(false);
        };

        let path = self.archive_path(info)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if path.exists() {
            return Err(LibraryError::IllegalState(format!(
                "file not deleted: {}",
                path.display()
            )));
        }

        if let Some(entries) = self.index.get_mut(&key.kind) {
            entries.remove(&key.id);
            if entries.is_empty() {
                self.index.remove(&key.kind);
            }
        }
        self.write_manifest()?;
        log::info!("removed {} from library {}", path.display(), self.name());
        Ok(true)
    }

    /// Rewrite the package of a node the library already holds.
    pub fn save<T: LibraryItem>(&self, node: &T) -> Result<PathBuf, LibraryError> {
        let key = node.info();
        let info = self
            .index
            .get(&key.kind)
            .and_then(|entries| entries.get(&key.id))
            .ok_or_else(|| {
                LibraryError::IllegalState(format!("library does not contain {}", key.id))
            })?;
        self.write_entry(node, info)
    }

    /// Load a fresh copy of the entry described by `info`.
    pub fn new_instance<T: LibraryItem>(&self, info: &NodeInfo) -> Result<T, LibraryError> {
        let path = self.archive_path(info)?;
        let package = archive::read_package(&path, &self.temp_root)?;
        let mut node: T = self.codec.decode(&package.state)?;
        if let Some(preset) = package.preset {
            node.restore_preset(preset.data);
        }
        Ok(node)
    }

    /// Remove the whole library from disk.
    pub fn delete(self) -> Result<(), LibraryError> {
        fs::remove_dir_all(&self.directory)?;
        log::info!("deleted library {}", self.directory.display());
        Ok(())
    }

    /// Absolute package path of an entry.
    pub fn archive_path(&self, info: &NodeInfo) -> Result<PathBuf, LibraryError> {
        let relative = info
            .relative_path
            .as_deref()
            .ok_or_else(|| LibraryError::IllegalState(format!("{} has no path", info.id)))?;
        Ok(self.directory.join(relative))
    }

    fn write_entry<T: LibraryItem>(&self, node: &T, info: &NodeInfo) -> Result<PathBuf, LibraryError> {
        let path = self.archive_path(info)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let package = Package {
            manifest: info.clone(),
            state: self.codec.encode(node)?,
            preset: node.preset_file().map(|(ext, data)| PresetFile {
                file_name: format!("{}.{}", stem, ext),
                data: data.to_vec(),
            }),
        };
        archive::write_package(&path, &self.temp_root, &package)?;
        Ok(path)
    }

    fn write_manifest(&self) -> Result<(), LibraryError> {
        let manifest = Manifest {
            info: self.info.clone(),
            entries: self.entries().cloned().collect(),
        };
        fs::write(self.manifest_path(), serde_json::to_vec_pretty(&manifest)?)?;
        Ok(())
    }
}
