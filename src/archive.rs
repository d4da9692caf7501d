// src/archive.rs
//
// Library package format.
//
// A package is a zip file holding:
//   manifest.json        the entry's NodeInfo
//   state.bin            the node in tagged binary form
//   presets/<name>.<ext> optional instrument preset bytes
//
// Both directions go through a scratch directory under the configured temp
// root. The scratch directory is removed on success and on failure.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::LibraryError;
use crate::node::NodeInfo;

pub const MANIFEST: &str = "manifest.json";
pub const STATE: &str = "state.bin";
pub const PRESETS: &str = "presets";

/// Preset bytes stored beside a node.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetFile {
    /// File name inside `presets/`.
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Unpacked contents of one library entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub manifest: NodeInfo,
    pub state: Vec<u8>,
    pub preset: Option<PresetFile>,
}

fn scratch(temp_root: &Path, prefix: &str) -> Result<TempDir, LibraryError> {
    fs::create_dir_all(temp_root)?;
    Ok(tempfile::Builder::new().prefix(prefix).tempdir_in(temp_root)?)
}

/// Stage `package` and compress it to `path`.
///
/// The zip is written beside `path` and renamed into place, so a failed
/// write never leaves a half-written package.
pub fn write_package(path: &Path, temp_root: &Path, package: &Package) -> Result<(), LibraryError> {
    let stage = scratch(temp_root, "stage-")?;

    fs::write(
        stage.path().join(MANIFEST),
        serde_json::to_vec_pretty(&package.manifest)?,
    )?;
    fs::write(stage.path().join(STATE), &package.state)?;
    if let Some(preset) = &package.preset {
        let dir = stage.path().join(PRESETS);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(&preset.file_name), &preset.data)?;
    }

    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let out = NamedTempFile::new_in(parent)?;
    let mut zip = ZipWriter::new(out.reopen()?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, file) in staged_files(stage.path())? {
        zip.start_file(name, options)?;
        zip.write_all(&fs::read(file)?)?;
    }
    zip.finish()?;
    out.persist(path).map_err(|e| e.error)?;

    stage.close()?;
    log::info!("wrote package {}", path.display());
    Ok(())
}

/// Every staged file as `(zip entry name, path)`, in name order.
fn staged_files(root: &Path) -> Result<Vec<(String, PathBuf)>, LibraryError> {
    let mut files = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
                continue;
            }
            let name = path
                .strip_prefix(root)
                .map_err(|e| LibraryError::IllegalState(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((name, path));
        }
    }
    files.sort();
    Ok(files)
}

/// Decompress the package at `path` and read it back.
pub fn read_package(path: &Path, temp_root: &Path) -> Result<Package, LibraryError> {
    if !path.exists() {
        return Err(LibraryError::NotFound(path.to_path_buf()));
    }
    let corrupt = |reason: String| LibraryError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let unpack = scratch(temp_root, "unpack-")?;
    let mut zip = ZipArchive::new(File::open(path)?)?;
    zip.extract(unpack.path())?;

    let manifest_path = unpack.path().join(MANIFEST);
    if !manifest_path.exists() {
        return Err(corrupt(format!("missing {}", MANIFEST)));
    }
    let manifest: NodeInfo = serde_json::from_slice(&fs::read(&manifest_path)?)
        .map_err(|e| corrupt(format!("{}: {}", MANIFEST, e)))?;

    let state_path = unpack.path().join(STATE);
    if !state_path.exists() {
        return Err(corrupt(format!("missing {}", STATE)));
    }
    let state = fs::read(&state_path)?;

    let preset = read_preset(&unpack.path().join(PRESETS))?;

    unpack.close()?;
    log::debug!("read package {}", path.display());
    Ok(Package {
        manifest,
        state,
        preset,
    })
}

/// First file in the presets directory, if any.
fn read_preset(dir: &Path) -> Result<Option<PresetFile>, LibraryError> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut names: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    names.sort();
    let Some(path) = names.into_iter().find(|p| p.is_file()) else {
        return Ok(None);
    };
    let mut data = Vec::new();
    File::open(&path)?.read_to_end(&mut data)?;
    Ok(Some(PresetFile {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    fn package(preset: Option<PresetFile>) -> Package {
        Package {
            manifest: NodeInfo::new(NodeKind::Machine, "bass").with_path("machines/subsynth/bass.cmachine"),
            state: vec![1, 2, 3, 4],
            preset,
        }
    }

    fn scratch_is_empty(temp: &Path) -> bool {
        fs::read_dir(temp).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("temp");
        let path = dir.path().join("lib/machines/bass.cmachine");
        let written = package(Some(PresetFile {
            file_name: "bass.subsynth".into(),
            data: vec![9; 64],
        }));

        write_package(&path, &temp, &written).unwrap();
        assert!(path.is_file());
        assert!(scratch_is_empty(&temp));

        let read = read_package(&path, &temp).unwrap();
        assert_eq!(read, written);
        assert!(scratch_is_empty(&temp));
    }

    #[test]
    fn test_without_preset() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("temp");
        let path = dir.path().join("x.ceffect");
        write_package(&path, &temp, &package(None)).unwrap();
        assert_eq!(read_package(&path, &temp).unwrap().preset, None);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_package(&dir.path().join("nope.crack"), dir.path()),
            Err(LibraryError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_manifest_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("temp");
        let path = dir.path().join("bad.crack");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file(STATE, SimpleFileOptions::default()).unwrap();
        zip.write_all(b"state").unwrap();
        zip.finish().unwrap();

        assert!(matches!(
            read_package(&path, &temp),
            Err(LibraryError::Corrupt { .. })
        ));
        assert!(scratch_is_empty(&temp));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.crack");
        fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            read_package(&path, &dir.path().join("temp")),
            Err(LibraryError::Zip(_))
        ));
    }
}
