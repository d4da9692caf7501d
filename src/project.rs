// src/project.rs
//
// Project directories and session settings.
//
// A project is a directory under `<root>/projects/` holding a `.project`
// JSON file and, once saved, the rack as `rack.ctk`. The manager keeps at
// most one project open and remembers the last one in `.settings`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::config::RuntimeConfig;
use crate::error::ProjectError;
use crate::event::ProjectEvent;
use crate::state::RackNode;

pub const PROJECT_FILE: &str = ".project";
pub const RACK_FILE: &str = "rack.ctk";

/// Settings key holding the last saved project's relative path.
pub const LAST_PROJECT: &str = "lastProject";

// ═══════════════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════════════

/// Flat string map persisted as `.settings`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionSettings(BTreeMap<String, String>);

impl SessionSettings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn last_project(&self) -> Option<&str> {
        self.get(LAST_PROJECT)
    }

    fn read(path: &Path) -> Result<Self, ProjectError> {
        let bytes = fs::read(path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write(&self, path: &Path) -> Result<(), ProjectError> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Project
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub author: String,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self {
            name: "Untitled Project".into(),
            author: "Untitled Author".into(),
            created: Utc::now(),
            modified: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Path relative to the projects directory.
    pub directory: PathBuf,
    pub info: ProjectInfo,
}

impl Project {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            info: ProjectInfo::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════

pub struct ProjectManager {
    config: RuntimeConfig,
    events: Sender<ProjectEvent>,
    settings: Option<SessionSettings>,
    project: Option<Project>,
}

impl ProjectManager {
    pub fn new(config: RuntimeConfig, events: Sender<ProjectEvent>) -> Self {
        Self {
            config,
            events,
            settings: None,
            project: None,
        }
    }

    /// Load `.settings`, creating it on first run.
    pub fn initialize(&mut self) -> Result<(), ProjectError> {
        fs::create_dir_all(self.config.projects_dir())?;
        let path = self.config.settings_file();
        let settings = if path.exists() {
            SessionSettings::read(&path)?
        } else {
            fs::write(&path, b"")?;
            let settings = SessionSettings::default();
            settings.write(&path)?;
            log::info!("created {}", path.display());
            settings
        };
        self.settings = Some(settings);
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn settings(&self) -> Result<&SessionSettings, ProjectError> {
        self.settings.as_ref().ok_or(ProjectError::Uninitialized)
    }

    pub fn settings_mut(&mut self) -> Result<&mut SessionSettings, ProjectError> {
        self.settings.as_mut().ok_or(ProjectError::Uninitialized)
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn project_mut(&mut self) -> Option<&mut Project> {
        self.project.as_mut()
    }

    /// Absolute directory of a project given relative to the projects root.
    pub fn project_dir(&self, relative: &Path) -> PathBuf {
        self.config.projects_dir().join(relative)
    }

    /// Whether `relative` names a directory holding a `.project` file.
    pub fn is_project(&self, relative: &Path) -> bool {
        Self::check_relative(relative).is_ok()
            && self.project_dir(relative).join(PROJECT_FILE).is_file()
    }

    /// Create the directory for a new project, open it and save it.
    pub fn create_project(&mut self, relative: impl AsRef<Path>) -> Result<&Project, ProjectError> {
        let relative = relative.as_ref();
        Self::check_relative(relative)?;
        self.settings()?;
        let directory = self.project_dir(relative);
        self.post(ProjectEvent::Create {
            directory: directory.clone(),
        });
        fs::create_dir_all(&directory)?;
        self.project = Some(Project::new(relative));
        self.save()?;
        log::info!("created project {}", directory.display());
        self.project.as_ref().ok_or(ProjectError::NoProject)
    }

    /// Open the project at `relative`, replacing any open one.
    pub fn load(&mut self, relative: impl AsRef<Path>) -> Result<&Project, ProjectError> {
        let relative = relative.as_ref();
        Self::check_relative(relative)?;
        self.settings()?;
        let directory = self.project_dir(relative);
        let file = directory.join(PROJECT_FILE);
        if !file.is_file() {
            return Err(ProjectError::NotFound(directory));
        }

        let mut project: Project = serde_json::from_slice(&fs::read(&file)?)?;
        project.directory = relative.to_path_buf();
        self.project = Some(project);

        self.post(ProjectEvent::Load {
            directory: directory.clone(),
        });
        self.post(ProjectEvent::LoadComplete {
            directory: directory.clone(),
        });
        log::info!("loaded project {}", directory.display());
        self.project.as_ref().ok_or(ProjectError::NoProject)
    }

    /// Write the open project and the settings.
    pub fn save(&mut self) -> Result<(), ProjectError> {
        let Some(project) = self.project.as_mut() else {
            return Err(ProjectError::NoProject);
        };
        let settings = self.settings.as_mut().ok_or(ProjectError::Uninitialized)?;
        settings.set(LAST_PROJECT, project.directory.to_string_lossy());
        project.info.modified = Some(Utc::now());

        let directory = self.config.projects_dir().join(&project.directory);
        let text = serde_json::to_vec_pretty(&*project)?;

        self.post(ProjectEvent::Save {
            directory: directory.clone(),
        });
        fs::write(directory.join(PROJECT_FILE), text)?;
        self.write_settings()?;
        self.post(ProjectEvent::SaveComplete {
            directory: directory.clone(),
        });
        log::info!("saved project {}", directory.display());
        Ok(())
    }

    /// Save and close the open project, if any.
    pub fn exit(&mut self) -> Result<(), ProjectError> {
        if self.project.is_some() {
            self.save()?;
        }
        self.clear();
        self.post(ProjectEvent::Exit);
        Ok(())
    }

    /// Close the open project without saving.
    pub fn clear(&mut self) {
        if self.project.take().is_some() {
            self.post(ProjectEvent::CloseComplete);
        }
    }

    /// Store `rack` in the open project.
    pub fn save_rack(&self, codec: &Codec, rack: &RackNode) -> Result<PathBuf, ProjectError> {
        let path = self.rack_path()?;
        codec.write_file(&path, rack)?;
        log::info!("saved rack to {}", path.display());
        Ok(path)
    }

    /// Read the rack stored in the open project.
    pub fn load_rack(&self, codec: &Codec) -> Result<RackNode, ProjectError> {
        let path = self.rack_path()?;
        if !path.is_file() {
            return Err(ProjectError::NotFound(path));
        }
        Ok(codec.read_file(&path)?)
    }

    fn rack_path(&self) -> Result<PathBuf, ProjectError> {
        let project = self.project.as_ref().ok_or(ProjectError::NoProject)?;
        Ok(self.project_dir(&project.directory).join(RACK_FILE))
    }

    fn write_settings(&self) -> Result<(), ProjectError> {
        self.settings()?.write(&self.config.settings_file())
    }

    fn check_relative(relative: &Path) -> Result<(), ProjectError> {
        if relative.is_absolute() || relative.has_root() {
            return Err(ProjectError::Absolute(relative.to_path_buf()));
        }
        let dotted = relative.components().any(|c| match c {
            Component::Normal(part) => part.to_string_lossy().contains('.'),
            _ => true,
        });
        if dotted || relative.as_os_str().is_empty() {
            return Err(ProjectError::NotADirectory(relative.to_path_buf()));
        }
        Ok(())
    }

    fn post(&self, event: ProjectEvent) {
        if self.events.send(event).is_err() {
            log::trace!("project event dropped, no receiver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Receiver};

    fn manager() -> (tempfile::TempDir, ProjectManager, Receiver<ProjectEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut manager = ProjectManager::new(RuntimeConfig::with_root(dir.path()), tx);
        manager.initialize().unwrap();
        (dir, manager, rx)
    }

    #[test]
    fn test_first_run_creates_settings() {
        let (dir, manager, _rx) = manager();
        assert!(dir.path().join(".settings").is_file());
        assert_eq!(manager.settings().unwrap().last_project(), None);
    }

    #[test]
    fn test_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel();
        let mut manager = ProjectManager::new(RuntimeConfig::with_root(dir.path()), tx);
        assert!(matches!(
            manager.create_project("song"),
            Err(ProjectError::Uninitialized)
        ));
    }

    #[test]
    fn test_create_then_load() {
        let (_dir, mut manager, rx) = manager();
        manager.create_project("demos/first").unwrap();
        assert!(manager.is_project(Path::new("demos/first")));
        assert_eq!(manager.settings().unwrap().last_project(), Some("demos/first"));

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events[0], ProjectEvent::Create { .. }));
        assert!(matches!(events[1], ProjectEvent::Save { .. }));
        assert!(matches!(events[2], ProjectEvent::SaveComplete { .. }));

        manager.clear();
        assert!(manager.project().is_none());
        assert_eq!(rx.try_recv().unwrap(), ProjectEvent::CloseComplete);

        let project = manager.load("demos/first").unwrap();
        assert_eq!(project.info.name, "Untitled Project");
        assert!(project.info.modified.is_some());
        assert!(matches!(rx.try_recv().unwrap(), ProjectEvent::Load { .. }));
        assert!(matches!(rx.try_recv().unwrap(), ProjectEvent::LoadComplete { .. }));
    }

    #[test]
    fn test_settings_survive_restart() {
        let (dir, mut manager, _rx) = manager();
        manager.create_project("kept").unwrap();

        let (tx, _rx2) = mpsc::channel();
        let mut again = ProjectManager::new(RuntimeConfig::with_root(dir.path()), tx);
        again.initialize().unwrap();
        assert_eq!(again.settings().unwrap().last_project(), Some("kept"));
    }

    #[test]
    fn test_rejects_bad_names() {
        let (_dir, mut manager, _rx) = manager();
        assert!(matches!(
            manager.load("song.v2"),
            Err(ProjectError::NotADirectory(_))
        ));
        assert!(matches!(
            manager.load("../outside"),
            Err(ProjectError::NotADirectory(_))
        ));
        let absolute = std::env::temp_dir();
        assert!(matches!(
            manager.load(&absolute),
            Err(ProjectError::Absolute(_))
        ));
        assert!(matches!(
            manager.load("missing"),
            Err(ProjectError::NotFound(_))
        ));
    }

    #[test]
    fn test_exit_saves_and_closes() {
        let (_dir, mut manager, rx) = manager();
        manager.create_project("live").unwrap();
        rx.try_iter().for_each(drop);

        manager.project_mut().unwrap().info.author = "someone".into();
        manager.exit().unwrap();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.last(), Some(&ProjectEvent::Exit));
        assert!(events.contains(&ProjectEvent::CloseComplete));

        let project = manager.load("live").unwrap();
        assert_eq!(project.info.author, "someone");
    }

    #[test]
    fn test_rack_file() {
        let (_dir, mut manager, _rx) = manager();
        let codec = Codec::standard().unwrap();
        assert!(matches!(
            manager.load_rack(&codec),
            Err(ProjectError::NoProject)
        ));
        manager.create_project("racks").unwrap();
        assert!(matches!(
            manager.load_rack(&codec),
            Err(ProjectError::NotFound(_))
        ));

        let mut rack = RackNode::new();
        rack.set_path(Some("song.caustic".into()));
        manager.save_rack(&codec, &rack).unwrap();
        let loaded = manager.load_rack(&codec).unwrap();
        assert_eq!(loaded.path(), Some("song.caustic"));
    }
}
