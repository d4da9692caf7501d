// src/error.rs
//
// Error types for the node graph, codec, library and project layers.

use std::path::PathBuf;

use thiserror::Error;

use crate::node::{Lifecycle, NodeKind, Phase};

/// Errors raised by the external engine link.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine rejected {control} on {target}: {reason}")]
    Rejected {
        target: String,
        control: String,
        reason: String,
    },

    #[error("engine returned an unexpected reply for {control}: {reply}")]
    UnexpectedReply { control: String, reply: String },

    #[error("engine is not connected")]
    Disconnected,
}

/// Structural and range errors on the live node graph.
///
/// These are raised before any mutation happens, so the graph is left as it
/// was when one is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("machine exists in rack for index: {0}")]
    DuplicateIndex(u8),

    #[error("machine does not exist at index: {0}")]
    UnknownMachine(u8),

    #[error("rack index {0} is outside the 0..{max} slot range", max = crate::engine::RACK_SLOTS)]
    InvalidIndex(u8),

    #[error("{kind:?} node cannot {phase:?} from the {state:?} state")]
    InvalidTransition {
        kind: NodeKind,
        phase: Phase,
        state: Lifecycle,
    },

    #[error("{param} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        param: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("unknown parameter id {0}")]
    UnknownParam(u32),

    #[error("effect slot {0} is empty")]
    EmptySlot(u8),

    #[error("effect slot {0} does not exist")]
    InvalidSlot(u8),

    #[error("invalid length: {0}")]
    InvalidLength(u32),

    #[error("pattern {0} does not exist")]
    UnknownPattern(String),

    #[error("step {step} is outside the phrase ({steps} steps)")]
    StepOutOfRange { step: usize, steps: usize },

    #[error("rack has no song path")]
    MissingPath,

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Errors raised by the tagged binary codec.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("type {type_name} is not registered")]
    Unregistered { type_name: &'static str },

    #[error("type {nested} (embedded by {owner}) is not registered")]
    UnregisteredNested {
        owner: &'static str,
        nested: &'static str,
    },

    #[error("type id {0} is registered twice")]
    DuplicateId(u16),

    #[error("type {0} is registered twice")]
    DuplicateType(&'static str),

    #[error("expected {expected}, found type id {found}")]
    TypeMismatch { expected: &'static str, found: u16 },

    #[error("input ended early while reading {0}")]
    Truncated(&'static str),

    #[error("bad archive header")]
    BadHeader,

    #[error("unsupported codec version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid value for tag {tag}: {reason}")]
    InvalidValue { tag: u16, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`crate::library::Library`].
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("corrupt package {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("{0} has no name to resolve a path from")]
    Unnamed(uuid::Uuid),

    #[error("path {path} is already used by {existing}")]
    PathConflict { path: String, existing: uuid::Uuid },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("manifest error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the [`crate::project::ProjectManager`].
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("project is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("project directory must be relative: {0}")]
    Absolute(PathBuf),

    #[error("project not found: {0}")]
    NotFound(PathBuf),

    #[error("no project is open")]
    NoProject,

    #[error("project manager is not initialized")]
    Uninitialized,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine a data directory")]
    NoDataDir,

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
