// src/engine.rs
//
// Message-send seam to the external synthesis engine.
//
// The node graph never talks to the engine directly. Every write goes out as
// a `Message` through `Engine::send`, every read comes back through
// `Engine::query`. How those messages are framed on the wire belongs to the
// engine host, not to this crate.

use std::fmt;

use crate::error::EngineError;

/// Number of machine slots the engine exposes.
pub const RACK_SLOTS: u8 = 14;

/// Rack-level control names.
pub mod control {
    pub const CREATE: &str = "create";
    pub const REMOVE: &str = "remove";
    pub const BLANKRACK: &str = "blankrack";
    pub const LOAD_SONG: &str = "load_song";
    pub const SAVE_SONG: &str = "save_song";
    pub const MACHINE_NAME: &str = "machine_name";
    pub const MACHINE_TYPE: &str = "machine_type";
    pub const TYPE: &str = "type";
    pub const BYPASS: &str = "bypass";
    pub const PRESET: &str = "preset";
    pub const PRESET_NAME: &str = "preset_name";
    pub const NOTE_DATA: &str = "note_data";
    pub const REMOVE_NOTE: &str = "remove_note";
    pub const CLEAR: &str = "clear";
    pub const LENGTH: &str = "length";
    pub const RESOLUTION: &str = "resolution";
    pub const PATTERNS_WITH_DATA: &str = "patterns_with_data";
    pub const BANK: &str = "bank";
    pub const PATTERN: &str = "pattern";
    pub const PATTERN_EVENT: &str = "pattern_event";
    pub const PATTERN_EVENTS: &str = "pattern_events";
    pub const CLEAR_PATTERNS: &str = "clear_patterns";
    pub const MUTE: &str = "mute";
    pub const SOLO: &str = "solo";
}

/// Addressee of an engine message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Rack,
    Machine(u8),
    Mixer(u8),
    Effect { machine: u8, slot: u8 },
    Effects(u8),
    PatternSequencer(u8),
    Pattern { machine: u8, bank: u8, index: u8 },
    Master(&'static str),
    Sequencer,
}

impl Target {
    /// Machine index this target belongs to, if any.
    pub fn machine(&self) -> Option<u8> {
        match *self {
            Target::Machine(i)
            | Target::Mixer(i)
            | Target::Effects(i)
            | Target::PatternSequencer(i) => Some(i),
            Target::Effect { machine, .. } | Target::Pattern { machine, .. } => Some(machine),
            Target::Rack | Target::Master(_) | Target::Sequencer => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Rack => write!(f, "rack"),
            Target::Machine(i) => write!(f, "machine[{}]", i),
            Target::Mixer(i) => write!(f, "mixer[{}]", i),
            Target::Effect { machine, slot } => write!(f, "effect[{}:{}]", machine, slot),
            Target::Effects(i) => write!(f, "effects[{}]", i),
            Target::PatternSequencer(i) => write!(f, "pattern_sequencer[{}]", i),
            Target::Pattern {
                machine,
                bank,
                index,
            } => write!(f, "pattern[{}:{}:{}]", machine, bank, index),
            Target::Master(part) => write!(f, "master.{}", part),
            Target::Sequencer => write!(f, "sequencer"),
        }
    }
}

/// A single message argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i32),
    Float(f32),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(v)
    }
}

impl From<u8> for Arg {
    fn from(v: u8) -> Self {
        Arg::Int(v as i32)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Float(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Float(if v { 1.0 } else { 0.0 })
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Text(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Text(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Blob(v)
    }
}

/// Reply to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    None,
    Float(f32),
    Text(String),
    Blob(Vec<u8>),
}

/// A message addressed to one control of one engine object.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub target: Target,
    pub control: &'static str,
    pub args: Vec<Arg>,
}

impl Message {
    pub fn new(target: Target, control: &'static str) -> Self {
        Self {
            target,
            control,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn int_arg(&self, i: usize) -> Option<i32> {
        match self.args.get(i) {
            Some(Arg::Int(v)) => Some(*v),
            Some(Arg::Float(v)) => Some(*v as i32),
            _ => None,
        }
    }

    pub fn float_arg(&self, i: usize) -> Option<f32> {
        match self.args.get(i) {
            Some(Arg::Float(v)) => Some(*v),
            Some(Arg::Int(v)) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn text_arg(&self, i: usize) -> Option<&str> {
        match self.args.get(i) {
            Some(Arg::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.control)?;
        for arg in &self.args {
            match arg {
                Arg::Int(v) => write!(f, " {}", v)?,
                Arg::Float(v) => write!(f, " {}", v)?,
                Arg::Text(v) => write!(f, " {:?}", v)?,
                Arg::Blob(v) => write!(f, " <{} bytes>", v.len())?,
            }
        }
        Ok(())
    }
}

/// Synchronous link to the synthesis engine.
///
/// Both calls block the session thread until the engine answers.
pub trait Engine: Send {
    /// Apply a write. Some controls answer with a value.
    fn send(&mut self, msg: Message) -> Result<Option<f32>, EngineError>;

    /// Read the current value of a control.
    fn query(&mut self, msg: Message) -> Result<Reply, EngineError>;
}
