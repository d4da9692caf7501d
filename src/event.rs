// src/event.rs

use std::path::PathBuf;

use crate::state::{EffectType, MachineType};

/// ===============================
/// Node graph change events
/// ===============================

/// A change posted by the live node graph.
///
/// These events:
/// - are posted after the change has been applied
/// - are delivered in order over the session's channel
/// - carry plain values, never references into the graph
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    MachineCreated {
        index: u8,
        machine_type: MachineType,
        name: String,
    },

    MachineDestroyed {
        index: u8,
    },

    SelectionChanged {
        old: Option<u8>,
        new: Option<u8>,
    },

    /// Mute or solo flags changed on one or more machines.
    SoloRefresh,

    EffectChanged {
        machine: u8,
        slot: u8,
        effect: Option<EffectType>,
    },

    PatternChanged {
        machine: u8,
        pattern: String,
    },

    /// The rack was rebuilt from the engine.
    RackRestored {
        machines: usize,
    },
}

/// ===============================
/// Project lifecycle events
/// ===============================

/// A step of the project manager's open/save/close cycle.
///
/// `Load` fires once the project file has been read, before anything is
/// made live. `LoadComplete` follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEvent {
    Create { directory: PathBuf },

    Load { directory: PathBuf },

    LoadComplete { directory: PathBuf },

    Save { directory: PathBuf },

    SaveComplete { directory: PathBuf },

    Exit,

    CloseComplete,
}
