// src/lib.rs
//
// Library entry point for hosts driving the engine through a node graph.

pub mod archive;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod library;
pub mod node;
pub mod project;
pub mod state;
pub mod virtual_rack;

// Re-export key types for Rust consumers
pub use bridge::RackSession;
pub use codec::{Codec, Tagged};
pub use config::RuntimeConfig;
pub use engine::{Engine, Message, Reply, Target};
pub use error::{Error, Result};
pub use event::{NodeEvent, ProjectEvent};
pub use library::{Library, LibraryItem};
pub use node::{Lifecycle, Node, NodeContext, NodeInfo, NodeKind};
pub use project::ProjectManager;
pub use state::{MachineNode, MachineType, RackNode};
pub use virtual_rack::VirtualRack;
