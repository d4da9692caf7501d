// src/state/mod.rs
//
// Declarative node graph mirroring the engine.
//
// Every type here is a node (or a value a node owns) that:
// - keeps its values locally, so it can be saved without an engine
// - forwards writes to the engine while live
// - can push all of its values (`update`) or pull them back (`restore`)
//
// The graph is a strict tree: the rack owns the master, the sequencer and
// its machines, a machine owns its components, and nothing is shared.

mod components;
mod effect;
mod machine;
mod master;
mod param_info;
mod pattern;
mod phrase;
mod rack;
mod sequencer;

pub use components::*;
pub use effect::*;
pub use machine::*;
pub use master::*;
pub use param_info::*;
pub use pattern::*;
pub use phrase::*;
pub use rack::*;
pub use sequencer::*;
