//! Session bridge between a host and the engine.
//!
//! A [`RackSession`] owns the engine connection, the current [`RackNode`]
//! and the channel its nodes post change events to. Hosts never build a
//! [`NodeContext`] themselves: they borrow the rack and a context together
//! through [`RackSession::with_rack`].
//!
//! # Usage
//!
//! ```ignore
//! let mut session = RackSession::new(Box::new(VirtualRack::new()), Codec::standard()?);
//! session.create_rack()?;
//!
//! session.with_rack(|rack, cx| {
//!     rack.create_machine(cx, 0, MachineType::SubSynth, "bass").map(|_| ())
//! })?;
//!
//! for event in session.drain_events() {
//!     println!("{:?}", event);
//! }
//! ```

use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::codec::Codec;
use crate::engine::Engine;
use crate::error::{CodecError, Error, NodeError};
use crate::event::NodeEvent;
use crate::node::{Node, NodeContext};
use crate::state::RackNode;

/// One rack bound to one engine.
pub struct RackSession {
    /// The engine every live node talks to.
    engine: Box<dyn Engine>,

    /// The current rack. Starts uninitialized.
    rack: RackNode,

    codec: Codec,

    events_tx: Sender<NodeEvent>,
    events_rx: Receiver<NodeEvent>,
}

impl RackSession {
    pub fn new(engine: Box<dyn Engine>, codec: Codec) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            engine,
            rack: RackNode::new(),
            codec,
            events_tx,
            events_rx,
        }
    }

    pub fn rack(&self) -> &RackNode {
        &self.rack
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Lend the rack together with a context on this session's engine.
    pub fn with_rack<R>(&mut self, f: impl FnOnce(&mut RackNode, &mut NodeContext<'_>) -> R) -> R {
        let mut cx = NodeContext::new(self.engine.as_mut(), &self.events_tx);
        f(&mut self.rack, &mut cx)
    }

    /// Make the current rack live: create it, then push its values.
    pub fn create_rack(&mut self) -> Result<(), NodeError> {
        self.with_rack(|rack, cx| {
            rack.create(cx)?;
            rack.update(cx)
        })
    }

    /// Replace the current rack and return the old one.
    ///
    /// The old rack is destroyed if it was live. The new rack is created and
    /// updated, so the engine ends up holding exactly its values.
    pub fn set_rack(&mut self, rack: RackNode) -> Result<RackNode, NodeError> {
        let mut cx = NodeContext::new(self.engine.as_mut(), &self.events_tx);
        if self.rack.base().is_live() {
            self.rack.destroy(&mut cx)?;
        }
        let old = std::mem::replace(&mut self.rack, rack);
        self.rack.create(&mut cx)?;
        self.rack.update(&mut cx)?;
        log::debug!("rack replaced ({} machines)", self.rack.machine_count());
        Ok(old)
    }

    /// Have the engine load a song, then rebuild a fresh rack from it.
    ///
    /// The old rack is destroyed first if it was live, and is returned. If
    /// the load fails it stays current in its destroyed state.
    pub fn restore_rack(&mut self, path: &str) -> Result<RackNode, NodeError> {
        let mut cx = NodeContext::new(self.engine.as_mut(), &self.events_tx);
        if self.rack.base().is_live() {
            log::debug!("destroying previous rack {}", self.rack.id());
            self.rack.destroy(&mut cx)?;
        }
        let mut rack = RackNode::new();
        rack.attach()?;
        rack.load_song(&mut cx, path)?;
        Ok(std::mem::replace(&mut self.rack, rack))
    }

    /// Write the current rack as a tagged file.
    pub fn save_rack(&self, path: &Path) -> Result<(), CodecError> {
        self.codec.write_file(path, &self.rack)?;
        log::info!("rack written to {}", path.display());
        Ok(())
    }

    /// Read a rack written by [`save_rack`](Self::save_rack) and make it current.
    pub fn open_rack(&mut self, path: &Path) -> Result<RackNode, Error> {
        let rack: RackNode = self.codec.read_file(path)?;
        log::info!("rack read from {}", path.display());
        Ok(self.set_rack(rack)?)
    }

    /// Every event posted since the last drain, oldest first.
    pub fn drain_events(&self) -> Vec<NodeEvent> {
        self.events_rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Lifecycle;
    use crate::state::{EffectType, MachineType, auto_wah};
    use crate::virtual_rack::VirtualRack;

    fn session() -> RackSession {
        RackSession::new(Box::new(VirtualRack::new()), Codec::standard().unwrap())
    }

    fn add_bass(session: &mut RackSession) {
        session
            .with_rack(|rack, cx| {
                rack.create_machine(cx, 0, MachineType::SubSynth, "bass")?
                    .effects_mut()
                    .create_effect(cx, 0, EffectType::AutoWah)?
                    .set(cx, auto_wah::CUTOFF, 1.5)
            })
            .unwrap();
    }

    #[test]
    fn test_create_rack_goes_live() {
        let mut session = session();
        assert!(!session.rack().base().is_live());
        session.create_rack().unwrap();
        assert!(session.rack().base().is_live());
        assert!(session.create_rack().is_err());
    }

    #[test]
    fn test_events_drain_in_order() {
        let mut session = session();
        session.create_rack().unwrap();
        add_bass(&mut session);
        session
            .with_rack(|rack, cx| rack.set_selected_index(cx, Some(0)))
            .unwrap();

        let events = session.drain_events();
        assert!(matches!(events[0], NodeEvent::MachineCreated { index: 0, .. }));
        assert_eq!(
            events.last(),
            Some(&NodeEvent::SelectionChanged {
                old: None,
                new: Some(0),
            })
        );
        assert!(session.drain_events().is_empty());
    }

    #[test]
    fn test_save_then_open_rack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rack.ctk");

        let mut session = session();
        session.create_rack().unwrap();
        add_bass(&mut session);
        session.save_rack(&path).unwrap();

        let mut other = self::session();
        let old = other.open_rack(&path).unwrap();
        assert_eq!(old.machine_count(), 0);

        let bass = other.rack().machine(0).unwrap();
        assert!(bass.base().is_live());
        assert_eq!(
            bass.effects().effect(0).unwrap().get(auto_wah::CUTOFF),
            Some(1.5)
        );
        assert_eq!(other.rack().id(), session.rack().id());
    }

    #[test]
    fn test_set_rack_destroys_old() {
        let mut session = session();
        session.create_rack().unwrap();
        add_bass(&mut session);

        let old = session.set_rack(RackNode::new()).unwrap();
        assert_eq!(old.lifecycle(), Lifecycle::Destroyed);
        assert_eq!(session.rack().machine_count(), 0);
        assert!(session.rack().base().is_live());
    }

    #[test]
    fn test_restore_rack_from_song() {
        let mut session = session();
        session.create_rack().unwrap();
        add_bass(&mut session);
        session
            .with_rack(|rack, cx| {
                rack.set_path(Some("live.caustic".into()));
                rack.save_song(cx)
            })
            .unwrap();
        session.drain_events();

        let old = session.restore_rack("live.caustic").unwrap();
        assert_eq!(old.lifecycle(), Lifecycle::Destroyed);
        assert!(!old.machine(0).unwrap().base().is_live());
        let rack = session.rack();
        assert!(rack.base().is_live());
        assert_eq!(rack.name(), Some("live"));
        assert_eq!(rack.machine(0).unwrap().name(), "bass");
        assert!(
            session
                .drain_events()
                .contains(&NodeEvent::RackRestored { machines: 1 })
        );

        assert!(session.restore_rack("unknown.caustic").is_err());
    }
}
