// src/node.rs
//
// Node base: identity, lifecycle state machine and the context every
// lifecycle hook receives.

use std::fmt;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::engine::{Engine, Message, Reply, Target};
use crate::error::{CodecError, EngineError, NodeError};
use crate::event::NodeEvent;

/// Type tag of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Library,
    Rack,
    Master,
    MasterPart,
    Machine,
    Component,
    Effect,
    Sequencer,
    Pattern,
}

impl NodeKind {
    const ALL: [NodeKind; 9] = [
        NodeKind::Library,
        NodeKind::Rack,
        NodeKind::Master,
        NodeKind::MasterPart,
        NodeKind::Machine,
        NodeKind::Component,
        NodeKind::Effect,
        NodeKind::Sequencer,
        NodeKind::Pattern,
    ];

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle phase requested of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    Update,
    Restore,
    Destroy,
}

/// Where a node is in its lifecycle.
///
/// ```text
/// Uninitialized -> Created -> (Updated | Restored) -> Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    #[default]
    Uninitialized,
    Created,
    Updated,
    Restored,
    Destroyed,
}

impl Lifecycle {
    /// State after `phase`, or `None` if the phase is not allowed here.
    pub fn after(self, phase: Phase) -> Option<Lifecycle> {
        use Lifecycle::*;
        match (phase, self) {
            (Phase::Create, Uninitialized) => Some(Created),
            (Phase::Update, Created | Updated | Restored) => Some(Updated),
            (Phase::Restore, Created) => Some(Restored),
            (Phase::Destroy, s) if s != Destroyed => Some(Destroyed),
            _ => None,
        }
    }

    /// Present in the engine.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Lifecycle::Created | Lifecycle::Updated | Lifecycle::Restored
        )
    }
}

/// Catalog entry describing a node without loading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: Uuid,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
}

impl NodeInfo {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            name: Some(name.into()),
            relative_path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = Some(path.into());
        self
    }
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            kind: NodeKind::Library,
            name: None,
            relative_path: None,
        }
    }
}

impl Tagged for NodeInfo {
    const TYPE_NAME: &'static str = "NodeInfo";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.uuid(1, self.id)?;
        w.u8(2, self.kind.to_u8())?;
        w.opt_string(3, self.name.as_deref())?;
        w.opt_string(4, self.relative_path.as_deref())
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            1 => self.id = r.uuid()?,
            2 => {
                let raw = r.u8()?;
                self.kind = NodeKind::from_u8(raw).ok_or(CodecError::InvalidValue {
                    tag,
                    reason: format!("unknown node kind {}", raw),
                })?;
            }
            3 => self.name = Some(r.string()?),
            4 => self.relative_path = Some(r.string()?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// State shared by every node.
///
/// Identity and name persist under tags 1 and 2 of the owning type.
/// Lifecycle state does not persist: a decoded node always starts
/// `Uninitialized`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBase {
    id: Uuid,
    kind: NodeKind,
    name: Option<String>,
    lifecycle: Lifecycle,
}

impl NodeBase {
    pub const TAG_ID: u16 = 1;
    pub const TAG_NAME: u16 = 2;

    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            name: None,
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    pub fn named(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(kind)
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_live(&self) -> bool {
        self.lifecycle.is_live()
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            relative_path: None,
        }
    }

    /// Validate a phase without applying it.
    pub fn check(&self, phase: Phase) -> Result<Lifecycle, NodeError> {
        self.lifecycle
            .after(phase)
            .ok_or(NodeError::InvalidTransition {
                kind: self.kind,
                phase,
                state: self.lifecycle,
            })
    }

    pub(crate) fn encode(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.uuid(Self::TAG_ID, self.id)?;
        w.opt_string(Self::TAG_NAME, self.name.as_deref())
    }

    pub(crate) fn decode(
        &mut self,
        tag: u16,
        r: &mut FieldReader<'_, '_>,
    ) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_ID => self.id = r.uuid()?,
            Self::TAG_NAME => self.name = Some(r.string()?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Context
// ═══════════════════════════════════════════════════════════════════

/// Engine link and event sink lent to lifecycle hooks.
pub struct NodeContext<'a> {
    engine: &'a mut dyn Engine,
    events: &'a Sender<NodeEvent>,
}

impl<'a> NodeContext<'a> {
    pub fn new(engine: &'a mut dyn Engine, events: &'a Sender<NodeEvent>) -> Self {
        Self { engine, events }
    }

    pub fn send(&mut self, msg: Message) -> Result<Option<f32>, NodeError> {
        Ok(self.engine.send(msg)?)
    }

    pub fn query(&mut self, msg: Message) -> Result<Reply, NodeError> {
        Ok(self.engine.query(msg)?)
    }

    /// Numeric query. `None` when the engine holds no value.
    pub fn query_f32(
        &mut self,
        target: Target,
        control: &'static str,
    ) -> Result<Option<f32>, NodeError> {
        match self.engine.query(Message::new(target, control))? {
            Reply::Float(v) => Ok(Some(v)),
            Reply::None => Ok(None),
            other => Err(EngineError::UnexpectedReply {
                control: control.to_string(),
                reply: format!("{:?}", other),
            }
            .into()),
        }
    }

    /// Text query. `None` when the engine holds no value.
    pub fn query_text(&mut self, msg: Message) -> Result<Option<String>, NodeError> {
        let control = msg.control;
        match self.engine.query(msg)? {
            Reply::Text(v) => Ok(Some(v)),
            Reply::None => Ok(None),
            other => Err(EngineError::UnexpectedReply {
                control: control.to_string(),
                reply: format!("{:?}", other),
            }
            .into()),
        }
    }

    /// Post a change event. Nobody listening is not an error.
    pub fn post(&self, event: NodeEvent) {
        if self.events.send(event).is_err() {
            log::trace!("node event dropped, no receiver");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Node trait
// ═══════════════════════════════════════════════════════════════════

/// A lifecycle-managed piece of engine state.
///
/// Implementors provide the `*_components` hooks. The provided phase
/// methods check the state machine before calling them and only advance the
/// state once the hook succeeds, so a rejected or failed phase leaves the
/// node where it was.
pub trait Node {
    fn base(&self) -> &NodeBase;

    fn base_mut(&mut self) -> &mut NodeBase;

    /// Register this node and its children with the engine.
    fn create_components(&mut self, _cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Push every local value to the engine.
    fn update_components(&mut self, _cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Pull every engine value into local fields.
    fn restore_components(&mut self, _cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Tear down children, then this node.
    fn destroy_components(&mut self, _cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    fn id(&self) -> Uuid {
        self.base().id()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.base().lifecycle()
    }

    fn info(&self) -> NodeInfo {
        self.base().info()
    }

    fn create(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        run_phase(self, Phase::Create, cx)
    }

    fn update(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        run_phase(self, Phase::Update, cx)
    }

    fn restore(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        run_phase(self, Phase::Restore, cx)
    }

    /// No-op once destroyed.
    fn destroy(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if self.lifecycle() == Lifecycle::Destroyed {
            return Ok(());
        }
        run_phase(self, Phase::Destroy, cx)
    }

    /// Mark the node as present in the engine without sending anything.
    ///
    /// Used when the engine already holds the object, just before pulling
    /// its values with `restore`.
    fn attach(&mut self) -> Result<(), NodeError> {
        let base = self.base_mut();
        if base.lifecycle == Lifecycle::Destroyed {
            return Err(NodeError::InvalidTransition {
                kind: base.kind,
                phase: Phase::Create,
                state: base.lifecycle,
            });
        }
        base.lifecycle = Lifecycle::Created;
        Ok(())
    }
}

fn run_phase<N: Node + ?Sized>(
    node: &mut N,
    phase: Phase,
    cx: &mut NodeContext<'_>,
) -> Result<(), NodeError> {
    let next = node.base().check(phase)?;
    log::debug!("{} {} -> {:?}", node.base().kind, node.base().id, phase);

    match phase {
        Phase::Create => node.create_components(cx)?,
        Phase::Update => node.update_components(cx)?,
        Phase::Restore => node.restore_components(cx)?,
        Phase::Destroy => node.destroy_components(cx)?,
    }

    node.base_mut().lifecycle = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_rack::VirtualRack;
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        base: Option<NodeBase>,
        calls: Vec<Phase>,
        fail_update: bool,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                base: Some(NodeBase::new(NodeKind::Component)),
                ..Default::default()
            }
        }
    }

    impl Node for Recorder {
        fn base(&self) -> &NodeBase {
            self.base.as_ref().unwrap()
        }
        fn base_mut(&mut self) -> &mut NodeBase {
            self.base.as_mut().unwrap()
        }
        fn create_components(&mut self, _cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
            self.calls.push(Phase::Create);
            Ok(())
        }
        fn update_components(&mut self, _cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
            if self.fail_update {
                return Err(NodeError::MissingPath);
            }
            self.calls.push(Phase::Update);
            Ok(())
        }
        fn restore_components(&mut self, _cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
            self.calls.push(Phase::Restore);
            Ok(())
        }
        fn destroy_components(&mut self, _cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
            self.calls.push(Phase::Destroy);
            Ok(())
        }
    }

    #[test]
    fn test_transition_table() {
        use Lifecycle::*;
        assert_eq!(Uninitialized.after(Phase::Create), Some(Created));
        assert_eq!(Created.after(Phase::Create), None);
        assert_eq!(Uninitialized.after(Phase::Update), None);
        assert_eq!(Restored.after(Phase::Update), Some(Updated));
        assert_eq!(Created.after(Phase::Restore), Some(Restored));
        assert_eq!(Updated.after(Phase::Restore), None);
        assert_eq!(Uninitialized.after(Phase::Destroy), Some(Destroyed));
        assert_eq!(Destroyed.after(Phase::Destroy), None);
    }

    #[test]
    fn test_phases_run_hooks_in_order() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);
        let mut node = Recorder::new();

        node.create(&mut cx).unwrap();
        node.restore(&mut cx).unwrap();
        node.update(&mut cx).unwrap();
        node.destroy(&mut cx).unwrap();
        node.destroy(&mut cx).unwrap();

        assert_eq!(
            node.calls,
            vec![Phase::Create, Phase::Restore, Phase::Update, Phase::Destroy]
        );
        assert_eq!(node.lifecycle(), Lifecycle::Destroyed);
    }

    #[test]
    fn test_invalid_phase_leaves_state() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);
        let mut node = Recorder::new();

        let err = node.update(&mut cx).unwrap_err();
        assert!(matches!(
            err,
            NodeError::InvalidTransition {
                phase: Phase::Update,
                state: Lifecycle::Uninitialized,
                ..
            }
        ));
        assert!(node.calls.is_empty());
        assert_eq!(node.lifecycle(), Lifecycle::Uninitialized);
    }

    #[test]
    fn test_failed_hook_keeps_prior_state() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);
        let mut node = Recorder::new();
        node.create(&mut cx).unwrap();

        node.fail_update = true;
        assert!(node.update(&mut cx).is_err());
        assert_eq!(node.lifecycle(), Lifecycle::Created);
    }

    #[test]
    fn test_attach_skips_engine() {
        let mut node = Recorder::new();
        node.attach().unwrap();
        assert_eq!(node.lifecycle(), Lifecycle::Created);
        assert!(node.calls.is_empty());
    }

    #[test]
    fn test_node_kind_byte_roundtrip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::from_u8(kind.to_u8()), Some(kind));
        }
        assert_eq!(NodeKind::from_u8(200), None);
    }
}
