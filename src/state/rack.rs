// src/state/rack.rs
//
// The rack: root of a live session.
//
// Owns the master section, up to 14 machines keyed by slot, and the song
// sequencer. Structural changes are validated before anything is touched,
// so a rejected call leaves the rack exactly as it was.

use std::collections::BTreeMap;
use std::path::Path;

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::engine::{Message, RACK_SLOTS, Target, control};
use crate::error::{CodecError, NodeError};
use crate::event::NodeEvent;
use crate::node::{Node, NodeBase, NodeContext, NodeKind};

use super::machine::{MachineNode, MachineType};
use super::master::MasterNode;
use super::sequencer::SequencerNode;

#[derive(Debug, Clone, PartialEq)]
pub struct RackNode {
    base: NodeBase,

    /// Engine song file this rack mirrors, if any.
    path: Option<String>,

    master: MasterNode,

    machines: BTreeMap<u8, MachineNode>,

    sequencer: SequencerNode,

    /// Always `None` or a key of `machines`.
    selected: Option<u8>,
}

impl Default for RackNode {
    fn default() -> Self {
        Self::new()
    }
}

impl RackNode {
    const TAG_PATH: u16 = 50;
    const TAG_MASTER: u16 = 51;
    const TAG_MACHINES: u16 = 52;
    const TAG_SEQUENCER: u16 = 53;
    const TAG_SELECTED: u16 = 54;

    pub fn new() -> Self {
        Self {
            base: NodeBase::new(NodeKind::Rack),
            path: None,
            master: MasterNode::new(),
            machines: BTreeMap::new(),
            sequencer: SequencerNode::new(),
            selected: None,
        }
    }

    /// Rack named after its song file, falling back to the node name.
    pub fn name(&self) -> Option<&str> {
        self.path
            .as_deref()
            .and_then(|p| Path::new(p).file_stem())
            .and_then(|s| s.to_str())
            .or_else(|| self.base.name())
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.base.set_name(name);
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: Option<String>) {
        self.path = path;
    }

    pub fn master(&self) -> &MasterNode {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut MasterNode {
        &mut self.master
    }

    pub fn sequencer(&self) -> &SequencerNode {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut SequencerNode {
        &mut self.sequencer
    }

    // ───────────────────────────────────────────────────────────────
    // Machines
    // ───────────────────────────────────────────────────────────────

    pub fn machine(&self, index: u8) -> Option<&MachineNode> {
        self.machines.get(&index)
    }

    pub fn machine_mut(&mut self, index: u8) -> Option<&mut MachineNode> {
        self.machines.get_mut(&index)
    }

    pub fn machines(&self) -> impl Iterator<Item = &MachineNode> {
        self.machines.values()
    }

    pub fn contains_machine(&self, index: u8) -> bool {
        self.machines.contains_key(&index)
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    fn check_free(&self, index: u8) -> Result<(), NodeError> {
        if index >= RACK_SLOTS {
            return Err(NodeError::InvalidIndex(index));
        }
        if self.machines.contains_key(&index) {
            return Err(NodeError::DuplicateIndex(index));
        }
        Ok(())
    }

    /// Build a machine in an empty slot and bring it up in the engine.
    pub fn create_machine(
        &mut self,
        cx: &mut NodeContext<'_>,
        index: u8,
        machine_type: MachineType,
        name: impl Into<String>,
    ) -> Result<&mut MachineNode, NodeError> {
        self.add_machine(cx, MachineNode::new(index, machine_type, name))
    }

    /// Put an existing machine (for example a library copy) in its slot.
    ///
    /// When the rack is live the machine is created and its state pushed.
    pub fn add_machine(
        &mut self,
        cx: &mut NodeContext<'_>,
        mut machine: MachineNode,
    ) -> Result<&mut MachineNode, NodeError> {
        let index = machine.index();
        self.check_free(index)?;
        if self.base.is_live() {
            machine.create(cx)?;
            if let Err(e) = machine.update(cx) {
                // The slot is already taken in the engine; give it back.
                if let Err(cleanup) = machine.destroy(cx) {
                    log::warn!("machine {} left in engine: {}", index, cleanup);
                }
                return Err(e);
            }
        }
        cx.post(NodeEvent::MachineCreated {
            index,
            machine_type: machine.machine_type(),
            name: machine.name().to_string(),
        });
        Ok(self.machines.entry(index).or_insert(machine))
    }

    /// Tear a machine down and take it out of the rack.
    ///
    /// If it was selected the selection becomes `None`.
    pub fn destroy_machine(
        &mut self,
        cx: &mut NodeContext<'_>,
        index: u8,
    ) -> Result<MachineNode, NodeError> {
        let machine = self
            .machines
            .get_mut(&index)
            .ok_or(NodeError::UnknownMachine(index))?;
        if machine.base().is_live() {
            machine.destroy(cx)?;
        }
        self.sequencer.remove_machine_entries(cx, index)?;
        let removed = self
            .machines
            .remove(&index)
            .ok_or(NodeError::UnknownMachine(index))?;

        if self.selected == Some(index) {
            self.selected = None;
            cx.post(NodeEvent::SelectionChanged {
                old: Some(index),
                new: None,
            });
        }
        cx.post(NodeEvent::MachineDestroyed { index });
        Ok(removed)
    }

    // ───────────────────────────────────────────────────────────────
    // Selection
    // ───────────────────────────────────────────────────────────────

    pub fn selected_index(&self) -> Option<u8> {
        self.selected
    }

    pub fn selected_machine(&self) -> Option<&MachineNode> {
        self.selected.and_then(|i| self.machines.get(&i))
    }

    pub fn set_selected_index(
        &mut self,
        cx: &mut NodeContext<'_>,
        index: Option<u8>,
    ) -> Result<(), NodeError> {
        if let Some(i) = index {
            if !self.machines.contains_key(&i) {
                return Err(NodeError::UnknownMachine(i));
            }
        }
        if self.selected == index {
            return Ok(());
        }
        let old = std::mem::replace(&mut self.selected, index);
        cx.post(NodeEvent::SelectionChanged { old, new: index });
        Ok(())
    }

    /// Select the rack's machine with the same identity as `machine`.
    pub fn select_machine(
        &mut self,
        cx: &mut NodeContext<'_>,
        machine: &MachineNode,
    ) -> Result<(), NodeError> {
        let index = machine.index();
        match self.machines.get(&index) {
            Some(m) if m.id() == machine.id() => self.set_selected_index(cx, Some(index)),
            _ => Err(NodeError::UnknownMachine(index)),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Mute / solo
    // ───────────────────────────────────────────────────────────────

    /// Mute or unmute one machine. Every solo is cleared first.
    pub fn set_mute(&mut self, cx: &mut NodeContext<'_>, index: u8, mute: bool) -> Result<(), NodeError> {
        if !self.machines.contains_key(&index) {
            return Err(NodeError::UnknownMachine(index));
        }
        for machine in self.machines.values_mut() {
            machine.mixer_mut().set_solo(cx, false)?;
        }
        if let Some(machine) = self.machines.get_mut(&index) {
            machine.mixer_mut().set_mute(cx, mute)?;
        }
        cx.post(NodeEvent::SoloRefresh);
        Ok(())
    }

    /// Solo is exclusive: soloing one machine mutes and unsolos every other,
    /// unsoloing unmutes everything.
    pub fn set_solo(&mut self, cx: &mut NodeContext<'_>, index: u8, solo: bool) -> Result<(), NodeError> {
        if !self.machines.contains_key(&index) {
            return Err(NodeError::UnknownMachine(index));
        }
        for (i, machine) in self.machines.iter_mut() {
            let mixer = machine.mixer_mut();
            if !solo {
                mixer.set_solo(cx, false)?;
                mixer.set_mute(cx, false)?;
            } else if *i == index {
                mixer.set_mute(cx, false)?;
                mixer.set_solo(cx, true)?;
            } else {
                mixer.set_solo(cx, false)?;
                mixer.set_mute(cx, true)?;
            }
        }
        cx.post(NodeEvent::SoloRefresh);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Song files
    // ───────────────────────────────────────────────────────────────

    /// Have the engine load a song file, then rebuild the rack from it.
    pub fn load_song(&mut self, cx: &mut NodeContext<'_>, path: impl Into<String>) -> Result<(), NodeError> {
        self.path = Some(path.into());
        self.resync(cx)
    }

    /// Have the engine write the current song to the rack's path.
    pub fn save_song(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let path = self.path.as_deref().ok_or(NodeError::MissingPath)?;
        cx.send(Message::new(Target::Rack, control::SAVE_SONG).arg(path))?;
        log::info!("rack saved to song {}", path);
        Ok(())
    }

    /// Rebuild the whole rack from what the engine holds.
    fn resync(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if let Some(path) = &self.path {
            log::info!("loading song {}", path);
            cx.send(Message::new(Target::Rack, control::BLANKRACK))?;
            cx.send(Message::new(Target::Rack, control::LOAD_SONG).arg(path.as_str()))?;
        }

        self.master.attach()?;
        self.master.restore(cx)?;

        for index in 0..RACK_SLOTS {
            let msg = Message::new(Target::Rack, control::MACHINE_TYPE).arg(index);
            let Some(type_name) = cx.query_text(msg)? else {
                if self.machines.remove(&index).is_some() {
                    log::debug!("slot {} is empty in the engine, dropped", index);
                }
                continue;
            };
            let Some(machine_type) = MachineType::from_engine_name(&type_name) else {
                log::warn!("slot {}: unknown machine type {:?}", index, type_name);
                self.machines.remove(&index);
                continue;
            };
            let mut machine = MachineNode::new(index, machine_type, "");
            machine.attach()?;
            machine.restore(cx)?;
            self.machines.insert(index, machine);
        }

        self.sequencer.attach()?;
        self.sequencer.restore(cx)?;

        if self.selected.is_some_and(|i| !self.machines.contains_key(&i)) {
            self.selected = None;
        }
        cx.post(NodeEvent::RackRestored {
            machines: self.machines.len(),
        });
        Ok(())
    }
}

impl Node for RackNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn create_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.master.create(cx)?;
        for machine in self.machines.values_mut() {
            machine.create(cx)?;
        }
        self.sequencer.create(cx)
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.master.update(cx)?;
        for machine in self.machines.values_mut() {
            machine.update(cx)?;
        }
        self.sequencer.update(cx)
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.resync(cx)
    }

    fn destroy_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.sequencer.destroy(cx)?;
        for machine in self.machines.values_mut().rev() {
            machine.destroy(cx)?;
        }
        self.master.destroy(cx)
    }
}

impl Tagged for RackNode {
    const TYPE_NAME: &'static str = "RackNode";
    const NESTED: &'static [&'static str] = &["MasterNode", "MachineNode", "SequencerNode"];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.opt_string(Self::TAG_PATH, self.path.as_deref())?;
        w.object(Self::TAG_MASTER, &self.master)?;
        w.objects(Self::TAG_MACHINES, self.machines.values())?;
        w.object(Self::TAG_SEQUENCER, &self.sequencer)?;
        w.i32(Self::TAG_SELECTED, self.selected.map_or(-1, i32::from))
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_PATH => self.path = Some(r.string()?),
            Self::TAG_MASTER => self.master = r.object()?,
            Self::TAG_MACHINES => {
                let mut machines = BTreeMap::new();
                for machine in r.objects::<MachineNode>()? {
                    let index = machine.index();
                    if index >= RACK_SLOTS || machines.insert(index, machine).is_some() {
                        return Err(CodecError::InvalidValue {
                            tag,
                            reason: format!("machine index {}", index),
                        });
                    }
                }
                self.machines = machines;
            }
            Self::TAG_SEQUENCER => self.sequencer = r.object()?,
            Self::TAG_SELECTED => {
                let v = r.i32()?;
                self.selected = u8::try_from(v).ok().filter(|i| self.machines.contains_key(i));
                if v >= 0 && self.selected.is_none() {
                    log::warn!("selected machine {} is not in the rack, cleared", v);
                }
            }
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}
