// src/state/components.rs
//
// Per-machine components: preset, volume, synth settings, mixer channel and
// effect slots. Each is a node of its own, owned by exactly one machine and
// addressed by that machine's rack index.

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::engine::{Arg, Message, Reply, Target, control};
use crate::error::{CodecError, EngineError, NodeError};
use crate::event::NodeEvent;
use crate::node::{Node, NodeBase, NodeContext, NodeKind};

use super::effect::{EffectNode, EffectType};
use super::param_info::{ParamBank, ParamId, ParamInfo, ParamUnit};

/// Tag holding the owning machine's index, shared by every component.
const TAG_MACHINE: u16 = 10;

/// Parameter ids of the mixer channel.
pub mod mixer {
    use super::ParamId;
    pub const VOLUME: ParamId = 0;
    pub const PAN: ParamId = 1;
    pub const REVERB_SEND: ParamId = 2;
    pub const DELAY_SEND: ParamId = 3;
    pub const EQ_BASS: ParamId = 4;
    pub const EQ_MID: ParamId = 5;
    pub const EQ_HIGH: ParamId = 6;
    pub const STEREO_WIDTH: ParamId = 7;
}

/// Parameter ids of the synth component.
pub mod synth {
    use super::ParamId;
    pub const POLYPHONY: ParamId = 0;
    pub const TRANSPOSE: ParamId = 1;
}

const MIXER: &[ParamInfo] = &[
    ParamInfo::new(0, "Volume", "volume").range(0.0, 2.0).default(1.0),
    ParamInfo::new(1, "Pan", "pan")
        .range(-1.0, 1.0)
        .unit(ParamUnit::Pan),
    ParamInfo::new(2, "Reverb Send", "reverb_send"),
    ParamInfo::new(3, "Delay Send", "delay_send"),
    ParamInfo::new(4, "EQ Bass", "eq_bass").range(-1.0, 1.0),
    ParamInfo::new(5, "EQ Mid", "eq_mid").range(-1.0, 1.0),
    ParamInfo::new(6, "EQ High", "eq_high").range(-1.0, 1.0),
    ParamInfo::new(7, "Stereo Width", "stereo_width"),
];

const VOLUME: &[ParamInfo] = &[ParamInfo::new(0, "Out", "volume_out")
    .range(0.0, 2.0)
    .default(1.0)];

const SYNTH: &[ParamInfo] = &[
    ParamInfo::new(0, "Polyphony", "polyphony")
        .range(1.0, 16.0)
        .default(4.0)
        .stepped(),
    ParamInfo::new(1, "Transpose", "transpose")
        .range(-4.0, 4.0)
        .stepped(),
];

// ═══════════════════════════════════════════════════════════════════
// Preset
// ═══════════════════════════════════════════════════════════════════

/// The machine's patch: a named blob of engine preset data.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetComponent {
    base: NodeBase,
    machine: u8,
    preset_name: Option<String>,
    data: Vec<u8>,
}

impl Default for PresetComponent {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PresetComponent {
    const TAG_NAME: u16 = 11;
    const TAG_DATA: u16 = 12;

    pub fn new(machine: u8) -> Self {
        Self {
            base: NodeBase::new(NodeKind::Component),
            machine,
            preset_name: None,
            data: Vec::new(),
        }
    }

    pub fn preset_name(&self) -> Option<&str> {
        self.preset_name.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// Replace the preset, loading it into the engine when live.
    pub fn load(
        &mut self,
        cx: &mut NodeContext<'_>,
        name: impl Into<String>,
        data: Vec<u8>,
    ) -> Result<(), NodeError> {
        let name = name.into();
        if self.base.is_live() {
            cx.send(Message::new(Target::Machine(self.machine), control::PRESET).arg(data.clone()))?;
            cx.send(
                Message::new(Target::Machine(self.machine), control::PRESET_NAME).arg(name.as_str()),
            )?;
        }
        self.preset_name = Some(name);
        self.data = data;
        Ok(())
    }

    /// Replace the preset bytes without touching the engine.
    pub fn set_local(&mut self, name: Option<String>, data: Vec<u8>) {
        self.preset_name = name;
        self.data = data;
    }
}

impl Node for PresetComponent {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let target = Target::Machine(self.machine);
        if self.has_data() {
            cx.send(Message::new(target, control::PRESET).arg(self.data.clone()))?;
        }
        if let Some(name) = &self.preset_name {
            cx.send(Message::new(target, control::PRESET_NAME).arg(name.as_str()))?;
        }
        Ok(())
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let target = Target::Machine(self.machine);
        match cx.query(Message::new(target, control::PRESET))? {
            Reply::Blob(data) => self.data = data,
            Reply::None => {}
            other => {
                return Err(EngineError::UnexpectedReply {
                    control: control::PRESET.to_string(),
                    reply: format!("{:?}", other),
                }
                .into());
            }
        }
        if let Some(name) = cx.query_text(Message::new(target, control::PRESET_NAME))? {
            self.preset_name = Some(name);
        }
        Ok(())
    }
}

impl Tagged for PresetComponent {
    const TYPE_NAME: &'static str = "PresetComponent";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(TAG_MACHINE, self.machine)?;
        w.opt_string(Self::TAG_NAME, self.preset_name.as_deref())?;
        w.bytes(Self::TAG_DATA, &self.data)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            TAG_MACHINE => self.machine = r.u8()?,
            Self::TAG_NAME => self.preset_name = Some(r.string()?),
            Self::TAG_DATA => self.data = r.bytes()?,
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Volume / Synth
// ═══════════════════════════════════════════════════════════════════

/// Machine output level.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeComponent {
    base: NodeBase,
    machine: u8,
    params: ParamBank,
}

impl Default for VolumeComponent {
    fn default() -> Self {
        Self::new(0)
    }
}

impl VolumeComponent {
    pub fn new(machine: u8) -> Self {
        Self {
            base: NodeBase::new(NodeKind::Component),
            machine,
            params: ParamBank::new(VOLUME),
        }
    }

    pub fn out(&self) -> f32 {
        self.params.get(0).unwrap_or(1.0)
    }

    pub fn set_out(&mut self, cx: &mut NodeContext<'_>, value: f32) -> Result<(), NodeError> {
        if self.base.is_live() {
            self.params
                .set_and_send(cx, Target::Machine(self.machine), 0, value)?;
        } else {
            self.params.set(0, value)?;
        }
        Ok(())
    }
}

impl Node for VolumeComponent {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.params.push(cx, Target::Machine(self.machine))
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.params.pull(cx, Target::Machine(self.machine))
    }
}

impl Tagged for VolumeComponent {
    const TYPE_NAME: &'static str = "VolumeComponent";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(TAG_MACHINE, self.machine)?;
        self.params.encode(w)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            TAG_MACHINE => self.machine = r.u8()?,
            _ if tag >= ParamBank::TAG_BASE => return self.params.decode(tag, r),
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

/// Voice settings of the machine's synth engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthComponent {
    base: NodeBase,
    machine: u8,
    params: ParamBank,
}

impl Default for SynthComponent {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SynthComponent {
    pub fn new(machine: u8) -> Self {
        Self {
            base: NodeBase::new(NodeKind::Component),
            machine,
            params: ParamBank::new(SYNTH),
        }
    }

    pub fn get(&self, id: ParamId) -> Option<f32> {
        self.params.get(id)
    }

    pub fn set(&mut self, cx: &mut NodeContext<'_>, id: ParamId, value: f32) -> Result<(), NodeError> {
        if self.base.is_live() {
            self.params
                .set_and_send(cx, Target::Machine(self.machine), id, value)?;
        } else {
            self.params.set(id, value)?;
        }
        Ok(())
    }
}

impl Node for SynthComponent {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.params.push(cx, Target::Machine(self.machine))
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.params.pull(cx, Target::Machine(self.machine))
    }
}

impl Tagged for SynthComponent {
    const TYPE_NAME: &'static str = "SynthComponent";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(TAG_MACHINE, self.machine)?;
        self.params.encode(w)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            TAG_MACHINE => self.machine = r.u8()?,
            _ if tag >= ParamBank::TAG_BASE => return self.params.decode(tag, r),
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Mixer channel
// ═══════════════════════════════════════════════════════════════════

/// The machine's strip on the rack mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerChannel {
    base: NodeBase,
    machine: u8,
    mute: bool,
    solo: bool,
    params: ParamBank,
}

impl Default for MixerChannel {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MixerChannel {
    const TAG_MUTE: u16 = 11;
    const TAG_SOLO: u16 = 12;

    pub fn new(machine: u8) -> Self {
        Self {
            base: NodeBase::new(NodeKind::Component),
            machine,
            mute: false,
            solo: false,
            params: ParamBank::new(MIXER),
        }
    }

    pub fn is_mute(&self) -> bool {
        self.mute
    }

    pub fn is_solo(&self) -> bool {
        self.solo
    }

    pub fn get(&self, id: ParamId) -> Option<f32> {
        self.params.get(id)
    }

    pub fn params(&self) -> &ParamBank {
        &self.params
    }

    pub fn set(&mut self, cx: &mut NodeContext<'_>, id: ParamId, value: f32) -> Result<(), NodeError> {
        if self.base.is_live() {
            self.params
                .set_and_send(cx, Target::Mixer(self.machine), id, value)?;
        } else {
            self.params.set(id, value)?;
        }
        Ok(())
    }

    pub fn set_mute(&mut self, cx: &mut NodeContext<'_>, mute: bool) -> Result<(), NodeError> {
        if self.mute == mute {
            return Ok(());
        }
        if self.base.is_live() {
            cx.send(Message::new(Target::Mixer(self.machine), control::MUTE).arg(mute))?;
        }
        self.mute = mute;
        Ok(())
    }

    pub fn set_solo(&mut self, cx: &mut NodeContext<'_>, solo: bool) -> Result<(), NodeError> {
        if self.solo == solo {
            return Ok(());
        }
        if self.base.is_live() {
            cx.send(Message::new(Target::Mixer(self.machine), control::SOLO).arg(solo))?;
        }
        self.solo = solo;
        Ok(())
    }
}

impl Node for MixerChannel {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let target = Target::Mixer(self.machine);
        cx.send(Message::new(target, control::MUTE).arg(self.mute))?;
        cx.send(Message::new(target, control::SOLO).arg(self.solo))?;
        self.params.push(cx, target)
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let target = Target::Mixer(self.machine);
        if let Some(v) = cx.query_f32(target, control::MUTE)? {
            self.mute = v != 0.0;
        }
        if let Some(v) = cx.query_f32(target, control::SOLO)? {
            self.solo = v != 0.0;
        }
        self.params.pull(cx, target)
    }
}

impl Tagged for MixerChannel {
    const TYPE_NAME: &'static str = "MixerChannel";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(TAG_MACHINE, self.machine)?;
        w.bool(Self::TAG_MUTE, self.mute)?;
        w.bool(Self::TAG_SOLO, self.solo)?;
        self.params.encode(w)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            TAG_MACHINE => self.machine = r.u8()?,
            Self::TAG_MUTE => self.mute = r.bool()?,
            Self::TAG_SOLO => self.solo = r.bool()?,
            _ if tag >= ParamBank::TAG_BASE => return self.params.decode(tag, r),
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Effects channel
// ═══════════════════════════════════════════════════════════════════

/// Number of insert effect slots per machine.
pub const EFFECT_SLOTS: u8 = 2;

/// The machine's insert effect slots.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectsChannel {
    base: NodeBase,
    machine: u8,
    slots: [Option<EffectNode>; EFFECT_SLOTS as usize],
}

impl Default for EffectsChannel {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EffectsChannel {
    const TAG_EFFECTS: u16 = 11;

    pub fn new(machine: u8) -> Self {
        Self {
            base: NodeBase::new(NodeKind::Component),
            machine,
            slots: [None, None],
        }
    }

    fn check_slot(slot: u8) -> Result<usize, NodeError> {
        if slot < EFFECT_SLOTS {
            Ok(slot as usize)
        } else {
            Err(NodeError::InvalidSlot(slot))
        }
    }

    pub fn effect(&self, slot: u8) -> Option<&EffectNode> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    pub fn effect_mut(&mut self, slot: u8) -> Option<&mut EffectNode> {
        self.slots.get_mut(slot as usize).and_then(Option::as_mut)
    }

    pub fn effects(&self) -> impl Iterator<Item = &EffectNode> {
        self.slots.iter().flatten()
    }

    /// Put a new effect in `slot`, replacing whatever is there.
    pub fn create_effect(
        &mut self,
        cx: &mut NodeContext<'_>,
        slot: u8,
        effect_type: EffectType,
    ) -> Result<&mut EffectNode, NodeError> {
        let i = Self::check_slot(slot)?;
        let live = self.base.is_live();

        if let Some(old) = self.slots[i].as_mut() {
            if live {
                old.destroy(cx)?;
            }
        }

        let mut effect = EffectNode::new(effect_type, self.machine, slot);
        if live {
            effect.create(cx)?;
        }
        cx.post(NodeEvent::EffectChanged {
            machine: self.machine,
            slot,
            effect: Some(effect_type),
        });
        Ok(self.slots[i].insert(effect))
    }

    /// Remove the effect in `slot`.
    pub fn remove_effect(
        &mut self,
        cx: &mut NodeContext<'_>,
        slot: u8,
    ) -> Result<EffectNode, NodeError> {
        let i = Self::check_slot(slot)?;
        let effect = self.slots[i].as_mut().ok_or(NodeError::EmptySlot(slot))?;
        if self.base.is_live() {
            effect.destroy(cx)?;
        }
        let removed = self.slots[i].take().ok_or(NodeError::EmptySlot(slot))?;
        cx.post(NodeEvent::EffectChanged {
            machine: self.machine,
            slot,
            effect: None,
        });
        Ok(removed)
    }
}

impl Node for EffectsChannel {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn create_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for effect in self.slots.iter_mut().flatten() {
            effect.create(cx)?;
        }
        Ok(())
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for effect in self.slots.iter_mut().flatten() {
            effect.update(cx)?;
        }
        Ok(())
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for slot in 0..EFFECT_SLOTS {
            let msg = Message::new(Target::Effects(self.machine), control::TYPE).arg(Arg::Int(slot as i32));
            let restored = match cx.query_text(msg)? {
                Some(name) => {
                    let Some(effect_type) = EffectType::from_control_name(&name) else {
                        log::warn!("machine {} slot {}: unknown effect {:?}", self.machine, slot, name);
                        continue;
                    };
                    let mut effect = EffectNode::new(effect_type, self.machine, slot);
                    effect.attach()?;
                    effect.restore(cx)?;
                    Some(effect)
                }
                None => None,
            };
            self.slots[slot as usize] = restored;
        }
        Ok(())
    }

    fn destroy_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for effect in self.slots.iter_mut().flatten() {
            effect.destroy(cx)?;
        }
        Ok(())
    }
}

impl Tagged for EffectsChannel {
    const TYPE_NAME: &'static str = "EffectsChannel";
    const NESTED: &'static [&'static str] = &["EffectNode"];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(TAG_MACHINE, self.machine)?;
        w.objects(Self::TAG_EFFECTS, self.slots.iter().flatten())
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            TAG_MACHINE => self.machine = r.u8()?,
            Self::TAG_EFFECTS => {
                for effect in r.objects::<EffectNode>()? {
                    let slot = effect.slot();
                    let entry = self.slots.get_mut(slot as usize).ok_or(CodecError::InvalidValue {
                        tag,
                        reason: format!("effect slot {}", slot),
                    })?;
                    *entry = Some(effect);
                }
            }
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}
