// src/state/machine.rs
//
// A machine: one instrument in one rack slot, and the fixed set of components
// it owns.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::engine::{Message, Target, control};
use crate::error::{CodecError, NodeError};
use crate::node::{Node, NodeBase, NodeContext, NodeKind};

use super::components::{
    EffectsChannel, MixerChannel, PresetComponent, SynthComponent, VolumeComponent,
};
use super::pattern::PatternSequencerComponent;

/// Instrument type of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MachineType {
    #[default]
    SubSynth,
    PcmSynth,
    BeatBox,
    Bassline,
    PadSynth,
    Organ,
    Vocoder,
    EightBitSynth,
    Modular,
    FmSynth,
    KsSynth,
    SawSynth,
}

impl MachineType {
    pub const ALL: [MachineType; 12] = [
        MachineType::SubSynth,
        MachineType::PcmSynth,
        MachineType::BeatBox,
        MachineType::Bassline,
        MachineType::PadSynth,
        MachineType::Organ,
        MachineType::Vocoder,
        MachineType::EightBitSynth,
        MachineType::Modular,
        MachineType::FmSynth,
        MachineType::KsSynth,
        MachineType::SawSynth,
    ];

    /// Name the engine knows this machine type by.
    pub fn engine_name(self) -> &'static str {
        match self {
            MachineType::SubSynth => "subsynth",
            MachineType::PcmSynth => "pcmsynth",
            MachineType::BeatBox => "beatbox",
            MachineType::Bassline => "bassline",
            MachineType::PadSynth => "padsynth",
            MachineType::Organ => "organ",
            MachineType::Vocoder => "vocoder",
            MachineType::EightBitSynth => "8bitsynth",
            MachineType::Modular => "modular",
            MachineType::FmSynth => "fmsynth",
            MachineType::KsSynth => "kssynth",
            MachineType::SawSynth => "sawsynth",
        }
    }

    pub fn from_engine_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.engine_name() == name)
    }

    /// File extension of this type's preset files, without the dot.
    pub fn preset_extension(self) -> &'static str {
        self.engine_name()
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.engine_name())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Component access
// ═══════════════════════════════════════════════════════════════════

/// The components every machine owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Preset,
    Volume,
    Synth,
    Mixer,
    Effects,
    Patterns,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 6] = [
        ComponentKind::Preset,
        ComponentKind::Volume,
        ComponentKind::Synth,
        ComponentKind::Mixer,
        ComponentKind::Effects,
        ComponentKind::Patterns,
    ];
}

/// Borrowed component, typed by kind.
#[derive(Debug, Clone, Copy)]
pub enum ComponentRef<'a> {
    Preset(&'a PresetComponent),
    Volume(&'a VolumeComponent),
    Synth(&'a SynthComponent),
    Mixer(&'a MixerChannel),
    Effects(&'a EffectsChannel),
    Patterns(&'a PatternSequencerComponent),
}

impl<'a> ComponentRef<'a> {
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentRef::Preset(_) => ComponentKind::Preset,
            ComponentRef::Volume(_) => ComponentKind::Volume,
            ComponentRef::Synth(_) => ComponentKind::Synth,
            ComponentRef::Mixer(_) => ComponentKind::Mixer,
            ComponentRef::Effects(_) => ComponentKind::Effects,
            ComponentRef::Patterns(_) => ComponentKind::Patterns,
        }
    }

    pub fn as_node(&self) -> &'a dyn Node {
        match *self {
            ComponentRef::Preset(c) => c,
            ComponentRef::Volume(c) => c,
            ComponentRef::Synth(c) => c,
            ComponentRef::Mixer(c) => c,
            ComponentRef::Effects(c) => c,
            ComponentRef::Patterns(c) => c,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Machine
// ═══════════════════════════════════════════════════════════════════

/// One instrument in one rack slot.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineNode {
    base: NodeBase,

    /// Rack slot, 0..14.
    index: u8,

    machine_type: MachineType,

    preset: PresetComponent,
    volume: VolumeComponent,
    synth: SynthComponent,
    mixer: MixerChannel,
    effects: EffectsChannel,
    patterns: PatternSequencerComponent,
}

impl Default for MachineNode {
    fn default() -> Self {
        Self::new(0, MachineType::default(), "")
    }
}

impl MachineNode {
    const TAG_INDEX: u16 = 10;
    const TAG_TYPE: u16 = 11;
    const TAG_PRESET: u16 = 12;
    const TAG_VOLUME: u16 = 13;
    const TAG_SYNTH: u16 = 14;
    const TAG_MIXER: u16 = 15;
    const TAG_EFFECTS: u16 = 16;
    const TAG_PATTERNS: u16 = 17;

    pub fn new(index: u8, machine_type: MachineType, name: impl Into<String>) -> Self {
        Self {
            base: NodeBase::named(NodeKind::Machine, name),
            index,
            machine_type,
            preset: PresetComponent::new(index),
            volume: VolumeComponent::new(index),
            synth: SynthComponent::new(index),
            mixer: MixerChannel::new(index),
            effects: EffectsChannel::new(index),
            patterns: PatternSequencerComponent::new(index),
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn machine_type(&self) -> MachineType {
        self.machine_type
    }

    pub fn name(&self) -> &str {
        self.base.name().unwrap_or_default()
    }

    /// Rename the machine, forwarding to the engine when live.
    pub fn set_name(&mut self, cx: &mut NodeContext<'_>, name: impl Into<String>) -> Result<(), NodeError> {
        let name = name.into();
        if self.base.is_live() {
            cx.send(
                Message::new(Target::Rack, control::MACHINE_NAME)
                    .arg(self.index)
                    .arg(name.as_str()),
            )?;
        }
        self.base.set_name(Some(name));
        Ok(())
    }

    pub fn preset(&self) -> &PresetComponent {
        &self.preset
    }

    pub fn preset_mut(&mut self) -> &mut PresetComponent {
        &mut self.preset
    }

    pub fn volume(&self) -> &VolumeComponent {
        &self.volume
    }

    pub fn volume_mut(&mut self) -> &mut VolumeComponent {
        &mut self.volume
    }

    pub fn synth(&self) -> &SynthComponent {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut SynthComponent {
        &mut self.synth
    }

    pub fn mixer(&self) -> &MixerChannel {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut MixerChannel {
        &mut self.mixer
    }

    pub fn effects(&self) -> &EffectsChannel {
        &self.effects
    }

    pub fn effects_mut(&mut self) -> &mut EffectsChannel {
        &mut self.effects
    }

    pub fn patterns(&self) -> &PatternSequencerComponent {
        &self.patterns
    }

    pub fn patterns_mut(&mut self) -> &mut PatternSequencerComponent {
        &mut self.patterns
    }

    pub fn component(&self, kind: ComponentKind) -> ComponentRef<'_> {
        match kind {
            ComponentKind::Preset => ComponentRef::Preset(&self.preset),
            ComponentKind::Volume => ComponentRef::Volume(&self.volume),
            ComponentKind::Synth => ComponentRef::Synth(&self.synth),
            ComponentKind::Mixer => ComponentRef::Mixer(&self.mixer),
            ComponentKind::Effects => ComponentRef::Effects(&self.effects),
            ComponentKind::Patterns => ComponentRef::Patterns(&self.patterns),
        }
    }

    /// Components in creation order.
    fn children(&mut self) -> [&mut dyn Node; 6] {
        [
            &mut self.preset,
            &mut self.volume,
            &mut self.synth,
            &mut self.mixer,
            &mut self.effects,
            &mut self.patterns,
        ]
    }
}

impl Node for MachineNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn create_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(
            Message::new(Target::Rack, control::CREATE)
                .arg(self.machine_type.engine_name())
                .arg(self.name())
                .arg(self.index),
        )?;
        for child in self.children() {
            child.create(cx)?;
        }
        Ok(())
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(
            Message::new(Target::Rack, control::MACHINE_NAME)
                .arg(self.index)
                .arg(self.name()),
        )?;
        for child in self.children() {
            child.update(cx)?;
        }
        Ok(())
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let msg = Message::new(Target::Rack, control::MACHINE_NAME).arg(self.index);
        if let Some(name) = cx.query_text(msg)? {
            self.base.set_name(Some(name));
        }
        for child in self.children() {
            child.attach()?;
            child.restore(cx)?;
        }
        Ok(())
    }

    fn destroy_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for child in self.children().into_iter().rev() {
            child.destroy(cx)?;
        }
        cx.send(Message::new(Target::Rack, control::REMOVE).arg(self.index))?;
        Ok(())
    }
}

impl Tagged for MachineNode {
    const TYPE_NAME: &'static str = "MachineNode";
    const NESTED: &'static [&'static str] = &[
        "PresetComponent",
        "VolumeComponent",
        "SynthComponent",
        "MixerChannel",
        "EffectsChannel",
        "PatternSequencerComponent",
    ];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(Self::TAG_INDEX, self.index)?;
        w.u8(Self::TAG_TYPE, self.machine_type.to_u8())?;
        w.object(Self::TAG_PRESET, &self.preset)?;
        w.object(Self::TAG_VOLUME, &self.volume)?;
        w.object(Self::TAG_SYNTH, &self.synth)?;
        w.object(Self::TAG_MIXER, &self.mixer)?;
        w.object(Self::TAG_EFFECTS, &self.effects)?;
        w.object(Self::TAG_PATTERNS, &self.patterns)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_INDEX => self.index = r.u8()?,
            Self::TAG_TYPE => {
                let v = r.u8()?;
                self.machine_type = MachineType::from_u8(v).ok_or(CodecError::InvalidValue {
                    tag,
                    reason: format!("machine type {}", v),
                })?;
            }
            Self::TAG_PRESET => self.preset = r.object()?,
            Self::TAG_VOLUME => self.volume = r.object()?,
            Self::TAG_SYNTH => self.synth = r.object()?,
            Self::TAG_MIXER => self.mixer = r.object()?,
            Self::TAG_EFFECTS => self.effects = r.object()?,
            Self::TAG_PATTERNS => self.patterns = r.object()?,
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::node::Lifecycle;
    use crate::state::{EffectType, auto_wah, mixer};
    use crate::virtual_rack::VirtualRack;
    use std::sync::mpsc;

    #[test]
    fn test_machine_type_names() {
        for t in MachineType::ALL {
            assert_eq!(MachineType::from_engine_name(t.engine_name()), Some(t));
            assert_eq!(MachineType::from_u8(t.to_u8()), Some(t));
        }
        assert_eq!(MachineType::EightBitSynth.preset_extension(), "8bitsynth");
        assert_eq!(MachineType::from_engine_name("theremin"), None);
    }

    #[test]
    fn test_create_registers_machine_then_components() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut machine = MachineNode::new(3, MachineType::PadSynth, "pads");
        machine.create(&mut cx).unwrap();
        for kind in ComponentKind::ALL {
            assert_eq!(machine.component(kind).kind(), kind);
            assert_eq!(machine.component(kind).as_node().lifecycle(), Lifecycle::Created);
        }
        drop(cx);
        assert_eq!(engine.machine(3), Some(("padsynth", "pads")));
    }

    #[test]
    fn test_update_then_restore_mirrors_machine() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut machine = MachineNode::new(0, MachineType::SubSynth, "bass");
        machine.create(&mut cx).unwrap();
        machine.mixer_mut().set(&mut cx, mixer::VOLUME, 0.8).unwrap();
        machine.volume_mut().set_out(&mut cx, 1.2).unwrap();
        machine
            .effects_mut()
            .create_effect(&mut cx, 1, EffectType::AutoWah)
            .unwrap()
            .set(&mut cx, auto_wah::CUTOFF, 1.5)
            .unwrap();
        machine.set_name(&mut cx, "sub").unwrap();
        machine.update(&mut cx).unwrap();

        let mut pulled = MachineNode::new(0, MachineType::SubSynth, "");
        pulled.attach().unwrap();
        pulled.restore(&mut cx).unwrap();

        assert_eq!(pulled.name(), "sub");
        assert_eq!(pulled.mixer().get(mixer::VOLUME), Some(0.8));
        assert_eq!(pulled.volume().out(), 1.2);
        let effect = pulled.effects().effect(1).unwrap();
        assert_eq!(effect.effect_type(), EffectType::AutoWah);
        assert_eq!(effect.get(auto_wah::CUTOFF), Some(1.5));
        assert!(pulled.effects().effect(0).is_none());
    }

    #[test]
    fn test_destroy_removes_from_engine() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut machine = MachineNode::new(5, MachineType::BeatBox, "drums");
        machine.create(&mut cx).unwrap();
        machine
            .effects_mut()
            .create_effect(&mut cx, 0, EffectType::Reverb)
            .unwrap();
        machine.destroy(&mut cx).unwrap();
        machine.destroy(&mut cx).unwrap();
        drop(cx);

        assert_eq!(machine.lifecycle(), Lifecycle::Destroyed);
        assert_eq!(engine.machine(5), None);
        assert_eq!(engine.count_sent(control::REMOVE), 2);
    }

    #[test]
    fn test_codec_roundtrip_keeps_components() {
        let codec = Codec::standard().unwrap();
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut machine = MachineNode::new(2, MachineType::Bassline, "acid");
        machine.preset_mut().set_local(Some("squelch".into()), vec![1, 2, 3]);
        machine.mixer_mut().set(&mut cx, mixer::PAN, 0.25).unwrap();
        machine
            .effects_mut()
            .create_effect(&mut cx, 0, EffectType::Delay)
            .unwrap();
        machine
            .patterns_mut()
            .pattern_at(&mut cx, 0, 3)
            .unwrap()
            .phrase_mut()
            .trigger_on(2, 36, 0.25, 1.0, 0)
            .unwrap();

        let copy: MachineNode = codec.clone_via_roundtrip(&machine).unwrap();
        assert_eq!(copy, machine);
        assert_eq!(copy.preset().data(), &[1, 2, 3]);
        assert!(copy.patterns().pattern("A04").unwrap().phrase().is_selected(2));
    }
}
