// src/state/effect.rs
//
// Insert effects. Each machine has two effect slots; each effect owns a
// fixed parameter table.

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::engine::{Message, Target, control};
use crate::error::{CodecError, NodeError};
use crate::node::{Node, NodeBase, NodeContext, NodeKind};

use super::param_info::{ParamBank, ParamId, ParamInfo, ParamUnit};

/// Parameter ids of the auto-wah.
pub mod auto_wah {
    use super::ParamId;
    pub const CUTOFF: ParamId = 0;
    pub const DEPTH: ParamId = 1;
    pub const RESONANCE: ParamId = 2;
    pub const SPEED: ParamId = 3;
    pub const WET: ParamId = 4;
}

/// Parameter ids of the delay.
pub mod delay {
    use super::ParamId;
    pub const DRY: ParamId = 0;
    pub const FEEDBACK: ParamId = 1;
    pub const TIME: ParamId = 2;
    pub const WET: ParamId = 3;
}

/// Parameter ids of the reverb.
pub mod reverb {
    use super::ParamId;
    pub const DAMPING: ParamId = 0;
    pub const PRE_DELAY: ParamId = 1;
    pub const ROOM: ParamId = 2;
    pub const WET: ParamId = 3;
}

const fn p(id: ParamId, name: &'static str, control: &'static str) -> ParamInfo {
    ParamInfo::new(id, name, control)
}

const AUTO_WAH: &[ParamInfo] = &[
    p(0, "Cutoff", "cutoff")
        .range(0.1, 6.0)
        .default(2.23)
        .unit(ParamUnit::KHz),
    p(1, "Depth", "depth").default(1.0),
    p(2, "Resonance", "resonance").default(0.5),
    p(3, "Speed", "speed").default(0.4),
    p(4, "Wet", "wet").default(1.0),
];

const BITCRUSHER: &[ParamInfo] = &[
    p(0, "Depth", "depth").range(1.0, 16.0).default(3.0).stepped(),
    p(1, "Dry", "dry"),
    p(2, "Wet", "wet").default(1.0),
];

const CABINET_SIMULATOR: &[ParamInfo] = &[
    p(0, "Cabinet", "cabinet").range(0.0, 4.0).stepped(),
    p(1, "Wet", "wet").default(1.0),
];

const CHORUS: &[ParamInfo] = &[
    p(0, "Delay", "delay")
        .range(0.01, 0.5)
        .default(0.2)
        .unit(ParamUnit::Seconds),
    p(1, "Depth", "depth").range(0.1, 0.95).default(0.5),
    p(2, "Rate", "rate").default(0.4),
    p(3, "Wet", "wet").default(0.5),
];

const COMB_FILTER: &[ParamInfo] = &[
    p(0, "Dry", "dry"),
    p(1, "Frequency", "freq")
        .range(100.0, 2000.0)
        .default(440.0)
        .unit(ParamUnit::Hz),
    p(2, "Resonance", "reso").default(0.5),
    p(3, "Wet", "wet").default(1.0),
];

const COMPRESSOR: &[ParamInfo] = &[
    p(0, "Attack", "attack")
        .range(0.00001, 0.2)
        .default(0.01)
        .unit(ParamUnit::Seconds),
    p(1, "Ratio", "ratio").default(1.0),
    p(2, "Release", "release")
        .range(0.001, 0.2)
        .default(0.05)
        .unit(ParamUnit::Seconds),
    p(3, "Sidechain", "sidechain")
        .range(0.0, 13.0)
        .default(13.0)
        .stepped(),
    p(4, "Threshold", "threshold").default(0.1),
];

const DELAY: &[ParamInfo] = &[
    p(0, "Dry", "dry").default(1.0),
    p(1, "Feedback", "feedback").default(0.5),
    p(2, "Time", "time").range(1.0, 12.0).default(8.0).stepped(),
    p(3, "Wet", "wet").default(0.5),
];

const DISTORTION: &[ParamInfo] = &[
    p(0, "Program", "program").range(0.0, 4.0).stepped(),
    p(1, "Amount", "amount").range(0.0, 20.0).default(16.5),
    p(2, "Post", "post").default(0.2),
    p(3, "Pre", "pre").range(0.0, 5.0).default(4.0),
];

const FLANGER: &[ParamInfo] = &[
    p(0, "Depth", "depth").range(0.1, 0.95).default(0.8),
    p(1, "Feedback", "feedback").range(0.25, 0.8).default(0.4),
    p(2, "Rate", "rate")
        .range(0.04, 2.0)
        .default(0.4)
        .unit(ParamUnit::Hz),
    p(3, "Wet", "wet").default(0.5),
];

const LIMITER: &[ParamInfo] = &[
    p(0, "Attack", "attack").range(0.0, 0.1).default(0.01),
    p(1, "Post", "post").range(0.0, 2.0).default(0.5),
    p(2, "Pre", "pre").range(0.0, 8.0).default(4.0),
    p(3, "Release", "release").range(0.0, 0.5).default(0.05),
];

const MULTI_FILTER: &[ParamInfo] = &[
    p(0, "Frequency", "frequency").default(0.5),
    p(1, "Gain", "gain").range(-12.0, 12.0).unit(ParamUnit::Db),
    p(2, "Mode", "mode").range(0.0, 5.0).stepped(),
    p(3, "Resonance", "resonance"),
];

const PARAMETRIC_EQ: &[ParamInfo] = &[
    p(0, "Frequency", "frequency").default(0.5),
    p(1, "Gain", "gain").range(-12.0, 12.0).unit(ParamUnit::Db),
    p(2, "Width", "width").range(0.5, 4.0).default(1.0),
];

const PHASER: &[ParamInfo] = &[
    p(0, "Depth", "depth").range(0.1, 0.95).default(0.8),
    p(1, "Feedback", "feedback").range(0.1, 0.95).default(0.5),
    p(2, "Rate", "rate")
        .range(0.04, 2.0)
        .default(0.4)
        .unit(ParamUnit::Hz),
    p(3, "Wet", "wet").default(0.5),
];

const REVERB: &[ParamInfo] = &[
    p(0, "Damping", "damping").range(0.0, 0.8).default(0.25),
    p(1, "Pre-delay", "pre_delay")
        .range(0.0, 0.1)
        .default(0.01)
        .unit(ParamUnit::Seconds),
    p(2, "Room", "room").default(0.75),
    p(3, "Wet", "wet").default(0.25),
];

const STATIC_FLANGER: &[ParamInfo] = &[
    p(0, "Depth", "depth").default(0.5),
    p(1, "Feedback", "feedback").range(0.25, 0.9).default(0.5),
    p(2, "Wet", "wet").default(0.5),
];

const VINYL_SIMULATOR: &[ParamInfo] = &[
    p(0, "Dust", "dust").default(0.2),
    p(1, "Age", "age").default(0.5),
    p(2, "Noise", "noise").default(0.2),
    p(3, "Wet", "wet").default(1.0),
];

/// Effect units the engine provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EffectType {
    #[default]
    AutoWah,
    Bitcrusher,
    CabinetSimulator,
    Chorus,
    CombFilter,
    Compressor,
    Delay,
    Distortion,
    Flanger,
    Limiter,
    MultiFilter,
    ParametricEq,
    Phaser,
    Reverb,
    StaticFlanger,
    VinylSimulator,
}

impl EffectType {
    pub const ALL: [EffectType; 16] = [
        EffectType::AutoWah,
        EffectType::Bitcrusher,
        EffectType::CabinetSimulator,
        EffectType::Chorus,
        EffectType::CombFilter,
        EffectType::Compressor,
        EffectType::Delay,
        EffectType::Distortion,
        EffectType::Flanger,
        EffectType::Limiter,
        EffectType::MultiFilter,
        EffectType::ParametricEq,
        EffectType::Phaser,
        EffectType::Reverb,
        EffectType::StaticFlanger,
        EffectType::VinylSimulator,
    ];

    /// Name the engine knows this effect by.
    pub fn control_name(self) -> &'static str {
        match self {
            EffectType::AutoWah => "autowah",
            EffectType::Bitcrusher => "bitcrusher",
            EffectType::CabinetSimulator => "cabinetsimulator",
            EffectType::Chorus => "chorus",
            EffectType::CombFilter => "combfilter",
            EffectType::Compressor => "compressor",
            EffectType::Delay => "delay",
            EffectType::Distortion => "distortion",
            EffectType::Flanger => "flanger",
            EffectType::Limiter => "limiter",
            EffectType::MultiFilter => "multifilter",
            EffectType::ParametricEq => "parametriceq",
            EffectType::Phaser => "phaser",
            EffectType::Reverb => "reverb",
            EffectType::StaticFlanger => "staticflanger",
            EffectType::VinylSimulator => "vinylsimulator",
        }
    }

    pub fn from_control_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.control_name() == name)
    }

    pub fn params(self) -> &'static [ParamInfo] {
        match self {
            EffectType::AutoWah => AUTO_WAH,
            EffectType::Bitcrusher => BITCRUSHER,
            EffectType::CabinetSimulator => CABINET_SIMULATOR,
            EffectType::Chorus => CHORUS,
            EffectType::CombFilter => COMB_FILTER,
            EffectType::Compressor => COMPRESSOR,
            EffectType::Delay => DELAY,
            EffectType::Distortion => DISTORTION,
            EffectType::Flanger => FLANGER,
            EffectType::Limiter => LIMITER,
            EffectType::MultiFilter => MULTI_FILTER,
            EffectType::ParametricEq => PARAMETRIC_EQ,
            EffectType::Phaser => PHASER,
            EffectType::Reverb => REVERB,
            EffectType::StaticFlanger => STATIC_FLANGER,
            EffectType::VinylSimulator => VINYL_SIMULATOR,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}

/// One effect in one slot of one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectNode {
    base: NodeBase,

    /// Rack index of the owning machine.
    machine: u8,

    /// Effect slot, 0 or 1.
    slot: u8,

    effect_type: EffectType,

    bypass: bool,

    params: ParamBank,
}

impl Default for EffectNode {
    fn default() -> Self {
        Self::new(EffectType::default(), 0, 0)
    }
}

impl EffectNode {
    const TAG_MACHINE: u16 = 10;
    const TAG_SLOT: u16 = 11;
    const TAG_TYPE: u16 = 12;
    const TAG_BYPASS: u16 = 13;

    pub fn new(effect_type: EffectType, machine: u8, slot: u8) -> Self {
        Self {
            base: NodeBase::named(NodeKind::Effect, effect_type.control_name()),
            machine,
            slot,
            effect_type,
            bypass: false,
            params: ParamBank::new(effect_type.params()),
        }
    }

    pub fn effect_type(&self) -> EffectType {
        self.effect_type
    }

    pub fn machine_index(&self) -> u8 {
        self.machine
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn target(&self) -> Target {
        Target::Effect {
            machine: self.machine,
            slot: self.slot,
        }
    }

    pub fn params(&self) -> &ParamBank {
        &self.params
    }

    pub fn get(&self, id: ParamId) -> Option<f32> {
        self.params.get(id)
    }

    /// Set a parameter, forwarding it when the effect is live.
    pub fn set(&mut self, cx: &mut NodeContext<'_>, id: ParamId, value: f32) -> Result<(), NodeError> {
        if self.base.is_live() {
            self.params.set_and_send(cx, self.target(), id, value)?;
        } else {
            self.params.set(id, value)?;
        }
        Ok(())
    }

    /// Set a parameter on a detached effect.
    pub fn set_local(&mut self, id: ParamId, value: f32) -> Result<(), NodeError> {
        self.params.set(id, value).map(|_| ())
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn set_bypass(&mut self, cx: &mut NodeContext<'_>, bypass: bool) -> Result<(), NodeError> {
        if self.bypass == bypass {
            return Ok(());
        }
        if self.base.is_live() {
            cx.send(Message::new(self.target(), control::BYPASS).arg(bypass))?;
        }
        self.bypass = bypass;
        Ok(())
    }
}

impl Node for EffectNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn create_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(
            Message::new(Target::Effects(self.machine), control::CREATE)
                .arg(self.slot)
                .arg(self.effect_type.control_name()),
        )?;
        Ok(())
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(Message::new(self.target(), control::BYPASS).arg(self.bypass))?;
        self.params.push(cx, self.target())
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if let Some(v) = cx.query_f32(self.target(), control::BYPASS)? {
            self.bypass = v != 0.0;
        }
        self.params.pull(cx, self.target())
    }

    fn destroy_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(Message::new(Target::Effects(self.machine), control::REMOVE).arg(self.slot))?;
        Ok(())
    }
}

impl Tagged for EffectNode {
    const TYPE_NAME: &'static str = "EffectNode";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(Self::TAG_MACHINE, self.machine)?;
        w.u8(Self::TAG_SLOT, self.slot)?;
        w.u8(Self::TAG_TYPE, self.effect_type.to_u8())?;
        w.bool(Self::TAG_BYPASS, self.bypass)?;
        self.params.encode(w)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_MACHINE => self.machine = r.u8()?,
            Self::TAG_SLOT => self.slot = r.u8()?,
            Self::TAG_TYPE => {
                let raw = r.u8()?;
                self.effect_type = EffectType::from_u8(raw).ok_or(CodecError::InvalidValue {
                    tag,
                    reason: format!("unknown effect type {}", raw),
                })?;
                self.params = ParamBank::new(self.effect_type.params());
            }
            Self::TAG_BYPASS => self.bypass = r.bool()?,
            _ if tag >= ParamBank::TAG_BASE => return self.params.decode(tag, r),
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::virtual_rack::VirtualRack;
    use std::sync::mpsc;

    #[test]
    fn test_auto_wah_defaults() {
        let fx = EffectNode::new(EffectType::AutoWah, 0, 0);
        assert_eq!(fx.get(auto_wah::CUTOFF), Some(2.23));
        assert_eq!(fx.get(auto_wah::DEPTH), Some(1.0));
        assert_eq!(fx.get(auto_wah::RESONANCE), Some(0.5));
        assert_eq!(fx.get(auto_wah::SPEED), Some(0.4));
        assert_eq!(fx.get(auto_wah::WET), Some(1.0));
    }

    #[test]
    fn test_every_default_is_in_range() {
        for ty in EffectType::ALL {
            for info in ty.params() {
                assert!(info.accepts(info.default), "{:?}.{}", ty, info.name);
            }
            assert_eq!(EffectType::from_control_name(ty.control_name()), Some(ty));
        }
    }

    #[test]
    fn test_out_of_range_is_not_forwarded() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);
        cx.send(
            Message::new(Target::Rack, control::CREATE)
                .arg("subsynth")
                .arg("bass")
                .arg(0u8),
        )
        .unwrap();

        let mut fx = EffectNode::new(EffectType::AutoWah, 0, 1);
        fx.create(&mut cx).unwrap();
        fx.set(&mut cx, auto_wah::CUTOFF, 1.5).unwrap();
        assert!(fx.set(&mut cx, auto_wah::CUTOFF, 9.0).is_err());
        assert!(fx.set(&mut cx, auto_wah::WET, -0.1).is_err());
        drop(cx);

        assert_eq!(fx.get(auto_wah::CUTOFF), Some(1.5));
        assert_eq!(fx.get(auto_wah::WET), Some(1.0));
        let target = Target::Effect { machine: 0, slot: 1 };
        assert_eq!(engine.value(target, "cutoff"), Some(1.5));
        assert_eq!(engine.value(target, "wet"), None);
        assert_eq!(engine.count_sent("cutoff"), 1);
    }

    #[test]
    fn test_detached_set_sends_nothing() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut fx = EffectNode::new(EffectType::Delay, 2, 0);
        fx.set(&mut cx, delay::FEEDBACK, 0.9).unwrap();
        drop(cx);
        assert_eq!(fx.get(delay::FEEDBACK), Some(0.9));
        assert!(engine.sent().is_empty());
    }

    #[test]
    fn test_params_use_tags_from_200() {
        let fx = EffectNode::new(EffectType::AutoWah, 0, 0);
        let ids: Vec<u16> = fx
            .params()
            .iter()
            .map(|(info, _)| ParamBank::TAG_BASE + info.id as u16)
            .collect();
        assert_eq!(ids, vec![200, 201, 202, 203, 204]);
    }

    #[test]
    fn test_roundtrip() {
        let codec = Codec::standard().unwrap();
        let mut fx = EffectNode::new(EffectType::Reverb, 3, 1);
        fx.set_local(reverb::ROOM, 0.3).unwrap();
        fx.bypass = true;

        let copy = codec.clone_via_roundtrip(&fx).unwrap();
        assert_eq!(copy, fx);
    }
}
