// src/state/master.rs
//
// The rack's master section: equalizer, limiter, delay, reverb and output
// volume. Each part is a node with its own parameter bank.

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::engine::{Message, Target, control};
use crate::error::{CodecError, NodeError};
use crate::node::{Node, NodeBase, NodeContext, NodeKind};

use super::param_info::{ParamBank, ParamId, ParamInfo, ParamUnit};

/// Parameter ids of the master equalizer.
pub mod eq {
    use super::ParamId;
    pub const BASS: ParamId = 0;
    pub const MID: ParamId = 1;
    pub const HIGH: ParamId = 2;
}

/// Parameter ids of the master limiter.
pub mod limiter {
    use super::ParamId;
    pub const ATTACK: ParamId = 0;
    pub const POST: ParamId = 1;
    pub const PRE: ParamId = 2;
    pub const RELEASE: ParamId = 3;
}

/// Parameter ids of the master delay.
pub mod master_delay {
    use super::ParamId;
    pub const DAMPING: ParamId = 0;
    pub const FEEDBACK: ParamId = 1;
    pub const PAN: ParamId = 2;
    pub const STEPS: ParamId = 3;
    pub const TIME: ParamId = 4;
    pub const WET: ParamId = 5;
}

/// Parameter ids of the master reverb.
pub mod master_reverb {
    use super::ParamId;
    pub const DAMPING: ParamId = 0;
    pub const PRE_DELAY: ParamId = 1;
    pub const ROOM: ParamId = 2;
    pub const WET: ParamId = 3;
}

/// Parameter id of the master output.
pub const MASTER_OUT: ParamId = 0;

const EQ: &[ParamInfo] = &[
    ParamInfo::new(0, "Bass", "bass").range(-1.0, 1.0),
    ParamInfo::new(1, "Mid", "mid").range(-1.0, 1.0),
    ParamInfo::new(2, "High", "high").range(-1.0, 1.0),
];

const LIMITER: &[ParamInfo] = &[
    ParamInfo::new(0, "Attack", "attack").range(0.0, 0.1).default(0.01).unit(ParamUnit::Seconds),
    ParamInfo::new(1, "Post", "post").range(0.0, 2.0).default(1.0),
    ParamInfo::new(2, "Pre", "pre").range(0.0, 8.0).default(1.0),
    ParamInfo::new(3, "Release", "release").range(0.0, 0.5).default(0.5).unit(ParamUnit::Seconds),
];

const DELAY: &[ParamInfo] = &[
    ParamInfo::new(0, "Damping", "damping"),
    ParamInfo::new(1, "Feedback", "feedback").default(0.5),
    ParamInfo::new(2, "Pan", "pan").range(-1.0, 1.0).unit(ParamUnit::Pan),
    ParamInfo::new(3, "Steps", "steps").range(1.0, 8.0).default(4.0).stepped(),
    ParamInfo::new(4, "Time", "time").range(1.0, 12.0).default(8.0).stepped(),
    ParamInfo::new(5, "Wet", "wet").default(0.5),
];

const REVERB: &[ParamInfo] = &[
    ParamInfo::new(0, "Damping", "damping").default(0.25),
    ParamInfo::new(1, "Pre Delay", "pre_delay").range(0.0, 0.1).default(0.02).unit(ParamUnit::Seconds),
    ParamInfo::new(2, "Room", "room").default(0.75),
    ParamInfo::new(3, "Wet", "wet").default(0.25),
];

const VOLUME: &[ParamInfo] = &[ParamInfo::new(0, "Out", "out").range(0.0, 2.0).default(1.0)];

/// One part of the master section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MasterPartKind {
    #[default]
    Equalizer,
    Limiter,
    Delay,
    Reverb,
    Volume,
}

impl MasterPartKind {
    pub const ALL: [MasterPartKind; 5] = [
        MasterPartKind::Equalizer,
        MasterPartKind::Limiter,
        MasterPartKind::Delay,
        MasterPartKind::Reverb,
        MasterPartKind::Volume,
    ];

    pub fn engine_name(self) -> &'static str {
        match self {
            MasterPartKind::Equalizer => "eq",
            MasterPartKind::Limiter => "limiter",
            MasterPartKind::Delay => "delay",
            MasterPartKind::Reverb => "reverb",
            MasterPartKind::Volume => "volume",
        }
    }

    pub fn params(self) -> &'static [ParamInfo] {
        match self {
            MasterPartKind::Equalizer => EQ,
            MasterPartKind::Limiter => LIMITER,
            MasterPartKind::Delay => DELAY,
            MasterPartKind::Reverb => REVERB,
            MasterPartKind::Volume => VOLUME,
        }
    }

    /// The output stage has no bypass switch.
    pub fn has_bypass(self) -> bool {
        self != MasterPartKind::Volume
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}

// ═══════════════════════════════════════════════════════════════════
// Master part
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct MasterPart {
    base: NodeBase,
    kind: MasterPartKind,
    bypass: bool,
    params: ParamBank,
}

impl Default for MasterPart {
    fn default() -> Self {
        Self::new(MasterPartKind::default())
    }
}

impl MasterPart {
    const TAG_KIND: u16 = 10;
    const TAG_BYPASS: u16 = 11;

    pub fn new(kind: MasterPartKind) -> Self {
        Self {
            base: NodeBase::named(NodeKind::MasterPart, kind.engine_name()),
            kind,
            bypass: false,
            params: ParamBank::new(kind.params()),
        }
    }

    pub fn kind(&self) -> MasterPartKind {
        self.kind
    }

    pub fn target(&self) -> Target {
        Target::Master(self.kind.engine_name())
    }

    pub fn params(&self) -> &ParamBank {
        &self.params
    }

    pub fn get(&self, id: ParamId) -> Option<f32> {
        self.params.get(id)
    }

    pub fn set(&mut self, cx: &mut NodeContext<'_>, id: ParamId, value: f32) -> Result<(), NodeError> {
        if self.base.is_live() {
            self.params.set_and_send(cx, self.target(), id, value)?;
        } else {
            self.params.set(id, value)?;
        }
        Ok(())
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn set_bypass(&mut self, cx: &mut NodeContext<'_>, bypass: bool) -> Result<(), NodeError> {
        if !self.kind.has_bypass() || self.bypass == bypass {
            return Ok(());
        }
        if self.base.is_live() {
            cx.send(Message::new(self.target(), control::BYPASS).arg(bypass))?;
        }
        self.bypass = bypass;
        Ok(())
    }
}

impl Node for MasterPart {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if self.kind.has_bypass() {
            cx.send(Message::new(self.target(), control::BYPASS).arg(self.bypass))?;
        }
        self.params.push(cx, self.target())
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if self.kind.has_bypass() {
            if let Some(v) = cx.query_f32(self.target(), control::BYPASS)? {
                self.bypass = v != 0.0;
            }
        }
        self.params.pull(cx, self.target())
    }
}

impl Tagged for MasterPart {
    const TYPE_NAME: &'static str = "MasterPart";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(Self::TAG_KIND, self.kind.to_u8())?;
        w.bool(Self::TAG_BYPASS, self.bypass)?;
        self.params.encode(w)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_KIND => {
                let v = r.u8()?;
                let kind = MasterPartKind::from_u8(v).ok_or(CodecError::InvalidValue {
                    tag,
                    reason: format!("master part {}", v),
                })?;
                if kind != self.kind {
                    self.kind = kind;
                    self.params = ParamBank::new(kind.params());
                }
            }
            Self::TAG_BYPASS => self.bypass = r.bool()?,
            _ if tag >= ParamBank::TAG_BASE => return self.params.decode(tag, r),
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Master node
// ═══════════════════════════════════════════════════════════════════

/// The master section, one per rack.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterNode {
    base: NodeBase,
    parts: [MasterPart; 5],
}

impl Default for MasterNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterNode {
    /// Part tags are `TAG_PARTS + kind`.
    const TAG_PARTS: u16 = 10;

    pub fn new() -> Self {
        Self {
            base: NodeBase::named(NodeKind::Master, "master"),
            parts: MasterPartKind::ALL.map(MasterPart::new),
        }
    }

    pub fn part(&self, kind: MasterPartKind) -> &MasterPart {
        &self.parts[kind as usize]
    }

    pub fn part_mut(&mut self, kind: MasterPartKind) -> &mut MasterPart {
        &mut self.parts[kind as usize]
    }

    pub fn parts(&self) -> impl Iterator<Item = &MasterPart> {
        self.parts.iter()
    }

    pub fn out(&self) -> f32 {
        self.part(MasterPartKind::Volume)
            .get(MASTER_OUT)
            .unwrap_or(1.0)
    }

    pub fn set_out(&mut self, cx: &mut NodeContext<'_>, value: f32) -> Result<(), NodeError> {
        self.part_mut(MasterPartKind::Volume).set(cx, MASTER_OUT, value)
    }
}

impl Node for MasterNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn create_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for part in &mut self.parts {
            part.create(cx)?;
        }
        Ok(())
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for part in &mut self.parts {
            part.update(cx)?;
        }
        Ok(())
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for part in &mut self.parts {
            part.attach()?;
            part.restore(cx)?;
        }
        Ok(())
    }

    fn destroy_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for part in &mut self.parts {
            part.destroy(cx)?;
        }
        Ok(())
    }
}

impl Tagged for MasterNode {
    const TYPE_NAME: &'static str = "MasterNode";
    const NESTED: &'static [&'static str] = &["MasterPart"];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        for part in &self.parts {
            w.object(Self::TAG_PARTS + part.kind.to_u8() as u16, part)?;
        }
        Ok(())
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        let Some(kind) = tag
            .checked_sub(Self::TAG_PARTS)
            .and_then(|i| u8::try_from(i).ok())
            .and_then(MasterPartKind::from_u8)
        else {
            return self.base.decode(tag, r);
        };
        let part: MasterPart = r.object()?;
        if part.kind != kind {
            return Err(CodecError::InvalidValue {
                tag,
                reason: format!("expected {:?}, found {:?}", kind, part.kind),
            });
        }
        self.parts[kind as usize] = part;
        Ok(true)
    }
}
