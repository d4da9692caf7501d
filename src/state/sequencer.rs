// src/state/sequencer.rs
//
// Song sequencer: tempo, play mode and the arrangement of patterns into a
// song.

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::engine::{Message, RACK_SLOTS, Target, control};
use crate::error::{CodecError, EngineError, NodeError};
use crate::node::{Node, NodeBase, NodeContext, NodeKind};

use super::param_info::{ParamBank, ParamId, ParamInfo, ParamUnit};
use super::pattern::{BANKS, PATTERNS_PER_BANK, pattern_name};

/// Parameter ids of the sequencer.
pub mod transport {
    use super::ParamId;
    pub const BPM: ParamId = 0;
    pub const SHUFFLE: ParamId = 1;
}

const SEQUENCER: &[ParamInfo] = &[
    ParamInfo::new(0, "Tempo", "bpm")
        .range(60.0, 250.0)
        .default(120.0)
        .unit(ParamUnit::Bpm),
    ParamInfo::new(1, "Shuffle", "shuffle_amount"),
];

const MODE: &str = "mode";
const SONG_END_MODE: &str = "song_end_mode";

/// What the transport plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencerMode {
    /// Loop the selected pattern of every machine.
    #[default]
    Pattern,
    /// Play the song arrangement.
    Song,
}

/// What happens when the song runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SongEndMode {
    #[default]
    Play,
    Stop,
    Loop,
}

impl SequencerMode {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(SequencerMode::Pattern),
            1 => Some(SequencerMode::Song),
            _ => None,
        }
    }
}

impl SongEndMode {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(SongEndMode::Play),
            1 => Some(SongEndMode::Stop),
            2 => Some(SongEndMode::Loop),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Song entry
// ═══════════════════════════════════════════════════════════════════

/// One pattern placed on the song timeline. Positions are in measures.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SongEntry {
    pub machine: u8,
    pub bank: u8,
    pub pattern: u8,
    pub start: f32,
    pub end: f32,
}

impl SongEntry {
    const TAG_MACHINE: u16 = 1;
    const TAG_BANK: u16 = 2;
    const TAG_PATTERN: u16 = 3;
    const TAG_START: u16 = 4;
    const TAG_END: u16 = 5;

    pub fn new(machine: u8, bank: u8, pattern: u8, start: f32, end: f32) -> Self {
        Self {
            machine,
            bank,
            pattern,
            start,
            end,
        }
    }

    pub fn pattern_name(&self) -> String {
        pattern_name(self.bank, self.pattern)
    }

    fn validate(&self) -> Result<(), NodeError> {
        if self.machine >= RACK_SLOTS {
            return Err(NodeError::InvalidIndex(self.machine));
        }
        if self.bank >= BANKS || self.pattern >= PATTERNS_PER_BANK {
            return Err(NodeError::UnknownPattern(format!("{}:{}", self.bank, self.pattern)));
        }
        if !(self.start >= 0.0 && self.end > self.start) {
            return Err(NodeError::OutOfRange {
                param: "song entry end",
                value: self.end,
                min: self.start,
                max: f32::INFINITY,
            });
        }
        Ok(())
    }

    fn message(&self) -> Message {
        Message::new(Target::Sequencer, control::PATTERN_EVENT)
            .arg(self.machine)
            .arg(self.bank)
            .arg(self.pattern)
            .arg(self.start)
            .arg(self.end)
    }

    /// Parse `machine bank pattern start end`.
    fn parse(text: &str) -> Result<Self, String> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        let [machine, bank, pattern, start, end] = fields.as_slice() else {
            return Err(format!("expected 5 fields in {:?}", text));
        };
        let bad = |e: &dyn std::fmt::Display| format!("{:?}: {}", text, e);
        Ok(Self {
            machine: machine.parse().map_err(|e| bad(&e))?,
            bank: bank.parse().map_err(|e| bad(&e))?,
            pattern: pattern.parse().map_err(|e| bad(&e))?,
            start: start.parse().map_err(|e| bad(&e))?,
            end: end.parse().map_err(|e| bad(&e))?,
        })
    }
}

impl Tagged for SongEntry {
    const TYPE_NAME: &'static str = "SongEntry";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.u8(Self::TAG_MACHINE, self.machine)?;
        w.u8(Self::TAG_BANK, self.bank)?;
        w.u8(Self::TAG_PATTERN, self.pattern)?;
        w.f32(Self::TAG_START, self.start)?;
        w.f32(Self::TAG_END, self.end)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_MACHINE => self.machine = r.u8()?,
            Self::TAG_BANK => self.bank = r.u8()?,
            Self::TAG_PATTERN => self.pattern = r.u8()?,
            Self::TAG_START => self.start = r.f32()?,
            Self::TAG_END => self.end = r.f32()?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Sequencer
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct SequencerNode {
    base: NodeBase,
    mode: SequencerMode,
    song_end_mode: SongEndMode,
    params: ParamBank,
    entries: Vec<SongEntry>,
}

impl Default for SequencerNode {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencerNode {
    const TAG_MODE: u16 = 10;
    const TAG_END_MODE: u16 = 11;
    const TAG_ENTRIES: u16 = 12;

    pub fn new() -> Self {
        Self {
            base: NodeBase::named(NodeKind::Sequencer, "sequencer"),
            mode: SequencerMode::default(),
            song_end_mode: SongEndMode::default(),
            params: ParamBank::new(SEQUENCER),
            entries: Vec::new(),
        }
    }

    pub fn bpm(&self) -> f32 {
        self.params.get(transport::BPM).unwrap_or(120.0)
    }

    pub fn set_bpm(&mut self, cx: &mut NodeContext<'_>, bpm: f32) -> Result<(), NodeError> {
        self.set(cx, transport::BPM, bpm)
    }

    pub fn shuffle(&self) -> f32 {
        self.params.get(transport::SHUFFLE).unwrap_or(0.0)
    }

    pub fn set_shuffle(&mut self, cx: &mut NodeContext<'_>, amount: f32) -> Result<(), NodeError> {
        self.set(cx, transport::SHUFFLE, amount)
    }

    fn set(&mut self, cx: &mut NodeContext<'_>, id: ParamId, value: f32) -> Result<(), NodeError> {
        if self.base.is_live() {
            self.params.set_and_send(cx, Target::Sequencer, id, value)?;
        } else {
            self.params.set(id, value)?;
        }
        Ok(())
    }

    pub fn mode(&self) -> SequencerMode {
        self.mode
    }

    pub fn set_mode(&mut self, cx: &mut NodeContext<'_>, mode: SequencerMode) -> Result<(), NodeError> {
        if self.base.is_live() {
            cx.send(Message::new(Target::Sequencer, MODE).arg(mode as i32))?;
        }
        self.mode = mode;
        Ok(())
    }

    pub fn song_end_mode(&self) -> SongEndMode {
        self.song_end_mode
    }

    pub fn set_song_end_mode(
        &mut self,
        cx: &mut NodeContext<'_>,
        mode: SongEndMode,
    ) -> Result<(), NodeError> {
        if self.base.is_live() {
            cx.send(Message::new(Target::Sequencer, SONG_END_MODE).arg(mode as i32))?;
        }
        self.song_end_mode = mode;
        Ok(())
    }

    pub fn entries(&self) -> &[SongEntry] {
        &self.entries
    }

    /// Place a pattern on the song timeline.
    pub fn add_entry(&mut self, cx: &mut NodeContext<'_>, entry: SongEntry) -> Result<(), NodeError> {
        entry.validate()?;
        if self.base.is_live() {
            cx.send(entry.message())?;
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Drop every entry of `machine`. Returns how many were removed.
    pub fn remove_machine_entries(
        &mut self,
        cx: &mut NodeContext<'_>,
        machine: u8,
    ) -> Result<usize, NodeError> {
        let before = self.entries.len();
        self.entries.retain(|e| e.machine != machine);
        let removed = before - self.entries.len();
        if removed > 0 && self.base.is_live() {
            self.push_entries(cx)?;
        }
        Ok(removed)
    }

    pub fn clear_entries(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if self.base.is_live() {
            cx.send(Message::new(Target::Sequencer, control::CLEAR_PATTERNS))?;
        }
        self.entries.clear();
        Ok(())
    }

    fn push_entries(&self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(Message::new(Target::Sequencer, control::CLEAR_PATTERNS))?;
        for entry in &self.entries {
            cx.send(entry.message())?;
        }
        Ok(())
    }
}

impl Node for SequencerNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(Message::new(Target::Sequencer, MODE).arg(self.mode as i32))?;
        cx.send(Message::new(Target::Sequencer, SONG_END_MODE).arg(self.song_end_mode as i32))?;
        self.params.push(cx, Target::Sequencer)?;
        self.push_entries(cx)
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if let Some(v) = cx.query_f32(Target::Sequencer, MODE)? {
            self.mode = SequencerMode::from_u8(v as u8).unwrap_or_default();
        }
        if let Some(v) = cx.query_f32(Target::Sequencer, SONG_END_MODE)? {
            self.song_end_mode = SongEndMode::from_u8(v as u8).unwrap_or_default();
        }
        self.params.pull(cx, Target::Sequencer)?;

        let text = cx
            .query_text(Message::new(Target::Sequencer, control::PATTERN_EVENTS))?
            .unwrap_or_default();
        self.entries = text
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(SongEntry::parse)
            .collect::<Result<_, _>>()
            .map_err(|reply| EngineError::UnexpectedReply {
                control: control::PATTERN_EVENTS.to_string(),
                reply,
            })?;
        Ok(())
    }
}

impl Tagged for SequencerNode {
    const TYPE_NAME: &'static str = "SequencerNode";
    const NESTED: &'static [&'static str] = &["SongEntry"];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(Self::TAG_MODE, self.mode as u8)?;
        w.u8(Self::TAG_END_MODE, self.song_end_mode as u8)?;
        w.objects(Self::TAG_ENTRIES, &self.entries)?;
        self.params.encode(w)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_MODE => {
                let v = r.u8()?;
                self.mode = SequencerMode::from_u8(v).ok_or(CodecError::InvalidValue {
                    tag,
                    reason: format!("sequencer mode {}", v),
                })?;
            }
            Self::TAG_END_MODE => {
                let v = r.u8()?;
                self.song_end_mode = SongEndMode::from_u8(v).ok_or(CodecError::InvalidValue {
                    tag,
                    reason: format!("song end mode {}", v),
                })?;
            }
            Self::TAG_ENTRIES => self.entries = r.objects()?,
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
    fn test_bpm_range() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut seq = SequencerNode::new();
        assert_eq!(seq.bpm(), 120.0);
        assert!(seq.set_bpm(&mut cx, 30.0).is_err());
        assert!(seq.set_bpm(&mut cx, 251.0).is_err());
        seq.set_bpm(&mut cx, 140.0).unwrap();
        assert_eq!(seq.bpm(), 140.0);
    }

    #[test]
    fn test_entry_validation() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut seq = SequencerNode::new();
        assert!(matches!(
            seq.add_entry(&mut cx, SongEntry::new(14, 0, 0, 0.0, 1.0)),
            Err(NodeError::InvalidIndex(14))
        ));
        assert!(matches!(
            seq.add_entry(&mut cx, SongEntry::new(0, 4, 0, 0.0, 1.0)),
            Err(NodeError::UnknownPattern(_))
        ));
        assert!(seq.add_entry(&mut cx, SongEntry::new(0, 0, 0, 2.0, 2.0)).is_err());
        assert!(seq.entries().is_empty());
    }

    #[test]
    fn test_push_and_pull() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut seq = SequencerNode::new();
        seq.create(&mut cx).unwrap();
        seq.set_bpm(&mut cx, 98.0).unwrap();
        seq.set_mode(&mut cx, SequencerMode::Song).unwrap();
        seq.set_song_end_mode(&mut cx, SongEndMode::Loop).unwrap();
        seq.add_entry(&mut cx, SongEntry::new(0, 0, 0, 0.0, 4.0)).unwrap();
        seq.add_entry(&mut cx, SongEntry::new(1, 2, 5, 4.0, 8.0)).unwrap();
        seq.add_entry(&mut cx, SongEntry::new(1, 0, 1, 8.0, 9.0)).unwrap();
        assert_eq!(seq.remove_machine_entries(&mut cx, 0).unwrap(), 1);

        let mut pulled = SequencerNode::new();
        pulled.attach().unwrap();
        pulled.restore(&mut cx).unwrap();
        drop(cx);

        assert_eq!(engine.song_event_count(), 2);
        assert_eq!(pulled.bpm(), 98.0);
        assert_eq!(pulled.mode(), SequencerMode::Song);
        assert_eq!(pulled.song_end_mode(), SongEndMode::Loop);
        assert_eq!(pulled.entries(), seq.entries());
        assert_eq!(pulled.entries()[0].pattern_name(), "C06");
    }

    #[test]
    fn test_codec_roundtrip() {
        let codec = Codec::standard().unwrap();
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut seq = SequencerNode::new();
        seq.set_shuffle(&mut cx, 0.3).unwrap();
        seq.add_entry(&mut cx, SongEntry::new(3, 1, 1, 0.0, 2.0)).unwrap();
        let copy: SequencerNode = codec.clone_via_roundtrip(&seq).unwrap();
        assert_eq!(copy, seq);
    }
}
