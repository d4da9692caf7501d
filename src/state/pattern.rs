// src/state/pattern.rs
//
// Patterns and the per-machine pattern sequencer.
//
// A machine has 4 banks of 16 patterns, named A01..D16. Only patterns that
// hold data are materialized as nodes.

use std::collections::BTreeMap;

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::engine::{Message, Target, control};
use crate::error::{CodecError, EngineError, NodeError};
use crate::event::NodeEvent;
use crate::node::{Node, NodeBase, NodeContext, NodeKind};

use super::phrase::{Phrase, Resolution, Scale, Trigger};

pub const BANKS: u8 = 4;
pub const PATTERNS_PER_BANK: u8 = 16;

/// Lengths, in measures, a pattern may have.
pub const PATTERN_LENGTHS: [u32; 4] = [1, 2, 4, 8];

/// `A01`..`D16`.
pub fn pattern_name(bank: u8, index: u8) -> String {
    format!("{}{:02}", (b'A' + bank) as char, index + 1)
}

/// Inverse of [`pattern_name`].
pub fn parse_pattern_name(name: &str) -> Option<(u8, u8)> {
    let mut chars = name.chars();
    let letter = chars.next()?;
    if !letter.is_ascii_uppercase() {
        return None;
    }
    let bank = letter as u8 - b'A';
    let number: u8 = chars.as_str().parse().ok()?;
    if bank >= BANKS || number == 0 || number > PATTERNS_PER_BANK {
        return None;
    }
    Some((bank, number - 1))
}

/// Parse engine note data: `start pitch velocity end flags`, joined by `|`.
fn parse_note_data(text: &str) -> Result<Vec<Trigger>, String> {
    text.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|note| {
            let fields: Vec<&str> = note.split_whitespace().collect();
            let [start, pitch, velocity, end, flags] = fields.as_slice() else {
                return Err(format!("expected 5 fields in {:?}", note));
            };
            let bad = |e: &dyn std::fmt::Display| format!("{:?}: {}", note, e);
            let beat: f32 = start.parse().map_err(|e| bad(&e))?;
            let end: f32 = end.parse().map_err(|e| bad(&e))?;
            Ok(Trigger {
                beat,
                pitch: pitch.parse().map_err(|e| bad(&e))?,
                gate: end - beat,
                velocity: velocity.parse().map_err(|e| bad(&e))?,
                flags: flags.parse().map_err(|e| bad(&e))?,
                selected: true,
            })
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════
// Pattern
// ═══════════════════════════════════════════════════════════════════

/// One pattern of one machine.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternNode {
    base: NodeBase,
    machine: u8,
    bank: u8,
    index: u8,
    phrase: Phrase,
}

impl Default for PatternNode {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

impl PatternNode {
    const TAG_MACHINE: u16 = 10;
    const TAG_BANK: u16 = 11;
    const TAG_INDEX: u16 = 12;
    const TAG_PHRASE: u16 = 13;

    pub fn new(machine: u8, bank: u8, index: u8) -> Self {
        Self {
            base: NodeBase::named(NodeKind::Pattern, pattern_name(bank, index)),
            machine,
            bank,
            index,
            phrase: Phrase::new(1),
        }
    }

    pub fn name(&self) -> String {
        pattern_name(self.bank, self.index)
    }

    pub fn machine_index(&self) -> u8 {
        self.machine
    }

    pub fn bank(&self) -> u8 {
        self.bank
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn target(&self) -> Target {
        Target::Pattern {
            machine: self.machine,
            bank: self.bank,
            index: self.index,
        }
    }

    pub fn phrase(&self) -> &Phrase {
        &self.phrase
    }

    /// Direct phrase access. Changes reach the engine on the next `update`.
    pub fn phrase_mut(&mut self) -> &mut Phrase {
        &mut self.phrase
    }

    pub fn length(&self) -> u32 {
        self.phrase.length()
    }

    fn changed(&self, cx: &NodeContext<'_>) {
        cx.post(NodeEvent::PatternChanged {
            machine: self.machine,
            pattern: self.name(),
        });
    }

    pub fn set_length(&mut self, cx: &mut NodeContext<'_>, measures: u32) -> Result<(), NodeError> {
        if !PATTERN_LENGTHS.contains(&measures) {
            return Err(NodeError::InvalidLength(measures));
        }
        if self.base.is_live() {
            cx.send(Message::new(self.target(), control::LENGTH).arg(measures as i32))?;
        }
        self.phrase.set_length(measures)?;
        self.changed(cx);
        Ok(())
    }

    pub fn set_scale(&mut self, cx: &mut NodeContext<'_>, scale: Scale) -> Result<(), NodeError> {
        if self.base.is_live() {
            cx.send(
                Message::new(self.target(), control::RESOLUTION)
                    .arg(scale.resolution().engine_value()),
            )?;
        }
        self.phrase.set_scale(scale);
        self.changed(cx);
        Ok(())
    }

    fn note_message(&self, trigger: &Trigger) -> Message {
        Message::new(self.target(), control::NOTE_DATA)
            .arg(trigger.beat)
            .arg(trigger.pitch as i32)
            .arg(trigger.velocity)
            .arg(trigger.end_beat())
            .arg(trigger.flags as i32)
    }

    fn remove_message(&self, trigger: &Trigger) -> Message {
        Message::new(self.target(), control::REMOVE_NOTE)
            .arg(trigger.beat)
            .arg(trigger.pitch as i32)
    }

    /// Switch a step on.
    pub fn trigger_on(
        &mut self,
        cx: &mut NodeContext<'_>,
        step: usize,
        pitch: u8,
        gate: f32,
        velocity: f32,
        flags: u32,
    ) -> Result<(), NodeError> {
        let prior = self.phrase.trigger(step).filter(|t| t.selected).cloned();
        let trigger = self
            .phrase
            .trigger_on(step, pitch, gate, velocity, flags)?
            .clone();
        if self.base.is_live() {
            if let Some(prior) = prior {
                cx.send(self.remove_message(&prior))?;
            }
            cx.send(self.note_message(&trigger))?;
        }
        self.changed(cx);
        Ok(())
    }

    /// Switch a step off.
    pub fn trigger_off(&mut self, cx: &mut NodeContext<'_>, step: usize) -> Result<(), NodeError> {
        let prior = self.phrase.trigger(step).filter(|t| t.selected).cloned();
        self.phrase.trigger_off(step)?;
        if let Some(prior) = prior {
            if self.base.is_live() {
                cx.send(self.remove_message(&prior))?;
            }
            self.changed(cx);
        }
        Ok(())
    }

    pub fn transpose(&mut self, cx: &mut NodeContext<'_>, delta: i32) -> Result<(), NodeError> {
        self.phrase.transpose(delta);
        if self.base.is_live() {
            self.push_notes(cx)?;
        }
        self.changed(cx);
        Ok(())
    }

    /// Replace the engine's notes with the selected triggers.
    fn push_notes(&self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(Message::new(self.target(), control::CLEAR))?;
        for trigger in self.phrase.selected_triggers() {
            cx.send(self.note_message(trigger))?;
        }
        Ok(())
    }

    fn pull_notes(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let Some(text) = cx.query_text(Message::new(self.target(), control::NOTE_DATA))? else {
            return Ok(());
        };
        let notes = parse_note_data(&text).map_err(|reply| EngineError::UnexpectedReply {
            control: control::NOTE_DATA.to_string(),
            reply,
        })?;
        self.phrase.clear();
        for trigger in notes {
            self.phrase.insert_trigger(trigger);
        }
        Ok(())
    }
}

impl Node for PatternNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        cx.send(Message::new(self.target(), control::LENGTH).arg(self.phrase.length() as i32))?;
        cx.send(
            Message::new(self.target(), control::RESOLUTION)
                .arg(self.phrase.resolution().engine_value()),
        )?;
        self.push_notes(cx)
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let target = self.target();
        if let Some(v) = cx.query_f32(target, control::LENGTH)? {
            let measures = v as u32;
            if PATTERN_LENGTHS.contains(&measures) {
                self.phrase.set_length(measures)?;
            } else {
                log::warn!("{}: engine length {} ignored", target, v);
            }
        }
        if let Some(v) = cx.query_f32(target, control::RESOLUTION)? {
            match Resolution::from_engine_value(v as i32) {
                Some(resolution) => self.phrase.set_scale(Scale::from_resolution(resolution)),
                None => log::warn!("{}: engine resolution {} ignored", target, v),
            }
        }
        self.pull_notes(cx)
    }
}

impl Tagged for PatternNode {
    const TYPE_NAME: &'static str = "PatternNode";
    const NESTED: &'static [&'static str] = &["Phrase"];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(Self::TAG_MACHINE, self.machine)?;
        w.u8(Self::TAG_BANK, self.bank)?;
        w.u8(Self::TAG_INDEX, self.index)?;
        w.object(Self::TAG_PHRASE, &self.phrase)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_MACHINE => self.machine = r.u8()?,
            Self::TAG_BANK => self.bank = r.u8()?,
            Self::TAG_INDEX => self.index = r.u8()?,
            Self::TAG_PHRASE => {
                let phrase: Phrase = r.object()?;
                if !PATTERN_LENGTHS.contains(&phrase.length()) {
                    return Err(CodecError::InvalidValue {
                        tag,
                        reason: format!("pattern length {}", phrase.length()),
                    });
                }
                self.phrase = phrase;
            }
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Pattern sequencer
// ═══════════════════════════════════════════════════════════════════

/// A machine's pattern bank and current selection.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSequencerComponent {
    base: NodeBase,
    machine: u8,
    patterns: BTreeMap<String, PatternNode>,
    selected_bank: u8,
    selected_index: u8,
}

impl Default for PatternSequencerComponent {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PatternSequencerComponent {
    const TAG_MACHINE: u16 = 10;
    const TAG_PATTERNS: u16 = 11;
    const TAG_BANK: u16 = 12;
    const TAG_INDEX: u16 = 13;

    pub fn new(machine: u8) -> Self {
        Self {
            base: NodeBase::new(NodeKind::Component),
            machine,
            patterns: BTreeMap::new(),
            selected_bank: 0,
            selected_index: 0,
        }
    }

    fn check(bank: u8, index: u8) -> Result<(), NodeError> {
        if bank < BANKS && index < PATTERNS_PER_BANK {
            Ok(())
        } else {
            Err(NodeError::UnknownPattern(format!("{}:{}", bank, index)))
        }
    }

    pub fn pattern(&self, name: &str) -> Option<&PatternNode> {
        self.patterns.get(name)
    }

    pub fn pattern_mut(&mut self, name: &str) -> Option<&mut PatternNode> {
        self.patterns.get_mut(name)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &PatternNode> {
        self.patterns.values()
    }

    /// The pattern at `bank`/`index`, materializing it if needed.
    pub fn pattern_at(
        &mut self,
        cx: &mut NodeContext<'_>,
        bank: u8,
        index: u8,
    ) -> Result<&mut PatternNode, NodeError> {
        Self::check(bank, index)?;
        let name = pattern_name(bank, index);
        if !self.patterns.contains_key(&name) {
            let mut pattern = PatternNode::new(self.machine, bank, index);
            if self.base.is_live() {
                pattern.create(cx)?;
            }
            self.patterns.insert(name.clone(), pattern);
        }
        self.patterns
            .get_mut(&name)
            .ok_or(NodeError::UnknownPattern(name))
    }

    pub fn selected(&self) -> (u8, u8) {
        (self.selected_bank, self.selected_index)
    }

    pub fn selected_name(&self) -> String {
        pattern_name(self.selected_bank, self.selected_index)
    }

    pub fn select(&mut self, cx: &mut NodeContext<'_>, bank: u8, index: u8) -> Result<(), NodeError> {
        Self::check(bank, index)?;
        if self.base.is_live() {
            let target = Target::PatternSequencer(self.machine);
            cx.send(Message::new(target, control::BANK).arg(bank))?;
            cx.send(Message::new(target, control::PATTERN).arg(index))?;
        }
        self.selected_bank = bank;
        self.selected_index = index;
        Ok(())
    }
}

impl Node for PatternSequencerComponent {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut NodeBase {
        &mut self.base
    }

    fn create_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for pattern in self.patterns.values_mut() {
            pattern.create(cx)?;
        }
        Ok(())
    }

    fn update_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let target = Target::PatternSequencer(self.machine);
        cx.send(Message::new(target, control::BANK).arg(self.selected_bank))?;
        cx.send(Message::new(target, control::PATTERN).arg(self.selected_index))?;
        for pattern in self.patterns.values_mut() {
            pattern.update(cx)?;
        }
        Ok(())
    }

    fn restore_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let target = Target::PatternSequencer(self.machine);
        if let Some(v) = cx.query_f32(target, control::BANK)? {
            self.selected_bank = (v as u8).min(BANKS - 1);
        }
        if let Some(v) = cx.query_f32(target, control::PATTERN)? {
            self.selected_index = (v as u8).min(PATTERNS_PER_BANK - 1);
        }

        let listing = cx
            .query_text(Message::new(target, control::PATTERNS_WITH_DATA))?
            .unwrap_or_default();
        let mut restored = BTreeMap::new();
        for name in listing.split_whitespace() {
            let Some((bank, index)) = parse_pattern_name(name) else {
                log::warn!("{}: unknown pattern name {:?}", target, name);
                continue;
            };
            let mut pattern = PatternNode::new(self.machine, bank, index);
            pattern.attach()?;
            pattern.restore(cx)?;
            restored.insert(pattern.name(), pattern);
        }
        self.patterns = restored;
        Ok(())
    }

    fn destroy_components(&mut self, cx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for pattern in self.patterns.values_mut() {
            pattern.destroy(cx)?;
        }
        Ok(())
    }
}

impl Tagged for PatternSequencerComponent {
    const TYPE_NAME: &'static str = "PatternSequencerComponent";
    const NESTED: &'static [&'static str] = &["PatternNode"];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        self.base.encode(w)?;
        w.u8(Self::TAG_MACHINE, self.machine)?;
        w.objects(Self::TAG_PATTERNS, self.patterns.values())?;
        w.u8(Self::TAG_BANK, self.selected_bank)?;
        w.u8(Self::TAG_INDEX, self.selected_index)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            Self::TAG_MACHINE => self.machine = r.u8()?,
            Self::TAG_PATTERNS => {
                self.patterns = r
                    .objects::<PatternNode>()?
                    .into_iter()
                    .map(|p| (p.name(), p))
                    .collect();
            }
            Self::TAG_BANK => self.selected_bank = r.u8()?,
            Self::TAG_INDEX => self.selected_index = r.u8()?,
            _ => return self.base.decode(tag, r),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::virtual_rack::VirtualRack;
    use std::sync::mpsc;

    fn engine_with_machine(index: u8) -> VirtualRack {
        let mut engine = VirtualRack::new();
        engine
            .send(
                Message::new(Target::Rack, control::CREATE)
                    .arg("bassline")
                    .arg("acid")
                    .arg(index),
            )
            .unwrap();
        engine
    }

    #[test]
    fn test_pattern_names() {
        assert_eq!(pattern_name(0, 0), "A01");
        assert_eq!(pattern_name(3, 15), "D16");
        assert_eq!(parse_pattern_name("B07"), Some((1, 6)));
        assert_eq!(parse_pattern_name("E01"), None);
        assert_eq!(parse_pattern_name("A17"), None);
        assert_eq!(parse_pattern_name("A00"), None);
        assert_eq!(parse_pattern_name(""), None);
    }

    #[test]
    fn test_parse_note_data() {
        let notes = parse_note_data("0 60 1 0.25 0|1.5 72 0.5 2 3").unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].beat, 1.5);
        assert_eq!(notes[1].pitch, 72);
        assert_eq!(notes[1].gate, 0.5);
        assert_eq!(notes[1].flags, 3);

        assert!(parse_note_data("").unwrap().is_empty());
        assert!(parse_note_data("0 60 1").is_err());
        assert!(parse_note_data("0 x 1 0.25 0").is_err());
    }

    #[test]
    fn test_invalid_length_rejected() {
        let mut engine = VirtualRack::new();
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);
        let mut pattern = PatternNode::new(0, 0, 0);
        assert!(matches!(
            pattern.set_length(&mut cx, 3),
            Err(NodeError::InvalidLength(3))
        ));
        assert_eq!(pattern.length(), 1);
    }

    #[test]
    fn test_decode_rejects_unsupported_length() {
        let codec = crate::codec::Codec::standard().unwrap();
        let mut pattern = PatternNode::new(0, 0, 0);
        pattern.phrase_mut().set_length(3).unwrap();
        let bytes = codec.encode(&pattern).unwrap();
        assert!(matches!(
            codec.decode::<PatternNode>(&bytes),
            Err(CodecError::InvalidValue { .. })
        ));

        pattern.phrase_mut().set_length(4).unwrap();
        let bytes = codec.encode(&pattern).unwrap();
        assert_eq!(codec.decode::<PatternNode>(&bytes).unwrap().length(), 4);
    }

    #[test]
    fn test_pattern_push_pull() {
        let mut engine = engine_with_machine(0);
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut seq = PatternSequencerComponent::new(0);
        seq.create(&mut cx).unwrap();
        {
            let pattern = seq.pattern_at(&mut cx, 1, 2).unwrap();
            pattern.set_length(&mut cx, 2).unwrap();
            pattern.trigger_on(&mut cx, 4, 48, 0.5, 0.9, 0).unwrap();
            pattern.trigger_on(&mut cx, 20, 50, 0.25, 1.0, 1).unwrap();
            pattern.trigger_on(&mut cx, 20, 52, 0.25, 1.0, 1).unwrap();
        }
        seq.select(&mut cx, 1, 2).unwrap();

        let mut pulled = PatternSequencerComponent::new(0);
        pulled.attach().unwrap();
        pulled.restore(&mut cx).unwrap();
        drop(cx);

        assert_eq!(engine.note_count(0, 1, 2), 2);
        assert_eq!(pulled.selected(), (1, 2));
        let pattern = pulled.pattern("B03").unwrap();
        assert_eq!(pattern.length(), 2);
        let pitches: Vec<u8> = pattern
            .phrase()
            .selected_triggers()
            .map(|t| t.pitch)
            .collect();
        assert_eq!(pitches, vec![48, 52]);
        assert_eq!(pattern.phrase().trigger(4).unwrap().gate, 0.5);
    }

    #[test]
    fn test_trigger_off_removes_note() {
        let mut engine = engine_with_machine(0);
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut pattern = PatternNode::new(0, 0, 0);
        pattern.create(&mut cx).unwrap();
        pattern.trigger_on(&mut cx, 0, 60, 0.25, 1.0, 0).unwrap();
        pattern.trigger_off(&mut cx, 0).unwrap();
        pattern.trigger_off(&mut cx, 0).unwrap();
        drop(cx);

        assert_eq!(engine.note_count(0, 0, 0), 0);
        assert_eq!(engine.count_sent(control::REMOVE_NOTE), 1);
    }

    #[test]
    fn test_transpose_resends_notes() {
        let mut engine = engine_with_machine(0);
        let (tx, _rx) = mpsc::channel();
        let mut cx = NodeContext::new(&mut engine, &tx);

        let mut pattern = PatternNode::new(0, 0, 0);
        pattern.create(&mut cx).unwrap();
        pattern.trigger_on(&mut cx, 0, 60, 0.25, 1.0, 0).unwrap();
        pattern.trigger_on(&mut cx, 8, 64, 0.25, 1.0, 0).unwrap();
        pattern.transpose(&mut cx, 5).unwrap();
        drop(cx);

        assert_eq!(engine.note_count(0, 0, 0), 2);
        let pitches: Vec<u8> = pattern.phrase().selected_triggers().map(|t| t.pitch).collect();
        assert_eq!(pitches, vec![65, 69]);
    }
}
