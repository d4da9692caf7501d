//! In-memory engine.
//!
//! [`VirtualRack`] answers the same messages the native engine does, keeping
//! a flat key/value image of every control it was sent. It is what the demo
//! host and the tests drive the node graph against, so nothing here needs the
//! native synthesis library.
//!
//! Besides plain controls it models the structural parts of the engine:
//!
//! - the fixed machine slots (`create` / `remove` / `machine_name` / `machine_type`)
//! - two effect slots per machine
//! - pattern note data and the `patterns_with_data` listing
//! - song sequencer pattern events
//! - named song files for `save_song` / `load_song`
//!
//! Every sent message is also recorded so tests can assert on what did (or
//! did not) reach the engine.

use std::collections::{BTreeMap, HashMap};

use crate::engine::{Arg, Engine, Message, RACK_SLOTS, Reply, Target, control};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
struct SlotMachine {
    machine_type: String,
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Note {
    start: f32,
    pitch: i32,
    velocity: f32,
    end: f32,
    flags: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PatternEvent {
    machine: i32,
    bank: i32,
    pattern: i32,
    start: f32,
    end: f32,
}

/// Everything a song file holds.
#[derive(Debug, Clone, Default)]
struct RackImage {
    machines: BTreeMap<u8, SlotMachine>,
    values: HashMap<(Target, &'static str), f32>,
    texts: HashMap<(Target, &'static str), String>,
    blobs: HashMap<(Target, &'static str), Vec<u8>>,
    effects: HashMap<(u8, u8), String>,
    notes: BTreeMap<(u8, u8, u8), Vec<Note>>,
    song: Vec<PatternEvent>,
}

impl RackImage {
    /// Drop every value addressed to `machine`.
    fn purge_machine(&mut self, machine: u8) {
        self.values.retain(|(t, _), _| t.machine() != Some(machine));
        self.texts.retain(|(t, _), _| t.machine() != Some(machine));
        self.blobs.retain(|(t, _), _| t.machine() != Some(machine));
        self.effects.retain(|(m, _), _| *m != machine);
        self.notes.retain(|(m, _, _), _| *m != machine);
    }

    fn purge_effect(&mut self, machine: u8, slot: u8) {
        let target = Target::Effect { machine, slot };
        self.values.retain(|(t, _), _| *t != target);
    }
}

/// Engine stand-in that keeps its state in memory.
#[derive(Debug, Default)]
pub struct VirtualRack {
    image: RackImage,
    songs: HashMap<String, RackImage>,
    sent: Vec<Message>,
}

impl VirtualRack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current image under `name`, as `save_song` does.
    pub fn store_song(&mut self, name: impl Into<String>) {
        self.songs.insert(name.into(), self.image.clone());
    }

    pub fn has_song(&self, name: &str) -> bool {
        self.songs.contains_key(name)
    }

    /// Every message sent so far, oldest first.
    pub fn sent(&self) -> &[Message] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Number of sent messages with the given control name.
    pub fn count_sent(&self, control: &str) -> usize {
        self.sent.iter().filter(|m| m.control == control).count()
    }

    /// Last value written to a control.
    pub fn value(&self, target: Target, control: &'static str) -> Option<f32> {
        self.image.values.get(&(target, control)).copied()
    }

    /// `(type, name)` of the machine in a slot.
    pub fn machine(&self, index: u8) -> Option<(&str, &str)> {
        self.image
            .machines
            .get(&index)
            .map(|m| (m.machine_type.as_str(), m.name.as_str()))
    }

    pub fn machine_count(&self) -> usize {
        self.image.machines.len()
    }

    pub fn effect_type(&self, machine: u8, slot: u8) -> Option<&str> {
        self.image.effects.get(&(machine, slot)).map(String::as_str)
    }

    pub fn note_count(&self, machine: u8, bank: u8, index: u8) -> usize {
        self.image
            .notes
            .get(&(machine, bank, index))
            .map_or(0, Vec::len)
    }

    pub fn song_event_count(&self) -> usize {
        self.image.song.len()
    }

    fn rejected(msg: &Message, reason: impl Into<String>) -> EngineError {
        EngineError::Rejected {
            target: msg.target.to_string(),
            control: msg.control.to_string(),
            reason: reason.into(),
        }
    }

    fn slot_arg(msg: &Message, i: usize) -> Result<u8, EngineError> {
        let index = msg
            .int_arg(i)
            .ok_or_else(|| Self::rejected(msg, "missing index argument"))?;
        u8::try_from(index).map_err(|_| Self::rejected(msg, format!("bad index {}", index)))
    }

    fn text_arg(msg: &Message, i: usize) -> Result<String, EngineError> {
        msg.text_arg(i)
            .map(str::to_string)
            .ok_or_else(|| Self::rejected(msg, "missing text argument"))
    }

    /// Machine-bound targets need a machine in the slot.
    fn check_machine(&self, msg: &Message) -> Result<(), EngineError> {
        match msg.target.machine() {
            Some(index) if !self.image.machines.contains_key(&index) => {
                Err(Self::rejected(msg, format!("no machine at {}", index)))
            }
            _ => Ok(()),
        }
    }

    fn pattern_name(bank: u8, index: u8) -> String {
        format!("{}{:02}", (b'A' + bank) as char, index + 1)
    }

    fn handle_rack(&mut self, msg: &Message) -> Result<(), EngineError> {
        match msg.control {
            control::CREATE => {
                let machine_type = Self::text_arg(msg, 0)?;
                let name = Self::text_arg(msg, 1)?;
                let index = Self::slot_arg(msg, 2)?;
                if index >= RACK_SLOTS {
                    return Err(Self::rejected(msg, format!("slot {} out of range", index)));
                }
                self.image.purge_machine(index);
                self.image
                    .machines
                    .insert(index, SlotMachine { machine_type, name });
            }
            control::REMOVE => {
                let index = Self::slot_arg(msg, 0)?;
                self.image.machines.remove(&index);
                self.image.purge_machine(index);
            }
            control::MACHINE_NAME => {
                let index = Self::slot_arg(msg, 0)?;
                let name = Self::text_arg(msg, 1)?;
                let machine = self
                    .image
                    .machines
                    .get_mut(&index)
                    .ok_or_else(|| Self::rejected(msg, format!("no machine at {}", index)))?;
                machine.name = name;
            }
            control::BLANKRACK => {
                self.image = RackImage::default();
            }
            control::LOAD_SONG => {
                let name = Self::text_arg(msg, 0)?;
                let image = self
                    .songs
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| Self::rejected(msg, format!("no song named {}", name)))?;
                self.image = image;
            }
            control::SAVE_SONG => {
                let name = Self::text_arg(msg, 0)?;
                self.store_song(name);
            }
            other => return Err(Self::rejected(msg, format!("unknown rack control {}", other))),
        }
        Ok(())
    }

    fn store_value(&mut self, msg: &Message) -> Result<(), EngineError> {
        let key = (msg.target, msg.control);
        match msg.args.first() {
            Some(Arg::Float(v)) => {
                self.image.values.insert(key, *v);
            }
            Some(Arg::Int(v)) => {
                self.image.values.insert(key, *v as f32);
            }
            Some(Arg::Text(v)) => {
                self.image.texts.insert(key, v.clone());
            }
            Some(Arg::Blob(v)) => {
                self.image.blobs.insert(key, v.clone());
            }
            None => return Err(Self::rejected(msg, "missing value")),
        }
        Ok(())
    }
}

impl Engine for VirtualRack {
    fn send(&mut self, msg: Message) -> Result<Option<f32>, EngineError> {
        log::trace!("send {}", msg);
        self.sent.push(msg.clone());

        if msg.target == Target::Rack {
            self.handle_rack(&msg)?;
            return Ok(None);
        }
        self.check_machine(&msg)?;

        match (msg.target, msg.control) {
            (Target::Effects(machine), control::CREATE) => {
                let slot = Self::slot_arg(&msg, 0)?;
                let effect = Self::text_arg(&msg, 1)?;
                if slot > 1 {
                    return Err(Self::rejected(&msg, format!("effect slot {}", slot)));
                }
                self.image.purge_effect(machine, slot);
                self.image.effects.insert((machine, slot), effect);
            }
            (Target::Effects(machine), control::REMOVE) => {
                let slot = Self::slot_arg(&msg, 0)?;
                self.image.effects.remove(&(machine, slot));
                self.image.purge_effect(machine, slot);
            }
            (Target::Effect { machine, slot }, _)
                if !self.image.effects.contains_key(&(machine, slot)) =>
            {
                return Err(Self::rejected(&msg, "effect slot is empty"));
            }
            (
                Target::Pattern {
                    machine,
                    bank,
                    index,
                },
                control::NOTE_DATA,
            ) => {
                let note = Note {
                    start: msg.float_arg(0).unwrap_or(0.0),
                    pitch: msg.int_arg(1).unwrap_or(60),
                    velocity: msg.float_arg(2).unwrap_or(1.0),
                    end: msg.float_arg(3).unwrap_or(0.0),
                    flags: msg.int_arg(4).unwrap_or(0),
                };
                self.image
                    .notes
                    .entry((machine, bank, index))
                    .or_default()
                    .push(note);
            }
            (
                Target::Pattern {
                    machine,
                    bank,
                    index,
                },
                control::REMOVE_NOTE,
            ) => {
                let start = msg.float_arg(0).unwrap_or(0.0);
                let pitch = msg.int_arg(1).unwrap_or(60);
                if let Some(notes) = self.image.notes.get_mut(&(machine, bank, index)) {
                    notes.retain(|n| n.start != start || n.pitch != pitch);
                }
            }
            (
                Target::Pattern {
                    machine,
                    bank,
                    index,
                },
                control::CLEAR,
            ) => {
                self.image.notes.remove(&(machine, bank, index));
            }
            (Target::Sequencer, control::PATTERN_EVENT) => {
                self.image.song.push(PatternEvent {
                    machine: msg.int_arg(0).unwrap_or(0),
                    bank: msg.int_arg(1).unwrap_or(0),
                    pattern: msg.int_arg(2).unwrap_or(0),
                    start: msg.float_arg(3).unwrap_or(0.0),
                    end: msg.float_arg(4).unwrap_or(0.0),
                });
            }
            (Target::Sequencer, control::CLEAR_PATTERNS) => {
                self.image.song.clear();
            }
            _ => self.store_value(&msg)?,
        }
        Ok(None)
    }

    fn query(&mut self, msg: Message) -> Result<Reply, EngineError> {
        log::trace!("query {}", msg);

        let reply = match (msg.target, msg.control) {
            (Target::Rack, control::MACHINE_NAME) => {
                let index = Self::slot_arg(&msg, 0)?;
                self.image
                    .machines
                    .get(&index)
                    .map_or(Reply::None, |m| Reply::Text(m.name.clone()))
            }
            (Target::Rack, control::MACHINE_TYPE) => {
                let index = Self::slot_arg(&msg, 0)?;
                self.image
                    .machines
                    .get(&index)
                    .map_or(Reply::None, |m| Reply::Text(m.machine_type.clone()))
            }
            (Target::Effects(machine), control::TYPE) => {
                self.check_machine(&msg)?;
                let slot = Self::slot_arg(&msg, 0)?;
                self.image
                    .effects
                    .get(&(machine, slot))
                    .map_or(Reply::None, |e| Reply::Text(e.clone()))
            }
            (
                Target::Pattern {
                    machine,
                    bank,
                    index,
                },
                control::NOTE_DATA,
            ) => {
                self.check_machine(&msg)?;
                let text = self
                    .image
                    .notes
                    .get(&(machine, bank, index))
                    .map(|notes| {
                        notes
                            .iter()
                            .map(|n| {
                                format!(
                                    "{} {} {} {} {}",
                                    n.start, n.pitch, n.velocity, n.end, n.flags
                                )
                            })
                            .collect::<Vec<_>>()
                            .join("|")
                    })
                    .unwrap_or_default();
                Reply::Text(text)
            }
            (Target::PatternSequencer(machine), control::PATTERNS_WITH_DATA) => {
                self.check_machine(&msg)?;
                let names: Vec<String> = self
                    .image
                    .notes
                    .iter()
                    .filter(|((m, _, _), notes)| *m == machine && !notes.is_empty())
                    .map(|((_, bank, index), _)| Self::pattern_name(*bank, *index))
                    .collect();
                Reply::Text(names.join(" "))
            }
            (Target::Sequencer, control::PATTERN_EVENTS) => {
                let text = self
                    .image
                    .song
                    .iter()
                    .map(|e| {
                        format!(
                            "{} {} {} {} {}",
                            e.machine, e.bank, e.pattern, e.start, e.end
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("|");
                Reply::Text(text)
            }
            _ => {
                self.check_machine(&msg)?;
                let key = (msg.target, msg.control);
                if let Some(v) = self.image.values.get(&key) {
                    Reply::Float(*v)
                } else if let Some(v) = self.image.texts.get(&key) {
                    Reply::Text(v.clone())
                } else if let Some(v) = self.image.blobs.get(&key) {
                    Reply::Blob(v.clone())
                } else {
                    Reply::None
                }
            }
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(rack: &mut VirtualRack, index: u8, ty: &str, name: &str) {
        rack.send(
            Message::new(Target::Rack, control::CREATE)
                .arg(ty)
                .arg(name)
                .arg(index),
        )
        .unwrap();
    }

    #[test]
    fn test_create_and_query_machine() {
        let mut rack = VirtualRack::new();
        create(&mut rack, 3, "subsynth", "bass");

        let name = rack
            .query(Message::new(Target::Rack, control::MACHINE_NAME).arg(3u8))
            .unwrap();
        assert_eq!(name, Reply::Text("bass".into()));

        let empty = rack
            .query(Message::new(Target::Rack, control::MACHINE_NAME).arg(4u8))
            .unwrap();
        assert_eq!(empty, Reply::None);
    }

    #[test]
    fn test_values_need_a_machine() {
        let mut rack = VirtualRack::new();
        let err = rack.send(Message::new(Target::Mixer(0), "volume").arg(0.5f32));
        assert!(err.is_err());

        create(&mut rack, 0, "bassline", "acid");
        rack.send(Message::new(Target::Mixer(0), "volume").arg(0.5f32))
            .unwrap();
        assert_eq!(rack.value(Target::Mixer(0), "volume"), Some(0.5));
        assert_eq!(
            rack.query(Message::new(Target::Mixer(0), "volume")).unwrap(),
            Reply::Float(0.5)
        );
    }

    #[test]
    fn test_remove_purges_machine_state() {
        let mut rack = VirtualRack::new();
        create(&mut rack, 1, "padsynth", "pad");
        rack.send(Message::new(Target::Mixer(1), "pan").arg(0.25f32))
            .unwrap();
        rack.send(Message::new(Target::Rack, control::REMOVE).arg(1u8))
            .unwrap();

        assert!(rack.machine(1).is_none());
        assert_eq!(rack.value(Target::Mixer(1), "pan"), None);
    }

    #[test]
    fn test_song_snapshot_roundtrip() {
        let mut rack = VirtualRack::new();
        create(&mut rack, 0, "subsynth", "lead");
        rack.send(Message::new(Target::Rack, control::SAVE_SONG).arg("demo"))
            .unwrap();
        rack.send(Message::new(Target::Rack, control::BLANKRACK))
            .unwrap();
        assert_eq!(rack.machine_count(), 0);

        rack.send(Message::new(Target::Rack, control::LOAD_SONG).arg("demo"))
            .unwrap();
        assert_eq!(rack.machine(0), Some(("subsynth", "lead")));

        let missing = rack.send(Message::new(Target::Rack, control::LOAD_SONG).arg("nope"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_pattern_note_listing() {
        let mut rack = VirtualRack::new();
        create(&mut rack, 2, "beatbox", "drums");
        let pattern = Target::Pattern {
            machine: 2,
            bank: 1,
            index: 3,
        };
        rack.send(
            Message::new(pattern, control::NOTE_DATA)
                .arg(0.5f32)
                .arg(36)
                .arg(1.0f32)
                .arg(0.75f32)
                .arg(0),
        )
        .unwrap();

        let listing = rack
            .query(Message::new(
                Target::PatternSequencer(2),
                control::PATTERNS_WITH_DATA,
            ))
            .unwrap();
        assert_eq!(listing, Reply::Text("B04".into()));

        let notes = rack.query(Message::new(pattern, control::NOTE_DATA)).unwrap();
        assert_eq!(notes, Reply::Text("0.5 36 1 0.75 0".into()));
    }

    #[test]
    fn test_sent_log() {
        let mut rack = VirtualRack::new();
        create(&mut rack, 0, "organ", "keys");
        create(&mut rack, 1, "organ", "keys2");
        assert_eq!(rack.count_sent(control::CREATE), 2);
        rack.clear_sent();
        assert!(rack.sent().is_empty());
    }
}
