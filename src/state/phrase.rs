// src/state/phrase.rs
//
// Step-sequencer phrase: triggers keyed by beat.
//
// A phrase is `length` measures long. Its scale picks a grid resolution, and
// every grid position holds a trigger once the phrase has been sized. Growing
// the phrase or refining the grid only ever adds triggers; a trigger that
// falls outside a shorter phrase is kept, just not reachable from the view.
//
// The UI pages through the phrase sixteen steps at a time. `position` is the
// 1-based page.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::codec::{FieldReader, FieldWriter, Tagged};
use crate::error::{CodecError, NodeError};

/// Steps shown per view page.
pub const STEPS_PER_VIEW: usize = 16;

pub const BEATS_PER_MEASURE: u32 = 4;

/// Longest phrase, in measures.
pub const MAX_LENGTH: u32 = 128;

/// Beat position with a total order.
#[derive(Debug, Clone, Copy)]
pub struct Beat(pub f32);

impl PartialEq for Beat {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Beat {}

impl PartialOrd for Beat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Beat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Grid resolution in steps per measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
}

impl Resolution {
    pub fn steps_per_beat(self) -> u32 {
        match self {
            Resolution::Sixteenth => 4,
            Resolution::ThirtySecond => 8,
            Resolution::SixtyFourth => 16,
        }
    }

    /// Value the engine uses for this resolution.
    pub fn engine_value(self) -> i32 {
        (self.steps_per_beat() * BEATS_PER_MEASURE) as i32
    }

    pub fn from_engine_value(v: i32) -> Option<Self> {
        match v {
            16 => Some(Resolution::Sixteenth),
            32 => Some(Resolution::ThirtySecond),
            64 => Some(Resolution::SixtyFourth),
            _ => None,
        }
    }
}

/// Note grid the user edits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scale {
    #[default]
    Sixteenth,
    SixteenthTriplet,
    ThirtySecond,
    ThirtySecondTriplet,
    SixtyFourth,
}

impl Scale {
    const ALL: [Scale; 5] = [
        Scale::Sixteenth,
        Scale::SixteenthTriplet,
        Scale::ThirtySecond,
        Scale::ThirtySecondTriplet,
        Scale::SixtyFourth,
    ];

    /// Triplet grids need the finest resolution to land on their positions.
    pub fn resolution(self) -> Resolution {
        match self {
            Scale::Sixteenth => Resolution::Sixteenth,
            Scale::ThirtySecond => Resolution::ThirtySecond,
            _ => Resolution::SixtyFourth,
        }
    }

    pub fn from_resolution(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Sixteenth => Scale::Sixteenth,
            Resolution::ThirtySecond => Scale::ThirtySecond,
            Resolution::SixtyFourth => Scale::SixtyFourth,
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}

/// One note event on the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// Start position in beats.
    pub beat: f32,

    /// MIDI pitch.
    pub pitch: u8,

    /// Length in beats.
    pub gate: f32,

    pub velocity: f32,

    /// Accent/slide bits, machine specific.
    pub flags: u32,

    /// Whether the step is on.
    pub selected: bool,
}

impl Default for Trigger {
    fn default() -> Self {
        Self {
            beat: 0.0,
            pitch: 60,
            gate: 0.25,
            velocity: 1.0,
            flags: 0,
            selected: false,
        }
    }
}

impl Trigger {
    pub fn at(beat: f32) -> Self {
        Self {
            beat,
            ..Self::default()
        }
    }

    pub fn end_beat(&self) -> f32 {
        self.beat + self.gate
    }
}

impl Tagged for Trigger {
    const TYPE_NAME: &'static str = "Trigger";

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.f32(1, self.beat)?;
        w.u8(2, self.pitch)?;
        w.f32(3, self.gate)?;
        w.f32(4, self.velocity)?;
        w.u32(5, self.flags)?;
        w.bool(6, self.selected)
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            1 => self.beat = r.f32()?,
            2 => self.pitch = r.u8()?,
            3 => self.gate = r.f32()?,
            4 => self.velocity = r.f32()?,
            5 => self.flags = r.u32()?,
            6 => self.selected = r.bool()?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Ordered trigger grid for one pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Phrase {
    length: u32,
    scale: Scale,
    position: u32,
    triggers: BTreeMap<Beat, Trigger>,
}

impl Default for Phrase {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Phrase {
    pub fn new(length: u32) -> Self {
        let mut phrase = Self {
            length: length.clamp(1, MAX_LENGTH),
            scale: Scale::default(),
            position: 1,
            triggers: BTreeMap::new(),
        };
        phrase.update_triggers();
        phrase
    }

    /// Length in measures.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Resize the phrase.
    ///
    /// New grid positions get default triggers. Nothing is removed when the
    /// phrase shrinks; the view position is clamped to the new size.
    pub fn set_length(&mut self, length: u32) -> Result<(), NodeError> {
        if length == 0 || length > MAX_LENGTH {
            return Err(NodeError::InvalidLength(length));
        }
        self.length = length;
        self.update_triggers();
        self.position = self.position.min(self.view_count());
        Ok(())
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
        self.update_triggers();
        self.position = self.position.min(self.view_count());
    }

    pub fn resolution(&self) -> Resolution {
        self.scale.resolution()
    }

    /// Grid steps in the phrase.
    pub fn steps(&self) -> usize {
        self.length as usize
            * BEATS_PER_MEASURE as usize
            * self.resolution().steps_per_beat() as usize
    }

    /// Number of view pages.
    pub fn view_count(&self) -> u32 {
        ((self.steps() / STEPS_PER_VIEW) as u32).max(1)
    }

    pub fn to_beat(&self, step: usize) -> f32 {
        step as f32 / self.resolution().steps_per_beat() as f32
    }

    pub fn to_step(&self, beat: f32) -> usize {
        (beat * self.resolution().steps_per_beat() as f32).round() as usize
    }

    // ═══════════════════════════════════════════
    // View position
    // ═══════════════════════════════════════════

    /// Current 1-based view page.
    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn set_position(&mut self, position: u32) {
        self.position = position.clamp(1, self.view_count());
    }

    pub fn increment_position(&mut self) -> u32 {
        self.set_position(self.position + 1);
        self.position
    }

    pub fn decrement_position(&mut self) -> u32 {
        self.set_position(self.position.saturating_sub(1));
        self.position
    }

    /// Absolute step of the first step in the current view.
    pub fn view_start(&self) -> usize {
        (self.position as usize - 1) * STEPS_PER_VIEW
    }

    /// Map a step within the current view to an absolute step.
    pub fn to_absolute_step(&self, view_step: usize) -> usize {
        view_step + STEPS_PER_VIEW * self.position as usize - STEPS_PER_VIEW
    }

    /// The sixteen triggers of the current view.
    pub fn view_triggers(&self) -> Vec<Option<&Trigger>> {
        (0..STEPS_PER_VIEW)
            .map(|i| self.trigger(self.to_absolute_step(i)))
            .collect()
    }

    // ═══════════════════════════════════════════
    // Triggers
    // ═══════════════════════════════════════════

    pub fn trigger(&self, step: usize) -> Option<&Trigger> {
        self.triggers.get(&Beat(self.to_beat(step)))
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values()
    }

    /// Triggers that are switched on, in beat order.
    pub fn selected_triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values().filter(|t| t.selected)
    }

    pub fn is_selected(&self, step: usize) -> bool {
        self.trigger(step).is_some_and(|t| t.selected)
    }

    fn check_step(&self, step: usize) -> Result<(), NodeError> {
        if step < self.steps() {
            Ok(())
        } else {
            Err(NodeError::StepOutOfRange {
                step,
                steps: self.steps(),
            })
        }
    }

    fn trigger_mut(&mut self, step: usize) -> Result<&mut Trigger, NodeError> {
        self.check_step(step)?;
        let beat = self.to_beat(step);
        Ok(self
            .triggers
            .entry(Beat(beat))
            .or_insert_with(|| Trigger::at(beat)))
    }

    /// Switch a step on with the given note values.
    pub fn trigger_on(
        &mut self,
        step: usize,
        pitch: u8,
        gate: f32,
        velocity: f32,
        flags: u32,
    ) -> Result<&Trigger, NodeError> {
        let trigger = self.trigger_mut(step)?;
        trigger.pitch = pitch;
        trigger.gate = gate;
        trigger.velocity = velocity;
        trigger.flags = flags;
        trigger.selected = true;
        Ok(trigger)
    }

    /// Switch a step off. Returns whether it was on.
    pub fn trigger_off(&mut self, step: usize) -> Result<bool, NodeError> {
        let trigger = self.trigger_mut(step)?;
        let was_on = trigger.selected;
        trigger.selected = false;
        Ok(was_on)
    }

    pub fn update_pitch(&mut self, step: usize, pitch: u8) -> Result<(), NodeError> {
        self.trigger_mut(step)?.pitch = pitch;
        Ok(())
    }

    pub fn update_gate(&mut self, step: usize, gate: f32) -> Result<(), NodeError> {
        self.trigger_mut(step)?.gate = gate;
        Ok(())
    }

    pub fn update_velocity(&mut self, step: usize, velocity: f32) -> Result<(), NodeError> {
        self.trigger_mut(step)?.velocity = velocity;
        Ok(())
    }

    pub fn update_flags(&mut self, step: usize, flags: u32) -> Result<(), NodeError> {
        self.trigger_mut(step)?.flags = flags;
        Ok(())
    }

    /// Shift every selected trigger by `delta` semitones, clamped to MIDI range.
    pub fn transpose(&mut self, delta: i32) {
        for trigger in self.triggers.values_mut().filter(|t| t.selected) {
            trigger.pitch = (trigger.pitch as i32 + delta).clamp(0, 127) as u8;
        }
    }

    /// Switch every step off.
    pub fn clear(&mut self) {
        for trigger in self.triggers.values_mut() {
            trigger.selected = false;
        }
    }

    /// Place an already-built trigger, switching it on.
    pub(crate) fn insert_trigger(&mut self, mut trigger: Trigger) {
        trigger.selected = true;
        self.triggers.insert(Beat(trigger.beat), trigger);
    }

    /// Selected triggers starting inside `measure` (0-based).
    pub fn notes_in_measure(&self, measure: u32) -> Vec<&Trigger> {
        let start = (measure * BEATS_PER_MEASURE) as f32;
        let end = start + BEATS_PER_MEASURE as f32;
        self.triggers
            .range(Beat(start)..Beat(end))
            .map(|(_, t)| t)
            .filter(|t| t.selected)
            .collect()
    }

    /// Fold a song beat into this phrase's span.
    pub fn local_beat(&self, beat: f32) -> f32 {
        beat % (self.length * BEATS_PER_MEASURE) as f32
    }

    /// Add default triggers for grid positions that have none.
    fn update_triggers(&mut self) {
        for step in 0..self.steps() {
            let beat = self.to_beat(step);
            self.triggers
                .entry(Beat(beat))
                .or_insert_with(|| Trigger::at(beat));
        }
    }
}

impl Tagged for Phrase {
    const TYPE_NAME: &'static str = "Phrase";
    const NESTED: &'static [&'static str] = &["Trigger"];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.u32(1, self.length)?;
        w.u8(2, self.scale.to_u8())?;
        w.u32(3, self.position)?;
        w.objects(4, self.triggers.values())
    }

    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError> {
        match tag {
            1 => {
                let length = r.u32()?;
                if length > MAX_LENGTH {
                    return Err(CodecError::InvalidValue {
                        tag,
                        reason: format!("phrase length {} exceeds {}", length, MAX_LENGTH),
                    });
                }
                self.length = length.max(1);
            }
            2 => {
                let raw = r.u8()?;
                self.scale = Scale::from_u8(raw).ok_or(CodecError::InvalidValue {
                    tag,
                    reason: format!("unknown scale {}", raw),
                })?;
            }
            3 => self.position = r.u32()?.max(1),
            4 => {
                self.triggers = r
                    .objects::<Trigger>()?
                    .into_iter()
                    .map(|t| (Beat(t.beat), t))
                    .collect();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_phrase_fills_grid() {
        let phrase = Phrase::new(1);
        assert_eq!(phrase.steps(), 16);
        assert_eq!(phrase.triggers().count(), 16);
        assert_eq!(phrase.selected_triggers().count(), 0);

        let t = phrase.trigger(5).unwrap();
        assert_eq!(t.beat, 1.25);
        assert_eq!(t.pitch, 60);
        assert_eq!(t.gate, 0.25);
        assert_eq!(t.velocity, 1.0);
    }

    #[test]
    fn test_scale_resolution() {
        assert_eq!(Scale::Sixteenth.resolution(), Resolution::Sixteenth);
        assert_eq!(Scale::ThirtySecond.resolution(), Resolution::ThirtySecond);
        assert_eq!(Scale::SixteenthTriplet.resolution(), Resolution::SixtyFourth);
        assert_eq!(
            Scale::ThirtySecondTriplet.resolution(),
            Resolution::SixtyFourth
        );
        assert_eq!(Resolution::ThirtySecond.engine_value(), 32);
    }

    #[test]
    fn test_trigger_on_off() {
        let mut phrase = Phrase::new(2);
        phrase.trigger_on(20, 48, 0.5, 0.8, 1).unwrap();
        assert!(phrase.is_selected(20));
        assert_eq!(phrase.trigger(20).unwrap().beat, 5.0);

        assert!(phrase.trigger_off(20).unwrap());
        assert!(!phrase.trigger_off(20).unwrap());
        // Values survive switching off
        assert_eq!(phrase.trigger(20).unwrap().pitch, 48);

        assert!(matches!(
            phrase.trigger_on(32, 60, 0.25, 1.0, 0),
            Err(NodeError::StepOutOfRange { step: 32, steps: 32 })
        ));
    }

    #[test]
    fn test_view_translation() {
        let mut phrase = Phrase::new(4);
        assert_eq!(phrase.view_count(), 4);
        assert_eq!(phrase.to_absolute_step(3), 3);

        assert_eq!(phrase.increment_position(), 2);
        assert_eq!(phrase.view_start(), 16);
        assert_eq!(phrase.to_absolute_step(3), 19);

        phrase.set_position(9);
        assert_eq!(phrase.position(), 4);
        assert_eq!(phrase.increment_position(), 4);

        phrase.set_position(1);
        assert_eq!(phrase.decrement_position(), 1);
    }

    #[test]
    fn test_view_triggers() {
        let mut phrase = Phrase::new(2);
        phrase.trigger_on(17, 64, 0.25, 1.0, 0).unwrap();
        phrase.set_position(2);
        let view = phrase.view_triggers();
        assert_eq!(view.len(), STEPS_PER_VIEW);
        assert!(view[1].unwrap().selected);
        assert!(!view[0].unwrap().selected);
    }

    #[test]
    fn test_shrink_keeps_triggers() {
        let mut phrase = Phrase::new(4);
        phrase.trigger_on(60, 70, 0.25, 1.0, 0).unwrap();
        phrase.set_position(4);

        phrase.set_length(1).unwrap();
        assert_eq!(phrase.position(), 1);
        assert_eq!(phrase.triggers().count(), 64);
        assert_eq!(phrase.selected_triggers().count(), 1);
        // Hidden from the step API until the phrase grows back
        assert!(phrase.trigger_on(60, 70, 0.25, 1.0, 0).is_err());

        phrase.set_length(4).unwrap();
        assert!(phrase.is_selected(60));
        assert!(phrase.set_length(0).is_err());
    }

    #[test]
    fn test_finer_scale_adds_positions() {
        let mut phrase = Phrase::new(1);
        phrase.trigger_on(1, 62, 0.25, 1.0, 0).unwrap();
        phrase.set_scale(Scale::ThirtySecond);
        assert_eq!(phrase.steps(), 32);
        assert_eq!(phrase.triggers().count(), 32);
        // 16th step 1 and 32nd step 2 are the same beat
        assert!(phrase.is_selected(2));
        assert_eq!(phrase.view_count(), 2);
    }

    #[test]
    fn test_transpose_clamps() {
        let mut phrase = Phrase::new(1);
        phrase.trigger_on(0, 120, 0.25, 1.0, 0).unwrap();
        phrase.trigger_on(1, 2, 0.25, 1.0, 0).unwrap();
        phrase.update_pitch(2, 50).unwrap();

        phrase.transpose(12);
        assert_eq!(phrase.trigger(0).unwrap().pitch, 127);
        assert_eq!(phrase.trigger(1).unwrap().pitch, 14);
        assert_eq!(phrase.trigger(2).unwrap().pitch, 50);

        phrase.transpose(-20);
        assert_eq!(phrase.trigger(1).unwrap().pitch, 0);
    }

    #[test]
    fn test_notes_in_measure_and_local_beat() {
        let mut phrase = Phrase::new(2);
        phrase.trigger_on(0, 60, 0.25, 1.0, 0).unwrap();
        phrase.trigger_on(15, 61, 0.25, 1.0, 0).unwrap();
        phrase.trigger_on(16, 62, 0.25, 1.0, 0).unwrap();

        let first: Vec<u8> = phrase.notes_in_measure(0).iter().map(|t| t.pitch).collect();
        assert_eq!(first, vec![60, 61]);
        let second: Vec<u8> = phrase.notes_in_measure(1).iter().map(|t| t.pitch).collect();
        assert_eq!(second, vec![62]);

        assert_eq!(phrase.local_beat(9.5), 1.5);
    }

    #[test]
    fn test_beat_order() {
        let mut beats = vec![Beat(2.0), Beat(0.25), Beat(1.0)];
        beats.sort();
        assert_eq!(beats, vec![Beat(0.25), Beat(1.0), Beat(2.0)]);
    }

    #[test]
    fn test_length_is_bounded() {
        let mut phrase = Phrase::new(2);
        assert!(matches!(
            phrase.set_length(MAX_LENGTH + 1),
            Err(NodeError::InvalidLength(_))
        ));
        assert!(matches!(phrase.set_length(0), Err(NodeError::InvalidLength(0))));
        assert_eq!(phrase.length(), 2);
        assert_eq!(phrase.triggers().count(), 32);

        phrase.set_length(MAX_LENGTH).unwrap();
        assert_eq!(phrase.steps(), MAX_LENGTH as usize * 16);
        assert_eq!(Phrase::new(u32::MAX).length(), MAX_LENGTH);
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let codec = crate::codec::Codec::standard().unwrap();
        let mut phrase = Phrase::new(1);
        phrase.length = 0x1000_0000;
        let bytes = codec.encode(&phrase).unwrap();
        assert!(matches!(
            codec.decode::<Phrase>(&bytes),
            Err(CodecError::InvalidValue { tag: 1, .. })
        ));
    }

    proptest! {
        #[test]
        fn test_growth_is_additive(
            from in 1u32..8,
            extra in 1u32..8,
            on in proptest::collection::vec((0usize..512, 0u8..128), 0..24),
        ) {
            let mut phrase = Phrase::new(from);
            for (step, pitch) in &on {
                let step = step % phrase.steps();
                phrase.trigger_on(step, *pitch, 0.25, 1.0, 0).unwrap();
            }
            let before: Vec<Trigger> = phrase.triggers().cloned().collect();
            let old_steps = phrase.steps();

            phrase.set_length(from + extra).unwrap();

            for t in &before {
                let step = phrase.to_step(t.beat);
                prop_assert_eq!(phrase.trigger(step), Some(t));
            }
            prop_assert_eq!(phrase.triggers().count(), phrase.steps());
            for step in old_steps..phrase.steps() {
                let t = phrase.trigger(step).unwrap();
                prop_assert!(!t.selected);
                prop_assert_eq!(t.pitch, 60);
            }
        }
    }
}
