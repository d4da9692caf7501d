// src/state/param_info.rs
//
// Parameter metadata and validated value banks.
//
// Every float control a node mirrors is described by a static `ParamInfo`.
// A `ParamBank` holds the current values of one table and is the only place
// those values are written, so range checks cannot be bypassed.

use std::fmt;

use crate::codec::{FieldReader, FieldWriter};
use crate::engine::{Message, Target};
use crate::error::{CodecError, NodeError};
use crate::node::NodeContext;

/// Identifier of a parameter within its table.
pub type ParamId = u32;

/// Unit type for parameter display.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ParamUnit {
    #[default]
    None,
    /// Hertz (frequency)
    Hz,
    /// Kilohertz
    KHz,
    /// Decibels (gain)
    Db,
    /// Seconds
    Seconds,
    /// Pan (-1 to +1)
    Pan,
    /// Beats per minute
    Bpm,
}

impl fmt::Display for ParamUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamUnit::None | ParamUnit::Pan => Ok(()),
            ParamUnit::Hz => write!(f, "Hz"),
            ParamUnit::KHz => write!(f, "kHz"),
            ParamUnit::Db => write!(f, "dB"),
            ParamUnit::Seconds => write!(f, "s"),
            ParamUnit::Bpm => write!(f, "bpm"),
        }
    }
}

/// Metadata describing a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamInfo {
    /// Unique ID within the table
    pub id: ParamId,

    /// Human-readable name
    pub name: &'static str,

    /// Engine control the value is sent to
    pub control: &'static str,

    /// Minimum value
    pub min: f32,

    /// Maximum value
    pub max: f32,

    /// Default value
    pub default: f32,

    /// Unit for display
    pub unit: ParamUnit,

    /// Step size for discrete parameters (0 = continuous)
    pub step: f32,
}

impl ParamInfo {
    pub const fn new(id: ParamId, name: &'static str, control: &'static str) -> Self {
        Self {
            id,
            name,
            control,
            min: 0.0,
            max: 1.0,
            default: 0.0,
            unit: ParamUnit::None,
            step: 0.0,
        }
    }

    pub const fn range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub const fn default(mut self, value: f32) -> Self {
        self.default = value;
        self
    }

    pub const fn unit(mut self, unit: ParamUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Whole-number values only.
    pub const fn stepped(mut self) -> Self {
        self.step = 1.0;
        self
    }

    /// In range and not NaN.
    #[inline]
    pub fn accepts(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    /// Format a value for display.
    pub fn format(&self, value: f32) -> String {
        let precision = if self.step > 0.0 { 0 } else { 2 };
        if self.unit == ParamUnit::None {
            format!("{:.prec$}", value, prec = precision)
        } else {
            format!("{:.prec$} {}", value, self.unit, prec = precision)
        }
    }

    fn out_of_range(&self, value: f32) -> NodeError {
        NodeError::OutOfRange {
            param: self.name,
            value,
            min: self.min,
            max: self.max,
        }
    }
}

/// Current values of one parameter table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamBank {
    table: &'static [ParamInfo],
    values: Vec<f32>,
}

impl Default for ParamBank {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ParamBank {
    /// First tag used for bank values. A value persists under `TAG_BASE + id`.
    pub const TAG_BASE: u16 = 200;

    pub fn new(table: &'static [ParamInfo]) -> Self {
        Self {
            table,
            values: table.iter().map(|p| p.default).collect(),
        }
    }

    pub fn table(&self) -> &'static [ParamInfo] {
        self.table
    }

    fn position(&self, id: ParamId) -> Option<usize> {
        self.table.iter().position(|p| p.id == id)
    }

    pub fn info(&self, id: ParamId) -> Option<&'static ParamInfo> {
        self.position(id).map(|i| &self.table[i])
    }

    pub fn get(&self, id: ParamId) -> Option<f32> {
        self.position(id).map(|i| self.values[i])
    }

    /// Validate and store a value.
    ///
    /// Returns `Ok(false)` when the value is unchanged. Out-of-range values
    /// are rejected and the stored value is kept.
    pub fn set(&mut self, id: ParamId, value: f32) -> Result<bool, NodeError> {
        let i = self.position(id).ok_or(NodeError::UnknownParam(id))?;
        let info = &self.table[i];
        if !info.accepts(value) {
            return Err(info.out_of_range(value));
        }
        if self.values[i] == value {
            return Ok(false);
        }
        self.values[i] = value;
        Ok(true)
    }

    /// Validate, store and forward to the engine if the value changed.
    pub fn set_and_send(
        &mut self,
        cx: &mut NodeContext<'_>,
        target: Target,
        id: ParamId,
        value: f32,
    ) -> Result<bool, NodeError> {
        let info = self.info(id).ok_or(NodeError::UnknownParam(id))?;
        let changed = self.set(id, value)?;
        if changed {
            cx.send(Message::new(target, info.control).arg(value))?;
        }
        Ok(changed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static ParamInfo, f32)> + '_ {
        self.table.iter().zip(self.values.iter().copied())
    }

    /// Send every value to `target`.
    pub fn push(&self, cx: &mut NodeContext<'_>, target: Target) -> Result<(), NodeError> {
        for (info, value) in self.iter() {
            cx.send(Message::new(target, info.control).arg(value))?;
        }
        Ok(())
    }

    /// Read every value back from `target`.
    ///
    /// Values the engine does not hold, or holds out of range, keep their
    /// current local value.
    pub fn pull(&mut self, cx: &mut NodeContext<'_>, target: Target) -> Result<(), NodeError> {
        for (i, info) in self.table.iter().enumerate() {
            match cx.query_f32(target, info.control)? {
                Some(v) if info.accepts(v) => self.values[i] = v,
                Some(v) => {
                    log::warn!(
                        "{}/{}: engine value {} outside [{}, {}], keeping {}",
                        target,
                        info.control,
                        v,
                        info.min,
                        info.max,
                        self.values[i]
                    );
                }
                None => {
                    log::debug!("{}/{}: no engine value", target, info.control);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn encode(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        for (info, value) in self.iter() {
            w.f32(Self::TAG_BASE + info.id as u16, value)?;
        }
        Ok(())
    }

    pub(crate) fn decode(
        &mut self,
        tag: u16,
        r: &mut FieldReader<'_, '_>,
    ) -> Result<bool, CodecError> {
        let Some(id) = tag.checked_sub(Self::TAG_BASE) else {
            return Ok(false);
        };
        let Some(i) = self.position(id as ParamId) else {
            return Ok(false);
        };
        let value = r.f32()?;
        let info = &self.table[i];
        if info.accepts(value) {
            self.values[i] = value;
        } else {
            log::warn!(
                "{}: stored value {} outside [{}, {}], using {}",
                info.name,
                value,
                info.min,
                info.max,
                self.values[i]
            );
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[ParamInfo] = &[
        ParamInfo::new(0, "Cutoff", "cutoff")
            .range(0.1, 6.0)
            .default(2.23)
            .unit(ParamUnit::KHz),
        ParamInfo::new(1, "Depth", "depth").default(1.0),
        ParamInfo::new(2, "Voices", "voices")
            .range(1.0, 16.0)
            .default(4.0)
            .stepped(),
    ];

    #[test]
    fn test_defaults() {
        let bank = ParamBank::new(TABLE);
        assert_eq!(bank.get(0), Some(2.23));
        assert_eq!(bank.get(1), Some(1.0));
        assert_eq!(bank.get(9), None);
    }

    #[test]
    fn test_set_rejects_out_of_range() {
        let mut bank = ParamBank::new(TABLE);
        assert!(matches!(
            bank.set(0, 7.0),
            Err(NodeError::OutOfRange { param: "Cutoff", .. })
        ));
        assert!(bank.set(1, f32::NAN).is_err());
        assert_eq!(bank.get(0), Some(2.23));
        assert_eq!(bank.get(1), Some(1.0));
    }

    #[test]
    fn test_set_reports_change() {
        let mut bank = ParamBank::new(TABLE);
        assert_eq!(bank.set(0, 1.5).unwrap(), true);
        assert_eq!(bank.set(0, 1.5).unwrap(), false);
        assert!(matches!(bank.set(5, 0.0), Err(NodeError::UnknownParam(5))));
    }

    #[test]
    fn test_format() {
        assert_eq!(TABLE[0].format(2.23), "2.23 kHz");
        assert_eq!(TABLE[2].format(4.0), "4");
        assert_eq!(TABLE[1].format(0.5), "0.50");
    }
}
