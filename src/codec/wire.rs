// src/codec/wire.rs
//
// Field-level reader and writer for the tagged binary format.
//
// Layout of one object:
//
//   u16  type id
//   ( u16 tag, u32 len, [len bytes] )*
//   u16  0
//
// All integers are little-endian. Tag 0 is reserved as the terminator.

use uuid::Uuid;

use super::{Tagged, TypeRegistry};
use crate::error::CodecError;

/// Appends tagged fields for one object.
pub struct FieldWriter<'a> {
    registry: &'a TypeRegistry,
    buf: &'a mut Vec<u8>,
}

impl<'a> FieldWriter<'a> {
    pub(crate) fn new(registry: &'a TypeRegistry, buf: &'a mut Vec<u8>) -> Self {
        Self { registry, buf }
    }

    /// Write one field, patching its length once the payload is known.
    fn field<F>(&mut self, tag: u16, payload: F) -> Result<(), CodecError>
    where
        F: FnOnce(&mut Self) -> Result<(), CodecError>,
    {
        debug_assert!(tag != 0, "tag 0 is the object terminator");
        self.buf.extend_from_slice(&tag.to_le_bytes());
        let len_at = self.buf.len();
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        let start = self.buf.len();

        payload(self)?;

        let len = u32::try_from(self.buf.len() - start).map_err(|_| CodecError::InvalidValue {
            tag,
            reason: "field larger than 4 GiB".into(),
        })?;
        self.buf[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    pub fn bool(&mut self, tag: u16, v: bool) -> Result<(), CodecError> {
        self.field(tag, |w| {
            w.buf.push(v as u8);
            Ok(())
        })
    }

    pub fn u8(&mut self, tag: u16, v: u8) -> Result<(), CodecError> {
        self.field(tag, |w| {
            w.buf.push(v);
            Ok(())
        })
    }

    pub fn i32(&mut self, tag: u16, v: i32) -> Result<(), CodecError> {
        self.field(tag, |w| {
            w.buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        })
    }

    pub fn u32(&mut self, tag: u16, v: u32) -> Result<(), CodecError> {
        self.field(tag, |w| {
            w.buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        })
    }

    pub fn f32(&mut self, tag: u16, v: f32) -> Result<(), CodecError> {
        self.field(tag, |w| {
            w.buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        })
    }

    pub fn string(&mut self, tag: u16, v: &str) -> Result<(), CodecError> {
        self.bytes(tag, v.as_bytes())
    }

    /// Optional strings are simply left out when absent.
    pub fn opt_string(&mut self, tag: u16, v: Option<&str>) -> Result<(), CodecError> {
        match v {
            Some(s) => self.string(tag, s),
            None => Ok(()),
        }
    }

    pub fn bytes(&mut self, tag: u16, v: &[u8]) -> Result<(), CodecError> {
        self.field(tag, |w| {
            w.buf.extend_from_slice(v);
            Ok(())
        })
    }

    /// Two 64-bit halves, most significant first.
    pub fn uuid(&mut self, tag: u16, v: Uuid) -> Result<(), CodecError> {
        let (most, least) = v.as_u64_pair();
        self.field(tag, |w| {
            w.buf.extend_from_slice(&most.to_le_bytes());
            w.buf.extend_from_slice(&least.to_le_bytes());
            Ok(())
        })
    }

    pub fn object<T: Tagged>(&mut self, tag: u16, v: &T) -> Result<(), CodecError> {
        self.field(tag, |w| write_object(w.registry, w.buf, v))
    }

    /// A counted list of objects, each length-prefixed.
    pub fn objects<'v, T, I>(&mut self, tag: u16, items: I) -> Result<(), CodecError>
    where
        T: Tagged + 'v,
        I: IntoIterator<Item = &'v T>,
    {
        self.field(tag, |w| {
            let items: Vec<&T> = items.into_iter().collect();
            w.buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                let len_at = w.buf.len();
                w.buf.extend_from_slice(&0u32.to_le_bytes());
                let start = w.buf.len();
                write_object(w.registry, w.buf, item)?;
                let len = (w.buf.len() - start) as u32;
                w.buf[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
            }
            Ok(())
        })
    }
}

/// Write a complete object: type id, fields, terminator.
pub(crate) fn write_object<T: Tagged>(
    registry: &TypeRegistry,
    buf: &mut Vec<u8>,
    value: &T,
) -> Result<(), CodecError> {
    let id = registry.id_of::<T>()?;
    buf.extend_from_slice(&id.to_le_bytes());
    value.encode_fields(&mut FieldWriter::new(registry, buf))?;
    buf.extend_from_slice(&0u16.to_le_bytes());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════
// Reading
// ═══════════════════════════════════════════════════════════════════

/// Byte cursor over a slice.
pub(crate) struct Cursor<'b> {
    data: &'b [u8],
    pos: usize,
}

impl<'b> Cursor<'b> {
    pub(crate) fn new(data: &'b [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize, what: &'static str) -> Result<&'b [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::Truncated(what))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u16(&mut self, what: &'static str) -> Result<u16, CodecError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self, what: &'static str) -> Result<u32, CodecError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self, what: &'static str) -> Result<u64, CodecError> {
        let b = self.take(8, what)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Reads the payload of one field.
pub struct FieldReader<'a, 'b> {
    registry: &'a TypeRegistry,
    tag: u16,
    cursor: Cursor<'b>,
}

impl<'a, 'b> FieldReader<'a, 'b> {
    pub(crate) fn new(registry: &'a TypeRegistry, tag: u16, payload: &'b [u8]) -> Self {
        Self {
            registry,
            tag,
            cursor: Cursor::new(payload),
        }
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    fn invalid(&self, reason: impl Into<String>) -> CodecError {
        CodecError::InvalidValue {
            tag: self.tag,
            reason: reason.into(),
        }
    }

    pub fn bool(&mut self) -> Result<bool, CodecError> {
        match self.cursor.take(1, "bool")?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.invalid(format!("{} is not a bool", other))),
        }
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.cursor.take(1, "u8")?[0])
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.cursor.u32("i32")? as i32)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        self.cursor.u32("u32")
    }

    pub fn f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.cursor.u32("f32")?))
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let n = self.cursor.remaining();
        Ok(self.cursor.take(n, "bytes")?.to_vec())
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        let raw = self.bytes()?;
        String::from_utf8(raw).map_err(|e| self.invalid(e.to_string()))
    }

    pub fn uuid(&mut self) -> Result<Uuid, CodecError> {
        let most = self.cursor.u64("uuid")?;
        let least = self.cursor.u64("uuid")?;
        Ok(Uuid::from_u64_pair(most, least))
    }

    pub fn object<T: Tagged>(&mut self) -> Result<T, CodecError> {
        read_object(self.registry, &mut self.cursor)
    }

    pub fn objects<T: Tagged>(&mut self) -> Result<Vec<T>, CodecError> {
        let count = self.cursor.u32("object count")? as usize;
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let len = self.cursor.u32("object length")? as usize;
            let body = self.cursor.take(len, "object")?;
            out.push(read_object(self.registry, &mut Cursor::new(body))?);
        }
        Ok(out)
    }
}

/// Read a complete object, skipping tags the type does not know.
pub(crate) fn read_object<T: Tagged>(
    registry: &TypeRegistry,
    cursor: &mut Cursor<'_>,
) -> Result<T, CodecError> {
    let expected = registry.id_of::<T>()?;
    let found = cursor.u16("type id")?;
    if found != expected {
        return Err(CodecError::TypeMismatch {
            expected: T::TYPE_NAME,
            found,
        });
    }

    let mut value = T::default();
    loop {
        let tag = cursor.u16("field tag")?;
        if tag == 0 {
            break;
        }
        let len = cursor.u32("field length")? as usize;
        let payload = cursor.take(len, T::TYPE_NAME)?;

        if T::RETIRED.contains(&tag) {
            log::debug!("{}: dropping retired tag {}", T::TYPE_NAME, tag);
            continue;
        }
        let known = value.decode_field(tag, &mut FieldReader::new(registry, tag, payload))?;
        if !known {
            log::debug!("{}: skipping unknown tag {} ({} bytes)", T::TYPE_NAME, tag, len);
        }
    }
    Ok(value)
}
