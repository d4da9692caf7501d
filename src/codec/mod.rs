// src/codec/mod.rs
//
// Tagged binary codec for the node graph.
//
// Every persisted type implements `Tagged`: it writes its fields under small
// integer tags and reads them back one tag at a time. Tags a reader does not
// know are skipped by length, so adding a field never breaks an old file.
// Deleting a field does: list its tag in `RETIRED` instead and leave the
// number unused.
//
// Types must be registered before use. `Codec::standard()` registers the
// full node set and validates it once, so a missing registration fails at
// startup rather than halfway through a save.

mod wire;

pub use wire::{FieldReader, FieldWriter};

use std::any::TypeId;
use std::collections::HashMap;
use std::path::Path;

use crate::error::CodecError;
use crate::node::NodeInfo;
use crate::state::{
    EffectNode, EffectsChannel, MachineNode, MasterNode, MasterPart, MixerChannel, PatternNode,
    PatternSequencerComponent, Phrase, PresetComponent, RackNode, SequencerNode, SongEntry,
    SynthComponent, Trigger, VolumeComponent,
};

/// File magic for tagged archives.
pub const MAGIC: &[u8; 4] = b"CTKN";

/// Current archive version.
pub const VERSION: u8 = 1;

/// A type with a stable tagged-field encoding.
pub trait Tagged: Default + 'static {
    /// Name used in registration and error messages.
    const TYPE_NAME: &'static str;

    /// Names of the tagged types this one embeds.
    const NESTED: &'static [&'static str] = &[];

    /// Tags of removed fields. Readers drop them without complaint.
    const RETIRED: &'static [u16] = &[];

    fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError>;

    /// Apply one field. Returns `false` for tags this type does not know.
    fn decode_field(&mut self, tag: u16, r: &mut FieldReader<'_, '_>) -> Result<bool, CodecError>;
}

#[derive(Debug, Clone)]
struct Registration {
    id: u16,
    name: &'static str,
    nested: &'static [&'static str],
}

/// Closed set of types the codec accepts.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    by_type: HashMap<TypeId, Registration>,
    names: HashMap<&'static str, u16>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tagged>(&mut self, id: u16) -> Result<(), CodecError> {
        if self.names.values().any(|existing| *existing == id) {
            return Err(CodecError::DuplicateId(id));
        }
        if self.names.contains_key(T::TYPE_NAME) {
            return Err(CodecError::DuplicateType(T::TYPE_NAME));
        }
        self.names.insert(T::TYPE_NAME, id);
        self.by_type.insert(
            TypeId::of::<T>(),
            Registration {
                id,
                name: T::TYPE_NAME,
                nested: T::NESTED,
            },
        );
        Ok(())
    }

    pub fn is_registered<T: Tagged>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Check that every embedded type is registered as well.
    pub fn validate(&self) -> Result<(), CodecError> {
        for reg in self.by_type.values() {
            if let Some(missing) = reg.nested.iter().find(|n| !self.names.contains_key(*n)) {
                return Err(CodecError::UnregisteredNested {
                    owner: reg.name,
                    nested: *missing,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn id_of<T: Tagged>(&self) -> Result<u16, CodecError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|r| r.id)
            .ok_or(CodecError::Unregistered {
                type_name: T::TYPE_NAME,
            })
    }
}

/// Encoder/decoder bound to a validated registry.
#[derive(Debug, Clone)]
pub struct Codec {
    registry: TypeRegistry,
}

impl Codec {
    /// Wrap a registry, validating it first.
    pub fn new(registry: TypeRegistry) -> Result<Self, CodecError> {
        registry.validate()?;
        Ok(Self { registry })
    }

    /// The full node set. Ids are part of the file format; never reuse one.
    pub fn standard() -> Result<Self, CodecError> {
        let mut r = TypeRegistry::new();
        r.register::<NodeInfo>(1)?;
        r.register::<RackNode>(10)?;
        r.register::<MasterNode>(11)?;
        r.register::<MasterPart>(12)?;
        r.register::<MachineNode>(20)?;
        r.register::<PresetComponent>(21)?;
        r.register::<VolumeComponent>(22)?;
        r.register::<SynthComponent>(23)?;
        r.register::<MixerChannel>(24)?;
        r.register::<EffectsChannel>(25)?;
        r.register::<PatternSequencerComponent>(26)?;
        r.register::<EffectNode>(30)?;
        r.register::<SequencerNode>(40)?;
        r.register::<SongEntry>(41)?;
        r.register::<PatternNode>(50)?;
        r.register::<Phrase>(51)?;
        r.register::<Trigger>(52)?;
        Self::new(r)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Encode into a fresh buffer with the archive header.
    pub fn encode<T: Tagged>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        wire::write_object(&self.registry, &mut buf, value)?;
        Ok(buf)
    }

    pub fn decode<T: Tagged>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let mut cursor = wire::Cursor::new(bytes);
        if cursor.take(4, "header")? != MAGIC {
            return Err(CodecError::BadHeader);
        }
        let version = cursor.take(1, "header")?[0];
        if version > VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        wire::read_object(&self.registry, &mut cursor)
    }

    /// Encode fully before touching the file.
    pub fn write_file<T: Tagged>(&self, path: &Path, value: &T) -> Result<(), CodecError> {
        let bytes = self.encode(value)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn read_file<T: Tagged>(&self, path: &Path) -> Result<T, CodecError> {
        let bytes = std::fs::read(path)?;
        self.decode(&bytes)
    }

    /// Structural deep copy: encode, then decode.
    ///
    /// The copy shares nothing with the source and starts with a fresh
    /// lifecycle, since lifecycle state is not persisted.
    pub fn clone_via_roundtrip<T: Tagged>(&self, value: &T) -> Result<T, CodecError> {
        let bytes = self.encode(value)?;
        self.decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x: f32,
        label: Option<String>,
    }

    impl Tagged for Point {
        const TYPE_NAME: &'static str = "Point";

        fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
            w.f32(1, self.x)?;
            w.opt_string(2, self.label.as_deref())
        }

        fn decode_field(
            &mut self,
            tag: u16,
            r: &mut FieldReader<'_, '_>,
        ) -> Result<bool, CodecError> {
            match tag {
                1 => self.x = r.f32()?,
                2 => self.label = Some(r.string()?),
                _ => return Ok(false),
            }
            Ok(true)
        }
    }

    // Same type name and id, one field added.
    #[derive(Debug, Default, PartialEq)]
    struct PointV2 {
        x: f32,
        label: Option<String>,
        y: f32,
    }

    impl Tagged for PointV2 {
        const TYPE_NAME: &'static str = "Point";

        fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
            w.f32(1, self.x)?;
            w.opt_string(2, self.label.as_deref())?;
            w.f32(3, self.y)
        }

        fn decode_field(
            &mut self,
            tag: u16,
            r: &mut FieldReader<'_, '_>,
        ) -> Result<bool, CodecError> {
            match tag {
                1 => self.x = r.f32()?,
                2 => self.label = Some(r.string()?),
                3 => self.y = r.f32()?,
                _ => return Ok(false),
            }
            Ok(true)
        }
    }

    // Field 2 removed and retired.
    #[derive(Debug, Default, PartialEq)]
    struct PointV3 {
        x: f32,
    }

    impl Tagged for PointV3 {
        const TYPE_NAME: &'static str = "Point";
        const RETIRED: &'static [u16] = &[2];

        fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
            w.f32(1, self.x)
        }

        fn decode_field(
            &mut self,
            tag: u16,
            r: &mut FieldReader<'_, '_>,
        ) -> Result<bool, CodecError> {
            match tag {
                1 => self.x = r.f32()?,
                _ => return Ok(false),
            }
            Ok(true)
        }
    }

    #[derive(Debug, Default)]
    struct Line {
        points: Vec<Point>,
    }

    impl Tagged for Line {
        const TYPE_NAME: &'static str = "Line";
        const NESTED: &'static [&'static str] = &["Point"];

        fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
            w.objects(1, &self.points)
        }

        fn decode_field(
            &mut self,
            tag: u16,
            r: &mut FieldReader<'_, '_>,
        ) -> Result<bool, CodecError> {
            match tag {
                1 => self.points = r.objects()?,
                _ => return Ok(false),
            }
            Ok(true)
        }
    }

    fn codec_with<T: Tagged>() -> Codec {
        let mut r = TypeRegistry::new();
        r.register::<T>(7).unwrap();
        Codec::new(r).unwrap()
    }

    #[test]
    fn test_old_file_reads_with_new_field_defaulted() {
        let old = codec_with::<Point>();
        let bytes = old
            .encode(&Point {
                x: 2.5,
                label: Some("a".into()),
            })
            .unwrap();

        let new = codec_with::<PointV2>();
        let read: PointV2 = new.decode(&bytes).unwrap();
        assert_eq!(
            read,
            PointV2 {
                x: 2.5,
                label: Some("a".into()),
                y: 0.0
            }
        );
    }

    #[test]
    fn test_new_file_reads_with_old_type() {
        let new = codec_with::<PointV2>();
        let bytes = new
            .encode(&PointV2 {
                x: 1.0,
                label: None,
                y: 9.0,
            })
            .unwrap();

        let old = codec_with::<Point>();
        let read: Point = old.decode(&bytes).unwrap();
        assert_eq!(read, Point { x: 1.0, label: None });
    }

    #[test]
    fn test_retired_tag_is_skipped() {
        let old = codec_with::<Point>();
        let bytes = old
            .encode(&Point {
                x: 4.0,
                label: Some("gone".into()),
            })
            .unwrap();

        let v3 = codec_with::<PointV3>();
        assert_eq!(v3.decode::<PointV3>(&bytes).unwrap(), PointV3 { x: 4.0 });
    }

    #[test]
    fn test_unregistered_type_fails() {
        let codec = codec_with::<Point>();
        let err = codec.encode(&PointV3::default());
        // PointV3 shares a name but not a Rust type with Point
        assert!(matches!(err, Err(CodecError::Unregistered { .. })));
    }

    #[test]
    fn test_validate_catches_missing_nested_type() {
        let mut r = TypeRegistry::new();
        r.register::<Line>(1).unwrap();
        assert!(matches!(
            Codec::new(r),
            Err(CodecError::UnregisteredNested {
                owner: "Line",
                nested: "Point"
            })
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut r = TypeRegistry::new();
        r.register::<Point>(1).unwrap();
        assert!(matches!(
            r.register::<Line>(1),
            Err(CodecError::DuplicateId(1))
        ));
        assert!(matches!(
            r.register::<PointV2>(2),
            Err(CodecError::DuplicateType("Point"))
        ));
    }

    #[test]
    fn test_nested_list() {
        let mut r = TypeRegistry::new();
        r.register::<Point>(1).unwrap();
        r.register::<Line>(2).unwrap();
        let codec = Codec::new(r).unwrap();

        let line = Line {
            points: vec![
                Point { x: 1.0, label: None },
                Point {
                    x: 2.0,
                    label: Some("b".into()),
                },
            ],
        };
        let copy = codec.clone_via_roundtrip(&line).unwrap();
        assert_eq!(copy.points, line.points);
    }

    #[test]
    fn test_bad_header_and_truncation() {
        let codec = codec_with::<Point>();
        assert!(matches!(
            codec.decode::<Point>(b"NOPE\x01"),
            Err(CodecError::BadHeader)
        ));

        let mut bytes = codec.encode(&Point::default()).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            codec.decode::<Point>(&bytes),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn test_uuid_is_two_u64() {
        #[derive(Default)]
        struct Id(uuid::Uuid);
        impl Tagged for Id {
            const TYPE_NAME: &'static str = "Id";
            fn encode_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
                w.uuid(1, self.0)
            }
            fn decode_field(
                &mut self,
                tag: u16,
                r: &mut FieldReader<'_, '_>,
            ) -> Result<bool, CodecError> {
                if tag != 1 {
                    return Ok(false);
                }
                self.0 = r.uuid()?;
                Ok(true)
            }
        }

        let codec = codec_with::<Id>();
        let id = uuid::Uuid::new_v4();
        let bytes = codec.encode(&Id(id)).unwrap();
        // header(5) + type id(2) + tag(2) + len(4) + payload(16) + terminator(2)
        assert_eq!(bytes.len(), 31);
        assert_eq!(&bytes[9..13], &16u32.to_le_bytes());
        assert_eq!(codec.decode::<Id>(&bytes).unwrap().0, id);
    }

    #[test]
    fn test_standard_registry_validates() {
        let codec = Codec::standard().unwrap();
        assert!(codec.registry().is_registered::<RackNode>());
        assert!(codec.registry().is_registered::<Trigger>());
    }
}
