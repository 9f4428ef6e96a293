// src/tagged_value.rs

//! `TaggedValue`: the typed value that crosses the codec boundary.
//!
//! Encoder options and metadata entries travel as tagged values. The tag is
//! the enum discriminant, so the payload is always the one the tag names.
//! Owned payloads (strings, blobs, vectors, nested metadata handles) are
//! released by `Drop`, which runs exactly once per value; [`TaggedValue::clear`]
//! just replaces the value with `Empty`.

use crate::error::{ImagingError, Result};
use crate::guid::Guid;
use crate::metadata::BitmapMetadata;
use std::any::Any;
use std::time::SystemTime;

/// Discriminant of a [`TaggedValue`], for diagnostics and homogeneity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Empty,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bool,
    String,
    Guid,
    Timestamp,
    Blob,
    Vector,
    Metadata,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Empty => "empty",
            ValueKind::I8 => "i8",
            ValueKind::U8 => "u8",
            ValueKind::I16 => "i16",
            ValueKind::U16 => "u16",
            ValueKind::I32 => "i32",
            ValueKind::U32 => "u32",
            ValueKind::I64 => "i64",
            ValueKind::U64 => "u64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::Bool => "bool",
            ValueKind::String => "string",
            ValueKind::Guid => "guid",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Blob => "blob",
            ValueKind::Vector => "vector",
            ValueKind::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum TaggedValue {
    #[default]
    Empty,
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    Guid(Guid),
    Timestamp(SystemTime),
    Blob(Vec<u8>),
    /// Homogeneous vector of scalar, string, GUID or timestamp elements.
    Vector(Vec<TaggedValue>),
    /// Handle to a nested metadata block.
    Metadata(BitmapMetadata),
}

impl TaggedValue {
    /// Selects a tag from the runtime type of `value`.
    ///
    /// Fails with `UnsupportedValueKind` for any type without a tag.
    pub fn init(value: &dyn Any) -> Result<Self> {
        macro_rules! try_scalars {
            ($($ty:ty => $variant:ident),* $(,)?) => {
                $(
                    if let Some(v) = value.downcast_ref::<$ty>() {
                        return Ok(TaggedValue::$variant(v.clone()));
                    }
                    if let Some(v) = value.downcast_ref::<Vec<$ty>>() {
                        return Ok(TaggedValue::Vector(
                            v.iter().cloned().map(TaggedValue::$variant).collect(),
                        ));
                    }
                )*
            };
        }

        // Vec<u8> is a blob, not a vector, so check it before the scalar table.
        if let Some(v) = value.downcast_ref::<Vec<u8>>() {
            return Ok(TaggedValue::Blob(v.clone()));
        }
        if let Some(v) = value.downcast_ref::<u8>() {
            return Ok(TaggedValue::U8(*v));
        }
        if let Some(v) = value.downcast_ref::<&str>() {
            return Ok(TaggedValue::String((*v).to_string()));
        }
        if let Some(v) = value.downcast_ref::<Vec<&str>>() {
            return Ok(TaggedValue::Vector(
                v.iter().map(|s| TaggedValue::String(s.to_string())).collect(),
            ));
        }
        if let Some(v) = value.downcast_ref::<BitmapMetadata>() {
            return Ok(TaggedValue::Metadata(v.clone()));
        }
        if let Some(v) = value.downcast_ref::<TaggedValue>() {
            return Ok(v.clone());
        }

        try_scalars!(
            i8 => I8,
            i16 => I16,
            u16 => U16,
            i32 => I32,
            u32 => U32,
            i64 => I64,
            u64 => U64,
            f32 => F32,
            f64 => F64,
            bool => Bool,
            String => String,
            Guid => Guid,
            SystemTime => Timestamp,
        );

        Err(ImagingError::UnsupportedValueKind(
            "no tag exists for this runtime type",
        ))
    }

    /// Builds a vector value, rejecting mixed or non-vectorizable elements.
    pub fn vector(elements: Vec<TaggedValue>) -> Result<Self> {
        if let Some(first) = elements.first() {
            let kind = first.kind();
            if matches!(
                kind,
                ValueKind::Empty | ValueKind::Vector | ValueKind::Metadata | ValueKind::Blob
            ) {
                return Err(ImagingError::UnsupportedValueKind(
                    "vectors hold scalars, strings, GUIDs or timestamps",
                ));
            }
            if let Some(other) = elements.iter().find(|e| e.kind() != kind) {
                return Err(ImagingError::TypeMismatch {
                    expected: kind.name(),
                    found: other.kind().name(),
                });
            }
        }
        Ok(TaggedValue::Vector(elements))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            TaggedValue::Empty => ValueKind::Empty,
            TaggedValue::I8(_) => ValueKind::I8,
            TaggedValue::U8(_) => ValueKind::U8,
            TaggedValue::I16(_) => ValueKind::I16,
            TaggedValue::U16(_) => ValueKind::U16,
            TaggedValue::I32(_) => ValueKind::I32,
            TaggedValue::U32(_) => ValueKind::U32,
            TaggedValue::I64(_) => ValueKind::I64,
            TaggedValue::U64(_) => ValueKind::U64,
            TaggedValue::F32(_) => ValueKind::F32,
            TaggedValue::F64(_) => ValueKind::F64,
            TaggedValue::Bool(_) => ValueKind::Bool,
            TaggedValue::String(_) => ValueKind::String,
            TaggedValue::Guid(_) => ValueKind::Guid,
            TaggedValue::Timestamp(_) => ValueKind::Timestamp,
            TaggedValue::Blob(_) => ValueKind::Blob,
            TaggedValue::Vector(_) => ValueKind::Vector,
            TaggedValue::Metadata(_) => ValueKind::Metadata,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, TaggedValue::Empty)
    }

    /// Decodes into `T`, failing with `TypeMismatch` on an incompatible tag.
    pub fn to_value<T: FromTaggedValue>(&self) -> Result<T> {
        T::from_tagged(self)
    }

    /// Releases the payload and resets to `Empty`. Safe to call repeatedly.
    pub fn clear(&mut self) {
        // Dropping the old value releases owned payloads; vectors drop each
        // element before their own storage.
        drop(std::mem::take(self));
    }

    fn mismatch(&self, expected: &'static str) -> ImagingError {
        ImagingError::TypeMismatch {
            expected,
            found: self.kind().name(),
        }
    }
}

/// Conversion out of a [`TaggedValue`] into a caller type.
pub trait FromTaggedValue: Sized {
    fn from_tagged(value: &TaggedValue) -> Result<Self>;
}

macro_rules! tagged_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for TaggedValue {
                fn from(v: $ty) -> Self {
                    TaggedValue::$variant(v)
                }
            }

            impl FromTaggedValue for $ty {
                fn from_tagged(value: &TaggedValue) -> Result<Self> {
                    match value {
                        TaggedValue::$variant(v) => Ok(v.clone()),
                        other => Err(other.mismatch(stringify!($ty))),
                    }
                }
            }
        )*
    };
}

tagged_scalar!(
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    bool => Bool,
    String => String,
    Guid => Guid,
    SystemTime => Timestamp,
    BitmapMetadata => Metadata,
);

impl From<&str> for TaggedValue {
    fn from(v: &str) -> Self {
        TaggedValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for TaggedValue {
    fn from(v: Vec<u8>) -> Self {
        TaggedValue::Blob(v)
    }
}

impl From<Vec<String>> for TaggedValue {
    fn from(v: Vec<String>) -> Self {
        TaggedValue::Vector(v.into_iter().map(TaggedValue::String).collect())
    }
}

impl FromTaggedValue for TaggedValue {
    fn from_tagged(value: &TaggedValue) -> Result<Self> {
        Ok(value.clone())
    }
}

/// Blobs decode to bytes; so do vectors of `u8`.
impl FromTaggedValue for Vec<u8> {
    fn from_tagged(value: &TaggedValue) -> Result<Self> {
        match value {
            TaggedValue::Blob(bytes) => Ok(bytes.clone()),
            TaggedValue::Vector(items) => items.iter().map(u8::from_tagged).collect(),
            other => Err(other.mismatch("blob")),
        }
    }
}

macro_rules! tagged_vector {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromTaggedValue for Vec<$ty> {
                fn from_tagged(value: &TaggedValue) -> Result<Self> {
                    match value {
                        TaggedValue::Vector(items) => items.iter().map(<$ty>::from_tagged).collect(),
                        other => Err(other.mismatch("vector")),
                    }
                }
            }
        )*
    };
}

tagged_vector!(i8, i16, u16, i32, u32, i64, u64, f32, f64, bool, String, Guid, SystemTime);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerFormat;
    use std::time::Duration;

    #[test]
    fn init_selects_tag_from_runtime_type() {
        assert_eq!(TaggedValue::init(&42i32).unwrap(), TaggedValue::I32(42));
        assert_eq!(TaggedValue::init(&7u8).unwrap(), TaggedValue::U8(7));
        assert_eq!(TaggedValue::init(&0.5f32).unwrap(), TaggedValue::F32(0.5));
        assert_eq!(TaggedValue::init(&true).unwrap(), TaggedValue::Bool(true));
        assert_eq!(
            TaggedValue::init(&"title").unwrap(),
            TaggedValue::String("title".into())
        );
        assert_eq!(
            TaggedValue::init(&vec![1u8, 2, 3]).unwrap(),
            TaggedValue::Blob(vec![1, 2, 3])
        );
        assert_eq!(
            TaggedValue::init(&vec![1u16, 2]).unwrap(),
            TaggedValue::Vector(vec![TaggedValue::U16(1), TaggedValue::U16(2)])
        );
    }

    #[test]
    fn init_rejects_unsupported_types() {
        struct Opaque;
        assert!(matches!(
            TaggedValue::init(&Opaque),
            Err(ImagingError::UnsupportedValueKind(_))
        ));
        assert!(TaggedValue::init(&'c').is_err());
    }

    #[test]
    fn to_value_checks_the_tag() {
        let v = TaggedValue::from(0.75f32);
        assert_eq!(v.to_value::<f32>().unwrap(), 0.75);
        assert_eq!(
            v.to_value::<bool>(),
            Err(ImagingError::TypeMismatch {
                expected: "bool",
                found: "f32"
            })
        );
    }

    #[test]
    fn vectors_decode_elementwise() {
        let v = TaggedValue::from(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(v.to_value::<Vec<String>>().unwrap(), vec!["a", "b"]);
        assert!(v.to_value::<Vec<u32>>().is_err());
    }

    #[test]
    fn mixed_vectors_are_rejected() {
        let mixed = vec![TaggedValue::U16(1), TaggedValue::I32(2)];
        assert!(matches!(
            TaggedValue::vector(mixed),
            Err(ImagingError::TypeMismatch { .. })
        ));
        let nested = vec![TaggedValue::Vector(Vec::new())];
        assert!(TaggedValue::vector(nested).is_err());
    }

    #[test]
    fn timestamps_round_trip() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        assert_eq!(TaggedValue::from(t).to_value::<SystemTime>().unwrap(), t);
    }

    #[test]
    fn clear_is_idempotent_and_releases_nested_handles() {
        let meta = BitmapMetadata::new(ContainerFormat::Jpeg);
        let mut v = TaggedValue::from(meta.clone());
        assert_eq!(meta.handle_count(), 2);
        v.clear();
        assert!(v.is_empty());
        assert_eq!(meta.handle_count(), 1);
        v.clear();
        assert!(v.is_empty());
        assert_eq!(meta.handle_count(), 1);
    }
}
