//! Heterogeneous values crossing the script boundary.

use crate::ScriptError;

/// A single value produced by a script: an int, a float, or a short
/// sequence of either (`[h]`, `[h, v]`, `[h, s, v]` for HSV, `[r, g, b]`
/// for RGB).
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Int(i64),
    Float(f64),
    Tuple(Vec<ScriptValue>),
}

impl ScriptValue {
    /// Integer contents; floats are *not* coerced, matching the
    /// boundary's strictness for RGB components.
    pub fn as_int(&self) -> Result<i64, ScriptError> {
        match self {
            ScriptValue::Int(v) => Ok(*v),
            ScriptValue::Float(_) => Err(ScriptError::Type("can't convert float to int".into())),
            ScriptValue::Tuple(_) => Err(ScriptError::Type("can't convert sequence to int".into())),
        }
    }
}

impl From<i64> for ScriptValue {
    fn from(v: i64) -> Self {
        ScriptValue::Int(v)
    }
}

impl From<f64> for ScriptValue {
    fn from(v: f64) -> Self {
        ScriptValue::Float(v)
    }
}

impl From<(i64, i64, i64)> for ScriptValue {
    fn from((a, b, c): (i64, i64, i64)) -> Self {
        ScriptValue::Tuple(vec![ScriptValue::Int(a), ScriptValue::Int(b), ScriptValue::Int(c)])
    }
}

/// The value shapes `output_*` accepts.
///
/// Typed arrays restrict which output kinds they may feed: byte arrays
/// and packed-int arrays are RGB-only, hue arrays are HSV-only. Object
/// sequences carry [`ScriptValue`]s; iterators are consumed lazily and
/// support the tail-filling generator-reverse mode.
pub enum OutputValues {
    Bytes(Vec<u8>),
    HuesU16(Vec<u16>),
    HuesI16(Vec<i16>),
    HuesF32(Vec<f32>),
    PackedU32(Vec<u32>),
    PackedI32(Vec<i32>),
    Sequence(Vec<ScriptValue>),
    Iterator(Box<dyn Iterator<Item = ScriptValue> + Send>),
}

impl OutputValues {
    /// Element count, where one is knowable without consuming.
    pub fn len(&self) -> Option<usize> {
        match self {
            OutputValues::Bytes(v) => Some(v.len()),
            OutputValues::HuesU16(v) => Some(v.len()),
            OutputValues::HuesI16(v) => Some(v.len()),
            OutputValues::HuesF32(v) => Some(v.len()),
            OutputValues::PackedU32(v) => Some(v.len()),
            OutputValues::PackedI32(v) => Some(v.len()),
            OutputValues::Sequence(v) => Some(v.len()),
            OutputValues::Iterator(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl std::fmt::Debug for OutputValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputValues::Bytes(v) => f.debug_tuple("Bytes").field(&v.len()).finish(),
            OutputValues::HuesU16(v) => f.debug_tuple("HuesU16").field(&v.len()).finish(),
            OutputValues::HuesI16(v) => f.debug_tuple("HuesI16").field(&v.len()).finish(),
            OutputValues::HuesF32(v) => f.debug_tuple("HuesF32").field(&v.len()).finish(),
            OutputValues::PackedU32(v) => f.debug_tuple("PackedU32").field(&v.len()).finish(),
            OutputValues::PackedI32(v) => f.debug_tuple("PackedI32").field(&v.len()).finish(),
            OutputValues::Sequence(v) => f.debug_tuple("Sequence").field(&v.len()).finish(),
            OutputValues::Iterator(_) => f.write_str("Iterator"),
        }
    }
}
