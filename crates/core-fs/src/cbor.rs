//! CBOR conventions shared by every persisted file format.
//!
//! All files begin with the self-describe tag (55799) followed by one
//! definite-length container. Helpers here keep tag handling and the
//! error mapping to [`Outcome`] in one place.

use minicbor::data::{Tag, Type};
use minicbor::{Decoder, Encoder};

use crate::outcome::Outcome;

/// CBOR self-describe tag, written at the start of every file.
pub const SELF_DESCRIBE_TAG: Tag = Tag::new(55799);

/// Start an encoder over `buf` with the self-describe tag already written.
pub fn tagged_encoder(buf: &mut Vec<u8>) -> Encoder<&mut Vec<u8>> {
    let mut enc = Encoder::new(buf);
    enc.tag(SELF_DESCRIBE_TAG).expect("vec write is infallible");
    enc
}

/// Consume a leading self-describe tag if present.
///
/// A missing tag is tolerated (older files); a different tag is a parse
/// error.
pub fn expect_self_describe(dec: &mut Decoder<'_>) -> Result<(), Outcome> {
    if matches!(dec.datatype(), Ok(Type::Tag)) {
        let tag = dec.tag().map_err(|_| Outcome::ParseError)?;
        if tag != SELF_DESCRIBE_TAG {
            return Err(Outcome::ParseError);
        }
    }
    Ok(())
}

/// Expect a definite-length map and return its entry count.
pub fn expect_definite_map(dec: &mut Decoder<'_>) -> Result<u64, Outcome> {
    match dec.map() {
        Ok(Some(len)) => Ok(len),
        _ => Err(Outcome::ParseError),
    }
}

/// Expect a definite-length array and return its element count.
pub fn expect_definite_array(dec: &mut Decoder<'_>) -> Result<u64, Outcome> {
    match dec.array() {
        Ok(Some(len)) => Ok(len),
        _ => Err(Outcome::ParseError),
    }
}

/// Read a definite text string.
pub fn read_text(dec: &mut Decoder<'_>) -> Result<String, Outcome> {
    dec.str().map(str::to_owned).map_err(|_| Outcome::ParseError)
}

/// Skip one well-formed item; malformed data is a parse error.
pub fn skip_well_formed(dec: &mut Decoder<'_>) -> Result<(), Outcome> {
    dec.skip().map_err(|_| Outcome::ParseError)
}
