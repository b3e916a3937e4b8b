//! CBOR persistence for operator values.
//!
//! Only operator values are stored; defaults are re-declared by the
//! script on every run. Each entry is `key => [type_tag, payload]`.
//! Session-only property types (float, profile) have no tag and are not
//! written. Loading is tolerant: unknown tags and out-of-range elements
//! are skipped if well-formed, a full budget truncates, and anything
//! malformed resets the whole config and reports a parse error.

use std::collections::BTreeSet;

use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use tracing::debug;

use core_fs::cbor;
use core_fs::outcome::Outcome;

use crate::{MAX_VALUES_SIZE, Property, PropertyType, ScriptConfig, Slot, allowed_key};

impl ScriptConfig {
    /// Number of entries [`ScriptConfig::save`] will write.
    pub fn persisted_len(&self) -> u64 {
        self.properties
            .values()
            .filter(|p| p.slot.has_value() && p.slot.property_type().persist_tag().is_some())
            .count() as u64
    }

    /// Write the config map into `enc` (a definite-length map).
    pub fn save(&self, enc: &mut Encoder<&mut Vec<u8>>) {
        enc.map(self.persisted_len()).expect("vec write is infallible");

        for (key, property) in &self.properties {
            if !property.slot.has_value() {
                continue;
            }
            let Some(tag) = property.slot.property_type().persist_tag() else {
                continue;
            };

            enc.str(key)
                .and_then(|e| e.array(2))
                .and_then(|e| e.str(tag))
                .expect("vec write is infallible");

            match &property.slot {
                Slot::Bool(s) => {
                    enc.bool(s.value.expect("has_value checked")).expect("vec write is infallible");
                }
                Slot::S32(s) => {
                    enc.i32(s.value.expect("has_value checked")).expect("vec write is infallible");
                }
                Slot::Rgb(s) => {
                    enc.u32(s.value.expect("has_value checked") as u32 & 0xff_ff_ff)
                        .expect("vec write is infallible");
                }
                Slot::ListU16(c) => {
                    enc.array(c.values.len() as u64).expect("vec write is infallible");
                    for v in &c.values {
                        enc.u16(*v).expect("vec write is infallible");
                    }
                }
                Slot::ListS32(c) => {
                    enc.array(c.values.len() as u64).expect("vec write is infallible");
                    for v in &c.values {
                        enc.i32(*v).expect("vec write is infallible");
                    }
                }
                Slot::ListRgb(c) => {
                    enc.array(c.values.len() as u64).expect("vec write is infallible");
                    for v in &c.values {
                        enc.u32(*v as u32 & 0xff_ff_ff).expect("vec write is infallible");
                    }
                }
                Slot::SetU16(c) => {
                    enc.array(c.values.len() as u64).expect("vec write is infallible");
                    for v in &c.values {
                        enc.u16(*v).expect("vec write is infallible");
                    }
                }
                Slot::SetS32(c) => {
                    enc.array(c.values.len() as u64).expect("vec write is infallible");
                    for v in &c.values {
                        enc.i32(*v).expect("vec write is infallible");
                    }
                }
                Slot::SetRgb(c) => {
                    enc.array(c.values.len() as u64).expect("vec write is infallible");
                    for v in &c.values {
                        enc.u32(*v as u32 & 0xff_ff_ff).expect("vec write is infallible");
                    }
                }
                Slot::Float(_) | Slot::Profile(_) => unreachable!("session-only types have no tag"),
            }
        }
    }

    /// Replace the config with the map at `dec`.
    ///
    /// The config is reset first; on a parse error it is reset again so a
    /// corrupt file never leaves partial state behind.
    pub fn load(&mut self, dec: &mut Decoder<'_>) -> Outcome {
        self.clear();

        match self.load_inner(dec) {
            Ok(worst) => worst,
            Err(outcome) => {
                self.clear();
                outcome
            }
        }
    }

    fn load_inner(&mut self, dec: &mut Decoder<'_>) -> Result<Outcome, Outcome> {
        let entries = cbor::expect_definite_map(dec)?;
        let mut worst = Outcome::Ok;

        for _ in 0..entries {
            let key = cbor::read_text(dec)?;

            if !matches!(dec.datatype(), Ok(Type::Array)) {
                cbor::skip_well_formed(dec)?;
                worst.combine(Outcome::NotFound);
                continue;
            }

            let pair_len = cbor::expect_definite_array(dec)?;
            if pair_len != 2 {
                for _ in 0..pair_len {
                    cbor::skip_well_formed(dec)?;
                }
                worst.combine(Outcome::NotFound);
                continue;
            }

            let tag = cbor::read_text(dec)?;
            let property_type = PropertyType::from_tag(&tag).filter(|t| t.persist_tag().is_some());

            let (Some(property_type), true) = (property_type, allowed_key(&key)) else {
                cbor::skip_well_formed(dec)?;
                debug!(target: "config", key = key.as_str(), tag = tag.as_str(), "skipping unknown config entry");
                worst.combine(Outcome::NotFound);
                continue;
            };

            let budget = MAX_VALUES_SIZE.saturating_sub(self.values_size());
            let slot = load_slot(dec, property_type, budget, &mut worst)?;

            if slot.has_value() {
                self.properties.insert(
                    key,
                    Property {
                        registered: false,
                        slot,
                    },
                );
            }
        }

        Ok(worst)
    }
}

fn load_slot(
    dec: &mut Decoder<'_>,
    property_type: PropertyType,
    budget_bytes: usize,
    worst: &mut Outcome,
) -> Result<Slot, Outcome> {
    let mut slot = Slot::new(property_type);

    match &mut slot {
        Slot::Bool(s) => {
            s.value = Some(dec.bool().map_err(|_| Outcome::ParseError)?);
        }
        Slot::S32(s) => {
            let v = dec.i64().map_err(|_| Outcome::ParseError)?;
            if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
                s.value = Some(v as i32);
            } else {
                worst.combine(Outcome::OutOfRange);
            }
        }
        Slot::Rgb(s) => {
            let v = dec.i64().map_err(|_| Outcome::ParseError)?;
            if (0..=0xff_ff_ff).contains(&v) {
                s.value = Some(v as i32);
            } else {
                worst.combine(Outcome::OutOfRange);
            }
        }
        Slot::ListU16(c) => {
            load_elements(dec, &mut c.values, budget_bytes / size_of::<u16>(), worst, |v| {
                (0..=u16::MAX as i64).contains(&v).then_some(v as u16)
            })?;
        }
        Slot::ListS32(c) => {
            load_elements(dec, &mut c.values, budget_bytes / size_of::<i32>(), worst, |v| {
                (i32::MIN as i64..=i32::MAX as i64).contains(&v).then_some(v as i32)
            })?;
        }
        Slot::ListRgb(c) => {
            load_elements(dec, &mut c.values, budget_bytes / size_of::<i32>(), worst, |v| {
                (0..=0xff_ff_ff).contains(&v).then_some(v as i32)
            })?;
        }
        Slot::SetU16(c) => {
            load_set_elements(dec, &mut c.values, budget_bytes / size_of::<u16>(), worst, |v| {
                (0..=u16::MAX as i64).contains(&v).then_some(v as u16)
            })?;
        }
        Slot::SetS32(c) => {
            load_set_elements(dec, &mut c.values, budget_bytes / size_of::<i32>(), worst, |v| {
                (i32::MIN as i64..=i32::MAX as i64).contains(&v).then_some(v as i32)
            })?;
        }
        Slot::SetRgb(c) => {
            load_set_elements(dec, &mut c.values, budget_bytes / size_of::<i32>(), worst, |v| {
                (0..=0xff_ff_ff).contains(&v).then_some(v as i32)
            })?;
        }
        Slot::Float(_) | Slot::Profile(_) => unreachable!("filtered before loading"),
    }

    Ok(slot)
}

fn load_elements<T>(
    dec: &mut Decoder<'_>,
    out: &mut Vec<T>,
    budget_elements: usize,
    worst: &mut Outcome,
    convert: impl Fn(i64) -> Option<T>,
) -> Result<(), Outcome> {
    let len = cbor::expect_definite_array(dec)?;

    for _ in 0..len {
        let v = dec.i64().map_err(|_| Outcome::ParseError)?;
        match convert(v) {
            Some(element) if out.len() < budget_elements => out.push(element),
            Some(_) => {
                worst.combine(Outcome::Full);
            }
            None => {
                worst.combine(Outcome::OutOfRange);
            }
        }
    }

    Ok(())
}

fn load_set_elements<T: Ord>(
    dec: &mut Decoder<'_>,
    out: &mut BTreeSet<T>,
    budget_elements: usize,
    worst: &mut Outcome,
    convert: impl Fn(i64) -> Option<T>,
) -> Result<(), Outcome> {
    let len = cbor::expect_definite_array(dec)?;

    for _ in 0..len {
        let v = dec.i64().map_err(|_| Outcome::ParseError)?;
        match convert(v) {
            Some(element) if out.len() < budget_elements => {
                out.insert(element);
            }
            Some(_) => {
                worst.combine(Outcome::Full);
            }
            None => {
                worst.combine(Outcome::OutOfRange);
            }
        }
    }

    Ok(())
}
