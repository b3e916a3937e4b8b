//! Per-preset script configuration store.
//!
//! A running script declares its parameters (`register_properties`) with a
//! type tag and an optional default; the operator overrides them from the
//! shell (`set`/`unset`/`modify`); the script reads effective values back
//! (`populate_dict`). Defaults and operator values are budgeted
//! separately so neither a greedy script nor a typo-happy operator can
//! exhaust memory.
//!
//! Scalar types carry one default and one value. Collection types carry a
//! default collection and a value collection; a non-empty value collection
//! shadows the default one entirely. Sets store sorted-unique elements,
//! lists preserve insertion order.

mod persist;

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use thiserror::Error;

use core_color::LedProfileId;
use core_fs::names::allowed_file_name;
use core_fs::outcome::Outcome;

pub const MAX_KEY_LENGTH: usize = 48;
pub const MAX_DEFAULTS_SIZE: usize = 8192;
pub const MAX_VALUES_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PropertyType {
    Bool,
    S32,
    Rgb,
    Float,
    Profile,
    ListU16,
    ListS32,
    ListRgb,
    SetU16,
    SetS32,
    SetRgb,
}

impl PropertyType {
    /// Parse a script-facing type tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "o" => Some(Self::Bool),
            "i" => Some(Self::S32),
            "C" => Some(Self::Rgb),
            "f" => Some(Self::Float),
            "P" => Some(Self::Profile),
            "[H" => Some(Self::ListU16),
            "[i" => Some(Self::ListS32),
            "[C" => Some(Self::ListRgb),
            "{H" => Some(Self::SetU16),
            "{i" => Some(Self::SetS32),
            "{C" => Some(Self::SetRgb),
            _ => None,
        }
    }

    /// Tag used in preset files. `None` for session-only types, which are
    /// never persisted.
    pub fn persist_tag(self) -> Option<&'static str> {
        match self {
            Self::Bool => Some("o"),
            Self::S32 => Some("i"),
            Self::Rgb => Some("C"),
            Self::Float | Self::Profile => None,
            Self::ListU16 => Some("[H"),
            Self::ListS32 => Some("[i"),
            Self::ListRgb => Some("[C"),
            Self::SetU16 => Some("{H"),
            Self::SetS32 => Some("{i"),
            Self::SetRgb => Some("{C"),
        }
    }

    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::ListU16 | Self::ListS32 | Self::ListRgb | Self::SetU16 | Self::SetS32 | Self::SetRgb
        )
    }
}

/// Effective or default value, as exchanged with the script boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    None,
    Bool(bool),
    S32(i32),
    Rgb(i32),
    Float(f32),
    Profile(LedProfileId),
    ListU16(Vec<u16>),
    ListS32(Vec<i32>),
    ListRgb(Vec<i32>),
    SetU16(BTreeSet<u16>),
    SetS32(BTreeSet<i32>),
    SetRgb(BTreeSet<i32>),
}

/// One key declaration from `register_config`.
#[derive(Debug, Clone)]
pub struct RegisterEntry {
    pub key: String,
    pub tag: String,
    pub default: Option<ConfigValue>,
}

impl RegisterEntry {
    pub fn new(key: impl Into<String>, tag: impl Into<String>, default: Option<ConfigValue>) -> Self {
        Self {
            key: key.into(),
            tag: tag.into(),
            default,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid config type")]
    InvalidType,
    #[error("default value has wrong type")]
    WrongType,
    #[error("maximum config size exceeded")]
    Full,
}

/// The operator-facing collection mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerOp {
    Add,
    DelValue,
    DelPosition,
    MovePosition,
    CopyPosition,
    SetPosition,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Scalar<T> {
    default: Option<T>,
    value: Option<T>,
}

impl<T: Copy> Scalar<T> {
    fn effective(&self) -> Option<T> {
        self.value.or(self.default)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Collections<C> {
    defaults: C,
    values: C,
}

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Bool(Scalar<bool>),
    S32(Scalar<i32>),
    Rgb(Scalar<i32>),
    Float(Scalar<f32>),
    Profile(Scalar<LedProfileId>),
    ListU16(Collections<Vec<u16>>),
    ListS32(Collections<Vec<i32>>),
    ListRgb(Collections<Vec<i32>>),
    SetU16(Collections<BTreeSet<u16>>),
    SetS32(Collections<BTreeSet<i32>>),
    SetRgb(Collections<BTreeSet<i32>>),
}

impl Slot {
    fn new(property_type: PropertyType) -> Self {
        match property_type {
            PropertyType::Bool => Slot::Bool(Scalar::default()),
            PropertyType::S32 => Slot::S32(Scalar::default()),
            PropertyType::Rgb => Slot::Rgb(Scalar::default()),
            PropertyType::Float => Slot::Float(Scalar::default()),
            PropertyType::Profile => Slot::Profile(Scalar::default()),
            PropertyType::ListU16 => Slot::ListU16(Collections::default()),
            PropertyType::ListS32 => Slot::ListS32(Collections::default()),
            PropertyType::ListRgb => Slot::ListRgb(Collections::default()),
            PropertyType::SetU16 => Slot::SetU16(Collections::default()),
            PropertyType::SetS32 => Slot::SetS32(Collections::default()),
            PropertyType::SetRgb => Slot::SetRgb(Collections::default()),
        }
    }

    fn property_type(&self) -> PropertyType {
        match self {
            Slot::Bool(_) => PropertyType::Bool,
            Slot::S32(_) => PropertyType::S32,
            Slot::Rgb(_) => PropertyType::Rgb,
            Slot::Float(_) => PropertyType::Float,
            Slot::Profile(_) => PropertyType::Profile,
            Slot::ListU16(_) => PropertyType::ListU16,
            Slot::ListS32(_) => PropertyType::ListS32,
            Slot::ListRgb(_) => PropertyType::ListRgb,
            Slot::SetU16(_) => PropertyType::SetU16,
            Slot::SetS32(_) => PropertyType::SetS32,
            Slot::SetRgb(_) => PropertyType::SetRgb,
        }
    }

    fn clear_default(&mut self) {
        match self {
            Slot::Bool(s) => s.default = None,
            Slot::S32(s) | Slot::Rgb(s) => s.default = None,
            Slot::Float(s) => s.default = None,
            Slot::Profile(s) => s.default = None,
            Slot::ListU16(c) => c.defaults.clear(),
            Slot::ListS32(c) | Slot::ListRgb(c) => c.defaults.clear(),
            Slot::SetU16(c) => c.defaults.clear(),
            Slot::SetS32(c) | Slot::SetRgb(c) => c.defaults.clear(),
        }
    }

    fn clear_value(&mut self) {
        match self {
            Slot::Bool(s) => s.value = None,
            Slot::S32(s) | Slot::Rgb(s) => s.value = None,
            Slot::Float(s) => s.value = None,
            Slot::Profile(s) => s.value = None,
            Slot::ListU16(c) => c.values.clear(),
            Slot::ListS32(c) | Slot::ListRgb(c) => c.values.clear(),
            Slot::SetU16(c) => c.values.clear(),
            Slot::SetS32(c) | Slot::SetRgb(c) => c.values.clear(),
        }
    }

    fn has_default(&self) -> bool {
        match self {
            Slot::Bool(s) => s.default.is_some(),
            Slot::S32(s) | Slot::Rgb(s) => s.default.is_some(),
            Slot::Float(s) => s.default.is_some(),
            Slot::Profile(s) => s.default.is_some(),
            Slot::ListU16(c) => !c.defaults.is_empty(),
            Slot::ListS32(c) | Slot::ListRgb(c) => !c.defaults.is_empty(),
            Slot::SetU16(c) => !c.defaults.is_empty(),
            Slot::SetS32(c) | Slot::SetRgb(c) => !c.defaults.is_empty(),
        }
    }

    fn has_value(&self) -> bool {
        match self {
            Slot::Bool(s) => s.value.is_some(),
            Slot::S32(s) | Slot::Rgb(s) => s.value.is_some(),
            Slot::Float(s) => s.value.is_some(),
            Slot::Profile(s) => s.value.is_some(),
            Slot::ListU16(c) => !c.values.is_empty(),
            Slot::ListS32(c) | Slot::ListRgb(c) => !c.values.is_empty(),
            Slot::SetU16(c) => !c.values.is_empty(),
            Slot::SetS32(c) | Slot::SetRgb(c) => !c.values.is_empty(),
        }
    }

    /// Memory accounted against the defaults or values budget.
    fn size(&self, values: bool) -> usize {
        fn collection<T>(len: usize) -> usize {
            len * mem::size_of::<T>()
        }

        match self {
            Slot::Bool(_) | Slot::S32(_) | Slot::Rgb(_) | Slot::Float(_) | Slot::Profile(_) => 0,
            Slot::ListU16(c) => collection::<u16>(if values { c.values.len() } else { c.defaults.len() }),
            Slot::ListS32(c) | Slot::ListRgb(c) => {
                collection::<i32>(if values { c.values.len() } else { c.defaults.len() })
            }
            Slot::SetU16(c) => collection::<u16>(if values { c.values.len() } else { c.defaults.len() }),
            Slot::SetS32(c) | Slot::SetRgb(c) => {
                collection::<i32>(if values { c.values.len() } else { c.defaults.len() })
            }
        }
    }

    fn effective(&self) -> ConfigValue {
        match self {
            Slot::Bool(s) => s.effective().map_or(ConfigValue::None, ConfigValue::Bool),
            Slot::S32(s) => s.effective().map_or(ConfigValue::None, ConfigValue::S32),
            Slot::Rgb(s) => s.effective().map_or(ConfigValue::None, ConfigValue::Rgb),
            Slot::Float(s) => s.effective().map_or(ConfigValue::None, ConfigValue::Float),
            Slot::Profile(s) => s.effective().map_or(ConfigValue::None, ConfigValue::Profile),
            Slot::ListU16(c) => {
                ConfigValue::ListU16(if c.values.is_empty() { c.defaults.clone() } else { c.values.clone() })
            }
            Slot::ListS32(c) => {
                ConfigValue::ListS32(if c.values.is_empty() { c.defaults.clone() } else { c.values.clone() })
            }
            Slot::ListRgb(c) => {
                ConfigValue::ListRgb(if c.values.is_empty() { c.defaults.clone() } else { c.values.clone() })
            }
            Slot::SetU16(c) => {
                ConfigValue::SetU16(if c.values.is_empty() { c.defaults.clone() } else { c.values.clone() })
            }
            Slot::SetS32(c) => {
                ConfigValue::SetS32(if c.values.is_empty() { c.defaults.clone() } else { c.values.clone() })
            }
            Slot::SetRgb(c) => {
                ConfigValue::SetRgb(if c.values.is_empty() { c.defaults.clone() } else { c.values.clone() })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Property {
    registered: bool,
    slot: Slot,
}

#[derive(Debug, Default)]
pub struct ScriptConfig {
    properties: BTreeMap<String, Property>,
}

fn entry_base_size(key: &str) -> usize {
    mem::size_of::<String>() + key.len() + 1 + mem::size_of::<Property>()
}

fn allowed_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LENGTH && allowed_file_name(key)
}

impl ScriptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn keys(&self, types: Option<&[PropertyType]>) -> Vec<String> {
        self.properties
            .iter()
            .filter(|(_, p)| types.is_none_or(|t| t.contains(&p.slot.property_type())))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn key_type(&self, key: &str) -> Option<PropertyType> {
        self.properties.get(key).map(|p| p.slot.property_type())
    }

    pub fn keys_size(&self) -> usize {
        self.properties.keys().map(|k| entry_base_size(k)).sum()
    }

    pub fn defaults_size(&self) -> usize {
        self.size(false)
    }

    pub fn values_size(&self) -> usize {
        self.size(true)
    }

    fn size(&self, values: bool) -> usize {
        self.properties
            .iter()
            .map(|(k, p)| entry_base_size(k) + p.slot.size(values))
            .sum()
    }

    /// Declare the script's parameters for this run.
    ///
    /// Keys absent from `decls` lose their registration and default (the
    /// property survives only if an operator value exists); keys whose
    /// type changed are dropped entirely; then all defaults are cleared
    /// and re-ingested so the size budget is computed against empty
    /// defaults. An oversized default fails with [`ConfigError::Full`],
    /// leaving the offending key present but with no default.
    pub fn register_properties(&mut self, decls: &[RegisterEntry]) -> Result<(), ConfigError> {
        let declared: BTreeMap<&str, PropertyType> = decls
            .iter()
            .filter_map(|d| PropertyType::from_tag(&d.tag).map(|t| (d.key.as_str(), t)))
            .collect();

        self.properties.retain(|key, property| {
            property.registered = false;
            match declared.get(key.as_str()) {
                None => {
                    property.slot.clear_default();
                    property.slot.has_value()
                }
                Some(&new_type) => {
                    if property.slot.property_type() != new_type {
                        false
                    } else {
                        property.slot.clear_default();
                        true
                    }
                }
            }
        });

        let mut total = self.defaults_size();

        for decl in decls {
            if !allowed_key(&decl.key) {
                return Err(ConfigError::InvalidKey);
            }
            let property_type = PropertyType::from_tag(&decl.tag).ok_or(ConfigError::InvalidType)?;

            if !self.properties.contains_key(&decl.key) {
                total += entry_base_size(&decl.key);
                self.properties.insert(
                    decl.key.clone(),
                    Property {
                        registered: true,
                        slot: Slot::new(property_type),
                    },
                );
            }

            let property = self.properties.get_mut(&decl.key).expect("just inserted");
            property.registered = true;

            if total > MAX_DEFAULTS_SIZE {
                return Err(ConfigError::Full);
            }

            let Some(default) = &decl.default else {
                continue;
            };

            // Build the candidate first so an overflow leaves this key
            // with no default rather than a partial one.
            let added = ingest_default(&mut property.slot, default)?;
            if total + added > MAX_DEFAULTS_SIZE {
                property.slot.clear_default();
                return Err(ConfigError::Full);
            }
            total += added;
        }

        Ok(())
    }

    /// Emit every property's effective value into `out`.
    pub fn populate_dict(&self, out: &mut BTreeMap<String, ConfigValue>) {
        for (key, property) in &self.properties {
            out.insert(key.clone(), property.slot.effective());
        }
    }

    /// Set a scalar property's operator value from text.
    pub fn set(&mut self, key: &str, value: &str) -> Outcome {
        let Some(property) = self.properties.get_mut(key) else {
            return Outcome::NotFound;
        };

        match &mut property.slot {
            Slot::Bool(s) => match parse_bool(value) {
                Some(v) => {
                    s.value = Some(v);
                    Outcome::Ok
                }
                None => Outcome::ParseError,
            },
            Slot::S32(s) => match value.parse::<i32>() {
                Ok(v) => {
                    s.value = Some(v);
                    Outcome::Ok
                }
                Err(_) => Outcome::ParseError,
            },
            Slot::Rgb(s) => match parse_rgb(value) {
                Some(v) => {
                    s.value = Some(v);
                    Outcome::Ok
                }
                None => Outcome::ParseError,
            },
            Slot::Float(s) => match value.parse::<f32>() {
                Ok(v) if v.is_finite() => {
                    s.value = Some(v);
                    Outcome::Ok
                }
                _ => Outcome::ParseError,
            },
            Slot::Profile(s) => match parse_profile(value) {
                Some(v) => {
                    s.value = Some(v);
                    Outcome::Ok
                }
                None => Outcome::ParseError,
            },
            _ => Outcome::OutOfRange,
        }
    }

    /// Clear a property's operator value, falling back to the default.
    pub fn unset(&mut self, key: &str) -> Outcome {
        match self.properties.get_mut(key) {
            Some(property) => {
                property.slot.clear_value();
                Outcome::Ok
            }
            None => Outcome::NotFound,
        }
    }

    /// Apply a collection mutation to a property's operator values.
    ///
    /// When the value collection is empty the defaults are copied in
    /// first, so the operator edits start from what the script declared.
    pub fn modify(&mut self, key: &str, value: &str, op: ContainerOp, index1: usize, index2: usize) -> Outcome {
        let budget = MAX_VALUES_SIZE.saturating_sub(self.values_size());

        let Some(property) = self.properties.get_mut(key) else {
            return Outcome::NotFound;
        };

        match &mut property.slot {
            Slot::ListU16(c) => {
                let parsed = parse_element_u16(value, op);
                modify_list(c, parsed, op, index1, index2, budget / mem::size_of::<u16>())
            }
            Slot::ListS32(c) => {
                let parsed = parse_element_s32(value, op);
                modify_list(c, parsed, op, index1, index2, budget / mem::size_of::<i32>())
            }
            Slot::ListRgb(c) => {
                let parsed = parse_element_rgb(value, op);
                modify_list(c, parsed, op, index1, index2, budget / mem::size_of::<i32>())
            }
            Slot::SetU16(c) => {
                let parsed = parse_element_u16(value, op);
                modify_set(c, parsed, op, index1, budget / mem::size_of::<u16>())
            }
            Slot::SetS32(c) => {
                let parsed = parse_element_s32(value, op);
                modify_set(c, parsed, op, index1, budget / mem::size_of::<i32>())
            }
            Slot::SetRgb(c) => {
                let parsed = parse_element_rgb(value, op);
                modify_set(c, parsed, op, index1, budget / mem::size_of::<i32>())
            }
            _ => Outcome::OutOfRange,
        }
    }

    /// Effective collection elements, formatted for display.
    pub fn container_values(&self, key: &str) -> Vec<String> {
        match self.properties.get(key).map(|p| p.slot.effective()) {
            Some(ConfigValue::ListU16(v)) => v.iter().map(u16::to_string).collect(),
            Some(ConfigValue::ListS32(v)) => v.iter().map(i32::to_string).collect(),
            Some(ConfigValue::ListRgb(v)) => v.iter().map(|c| format_rgb(*c)).collect(),
            Some(ConfigValue::SetU16(v)) => v.iter().map(u16::to_string).collect(),
            Some(ConfigValue::SetS32(v)) => v.iter().map(i32::to_string).collect(),
            Some(ConfigValue::SetRgb(v)) => v.iter().map(|c| format_rgb(*c)).collect(),
            _ => Vec::new(),
        }
    }

    /// Remove everything. Returns whether anything was removed.
    pub fn clear(&mut self) -> bool {
        if self.properties.is_empty() {
            return false;
        }
        self.properties.clear();
        true
    }

    /// Drop stale properties: unregistered keys with no operator value.
    pub fn cleanup(&mut self) -> bool {
        let before = self.properties.len();
        self.properties.retain(|_, p| p.registered || p.slot.has_value());
        before != self.properties.len()
    }
}

fn ingest_default(slot: &mut Slot, default: &ConfigValue) -> Result<usize, ConfigError> {
    match (slot, default) {
        (Slot::Bool(s), ConfigValue::Bool(v)) => {
            s.default = Some(*v);
            Ok(0)
        }
        (Slot::S32(s), ConfigValue::S32(v)) => {
            s.default = Some(*v);
            Ok(0)
        }
        (Slot::Rgb(s), ConfigValue::Rgb(v) | ConfigValue::S32(v)) => {
            s.default = Some(*v & 0xff_ff_ff);
            Ok(0)
        }
        (Slot::Float(s), ConfigValue::Float(v)) => {
            s.default = Some(*v);
            Ok(0)
        }
        (Slot::Profile(s), ConfigValue::Profile(v)) => {
            s.default = Some(*v);
            Ok(0)
        }
        (Slot::ListU16(c), ConfigValue::ListU16(v)) => {
            c.defaults = v.clone();
            Ok(v.len() * mem::size_of::<u16>())
        }
        (Slot::ListS32(c), ConfigValue::ListS32(v)) => {
            c.defaults = v.clone();
            Ok(v.len() * mem::size_of::<i32>())
        }
        (Slot::ListRgb(c), ConfigValue::ListRgb(v)) => {
            c.defaults = v.iter().map(|c| c & 0xff_ff_ff).collect();
            Ok(v.len() * mem::size_of::<i32>())
        }
        (Slot::SetU16(c), ConfigValue::SetU16(v)) => {
            c.defaults = v.clone();
            Ok(v.len() * mem::size_of::<u16>())
        }
        (Slot::SetS32(c), ConfigValue::SetS32(v)) => {
            c.defaults = v.clone();
            Ok(v.len() * mem::size_of::<i32>())
        }
        (Slot::SetRgb(c), ConfigValue::SetRgb(v)) => {
            c.defaults = v.iter().map(|c| c & 0xff_ff_ff).collect();
            Ok(v.len() * mem::size_of::<i32>())
        }
        _ => Err(ConfigError::WrongType),
    }
}

fn modify_list<T: Copy + PartialEq + Ord>(
    c: &mut Collections<Vec<T>>,
    parsed: Option<Option<T>>,
    op: ContainerOp,
    index1: usize,
    index2: usize,
    budget_elements: usize,
) -> Outcome {
    let Some(parsed) = parsed else {
        return Outcome::ParseError;
    };

    let mut remaining = budget_elements;
    if c.values.is_empty() && !c.defaults.is_empty() {
        if c.defaults.len() > remaining {
            return Outcome::Full;
        }
        remaining -= c.defaults.len();
        c.values = c.defaults.clone();
    }

    match op {
        ContainerOp::Add => {
            let Some(element) = parsed else {
                return Outcome::ParseError;
            };
            if remaining == 0 {
                return Outcome::Full;
            }
            if index1 < c.values.len() {
                c.values.insert(index1, element);
            } else {
                c.values.push(element);
            }
            Outcome::Ok
        }
        ContainerOp::DelValue => {
            let Some(element) = parsed else {
                return Outcome::ParseError;
            };
            match c.values.iter().position(|v| *v == element) {
                Some(at) => {
                    c.values.remove(at);
                    Outcome::Ok
                }
                None => Outcome::NotFound,
            }
        }
        ContainerOp::DelPosition => {
            if index1 >= c.values.len() {
                return Outcome::OutOfRange;
            }
            c.values.remove(index1);
            Outcome::Ok
        }
        ContainerOp::MovePosition => {
            if index1 >= c.values.len() || index2 >= c.values.len() {
                return Outcome::OutOfRange;
            }
            let element = c.values.remove(index1);
            c.values.insert(index2, element);
            Outcome::Ok
        }
        ContainerOp::CopyPosition => {
            if index1 >= c.values.len() || index2 > c.values.len() {
                return Outcome::OutOfRange;
            }
            if remaining == 0 {
                return Outcome::Full;
            }
            let element = c.values[index1];
            c.values.insert(index2, element);
            Outcome::Ok
        }
        ContainerOp::SetPosition => {
            let Some(element) = parsed else {
                return Outcome::ParseError;
            };
            if index1 >= c.values.len() {
                return Outcome::OutOfRange;
            }
            c.values[index1] = element;
            Outcome::Ok
        }
    }
}

fn modify_set<T: Copy + Ord>(
    c: &mut Collections<BTreeSet<T>>,
    parsed: Option<Option<T>>,
    op: ContainerOp,
    index1: usize,
    budget_elements: usize,
) -> Outcome {
    let Some(parsed) = parsed else {
        return Outcome::ParseError;
    };

    let mut remaining = budget_elements;
    if c.values.is_empty() && !c.defaults.is_empty() {
        if c.defaults.len() > remaining {
            return Outcome::Full;
        }
        remaining -= c.defaults.len();
        c.values = c.defaults.clone();
    }

    match op {
        ContainerOp::Add => {
            let Some(element) = parsed else {
                return Outcome::ParseError;
            };
            if !c.values.contains(&element) && remaining == 0 {
                return Outcome::Full;
            }
            c.values.insert(element);
            Outcome::Ok
        }
        ContainerOp::DelValue => {
            let Some(element) = parsed else {
                return Outcome::ParseError;
            };
            if c.values.remove(&element) {
                Outcome::Ok
            } else {
                Outcome::NotFound
            }
        }
        ContainerOp::DelPosition => {
            let Some(element) = c.values.iter().nth(index1).copied() else {
                return Outcome::OutOfRange;
            };
            c.values.remove(&element);
            Outcome::Ok
        }
        // Sets have no meaningful positions to move, copy or overwrite.
        ContainerOp::MovePosition | ContainerOp::CopyPosition | ContainerOp::SetPosition => Outcome::OutOfRange,
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "true" | "on" | "yes" | "1" => Some(true),
        "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_rgb(text: &str) -> Option<i32> {
    if let Some(hex) = text.strip_prefix('#').or_else(|| text.strip_prefix("0x")) {
        if hex.len() == 6 {
            return i32::from_str_radix(hex, 16).ok();
        }
        return None;
    }

    if let Some((r, rest)) = text.split_once(',')
        && let Some((g, b)) = rest.split_once(',')
    {
        let r = r.trim().parse::<u8>().ok()?;
        let g = g.trim().parse::<u8>().ok()?;
        let b = b.trim().parse::<u8>().ok()?;
        return Some(((r as i32) << 16) | ((g as i32) << 8) | b as i32);
    }

    text.parse::<i32>().ok().map(|v| v & 0xff_ff_ff)
}

fn parse_profile(text: &str) -> Option<LedProfileId> {
    LedProfileId::from_name(text).or_else(|| text.parse::<i64>().ok().and_then(LedProfileId::from_id))
}

fn format_rgb(value: i32) -> String {
    format!("#{:06x}", value & 0xff_ff_ff)
}

/// `Some(Some(v))` parsed, `Some(None)` not needed for this op,
/// `None` parse failure.
fn parse_element_u16(text: &str, op: ContainerOp) -> Option<Option<u16>> {
    if !op_needs_value(op) {
        return Some(None);
    }
    text.parse::<u16>().ok().map(Some)
}

fn parse_element_s32(text: &str, op: ContainerOp) -> Option<Option<i32>> {
    if !op_needs_value(op) {
        return Some(None);
    }
    text.parse::<i32>().ok().map(Some)
}

fn parse_element_rgb(text: &str, op: ContainerOp) -> Option<Option<i32>> {
    if !op_needs_value(op) {
        return Some(None);
    }
    parse_rgb(text).map(Some)
}

fn op_needs_value(op: ContainerOp) -> bool {
    matches!(op, ContainerOp::Add | ContainerOp::DelValue | ContainerOp::SetPosition)
}
