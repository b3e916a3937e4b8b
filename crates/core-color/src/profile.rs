//! Per-bus LED color profiles.
//!
//! A profile is a sparse, sorted table mapping a brightness index (the
//! pixel's maximum channel) to an RGB correction triple. Index 0 is
//! always present and defaults to `(8, 8, 8)` so that a curve anchored at
//! black still lifts near-black pixels enough to keep the chain visible.
//! Between two explicit entries the correction interpolates linearly per
//! channel; above the highest explicit entry (and for black pixels) the
//! profile is the identity, so the default single-entry table transforms
//! nothing.

use std::collections::BTreeMap;

use minicbor::Decoder;

use core_fs::cbor;
use core_fs::outcome::Outcome;

use crate::uint_divide;

pub const PROFILE_INDEX0_DEFAULT: [u8; 3] = [8, 8, 8];

/// Identifier of one of a bus's profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LedProfileId {
    #[default]
    Normal = 0,
    Custom1 = 1,
    Custom2 = 2,
    Custom3 = 3,
}

impl LedProfileId {
    pub const MIN_ID: i64 = LedProfileId::Normal as i64;
    pub const MAX_ID: i64 = LedProfileId::Custom3 as i64;

    pub const ALL: [LedProfileId; 4] = [
        LedProfileId::Normal,
        LedProfileId::Custom1,
        LedProfileId::Custom2,
        LedProfileId::Custom3,
    ];

    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(LedProfileId::Normal),
            1 => Some(LedProfileId::Custom1),
            2 => Some(LedProfileId::Custom2),
            3 => Some(LedProfileId::Custom3),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LedProfileId::Normal => "normal",
            LedProfileId::Custom1 => "custom1",
            LedProfileId::Custom2 => "custom2",
            LedProfileId::Custom3 => "custom3",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedProfile {
    entries: BTreeMap<u8, [u8; 3]>,
}

impl Default for LedProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl LedProfile {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(0, PROFILE_INDEX0_DEFAULT);
        Self { entries }
    }

    pub fn indexes(&self) -> Vec<u8> {
        self.entries.keys().copied().collect()
    }

    pub fn get(&self, index: u8) -> Option<[u8; 3]> {
        self.entries.get(&index).copied()
    }

    /// Insert or replace an entry. Returns whether the table changed.
    pub fn set(&mut self, index: u8, rgb: [u8; 3]) -> bool {
        self.entries.insert(index, rgb) != Some(rgb)
    }

    /// Remove an entry. Index 0 cannot be removed; it resets to the
    /// default instead.
    pub fn remove(&mut self, index: u8) -> Result<(), Outcome> {
        if index == 0 {
            self.entries.insert(0, PROFILE_INDEX0_DEFAULT);
            return Ok(());
        }

        match self.entries.remove(&index) {
            Some(_) => Ok(()),
            None => Err(Outcome::NotFound),
        }
    }

    /// Move an entry to a new index, replacing any entry there.
    pub fn move_entry(&mut self, from: u8, to: u8) -> Result<(), Outcome> {
        if from == to {
            return Ok(());
        }
        if from == 0 {
            return Err(Outcome::OutOfRange);
        }

        match self.entries.remove(&from) {
            Some(rgb) => {
                self.entries.insert(to, rgb);
                Ok(())
            }
            None => Err(Outcome::NotFound),
        }
    }

    /// Adjust an existing entry by signed per-channel deltas, saturating.
    pub fn adjust(&mut self, index: u8, dr: i16, dg: i16, db: i16) -> Result<(), Outcome> {
        match self.entries.get_mut(&index) {
            Some(rgb) => {
                rgb[0] = (rgb[0] as i16 + dr).clamp(0, 255) as u8;
                rgb[1] = (rgb[1] as i16 + dg).clamp(0, 255) as u8;
                rgb[2] = (rgb[2] as i16 + db).clamp(0, 255) as u8;
                Ok(())
            }
            None => Err(Outcome::NotFound),
        }
    }

    /// Reset to the default single-entry table. Returns whether anything
    /// changed.
    pub fn clear(&mut self) -> bool {
        let changed = self.entries.len() != 1 || self.get(0) != Some(PROFILE_INDEX0_DEFAULT);
        self.entries.clear();
        self.entries.insert(0, PROFILE_INDEX0_DEFAULT);
        changed
    }

    /// Whether the table transforms nothing.
    pub fn is_identity(&self) -> bool {
        self.entries.len() == 1 && self.entries.contains_key(&0)
    }

    /// Correction triple for a brightness level, or `None` where the
    /// profile is the identity (above the last explicit entry).
    fn curve(&self, level: u8) -> Option<[u8; 3]> {
        let (&hi, &hi_rgb) = self.entries.range(level..).next()?;
        if hi == level {
            return Some(hi_rgb);
        }

        // Index 0 is always present, so a floor entry exists.
        let (&lo, &lo_rgb) = self
            .entries
            .range(..level)
            .next_back()
            .expect("profile index 0 missing");

        let span = (hi - lo) as u64;
        let off = (level - lo) as u64;
        let mut rgb = [0u8; 3];
        for (i, out) in rgb.iter_mut().enumerate() {
            let a = lo_rgb[i] as u64;
            let b = hi_rgb[i] as u64;
            *out = uint_divide(a * (span - off) + b * off, span, 1) as u8;
        }
        Some(rgb)
    }

    /// Apply the profile to a packed RGB byte buffer in place.
    ///
    /// Each pixel is scaled by `curve(max_channel) / max_channel`, which
    /// preserves the channel ratios (hue). Black pixels stay black.
    pub fn transform(&self, buf: &mut [u8]) {
        if self.is_identity() {
            return;
        }

        for px in buf.chunks_exact_mut(3) {
            let level = px[0].max(px[1]).max(px[2]);
            if level == 0 {
                continue;
            }
            let Some(t) = self.curve(level) else {
                continue;
            };
            for i in 0..3 {
                let scaled = (px[i] as u32 * t[i] as u32 + level as u32 / 2) / level as u32;
                px[i] = scaled.min(255) as u8;
            }
        }
    }

    /// Encode as a self-described CBOR array of `[index, [r, g, b]]`
    /// pairs, ascending by index.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut enc = cbor::tagged_encoder(&mut buf);

        enc.array(self.entries.len() as u64).expect("vec write is infallible");
        for (&index, rgb) in &self.entries {
            enc.array(2)
                .and_then(|e| e.u8(index))
                .and_then(|e| e.array(3))
                .and_then(|e| e.u8(rgb[0]))
                .and_then(|e| e.u8(rgb[1]))
                .and_then(|e| e.u8(rgb[2]))
                .expect("vec write is infallible");
        }

        buf
    }

    /// Decode from CBOR. Invalid entries are skipped and reported as the
    /// combined outcome; malformed data fails the whole decode.
    pub fn decode(data: &[u8]) -> Result<(Self, Outcome), Outcome> {
        let mut dec = Decoder::new(data);
        cbor::expect_self_describe(&mut dec)?;

        let entries = cbor::expect_definite_array(&mut dec)?;
        let mut profile = LedProfile::new();
        let mut worst = Outcome::Ok;

        for _ in 0..entries {
            if cbor::expect_definite_array(&mut dec)? != 2 {
                return Err(Outcome::ParseError);
            }

            let index = dec.u64().map_err(|_| Outcome::ParseError)?;

            if cbor::expect_definite_array(&mut dec)? != 3 {
                return Err(Outcome::ParseError);
            }
            let mut rgb = [0u8; 3];
            let mut channel_range = Outcome::Ok;
            for ch in rgb.iter_mut() {
                let value = dec.u64().map_err(|_| Outcome::ParseError)?;
                if value > u8::MAX as u64 {
                    channel_range = Outcome::OutOfRange;
                } else {
                    *ch = value as u8;
                }
            }

            if index > u8::MAX as u64 {
                worst.combine(Outcome::OutOfRange);
                continue;
            }
            if channel_range != Outcome::Ok {
                worst.combine(channel_range);
                continue;
            }

            profile.set(index as u8, rgb);
        }

        Ok((profile, worst))
    }
}
