//! The `output_*` pixel pipeline.
//!
//! Builds a frame in the task's borrowed LED buffer from whatever shape
//! the script produced, applies the bus's color profile, paces the frame
//! against the previous one, and hands the bytes to the bus.
//!
//! Rotation and reversal are resolved while filling the buffer. An
//! iterator without a length can still be reversed when unrotated: the
//! buffer fills from the tail backwards and the unwritten head is
//! zeroed (generator-reverse mode). `repeat` tiles whatever prefix (or
//! suffix) was produced over the rest of the frame window.

use std::thread;
use std::time::Duration;

use core_bus::{MIN_FPS, MAX_FPS, TIMING_DELAY_US, clock};
use core_color::{BYTES_PER_LED, LedProfileId, MAX_SATURATION, MAX_VALUE, exp_hsv_to_rgb, hsv_to_rgb, unpack_rgb};

use crate::context::{OutputDefaults, ScriptContext, hue_of, saturation_of, value_of};
use crate::value::{OutputValues, ScriptValue};
use crate::{ScriptError, ScriptResult};

pub const MAX_WAIT_MS: i64 = 1000;
pub const MAX_WAIT_US: i64 = 1_000_000;

/// Residual sleep handled by busy-waiting rather than the scheduler.
const SPIN_THRESHOLD_US: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Rgb,
    Hsv,
    ExpHsv,
}

/// Keyword arguments of the `output_*` family.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputArgs {
    pub profile: Option<i64>,
    pub fps: Option<i64>,
    pub wait_ms: Option<i64>,
    pub wait_us: Option<i64>,
    pub repeat: Option<bool>,
    pub reverse: Option<bool>,
    pub rotate: i64,
}

impl OutputArgs {
    pub fn fps(fps: i64) -> Self {
        Self {
            fps: Some(fps),
            ..Self::default()
        }
    }

    pub fn wait_us(wait_us: i64) -> Self {
        Self {
            wait_us: Some(wait_us),
            ..Self::default()
        }
    }
}

enum Indexed<'v> {
    HueU16(&'v [u16]),
    HueI16(&'v [i16]),
    HueF32(&'v [f32]),
    PackedU32(&'v [u32]),
    PackedI32(&'v [i32]),
    Seq(&'v [ScriptValue]),
}

impl Indexed<'_> {
    fn len(&self) -> usize {
        match self {
            Indexed::HueU16(v) => v.len(),
            Indexed::HueI16(v) => v.len(),
            Indexed::HueF32(v) => v.len(),
            Indexed::PackedU32(v) => v.len(),
            Indexed::PackedI32(v) => v.len(),
            Indexed::Seq(v) => v.len(),
        }
    }
}

impl ScriptContext {
    pub fn output_rgb(&mut self, values: OutputValues, args: OutputArgs) -> ScriptResult {
        self.output_leds(values, args, OutputKind::Rgb)
    }

    pub fn output_hsv(&mut self, values: OutputValues, args: OutputArgs) -> ScriptResult {
        self.output_leds(values, args, OutputKind::Hsv)
    }

    pub fn output_exp_hsv(&mut self, values: OutputValues, args: OutputArgs) -> ScriptResult {
        self.output_leds(values, args, OutputKind::ExpHsv)
    }

    /// Record defaults for subsequent `output_*` calls that omit the
    /// corresponding arguments.
    pub fn output_defaults(&mut self, args: OutputArgs) -> ScriptResult {
        if args.rotate != 0 {
            return Err(ScriptError::Value("rotate is not a default".into()));
        }

        let mut profile = LedProfileId::Normal;
        if let Some(id) = args.profile {
            profile =
                LedProfileId::from_id(id).ok_or_else(|| ScriptError::Value("invalid profile".into()))?;
        }
        let wait_us = self.calc_wait_us(&args, true)?;

        self.defaults = OutputDefaults {
            profile,
            wait_us,
            repeat: args.repeat.unwrap_or(false),
            reverse: args.reverse.unwrap_or(false),
        };
        Ok(())
    }

    fn output_leds(&mut self, values: OutputValues, args: OutputArgs, kind: OutputKind) -> ScriptResult {
        self.checkpoint()?;

        let mut profile = self.defaults.profile;
        if let Some(id) = args.profile {
            profile =
                LedProfileId::from_id(id).ok_or_else(|| ScriptError::Value("invalid profile".into()))?;
        }
        let wait_us = self.calc_wait_us(&args, false)?;
        let repeat = args.repeat.unwrap_or(self.defaults.repeat);
        let mut reverse = args.reverse.unwrap_or(self.defaults.reverse);
        let rotate = args.rotate;

        if rotate.unsigned_abs() > (usize::MAX / BYTES_PER_LED) as u64 {
            return Err(ScriptError::Value("overflow converting rotate value to bytes".into()));
        }

        let max_bytes = (self.bus_length * BYTES_PER_LED).min(self.ledbuf.len());

        let mut generator_reverse = false;
        if matches!(values, OutputValues::Iterator(_)) && reverse && rotate == 0 {
            reverse = false;
            generator_reverse = true;
        }

        let buffer = self.ledbuf.as_mut_slice();
        let out_bytes;

        match values {
            OutputValues::Bytes(input) => {
                if kind != OutputKind::Rgb {
                    return Err(ScriptError::Type("can only use byte array for RGB values".into()));
                }
                out_bytes = copy_byte_array(buffer, max_bytes, &input, rotate, reverse)?;
            }
            OutputValues::HuesU16(ref v) => {
                require_hsv(kind)?;
                out_bytes = write_indexed(kind, buffer, max_bytes, Indexed::HueU16(v), rotate, reverse)?;
            }
            OutputValues::HuesI16(ref v) => {
                require_hsv(kind)?;
                out_bytes = write_indexed(kind, buffer, max_bytes, Indexed::HueI16(v), rotate, reverse)?;
            }
            OutputValues::HuesF32(ref v) => {
                require_hsv(kind)?;
                out_bytes = write_indexed(kind, buffer, max_bytes, Indexed::HueF32(v), rotate, reverse)?;
            }
            OutputValues::PackedU32(ref v) => {
                require_rgb(kind)?;
                out_bytes =
                    write_indexed(kind, buffer, max_bytes, Indexed::PackedU32(v), rotate, reverse)?;
            }
            OutputValues::PackedI32(ref v) => {
                require_rgb(kind)?;
                out_bytes =
                    write_indexed(kind, buffer, max_bytes, Indexed::PackedI32(v), rotate, reverse)?;
            }
            OutputValues::Sequence(ref v) => {
                out_bytes = write_indexed(kind, buffer, max_bytes, Indexed::Seq(v), rotate, reverse)?;
            }
            OutputValues::Iterator(it) => {
                if rotate != 0 {
                    return Err(ScriptError::Type("can't rotate values without a length".into()));
                }
                out_bytes = if generator_reverse {
                    consume_iterator_reversed(kind, buffer, max_bytes, it, repeat)?
                } else {
                    consume_iterator(kind, buffer, max_bytes, it)?
                };
            }
        }

        let out_bytes = if generator_reverse {
            out_bytes
        } else if repeat {
            tile_forward(buffer, max_bytes, out_bytes)
        } else {
            out_bytes
        };

        self.shared.bus.profile_transform(profile, &mut buffer[..out_bytes]);

        if wait_us > 0 && self.bus_written {
            let target =
                (self.shared.bus.last_update_us() + wait_us as u64).saturating_sub(TIMING_DELAY_US);
            self.sleep_until_us(target)?;
        }

        let wire_reverse = self.shared.bus.reverse_xor(self.host.reverse());
        let bus = self.shared.bus.clone();
        bus.start_transmission(&self.ledbuf.as_slice()[..out_bytes], wire_reverse)?;
        self.bus_written = true;

        if !self.config_used {
            self.bus_length = self.shared.bus.length();
            self.bus_default_fps = self.shared.bus.default_fps();
        }

        Ok(())
    }

    /// Resolve the frame wait from the `fps`/`wait_ms`/`wait_us`
    /// arguments (at most one may be present). Without any, the stored
    /// default applies, and an unset default falls back to the bus's
    /// configured frame rate.
    pub(crate) fn calc_wait_us(&self, args: &OutputArgs, set_defaults: bool) -> Result<i64, ScriptError> {
        let mut wait_us = if set_defaults { 0 } else { self.defaults.wait_us };
        let mut given = 0;

        if let Some(fps) = args.fps {
            if !(MIN_FPS as i64..=MAX_FPS as i64).contains(&fps) {
                return Err(ScriptError::Value("fps out of range".into()));
            }
            wait_us = 1_000_000 / fps;
            given += 1;
        }

        if let Some(wait_ms) = args.wait_ms {
            if !(0..=MAX_WAIT_MS).contains(&wait_ms) {
                return Err(ScriptError::Value("wait_ms out of range".into()));
            }
            wait_us = wait_ms * 1000;
            given += 1;
        }

        if let Some(value) = args.wait_us {
            if !(0..=MAX_WAIT_US).contains(&value) {
                return Err(ScriptError::Value("wait_us out of range".into()));
            }
            wait_us = value;
            given += 1;
        }

        if given > 1 {
            return Err(ScriptError::Value(
                "can't specify more than one of fps, wait_ms or wait_us at the same time".into(),
            ));
        }

        if !set_defaults && wait_us == 0 && self.bus_default_fps > 0 {
            wait_us = 1_000_000 / self.bus_default_fps as i64;
        }

        Ok(wait_us)
    }

    /// When the next frame would start: `(now_us, start_us)` on the
    /// monotonic clock.
    fn next_wait_us(&self, args: &OutputArgs) -> Result<(u64, u64), ScriptError> {
        let wait_us = self.calc_wait_us(args, false)?;

        if wait_us > 0 && self.bus_written {
            let start =
                (self.shared.bus.last_update_us() + wait_us as u64).saturating_sub(TIMING_DELAY_US);
            let now = clock::now_us();
            Ok((now, start.max(now)))
        } else {
            let now = clock::now_us();
            Ok((now, now))
        }
    }

    /// Next frame start on the wrapping 30-bit millisecond tick clock.
    pub fn next_ticks30_ms(&self, args: &OutputArgs) -> Result<i64, ScriptError> {
        let (_now, start) = self.next_wait_us(args)?;
        Ok(((start / 1000) & ((1 << 30) - 1)) as i64)
    }

    pub fn next_ticks64_ms(&self, args: &OutputArgs) -> Result<i64, ScriptError> {
        let (_now, start) = self.next_wait_us(args)?;
        Ok((start / 1000) as i64)
    }

    pub fn next_ticks64_us(&self, args: &OutputArgs) -> Result<i64, ScriptError> {
        let (_now, start) = self.next_wait_us(args)?;
        Ok(start as i64)
    }

    fn next_timeofday(&self, args: &OutputArgs) -> Result<Duration, ScriptError> {
        let (now, start) = self.next_wait_us(args)?;
        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Ok(wall + Duration::from_micros(start - now))
    }

    /// Wall-clock seconds at the next frame start.
    pub fn next_time(&self, args: &OutputArgs) -> Result<i64, ScriptError> {
        Ok(self.next_timeofday(args)?.as_secs() as i64)
    }

    pub fn next_time_ms(&self, args: &OutputArgs) -> Result<i64, ScriptError> {
        Ok(self.next_timeofday(args)?.as_millis() as i64)
    }

    pub fn next_time_us(&self, args: &OutputArgs) -> Result<i64, ScriptError> {
        Ok(self.next_timeofday(args)?.as_micros() as i64)
    }

    /// Coarse-sleep towards `target_us`, busy-waiting the last stretch.
    /// Observes a pending stop between sleep chunks.
    fn sleep_until_us(&self, target_us: u64) -> ScriptResult {
        loop {
            self.checkpoint()?;

            let now = clock::now_us();
            if now >= target_us {
                return Ok(());
            }

            let remaining = target_us - now;
            if remaining > SPIN_THRESHOLD_US {
                let chunk = (remaining - SPIN_THRESHOLD_US).min(5_000);
                thread::sleep(Duration::from_micros(chunk));
            } else {
                while clock::now_us() < target_us {
                    std::hint::spin_loop();
                }
                return Ok(());
            }
        }
    }
}

fn require_hsv(kind: OutputKind) -> ScriptResult {
    if kind == OutputKind::Rgb {
        return Err(ScriptError::Type("unsupported array type for RGB values".into()));
    }
    Ok(())
}

fn require_rgb(kind: OutputKind) -> ScriptResult {
    if kind != OutputKind::Rgb {
        return Err(ScriptError::Type("unsupported array type for HSV values".into()));
    }
    Ok(())
}

/// Byte-array fast path: memcpy with rotation and optional per-pixel
/// reversal.
fn copy_byte_array(
    buffer: &mut [u8],
    max_bytes: usize,
    input: &[u8],
    rotate: i64,
    reverse: bool,
) -> Result<usize, ScriptError> {
    let buf_bytes = input.len();

    if buf_bytes % BYTES_PER_LED != 0 {
        return Err(ScriptError::Value(
            "byte array length must be a multiple of 3 bytes".into(),
        ));
    }

    let rotate_abs_bytes = rotate.unsigned_abs() as usize * BYTES_PER_LED;
    if rotate_abs_bytes > buf_bytes {
        return Err(ScriptError::Value(
            "can't rotate by more than the length of the values".into(),
        ));
    }

    let mut in_bytes = max_bytes.min(buf_bytes);
    let rotate_bytes = if rotate >= 0 {
        rotate as usize * BYTES_PER_LED
    } else {
        buf_bytes - rotate_abs_bytes
    };
    let mut available_rotate = in_bytes.min(buf_bytes - rotate_bytes);
    let mut out = 0;

    if reverse {
        in_bytes -= available_rotate;

        let mut i = buf_bytes - rotate_bytes;
        while available_rotate > 0 {
            i -= BYTES_PER_LED;
            buffer[out..out + BYTES_PER_LED].copy_from_slice(&input[i..i + BYTES_PER_LED]);
            out += BYTES_PER_LED;
            available_rotate -= BYTES_PER_LED;
        }

        let mut i = buf_bytes;
        while in_bytes > 0 {
            i -= BYTES_PER_LED;
            buffer[out..out + BYTES_PER_LED].copy_from_slice(&input[i..i + BYTES_PER_LED]);
            out += BYTES_PER_LED;
            in_bytes -= BYTES_PER_LED;
        }
    } else {
        in_bytes -= available_rotate;

        if available_rotate > 0 {
            buffer[out..out + available_rotate]
                .copy_from_slice(&input[rotate_bytes..rotate_bytes + available_rotate]);
            out += available_rotate;
        }
        if in_bytes > 0 {
            buffer[out..out + in_bytes].copy_from_slice(&input[..in_bytes]);
            out += in_bytes;
        }
    }

    Ok(out)
}

/// Indexed path for typed arrays and object sequences.
fn write_indexed(
    kind: OutputKind,
    buffer: &mut [u8],
    max_bytes: usize,
    src: Indexed<'_>,
    rotate: i64,
    reverse: bool,
) -> Result<usize, ScriptError> {
    let values_length = src.len();

    let rotate_abs = rotate.unsigned_abs() as usize;
    if rotate_abs > values_length {
        return Err(ScriptError::Value(
            "can't rotate by more than the length of the values".into(),
        ));
    }

    let rotate_length = if rotate >= 0 { rotate as usize } else { values_length - rotate_abs };
    let mut in_length = (max_bytes / BYTES_PER_LED).min(values_length);
    let mut available_rotate = in_length.min(values_length - rotate_length);
    let mut out = 0;

    if reverse {
        in_length -= available_rotate;

        let mut i = values_length - rotate_length;
        while available_rotate > 0 {
            i -= 1;
            append_indexed(kind, buffer, out, &src, i)?;
            out += BYTES_PER_LED;
            available_rotate -= 1;
        }

        let mut i = values_length;
        while in_length > 0 {
            i -= 1;
            append_indexed(kind, buffer, out, &src, i)?;
            out += BYTES_PER_LED;
            in_length -= 1;
        }
    } else {
        in_length -= available_rotate;

        let mut i = rotate_length;
        while available_rotate > 0 {
            append_indexed(kind, buffer, out, &src, i)?;
            out += BYTES_PER_LED;
            i += 1;
            available_rotate -= 1;
        }

        let mut i = 0;
        while in_length > 0 {
            append_indexed(kind, buffer, out, &src, i)?;
            out += BYTES_PER_LED;
            i += 1;
            in_length -= 1;
        }
    }

    Ok(out)
}

fn consume_iterator(
    kind: OutputKind,
    buffer: &mut [u8],
    max_bytes: usize,
    mut it: Box<dyn Iterator<Item = ScriptValue> + Send>,
) -> Result<usize, ScriptError> {
    let mut out = 0;

    while out < max_bytes {
        let Some(item) = it.next() else {
            break;
        };
        append_led(kind, buffer, out, &item)?;
        out += BYTES_PER_LED;
    }

    Ok(out)
}

/// Generator-reverse mode: fill the window from the tail backwards, tile
/// downwards if repeating, zero the rest. Always produces a full window.
fn consume_iterator_reversed(
    kind: OutputKind,
    buffer: &mut [u8],
    max_bytes: usize,
    mut it: Box<dyn Iterator<Item = ScriptValue> + Send>,
    repeat: bool,
) -> Result<usize, ScriptError> {
    let mut head = max_bytes;

    while head > 0 {
        let Some(item) = it.next() else {
            break;
        };
        head -= BYTES_PER_LED;
        append_led(kind, buffer, head, &item)?;
    }

    if repeat && head > 0 && head < max_bytes {
        while head > 0 {
            let available = head.min(max_bytes - head);
            buffer.copy_within(max_bytes - available..max_bytes, head - available);
            head -= available;
        }
    }

    if head > 0 {
        buffer[..head].fill(0);
    }

    Ok(max_bytes)
}

/// Tile the produced prefix over the rest of the frame window.
fn tile_forward(buffer: &mut [u8], max_bytes: usize, mut out: usize) -> usize {
    if out == 0 || out >= max_bytes {
        return out;
    }

    while out < max_bytes {
        let available = out.min(max_bytes - out);
        buffer.copy_within(0..available, out);
        out += available;
    }

    out
}

fn append_indexed(
    kind: OutputKind,
    buffer: &mut [u8],
    offset: usize,
    src: &Indexed<'_>,
    index: usize,
) -> ScriptResult {
    match src {
        Indexed::HueU16(v) => {
            append_led(kind, buffer, offset, &ScriptValue::Int(v[index] as i64))
        }
        Indexed::HueI16(v) => {
            append_led(kind, buffer, offset, &ScriptValue::Int(v[index] as i64))
        }
        Indexed::HueF32(v) => {
            append_led(kind, buffer, offset, &ScriptValue::Float(v[index] as f64))
        }
        Indexed::PackedU32(v) => {
            append_led(kind, buffer, offset, &ScriptValue::Int(v[index] as i64))
        }
        Indexed::PackedI32(v) => {
            append_led(kind, buffer, offset, &ScriptValue::Int(v[index] as i64))
        }
        Indexed::Seq(v) => append_led(kind, buffer, offset, &v[index]),
    }
}

/// Write one LED's bytes from a single script value.
fn append_led(kind: OutputKind, buffer: &mut [u8], offset: usize, item: &ScriptValue) -> ScriptResult {
    match item {
        ScriptValue::Int(value) => match kind {
            OutputKind::Rgb => {
                buffer[offset..offset + 3].copy_from_slice(&unpack_rgb(*value));
                Ok(())
            }
            OutputKind::Hsv | OutputKind::ExpHsv => {
                let hue = hue_of(item, kind == OutputKind::ExpHsv)?;
                write_hsv(kind, buffer, offset, hue, MAX_SATURATION, MAX_VALUE);
                Ok(())
            }
        },
        ScriptValue::Float(_) => match kind {
            OutputKind::Rgb => Err(ScriptError::Type("RGB values must be int".into())),
            OutputKind::Hsv | OutputKind::ExpHsv => {
                let hue = hue_of(item, kind == OutputKind::ExpHsv)?;
                write_hsv(kind, buffer, offset, hue, MAX_SATURATION, MAX_VALUE);
                Ok(())
            }
        },
        ScriptValue::Tuple(items) => match kind {
            OutputKind::Rgb => {
                if items.len() < 3 {
                    return Err(ScriptError::Value("RGB sequence needs 3 components".into()));
                }
                for i in 0..3 {
                    buffer[offset + i] = core_color::int_to_u8(items[i].as_int()?);
                }
                Ok(())
            }
            OutputKind::Hsv | OutputKind::ExpHsv => {
                if items.is_empty() {
                    return Err(ScriptError::Value("HSV sequence needs at least a hue".into()));
                }

                let len = items.len().min(3);
                let hue = hue_of(&items[0], kind == OutputKind::ExpHsv)?;
                let mut saturation = MAX_SATURATION;
                let mut value = MAX_VALUE;

                match len {
                    3 => {
                        saturation = saturation_of(&items[1])?;
                        value = value_of(&items[2])?;
                    }
                    2 => {
                        value = value_of(&items[1])?;
                    }
                    _ => {}
                }

                write_hsv(kind, buffer, offset, hue, saturation, value);
                Ok(())
            }
        },
    }
}

fn write_hsv(kind: OutputKind, buffer: &mut [u8], offset: usize, hue: i32, saturation: i32, value: i32) {
    let rgb = if kind == OutputKind::ExpHsv {
        exp_hsv_to_rgb(hue, saturation, value)
    } else {
        hsv_to_rgb(hue, saturation, value)
    };
    buffer[offset..offset + 3].copy_from_slice(&rgb);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_array_rotation() {
        let input: Vec<u8> = (1..=9).collect();
        let mut buffer = vec![0u8; 15];

        assert_eq!(copy_byte_array(&mut buffer, 15, &input, 1, false).unwrap(), 9);
        assert_eq!(&buffer[..9], &[4, 5, 6, 7, 8, 9, 1, 2, 3]);

        assert_eq!(copy_byte_array(&mut buffer, 15, &input, -1, false).unwrap(), 9);
        assert_eq!(&buffer[..9], &[7, 8, 9, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn byte_array_reverse() {
        let input: Vec<u8> = (1..=9).collect();
        let mut buffer = vec![0u8; 15];

        assert_eq!(copy_byte_array(&mut buffer, 15, &input, 0, true).unwrap(), 9);
        assert_eq!(&buffer[..9], &[7, 8, 9, 4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn byte_array_rejects_bad_shapes() {
        let mut buffer = vec![0u8; 15];
        assert!(copy_byte_array(&mut buffer, 15, &[1, 2], 0, false).is_err());
        assert!(copy_byte_array(&mut buffer, 15, &[1, 2, 3], 2, false).is_err());
    }

    #[test]
    fn rotation_composes_modulo_length() {
        let input: Vec<u8> = (1..=15).collect();

        let rotate_once = |data: &[u8], by: i64| {
            let mut out = vec![0u8; 15];
            let n = copy_byte_array(&mut out, 15, data, by, false).unwrap();
            out.truncate(n);
            out
        };

        let a_then_b = rotate_once(&rotate_once(&input, 2), 2);
        let combined = rotate_once(&input, 4);
        assert_eq!(a_then_b, combined);

        let negative = rotate_once(&input, -2);
        let equivalent = rotate_once(&input, 5 - 2);
        assert_eq!(negative, equivalent);
    }

    #[test]
    fn forward_tiling_fills_the_window() {
        let mut buffer = vec![0u8; 15];
        buffer[..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);

        assert_eq!(tile_forward(&mut buffer, 15, 6), 15);
        assert_eq!(buffer, [1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn tiling_ignores_empty_production() {
        let mut buffer = vec![0u8; 15];
        assert_eq!(tile_forward(&mut buffer, 15, 0), 0);
    }

    #[test]
    fn generator_reverse_fills_from_the_tail() {
        let mut buffer = vec![0xAAu8; 15];
        let items: Vec<ScriptValue> = vec![(1i64, 2, 3).into(), (4i64, 5, 6).into()];

        let out = consume_iterator_reversed(
            OutputKind::Rgb,
            &mut buffer,
            15,
            Box::new(items.into_iter()),
            false,
        )
        .unwrap();

        assert_eq!(out, 15);
        assert_eq!(buffer, [0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn generator_reverse_repeat_tiles_downward() {
        let mut buffer = vec![0xAAu8; 15];
        let items: Vec<ScriptValue> = vec![(1i64, 2, 3).into(), (4i64, 5, 6).into()];

        let out = consume_iterator_reversed(
            OutputKind::Rgb,
            &mut buffer,
            15,
            Box::new(items.into_iter()),
            true,
        )
        .unwrap();

        assert_eq!(out, 15);
        assert_eq!(buffer, [1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn sequence_reverse_equals_reversed_forward() {
        let forward: Vec<ScriptValue> = (0..4).map(|i| ((i * 3 + 1) as i64, (i * 3 + 2) as i64, (i * 3 + 3) as i64).into()).collect();
        let mut reversed_input = forward.clone();
        reversed_input.reverse();

        let mut a = vec![0u8; 12];
        write_indexed(OutputKind::Rgb, &mut a, 12, Indexed::Seq(&forward), 0, true).unwrap();

        let mut b = vec![0u8; 12];
        write_indexed(OutputKind::Rgb, &mut b, 12, Indexed::Seq(&reversed_input), 0, false).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn hue_arrays_are_hsv_only() {
        assert!(require_hsv(OutputKind::Rgb).is_err());
        assert!(require_hsv(OutputKind::Hsv).is_ok());
        assert!(require_rgb(OutputKind::Hsv).is_err());
        assert!(require_rgb(OutputKind::Rgb).is_ok());
    }

    #[test]
    fn append_led_shapes() {
        let mut buf = vec![0u8; 3];

        append_led(OutputKind::Rgb, &mut buf, 0, &ScriptValue::Int(0x123456)).unwrap();
        assert_eq!(buf, [0x12, 0x34, 0x56]);

        append_led(OutputKind::Hsv, &mut buf, 0, &ScriptValue::Int(0)).unwrap();
        assert_eq!(buf, [255, 0, 0]);

        append_led(OutputKind::Hsv, &mut buf, 0, &ScriptValue::Tuple(vec![
            ScriptValue::Int(0),
            ScriptValue::Int(128),
        ]))
        .unwrap();
        assert_eq!(buf, [128, 0, 0], "two-element HSV is (hue, value)");

        assert!(append_led(OutputKind::Rgb, &mut buf, 0, &ScriptValue::Float(0.5)).is_err());
        assert!(
            append_led(
                OutputKind::Rgb,
                &mut buf,
                0,
                &ScriptValue::Tuple(vec![ScriptValue::Int(1)])
            )
            .is_err()
        );
        assert!(
            append_led(OutputKind::Hsv, &mut buf, 0, &ScriptValue::Tuple(vec![])).is_err()
        );
    }
}
