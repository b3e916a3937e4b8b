//! The API surface a running script sees.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::trace;

use core_bus::UdpPacket;
use core_color::{
    LedProfileId, MAX_SATURATION, MAX_VALUE, exp_hsv_to_rgb, hsv_to_rgb, hue_from_float,
    hue_from_int, int_to_u8, pack_rgb, rgb_to_exp_hsv, rgb_to_hsv, saturation_from_float,
    saturation_from_int, unpack_rgb, value_from_float, value_from_int,
};
use core_config::RegisterEntry;
use core_config::ConfigValue;
use core_pool::MemoryBlock;

use crate::task::TaskShared;
use crate::ulogging::ULogging;
use crate::value::ScriptValue;
use crate::{ConfigHost, ScriptError, ScriptResult};

pub(crate) struct OutputDefaults {
    pub profile: LedProfileId,
    pub wait_us: i64,
    pub repeat: bool,
    pub reverse: bool,
}

impl Default for OutputDefaults {
    fn default() -> Self {
        Self {
            profile: LedProfileId::Normal,
            wait_us: 0,
            repeat: false,
            reverse: false,
        }
    }
}

/// Script execution context: one per task run, single-threaded.
pub struct ScriptContext {
    pub(crate) shared: Arc<TaskShared>,
    pub(crate) host: Arc<dyn ConfigHost>,
    pub(crate) ledbuf: MemoryBlock,
    // Arena reservations for the interpreter run; holding these blocks is
    // what bounds how many tasks can exist concurrently.
    _heap: MemoryBlock,
    _stack: MemoryBlock,
    stdout_line: String,
    ulog: ULogging,
    pub(crate) defaults: OutputDefaults,
    pub(crate) bus_written: bool,
    pub(crate) config_used: bool,
    pub(crate) bus_length: usize,
    pub(crate) bus_default_fps: u32,
}

impl ScriptContext {
    pub(crate) fn new(
        shared: Arc<TaskShared>,
        host: Arc<dyn ConfigHost>,
        heap: MemoryBlock,
        stack: MemoryBlock,
        ledbuf: MemoryBlock,
    ) -> Self {
        let bus_length = shared.bus.length();
        let bus_default_fps = shared.bus.default_fps();
        let ulog = ULogging::new(shared.name.clone());

        shared.bus.udp().start();

        Self {
            host,
            ledbuf,
            _heap: heap,
            _stack: stack,
            stdout_line: String::new(),
            ulog,
            defaults: OutputDefaults::default(),
            bus_written: false,
            config_used: false,
            bus_length,
            bus_default_fps,
            shared,
        }
    }

    /// Cooperative cancellation point. Scripts and blocking operations
    /// observe a pending stop here.
    pub fn checkpoint(&self) -> ScriptResult {
        if self.shared.stopping.load(Ordering::Acquire) || !self.shared.running.load(Ordering::Acquire)
        {
            Err(ScriptError::Exit)
        } else {
            Ok(())
        }
    }

    /// LED count of the bus, as of the last `config` call.
    pub fn length(&self) -> usize {
        self.bus_length
    }

    /// The bus's configured default frame rate (0 = none).
    pub fn default_fps(&self) -> u32 {
        self.bus_default_fps
    }

    /// Declare the script's config keys and defaults.
    pub fn register_config(&mut self, decls: &[RegisterEntry]) -> ScriptResult {
        self.checkpoint()?;
        self.host.register_config(decls)?;
        Ok(())
    }

    /// Read back effective config values. Returns whether anything
    /// observable (values or bus geometry) changed since the last call.
    pub fn config(&mut self, out: &mut BTreeMap<String, ConfigValue>) -> Result<bool, ScriptError> {
        self.checkpoint()?;

        let mut changed = self.host.populate_config(out);

        let bus_length = self.shared.bus.length();
        if bus_length != self.bus_length {
            self.bus_length = bus_length;
            changed = true;
        }

        let bus_default_fps = self.shared.bus.default_fps();
        if bus_default_fps != self.bus_default_fps {
            self.bus_default_fps = bus_default_fps;
            changed = true;
        }

        if !self.config_used {
            self.config_used = true;
            changed = true;
        }

        Ok(changed)
    }

    /// Record an indirect script dependency (import) for restart
    /// invalidation.
    pub fn script_imported(&self, name: &str) {
        self.host.script_imported(name);
    }

    /// Drain queued UDP packets; with `wait`, block until one arrives or
    /// the task is stopped.
    pub fn udp_receive(&self, wait: bool) -> Result<Vec<UdpPacket>, ScriptError> {
        self.checkpoint()?;

        let mut packets = Vec::new();
        self.shared.bus.udp().receive(wait, &mut packets);

        if packets.is_empty() {
            self.checkpoint()?;
        }
        Ok(packets)
    }

    /// Script stdout: to the attached shell, or line-buffered into the
    /// log.
    pub fn print(&mut self, text: &str) {
        if let Some(stdout) = &self.shared.stdout {
            let mut bytes = text.as_bytes();
            while !bytes.is_empty() {
                let written = stdout.write(bytes, true);
                if written == 0 {
                    return;
                }
                bytes = &bytes[written..];
            }
            return;
        }

        self.stdout_line.push_str(text);
        while let Some(at) = self.stdout_line.find('\n') {
            let rest = self.stdout_line.split_off(at + 1);
            let line = self.stdout_line.trim_end_matches('\n').to_owned();
            trace!(target: "script.out", task = self.shared.name.as_str(), "{line}");
            self.stdout_line = rest;
        }
    }

    pub fn println(&mut self, text: &str) {
        self.print(text);
        self.print("\n");
    }

    /// Script stdin from an attached shell; `None` without one or at
    /// end-of-stream.
    pub fn read_input(&self, wait: bool) -> Option<u8> {
        self.shared.stdin.as_ref()?.read(wait)
    }

    /// Flush an unterminated final stdout line.
    pub(crate) fn flush_output(&mut self) {
        if !self.stdout_line.is_empty() {
            let line = std::mem::take(&mut self.stdout_line);
            trace!(target: "script.out", task = self.shared.name.as_str(), "{line}");
        }
    }

    pub fn ulog(&self) -> &ULogging {
        &self.ulog
    }

    pub fn ulog_mut(&mut self) -> &mut ULogging {
        &mut self.ulog
    }
}

// ---------------------------------------------------------------------
// Color conversion helpers exposed to scripts.
// ---------------------------------------------------------------------

pub(crate) fn hue_of(value: &ScriptValue, expanded: bool) -> Result<i32, ScriptError> {
    match value {
        ScriptValue::Int(v) => Ok(hue_from_int(*v, expanded)),
        ScriptValue::Float(f) => Ok(hue_from_float(*f, expanded)?),
        ScriptValue::Tuple(_) => Err(ScriptError::Type("hue must be an int or float".into())),
    }
}

pub(crate) fn saturation_of(value: &ScriptValue) -> Result<i32, ScriptError> {
    match value {
        ScriptValue::Int(v) => Ok(saturation_from_int(*v)),
        ScriptValue::Float(f) => Ok(saturation_from_float(*f)?),
        ScriptValue::Tuple(_) => Err(ScriptError::Type("saturation must be an int or float".into())),
    }
}

pub(crate) fn value_of(value: &ScriptValue) -> Result<i32, ScriptError> {
    match value {
        ScriptValue::Int(v) => Ok(value_from_int(*v)),
        ScriptValue::Float(f) => Ok(value_from_float(*f)?),
        ScriptValue::Tuple(_) => Err(ScriptError::Type("value must be an int or float".into())),
    }
}

/// `(hue)`, `(hue, value)` or `(hue, saturation, value)`.
fn hsv_parts(args: &[ScriptValue], expanded: bool) -> Result<(i32, i32, i32), ScriptError> {
    match args {
        [h] => Ok((hue_of(h, expanded)?, MAX_SATURATION, MAX_VALUE)),
        [h, v] => Ok((hue_of(h, expanded)?, MAX_SATURATION, value_of(v)?)),
        [h, s, v] => Ok((hue_of(h, expanded)?, saturation_of(s)?, value_of(v)?)),
        _ => Err(ScriptError::Type(
            "must provide (hue), (hue, value) or (hue, saturation, value)".into(),
        )),
    }
}

pub fn hsv_to_rgb_int(args: &[ScriptValue]) -> Result<i64, ScriptError> {
    let (h, s, v) = hsv_parts(args, false)?;
    Ok(pack_rgb(hsv_to_rgb(h, s, v)) as i64)
}

pub fn exp_hsv_to_rgb_int(args: &[ScriptValue]) -> Result<i64, ScriptError> {
    let (h, s, v) = hsv_parts(args, true)?;
    Ok(pack_rgb(exp_hsv_to_rgb(h, s, v)) as i64)
}

pub fn hsv_to_rgb_tuple(args: &[ScriptValue]) -> Result<[u8; 3], ScriptError> {
    let (h, s, v) = hsv_parts(args, false)?;
    Ok(hsv_to_rgb(h, s, v))
}

pub fn exp_hsv_to_rgb_tuple(args: &[ScriptValue]) -> Result<[u8; 3], ScriptError> {
    let (h, s, v) = hsv_parts(args, true)?;
    Ok(exp_hsv_to_rgb(h, s, v))
}

fn hsv_to_rgb_buffer_impl(
    buffer: &mut [u8],
    index: i64,
    args: &[ScriptValue],
    expanded: bool,
) -> ScriptResult {
    if buffer.len() % 3 != 0 {
        return Err(ScriptError::Type(
            "byte array length must be a multiple of 3 bytes".into(),
        ));
    }
    if index < 0 {
        return Err(ScriptError::Value("buffer index must be positive".into()));
    }
    let offset = (index as usize)
        .checked_mul(3)
        .ok_or_else(|| ScriptError::Value("overflow converting buffer index to bytes".into()))?;
    if offset + 3 > buffer.len() {
        return Err(ScriptError::Value("buffer index out of range".into()));
    }

    let (h, s, v) = hsv_parts(args, expanded)?;
    let rgb = if expanded { exp_hsv_to_rgb(h, s, v) } else { hsv_to_rgb(h, s, v) };
    buffer[offset..offset + 3].copy_from_slice(&rgb);
    Ok(())
}

pub fn hsv_to_rgb_buffer(buffer: &mut [u8], index: i64, args: &[ScriptValue]) -> ScriptResult {
    hsv_to_rgb_buffer_impl(buffer, index, args, false)
}

pub fn exp_hsv_to_rgb_buffer(buffer: &mut [u8], index: i64, args: &[ScriptValue]) -> ScriptResult {
    hsv_to_rgb_buffer_impl(buffer, index, args, true)
}

fn rgb_parts(args: &[ScriptValue]) -> Result<(u8, u8, u8), ScriptError> {
    match args {
        [packed] => {
            let [r, g, b] = unpack_rgb(packed.as_int()?);
            Ok((r, g, b))
        }
        [r, g, b] => Ok((
            int_to_u8(r.as_int()?),
            int_to_u8(g.as_int()?),
            int_to_u8(b.as_int()?),
        )),
        _ => Err(ScriptError::Type(
            "must provide 1 combined int or 3 separate r/g/b ints".into(),
        )),
    }
}

pub fn rgb_to_hsv_tuple(args: &[ScriptValue]) -> Result<[i32; 3], ScriptError> {
    let (r, g, b) = rgb_parts(args)?;
    Ok(rgb_to_hsv(r, g, b))
}

pub fn rgb_to_exp_hsv_tuple(args: &[ScriptValue]) -> Result<[i32; 3], ScriptError> {
    let (r, g, b) = rgb_parts(args)?;
    Ok(rgb_to_exp_hsv(r, g, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_color::HUE_RANGE;

    fn int(v: i64) -> ScriptValue {
        ScriptValue::Int(v)
    }

    #[test]
    fn hsv_int_packs_rgb() {
        assert_eq!(hsv_to_rgb_int(&[int(0)]).unwrap(), 0xff0000);
        assert_eq!(hsv_to_rgb_int(&[int(HUE_RANGE as i64 / 3)]).unwrap(), 0x00ff00);
    }

    #[test]
    fn hsv_argument_shapes() {
        // (hue) = full saturation and value; (hue, value); (hue, s, v).
        assert_eq!(hsv_to_rgb_tuple(&[int(0)]).unwrap(), [255, 0, 0]);
        assert_eq!(hsv_to_rgb_tuple(&[int(0), int(128)]).unwrap(), [128, 0, 0]);
        assert_eq!(hsv_to_rgb_tuple(&[int(0), int(0), int(128)]).unwrap(), [128, 128, 128]);
        assert!(hsv_to_rgb_tuple(&[]).is_err());
        assert!(hsv_to_rgb_tuple(&[int(0), int(1), int(2), int(3)]).is_err());
    }

    #[test]
    fn float_hue_is_a_turn_fraction() {
        assert_eq!(
            hsv_to_rgb_tuple(&[ScriptValue::Float(0.5)]).unwrap(),
            hsv_to_rgb_tuple(&[int(HUE_RANGE as i64 / 2)]).unwrap()
        );
        assert!(matches!(
            hsv_to_rgb_tuple(&[ScriptValue::Float(f64::NAN)]),
            Err(ScriptError::Type(_))
        ));
    }

    #[test]
    fn buffer_writes_at_led_offsets() {
        let mut buf = vec![0u8; 9];
        hsv_to_rgb_buffer(&mut buf, 1, &[int(0)]).unwrap();
        assert_eq!(buf, [0, 0, 0, 255, 0, 0, 0, 0, 0]);

        assert!(hsv_to_rgb_buffer(&mut buf, 3, &[int(0)]).is_err());
        assert!(hsv_to_rgb_buffer(&mut buf, -1, &[int(0)]).is_err());
        let mut odd = vec![0u8; 4];
        assert!(hsv_to_rgb_buffer(&mut odd, 0, &[int(0)]).is_err());
    }

    #[test]
    fn rgb_tuple_accepts_packed_or_triple() {
        assert_eq!(rgb_to_hsv_tuple(&[int(0xff0000)]).unwrap(), [0, 255, 255]);
        assert_eq!(rgb_to_hsv_tuple(&[int(255), int(0), int(0)]).unwrap(), [0, 255, 255]);
        assert!(rgb_to_hsv_tuple(&[int(0), int(0)]).is_err());
        assert!(rgb_to_hsv_tuple(&[ScriptValue::Float(1.0)]).is_err());
    }

    #[test]
    fn expanded_round_trip() {
        let packed = exp_hsv_to_rgb_int(&[int(192)]).unwrap();
        let hsv = rgb_to_exp_hsv_tuple(&[int(packed)]).unwrap();
        assert_eq!(hsv[0], 192);
    }
}
