//! Per-bus persisted configuration.
//!
//! Every field tracks whether it was explicitly set; only explicit
//! fields are written back (format always is), so a bus file stays
//! minimal and new firmware defaults apply to untouched fields. Setters
//! save immediately; load clamps anything out of range.

use std::sync::{Arc, RwLock};

use minicbor::Decoder;
use tracing::{debug, error, info, trace};

use core_fs::cbor;
use core_fs::outcome::Outcome;
use core_fs::{FileStore, names};

use crate::format::LedBusFormat;
use crate::udp::{DEFAULT_QUEUE_SIZE, MAX_QUEUE_SIZE, MIN_QUEUE_SIZE};
use crate::{DEFAULT_FPS, DEFAULT_RESET_TIME_US, MAX_FPS, MAX_LEDS, MIN_LEDS};

pub const DIRECTORY_NAME: &str = "buses";
pub const FILENAME_EXT: &str = ".cbor";
pub const MAX_PRESET_NAME_LENGTH: usize = 48;

#[derive(Debug, Clone)]
struct Data {
    length: usize,
    length_set: bool,
    format: LedBusFormat,
    format_set: bool,
    reset_time_us: u32,
    reset_time_us_set: bool,
    reverse: bool,
    default_preset: String,
    default_fps: u32,
    default_fps_set: bool,
    udp_port: u16,
    udp_port_set: bool,
    udp_queue_size: usize,
    udp_queue_size_set: bool,
}

impl Data {
    fn reset(default_length: usize) -> Self {
        Self {
            length: default_length.clamp(MIN_LEDS, MAX_LEDS),
            length_set: false,
            format: LedBusFormat::default(),
            format_set: false,
            reset_time_us: DEFAULT_RESET_TIME_US,
            reset_time_us_set: false,
            reverse: false,
            default_preset: String::new(),
            default_fps: DEFAULT_FPS,
            default_fps_set: false,
            udp_port: 0,
            udp_port_set: false,
            udp_queue_size: DEFAULT_QUEUE_SIZE,
            udp_queue_size_set: false,
        }
    }
}

pub struct BusConfig {
    bus_name: String,
    default_length: usize,
    fs: Arc<FileStore>,
    data: RwLock<Data>,
}

impl BusConfig {
    pub fn new(fs: Arc<FileStore>, bus_name: impl Into<String>, default_length: usize) -> Self {
        let bus_name = bus_name.into();
        let config = Self {
            data: RwLock::new(Data::reset(default_length)),
            bus_name,
            default_length,
            fs,
        };
        config.load();
        config
    }

    fn filename(&self) -> String {
        format!("{DIRECTORY_NAME}/{}{FILENAME_EXT}", self.bus_name)
    }

    pub fn length(&self) -> usize {
        self.data.read().expect("bus config lock poisoned").length
    }

    pub fn set_length(&self, value: usize) {
        let mut data = self.data.write().expect("bus config lock poisoned");
        if data.length != value || !data.length_set {
            data.length = value.clamp(MIN_LEDS, MAX_LEDS);
            data.length_set = true;
            drop(data);
            self.save();
        }
    }

    pub fn format(&self) -> LedBusFormat {
        self.data.read().expect("bus config lock poisoned").format
    }

    pub fn set_format(&self, value: LedBusFormat) {
        let mut data = self.data.write().expect("bus config lock poisoned");
        if data.format != value || !data.format_set {
            data.format = value;
            data.format_set = true;
            drop(data);
            self.save();
        }
    }

    pub fn reset_time_us(&self) -> u32 {
        self.data.read().expect("bus config lock poisoned").reset_time_us
    }

    pub fn set_reset_time_us(&self, value: u32) {
        let mut data = self.data.write().expect("bus config lock poisoned");
        if data.reset_time_us != value || !data.reset_time_us_set {
            data.reset_time_us = value;
            data.reset_time_us_set = true;
            drop(data);
            self.save();
        }
    }

    pub fn reverse(&self) -> bool {
        self.data.read().expect("bus config lock poisoned").reverse
    }

    pub fn set_reverse(&self, value: bool) {
        let mut data = self.data.write().expect("bus config lock poisoned");
        if data.reverse != value {
            data.reverse = value;
            drop(data);
            self.save();
        }
    }

    pub fn default_preset(&self) -> String {
        self.data.read().expect("bus config lock poisoned").default_preset.clone()
    }

    pub fn set_default_preset(&self, value: &str) {
        let mut truncated = value.to_owned();
        truncated.truncate(MAX_PRESET_NAME_LENGTH);

        let mut data = self.data.write().expect("bus config lock poisoned");
        if data.default_preset != truncated {
            data.default_preset = truncated;
            drop(data);
            self.save();
        }
    }

    pub fn default_fps(&self) -> u32 {
        self.data.read().expect("bus config lock poisoned").default_fps
    }

    pub fn set_default_fps(&self, value: u32) {
        let mut data = self.data.write().expect("bus config lock poisoned");
        if data.default_fps != value || !data.default_fps_set {
            data.default_fps = value.min(MAX_FPS);
            data.default_fps_set = true;
            drop(data);
            self.save();
        }
    }

    pub fn udp_port(&self) -> u16 {
        self.data.read().expect("bus config lock poisoned").udp_port
    }

    pub fn set_udp_port(&self, value: u16) {
        let mut data = self.data.write().expect("bus config lock poisoned");
        if data.udp_port != value || !data.udp_port_set {
            data.udp_port = value;
            data.udp_port_set = true;
            drop(data);
            self.save();
        }
    }

    pub fn udp_queue_size(&self) -> usize {
        self.data.read().expect("bus config lock poisoned").udp_queue_size
    }

    pub fn set_udp_queue_size(&self, value: usize) {
        let mut data = self.data.write().expect("bus config lock poisoned");
        if data.udp_queue_size != value || !data.udp_queue_size_set {
            data.udp_queue_size = value.clamp(MIN_QUEUE_SIZE, MAX_QUEUE_SIZE);
            data.udp_queue_size_set = true;
            drop(data);
            self.save();
        }
    }

    /// Restore defaults and persist them.
    pub fn reset(&self) {
        *self.data.write().expect("bus config lock poisoned") = Data::reset(self.default_length);
        self.save();
    }

    pub fn load(&self) -> Outcome {
        let filename = self.filename();
        debug!(target: "bus", bus = self.bus_name.as_str(), file = filename.as_str(), "reading config");

        let bytes = match self.fs.read(&filename) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(target: "bus", bus = self.bus_name.as_str(), "no config file");
                return Outcome::NotFound;
            }
            Err(_) => return Outcome::IoError,
        };

        let mut data = self.data.write().expect("bus config lock poisoned");
        *data = Data::reset(self.default_length);

        match Self::decode(&mut data, &bytes) {
            Outcome::Ok => Outcome::Ok,
            outcome => {
                error!(target: "bus", bus = self.bus_name.as_str(), file = filename.as_str(),
                    "config file contains invalid data that has been ignored");
                outcome
            }
        }
    }

    fn decode(data: &mut Data, bytes: &[u8]) -> Outcome {
        let mut dec = Decoder::new(bytes);

        if cbor::expect_self_describe(&mut dec).is_err() {
            return Outcome::ParseError;
        }
        let Ok(entries) = cbor::expect_definite_map(&mut dec) else {
            trace!(target: "bus", "file does not contain a definite length map");
            return Outcome::ParseError;
        };

        for _ in 0..entries {
            let Ok(key) = cbor::read_text(&mut dec) else {
                return Outcome::ParseError;
            };

            let ok = match key.as_str() {
                "length" => match dec.u64() {
                    Ok(v) => {
                        data.length = (v as usize).clamp(MIN_LEDS, MAX_LEDS);
                        data.length_set = true;
                        true
                    }
                    Err(_) => false,
                },
                "format" => match dec.str() {
                    Ok(name) => match LedBusFormat::from_name(name) {
                        Some(format) => {
                            data.format = format;
                            data.format_set = true;
                            true
                        }
                        None => false,
                    },
                    Err(_) => false,
                },
                "reset_time_us" => match dec.u64() {
                    Ok(v) => {
                        data.reset_time_us = v.min(u32::MAX as u64) as u32;
                        data.reset_time_us_set = true;
                        true
                    }
                    Err(_) => false,
                },
                "reverse" => match dec.bool() {
                    Ok(v) => {
                        data.reverse = v;
                        true
                    }
                    Err(_) => false,
                },
                "default_preset" => match dec.str() {
                    Ok(name) => {
                        let mut name = name.to_owned();
                        name.truncate(MAX_PRESET_NAME_LENGTH);
                        if names::allowed_file_name(&name) {
                            data.default_preset = name;
                        }
                        true
                    }
                    Err(_) => false,
                },
                "default_fps" => match dec.u64() {
                    Ok(v) => {
                        data.default_fps = (v as u32).min(MAX_FPS);
                        data.default_fps_set = true;
                        true
                    }
                    Err(_) => false,
                },
                "udp_port" => match dec.u64() {
                    Ok(v) => {
                        if v <= u16::MAX as u64 {
                            data.udp_port = v as u16;
                            data.udp_port_set = true;
                        }
                        true
                    }
                    Err(_) => false,
                },
                "udp_queue_size" => match dec.u64() {
                    Ok(v) => {
                        data.udp_queue_size = (v as usize).clamp(MIN_QUEUE_SIZE, MAX_QUEUE_SIZE);
                        data.udp_queue_size_set = true;
                        true
                    }
                    Err(_) => false,
                },
                _ => dec.skip().is_ok(),
            };

            if !ok {
                return Outcome::ParseError;
            }
        }

        Outcome::Ok
    }

    pub fn save(&self) -> Outcome {
        let filename = self.filename();
        let bytes = {
            let data = self.data.read().expect("bus config lock poisoned");
            Self::encode(&data)
        };

        info!(target: "bus", bus = self.bus_name.as_str(), file = filename.as_str(), "writing config");
        match self.fs.write(&filename, &bytes) {
            Ok(()) => Outcome::Ok,
            Err(_) => Outcome::IoError,
        }
    }

    fn encode(data: &Data) -> Vec<u8> {
        let mut entries = 1u64; // format is always saved
        entries += data.length_set as u64;
        entries += data.reset_time_us_set as u64;
        entries += data.reverse as u64;
        entries += !data.default_preset.is_empty() as u64;
        entries += data.default_fps_set as u64;
        entries += data.udp_port_set as u64;
        entries += data.udp_queue_size_set as u64;

        let mut buf = Vec::new();
        let mut enc = cbor::tagged_encoder(&mut buf);
        enc.map(entries).expect("vec write is infallible");

        if data.length_set {
            enc.str("length")
                .and_then(|e| e.u64(data.length as u64))
                .expect("vec write is infallible");
        }
        enc.str("format")
            .and_then(|e| e.str(data.format.name()))
            .expect("vec write is infallible");
        if data.reset_time_us_set {
            enc.str("reset_time_us")
                .and_then(|e| e.u32(data.reset_time_us))
                .expect("vec write is infallible");
        }
        if data.reverse {
            enc.str("reverse")
                .and_then(|e| e.bool(true))
                .expect("vec write is infallible");
        }
        if !data.default_preset.is_empty() {
            enc.str("default_preset")
                .and_then(|e| e.str(&data.default_preset))
                .expect("vec write is infallible");
        }
        if data.default_fps_set {
            enc.str("default_fps")
                .and_then(|e| e.u32(data.default_fps))
                .expect("vec write is infallible");
        }
        if data.udp_port_set {
            enc.str("udp_port")
                .and_then(|e| e.u16(data.udp_port))
                .expect("vec write is infallible");
        }
        if data.udp_queue_size_set {
            enc.str("udp_queue_size")
                .and_then(|e| e.u64(data.udp_queue_size as u64))
                .expect("vec write is infallible");
        }

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, Arc<FileStore>) {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FileStore::new(dir.path().join("data")).unwrap());
        (dir, fs)
    }

    #[test]
    fn defaults_without_a_file() {
        let (_dir, fs) = store();
        let config = BusConfig::new(fs, "strip", 120);

        assert_eq!(config.length(), 120);
        assert_eq!(config.format(), LedBusFormat::Grb);
        assert_eq!(config.reset_time_us(), DEFAULT_RESET_TIME_US);
        assert!(!config.reverse());
        assert_eq!(config.default_preset(), "");
        assert_eq!(config.default_fps(), DEFAULT_FPS);
        assert_eq!(config.udp_port(), 0);
        assert_eq!(config.udp_queue_size(), DEFAULT_QUEUE_SIZE);
    }

    #[test]
    fn setters_persist_and_reload() {
        let (_dir, fs) = store();
        {
            let config = BusConfig::new(fs.clone(), "strip", 120);
            config.set_length(64);
            config.set_format(LedBusFormat::Bgr);
            config.set_reset_time_us(500);
            config.set_reverse(true);
            config.set_default_preset("rainbow");
            config.set_default_fps(25);
            config.set_udp_port(7777);
            config.set_udp_queue_size(9);
        }

        let config = BusConfig::new(fs, "strip", 120);
        assert_eq!(config.length(), 64);
        assert_eq!(config.format(), LedBusFormat::Bgr);
        assert_eq!(config.reset_time_us(), 500);
        assert!(config.reverse());
        assert_eq!(config.default_preset(), "rainbow");
        assert_eq!(config.default_fps(), 25);
        assert_eq!(config.udp_port(), 7777);
        assert_eq!(config.udp_queue_size(), 9);
    }

    #[test]
    fn only_set_fields_are_written() {
        let (_dir, fs) = store();
        let config = BusConfig::new(fs.clone(), "strip", 120);
        config.set_length(64);

        let bytes = fs.read("buses/strip.cbor").unwrap().unwrap();
        let mut dec = Decoder::new(&bytes);
        cbor::expect_self_describe(&mut dec).unwrap();
        assert_eq!(cbor::expect_definite_map(&mut dec).unwrap(), 2, "length + format only");
    }

    #[test]
    fn values_clamp_on_set_and_load() {
        let (_dir, fs) = store();
        let config = BusConfig::new(fs.clone(), "strip", 120);
        config.set_length(50_000);
        assert_eq!(config.length(), MAX_LEDS);
        config.set_length(0);
        assert_eq!(config.length(), MIN_LEDS);
        config.set_default_fps(100_000);
        assert_eq!(config.default_fps(), MAX_FPS);
        config.set_udp_queue_size(1000);
        assert_eq!(config.udp_queue_size(), MAX_QUEUE_SIZE);

        let reloaded = BusConfig::new(fs, "strip", 120);
        assert_eq!(reloaded.length(), MIN_LEDS);
        assert_eq!(reloaded.default_fps(), MAX_FPS);
        assert_eq!(reloaded.udp_queue_size(), MAX_QUEUE_SIZE);
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let (_dir, fs) = store();
        let mut buf = Vec::new();
        let mut enc = cbor::tagged_encoder(&mut buf);
        enc.map(2).unwrap();
        enc.str("future_knob").unwrap().array(2).unwrap().u8(1).unwrap().u8(2).unwrap();
        enc.str("length").unwrap().u16(33).unwrap();
        fs.write("buses/strip.cbor", &buf).unwrap();

        let config = BusConfig::new(fs, "strip", 120);
        assert_eq!(config.length(), 33);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let (_dir, fs) = store();
        fs.write("buses/strip.cbor", &[0xff, 0x00, 0x13]).unwrap();

        let config = BusConfig::new(fs, "strip", 120);
        assert_eq!(config.length(), 120);
        assert_eq!(config.format(), LedBusFormat::Grb);
    }

    #[test]
    fn reset_restores_and_saves_defaults() {
        let (_dir, fs) = store();
        let config = BusConfig::new(fs.clone(), "strip", 120);
        config.set_length(64);
        config.set_reverse(true);

        config.reset();
        assert_eq!(config.length(), 120);
        assert!(!config.reverse());

        let reloaded = BusConfig::new(fs, "strip", 120);
        assert_eq!(reloaded.length(), 120);
        assert!(!reloaded.reverse());
    }

    #[test]
    fn invalid_format_name_is_a_parse_error() {
        let (_dir, fs) = store();
        let mut buf = Vec::new();
        let mut enc = cbor::tagged_encoder(&mut buf);
        enc.map(1).unwrap();
        enc.str("format").unwrap().str("RGBW").unwrap();
        fs.write("buses/strip.cbor", &buf).unwrap();

        let config = BusConfig::new(fs, "strip", 120);
        assert_eq!(config.load(), Outcome::ParseError);
    }
}
