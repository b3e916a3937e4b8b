//! Presets: a named script + configuration bound to one bus.
//!
//! The preset owns its script's [`ScriptConfig`] and drives the bus
//! scheduler: [`Preset::loop_tick`] restarts the script when it has
//! stopped (after a cooldown) or when the script selection changed, and
//! retries failed starts. Preset files are CBOR maps persisted through
//! the shared [`FileStore`] discipline.

mod cache;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};

use minicbor::Decoder;
use tracing::{debug, error, info, trace};

use core_bus::{LedBus, clock};
use core_config::{ConfigError, ConfigValue, ContainerOp, PropertyType, RegisterEntry, ScriptConfig};
use core_fs::outcome::Outcome;
use core_fs::{FileStore, cbor, names};
use core_runtime::{ConfigHost, ScriptPools, ScriptRegistry, ScriptTask, TaskIoMode};

pub use cache::DescriptionCache;

pub const DIRECTORY_NAME: &str = "presets";
pub const FILENAME_EXT: &str = ".cbor";
pub const MAX_NAME_LENGTH: usize = 48;
pub const MAX_DESCRIPTION_LENGTH: usize = 64;
/// Cooldown between a script stopping on its own and its restart.
pub const RESTART_TIME_MS: u64 = 10_000;

fn uptime_ms() -> u64 {
    clock::now_us() / 1000
}

struct PresetData {
    name: String,
    description: String,
    script: String,
    reverse: bool,
    config: ScriptConfig,
    modified: bool,
    script_changed: bool,
    config_changed: bool,
    scripts_imported: BTreeSet<String>,
}

impl PresetData {
    fn reset_content(&mut self) {
        self.description.clear();
        self.script.clear();
        self.reverse = false;
        self.modified = false;
        self.scripts_imported.clear();
    }
}

struct Runner {
    task: Option<ScriptTask>,
    running: bool,
    stop_time_ms: u64,
}

pub struct Preset {
    fs: Arc<FileStore>,
    bus: Arc<LedBus>,
    registry: Arc<ScriptRegistry>,
    pools: Arc<ScriptPools>,
    descriptions: Arc<DescriptionCache>,
    data: RwLock<PresetData>,
    runner: Mutex<Runner>,
}

impl Preset {
    pub fn new(
        fs: Arc<FileStore>,
        bus: Arc<LedBus>,
        registry: Arc<ScriptRegistry>,
        pools: Arc<ScriptPools>,
        descriptions: Arc<DescriptionCache>,
        name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fs,
            bus,
            registry,
            pools,
            descriptions,
            data: RwLock::new(PresetData {
                name: name.into(),
                description: String::new(),
                script: String::new(),
                reverse: false,
                config: ScriptConfig::new(),
                modified: false,
                script_changed: false,
                config_changed: false,
                scripts_imported: BTreeSet::new(),
            }),
            runner: Mutex::new(Runner {
                task: None,
                running: false,
                stop_time_ms: 0,
            }),
        })
    }

    /// Names of all stored presets.
    pub fn names(fs: &FileStore) -> Vec<String> {
        fs.list(DIRECTORY_NAME, FILENAME_EXT).unwrap_or_default()
    }

    fn filename_for(name: &str) -> String {
        format!("{DIRECTORY_NAME}/{name}{FILENAME_EXT}")
    }

    pub fn bus(&self) -> &Arc<LedBus> {
        &self.bus
    }

    pub fn name(&self) -> String {
        let data = self.data.read().expect("preset lock poisoned");
        if data.name.is_empty() {
            "<unnamed>".to_owned()
        } else {
            data.name.clone()
        }
    }

    pub fn set_name(&self, name: &str) -> bool {
        if !names::allowed_file_name(name) {
            return false;
        }
        let mut name = name.to_owned();
        name.truncate(MAX_NAME_LENGTH);

        let mut data = self.data.write().expect("preset lock poisoned");
        if data.name != name {
            data.name = name;
            data.modified = true;
        }
        true
    }

    pub fn description(&self) -> String {
        self.data.read().expect("preset lock poisoned").description.clone()
    }

    pub fn set_description(&self, description: &str) -> bool {
        if !names::allowed_text(description) {
            return false;
        }
        let mut description = description.to_owned();
        description.truncate(MAX_DESCRIPTION_LENGTH);

        let mut data = self.data.write().expect("preset lock poisoned");
        if data.description != description {
            data.description = description;
            data.modified = true;
        }
        true
    }

    pub fn script(&self) -> String {
        self.data.read().expect("preset lock poisoned").script.clone()
    }

    /// Select the script to run. Takes effect at the next scheduler
    /// tick: immediately when one is running, without cooldown when not.
    pub fn set_script(&self, script: &str) {
        let runner = self.runner.lock().expect("preset runner poisoned");
        let mut data = self.data.write().expect("preset lock poisoned");

        if data.script != script {
            data.script = script.to_owned();
            data.modified = true;
            if runner.running {
                data.script_changed = true;
            } else {
                drop(data);
                drop(runner);
                self.clear_cooldown();
            }
        }
    }

    pub fn reverse(&self) -> bool {
        self.data.read().expect("preset lock poisoned").reverse
    }

    pub fn set_reverse(&self, reverse: bool) {
        let mut data = self.data.write().expect("preset lock poisoned");
        if data.reverse != reverse {
            data.reverse = reverse;
            data.modified = true;
        }
    }

    pub fn modified(&self) -> bool {
        self.data.read().expect("preset lock poisoned").modified
    }

    // -- operator config access -------------------------------------

    fn config_modified(data: &mut PresetData, outcome: Outcome) -> Outcome {
        if outcome == Outcome::Ok {
            data.config_changed = true;
            data.modified = true;
        }
        outcome
    }

    pub fn set_config(&self, key: &str, value: &str) -> Outcome {
        let mut data = self.data.write().expect("preset lock poisoned");
        let outcome = data.config.set(key, value);
        Self::config_modified(&mut data, outcome)
    }

    pub fn unset_config(&self, key: &str) -> Outcome {
        let mut data = self.data.write().expect("preset lock poisoned");
        let outcome = data.config.unset(key);
        Self::config_modified(&mut data, outcome)
    }

    pub fn modify_config(
        &self,
        key: &str,
        value: &str,
        op: ContainerOp,
        index1: usize,
        index2: usize,
    ) -> Outcome {
        let mut data = self.data.write().expect("preset lock poisoned");
        let outcome = data.config.modify(key, value, op, index1, index2);
        Self::config_modified(&mut data, outcome)
    }

    pub fn config_keys(&self, types: Option<&[PropertyType]>) -> Vec<String> {
        self.data.read().expect("preset lock poisoned").config.keys(types)
    }

    pub fn config_key_type(&self, key: &str) -> Option<PropertyType> {
        self.data.read().expect("preset lock poisoned").config.key_type(key)
    }

    pub fn config_container_values(&self, key: &str) -> Vec<String> {
        self.data.read().expect("preset lock poisoned").config.container_values(key)
    }

    pub fn clear_config(&self) {
        let mut data = self.data.write().expect("preset lock poisoned");
        if data.config.clear() {
            Self::config_modified(&mut data, Outcome::Ok);
        }
    }

    pub fn cleanup_config(&self) {
        let mut data = self.data.write().expect("preset lock poisoned");
        if data.config.cleanup() {
            Self::config_modified(&mut data, Outcome::Ok);
        }
    }

    pub fn config_keys_size(&self) -> usize {
        self.data.read().expect("preset lock poisoned").config.keys_size()
    }

    pub fn config_defaults_size(&self) -> usize {
        self.data.read().expect("preset lock poisoned").config.defaults_size()
    }

    pub fn config_values_size(&self) -> usize {
        self.data.read().expect("preset lock poisoned").config.values_size()
    }

    // -- persistence ------------------------------------------------

    pub fn load(&self) -> Outcome {
        let name = self.data.read().expect("preset lock poisoned").name.clone();
        if name.is_empty() {
            return Outcome::NotFound;
        }
        let filename = Self::filename_for(&name);

        info!(target: "preset", bus = self.bus.name(), file = filename.as_str(), "reading preset");

        let bytes = match self.fs.read(&filename) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                error!(target: "preset", file = filename.as_str(), "unable to open preset for reading");
                return Outcome::NotFound;
            }
            Err(_) => return Outcome::IoError,
        };

        let runner = self.runner.lock().expect("preset runner poisoned");
        let mut data = self.data.write().expect("preset lock poisoned");
        let old_script = data.script.clone();

        data.reset_content();
        data.modified = true;

        let result = Self::decode(&mut data, &bytes);

        if data.script == old_script {
            data.script_changed = false;
        } else if runner.running {
            data.script_changed = true;
        }
        if result == Outcome::Ok {
            data.modified = false;
        }
        data.config_changed = true;

        match result {
            Outcome::Full => {
                error!(target: "preset", file = filename.as_str(),
                    "preset contains too many config values (truncated)");
            }
            Outcome::NotFound | Outcome::OutOfRange => {
                error!(target: "preset", file = filename.as_str(),
                    "preset contains invalid data that has been ignored");
            }
            Outcome::ParseError | Outcome::IoError => {
                error!(target: "preset", file = filename.as_str(), "error reading preset");
            }
            Outcome::Ok => {}
        }

        result
    }

    fn decode(data: &mut PresetData, bytes: &[u8]) -> Outcome {
        let mut dec = Decoder::new(bytes);

        if cbor::expect_self_describe(&mut dec).is_err() {
            return Outcome::ParseError;
        }
        let Ok(entries) = cbor::expect_definite_map(&mut dec) else {
            trace!(target: "preset", "file does not contain a definite length map");
            return Outcome::ParseError;
        };

        let mut result = Outcome::Ok;

        for _ in 0..entries {
            let Ok(key) = cbor::read_text(&mut dec) else {
                return Outcome::ParseError;
            };

            match key.as_str() {
                "desc" => {
                    let Ok(mut value) = cbor::read_text(&mut dec) else {
                        return Outcome::ParseError;
                    };
                    value.truncate(MAX_DESCRIPTION_LENGTH);
                    if names::allowed_text(&value) {
                        data.description = value;
                    }
                }
                "script" => {
                    let Ok(value) = cbor::read_text(&mut dec) else {
                        return Outcome::ParseError;
                    };
                    data.script = value;
                }
                "reverse" => {
                    let Ok(value) = dec.bool() else {
                        return Outcome::ParseError;
                    };
                    data.reverse = value;
                }
                "config" => match data.config.load(&mut dec) {
                    Outcome::ParseError => return Outcome::ParseError,
                    Outcome::IoError => return Outcome::IoError,
                    outcome => {
                        result.combine(outcome);
                    }
                },
                _ => {
                    if dec.skip().is_err() {
                        return Outcome::ParseError;
                    }
                }
            }
        }

        result
    }

    pub fn save(&self) -> Outcome {
        let mut data = self.data.write().expect("preset lock poisoned");
        if data.name.is_empty() {
            return Outcome::NotFound;
        }
        let filename = Self::filename_for(&data.name);

        info!(target: "preset", bus = self.bus.name(), file = filename.as_str(), "writing preset");

        let mut buf = Vec::new();
        let mut enc = cbor::tagged_encoder(&mut buf);
        enc.map(4).expect("vec write is infallible");
        enc.str("desc")
            .and_then(|e| e.str(&data.description))
            .and_then(|e| e.str("script"))
            .and_then(|e| e.str(&data.script))
            .and_then(|e| e.str("reverse"))
            .and_then(|e| e.bool(data.reverse))
            .and_then(|e| e.str("config"))
            .expect("vec write is infallible");
        data.config.save(&mut enc);

        match self.fs.write(&filename, &buf) {
            Ok(()) => {
                data.modified = false;
                self.descriptions.insert(&data.name, &data.description);
                Outcome::Ok
            }
            Err(_) => Outcome::IoError,
        }
    }

    /// Rename the stored preset file (replacing any file at the new
    /// name) and adopt the new name.
    pub fn rename(&self, new_name: &str) -> Outcome {
        if !names::allowed_file_name(new_name) || new_name.len() > MAX_NAME_LENGTH {
            return Outcome::NotFound;
        }

        let mut data = self.data.write().expect("preset lock poisoned");
        if data.name.is_empty() {
            return Outcome::NotFound;
        }

        let from = Self::filename_for(&data.name);
        let to = Self::filename_for(new_name);

        match self.fs.rename(&from, &to) {
            Ok(replaced) => {
                if replaced {
                    self.descriptions.remove(new_name);
                }
                info!(target: "preset", from = from.as_str(), to = to.as_str(), "renamed preset");
                self.descriptions.remove(&data.name);
                self.descriptions.insert(new_name, &data.description);
                data.name = new_name.to_owned();
                Outcome::Ok
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Outcome::NotFound,
            Err(_) => Outcome::IoError,
        }
    }

    /// Delete the stored preset file.
    pub fn remove(&self) -> Outcome {
        let mut data = self.data.write().expect("preset lock poisoned");
        if data.name.is_empty() {
            return Outcome::NotFound;
        }

        let filename = Self::filename_for(&data.name);
        info!(target: "preset", file = filename.as_str(), "deleting preset");

        match self.fs.remove(&filename) {
            Ok(true) => {
                data.modified = true;
                self.descriptions.remove(&data.name);
                Outcome::Ok
            }
            Ok(false) => Outcome::NotFound,
            Err(_) => Outcome::IoError,
        }
    }

    // -- scheduling --------------------------------------------------

    fn restart_due(&self, runner: &Runner) -> bool {
        let data = self.data.read().expect("preset lock poisoned");

        if data.script_changed {
            return true;
        }
        if runner.running {
            return false;
        }
        if runner.stop_time_ms == 0 {
            return true;
        }
        uptime_ms() - runner.stop_time_ms >= RESTART_TIME_MS
    }

    /// One scheduler step: notice a self-stopped script, then (re)start
    /// when due. Returns whether a script is running afterwards.
    pub fn loop_tick(self: &Arc<Self>) -> bool {
        let mut runner = self.runner.lock().expect("preset runner poisoned");

        if runner.running && !runner.task.as_ref().is_some_and(ScriptTask::running) {
            runner.stop_time_ms = uptime_ms();
            runner.running = false;
        }

        if !self.restart_due(&runner) {
            return runner.running;
        }

        // Detach whatever is still attached; retry next tick if the old
        // thread has not wound down yet.
        if let Some(task) = &mut runner.task {
            if !task.stop() {
                return runner.running;
            }
            runner.task = None;
            runner.running = false;
        }

        let script = {
            let mut data = self.data.write().expect("preset lock poisoned");
            if data.script_changed {
                data.script_changed = false;
                trace!(target: "preset", bus = self.bus.name(), script = data.script.as_str(),
                    "changing script");
            } else {
                trace!(target: "preset", bus = self.bus.name(), script = data.script.as_str(),
                    "running script");
            }
            data.scripts_imported.clear();
            data.script.clone()
        };

        let Some(instance) = self.registry.instantiate(&script) else {
            if !script.is_empty() {
                debug!(target: "preset", bus = self.bus.name(), script = script.as_str(),
                    "script not found");
            }
            runner.stop_time_ms = uptime_ms();
            return false;
        };

        let mut task = ScriptTask::new(
            &script,
            self.bus.clone(),
            self.clone() as Arc<dyn ConfigHost>,
            instance,
            &self.pools,
            TaskIoMode::Logging,
        );

        if task.start() {
            runner.task = Some(task);
            runner.running = true;
        } else {
            runner.running = false;
            runner.stop_time_ms = uptime_ms();
        }

        runner.running
    }

    /// Whether the preset's script task is currently running.
    pub fn running(&self) -> bool {
        self.runner.lock().expect("preset runner poisoned").running
    }

    /// Stop the script and clear the restart cooldown so the next tick
    /// starts it again immediately.
    pub fn restart_script(&self) {
        let mut runner = self.runner.lock().expect("preset runner poisoned");
        if let Some(task) = &mut runner.task {
            task.force_exit();
        }
        runner.stop_time_ms = 0;
        runner.running = false;
    }

    fn clear_cooldown(&self) {
        let mut runner = self.runner.lock().expect("preset runner poisoned");
        runner.stop_time_ms = 0;
    }

    /// Detach and fully stop the script task. Returns whether the task
    /// thread is gone.
    pub fn shutdown(&self) -> bool {
        let mut runner = self.runner.lock().expect("preset runner poisoned");
        let Some(task) = &mut runner.task else {
            return true;
        };

        if task.stop() {
            runner.task = None;
            runner.running = false;
            runner.stop_time_ms = uptime_ms();
            true
        } else {
            false
        }
    }

    /// The scripts this preset depends on (selected plus imported).
    pub fn uses_scripts(&self, scripts: &BTreeSet<String>) -> bool {
        let data = self.data.read().expect("preset lock poisoned");

        if scripts.contains(&data.script) {
            return true;
        }
        data.scripts_imported.iter().any(|s| scripts.contains(s))
    }

    pub fn scripts_imported(&self) -> Vec<String> {
        let data = self.data.read().expect("preset lock poisoned");
        data.scripts_imported.iter().cloned().collect()
    }
}

impl ConfigHost for Preset {
    fn register_config(&self, decls: &[RegisterEntry]) -> Result<(), ConfigError> {
        let mut data = self.data.write().expect("preset lock poisoned");
        data.config.register_properties(decls)?;
        data.config_changed = true;
        Ok(())
    }

    fn populate_config(&self, out: &mut BTreeMap<String, ConfigValue>) -> bool {
        let mut data = self.data.write().expect("preset lock poisoned");
        if data.config_changed {
            data.config.populate_dict(out);
            data.config_changed = false;
            true
        } else {
            false
        }
    }

    fn reverse(&self) -> bool {
        self.data.read().expect("preset lock poisoned").reverse
    }

    fn script_imported(&self, name: &str) {
        let mut data = self.data.write().expect("preset lock poisoned");
        if name != data.script {
            data.scripts_imported.insert(name.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_bus::{LoopbackTransmitter, MAX_LED_BYTES, MAX_PACKET_LEN};
    use core_pool::{MemoryPool, PoolCaps};
    use core_runtime::{OutputArgs, OutputValues, ScriptContext, ScriptResult};
    use std::thread;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        fs: Arc<FileStore>,
        tx: Arc<LoopbackTransmitter>,
        bus: Arc<LedBus>,
        registry: Arc<ScriptRegistry>,
        pools: Arc<ScriptPools>,
        descriptions: Arc<DescriptionCache>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let fs = Arc::new(FileStore::new(dir.path().join("data")).unwrap());
            let packet_pool = MemoryPool::new(MAX_PACKET_LEN, PoolCaps::SPIRAM);
            packet_pool.resize(4).unwrap();
            let tx = LoopbackTransmitter::new();
            let bus = LedBus::new("strip", fs.clone(), Box::new(tx.clone()), packet_pool, 5);

            let pools = Arc::new(ScriptPools::new(MAX_LED_BYTES));
            pools.resize(2).unwrap();

            Self {
                _dir: dir,
                fs,
                tx,
                bus,
                registry: Arc::new(ScriptRegistry::new()),
                pools,
                descriptions: Arc::new(DescriptionCache::new()),
            }
        }

        fn preset(&self, name: &str) -> Arc<Preset> {
            Preset::new(
                self.fs.clone(),
                self.bus.clone(),
                self.registry.clone(),
                self.pools.clone(),
                self.descriptions.clone(),
                name,
            )
        }
    }

    fn one_frame_script(ctx: &mut ScriptContext) -> ScriptResult {
        ctx.output_rgb(
            OutputValues::Bytes(vec![1, 2, 3]),
            OutputArgs::default(),
        )
    }

    #[test]
    fn save_load_round_trip() {
        let f = Fixture::new();
        let preset = f.preset("sunrise");
        preset.set_description("Warm morning ramp");
        preset.set_script("rainbow");
        preset.set_reverse(true);
        preset
            .register_config(&[RegisterEntry::new("speed", "i", Some(ConfigValue::S32(7)))])
            .unwrap();
        preset.set_config("speed", "40");

        assert!(preset.modified());
        assert_eq!(preset.save(), Outcome::Ok);
        assert!(!preset.modified());

        let loaded = f.preset("sunrise");
        assert_eq!(loaded.load(), Outcome::Ok);
        assert_eq!(loaded.description(), "Warm morning ramp");
        assert_eq!(loaded.script(), "rainbow");
        assert!(loaded.reverse());

        // The operator value survived; the default belongs to the script.
        let mut out = BTreeMap::new();
        assert!(loaded.populate_config(&mut out));
        assert_eq!(out["speed"], ConfigValue::S32(40));
    }

    #[test]
    fn load_missing_is_not_found() {
        let f = Fixture::new();
        assert_eq!(f.preset("ghost").load(), Outcome::NotFound);
    }

    #[test]
    fn corrupt_preset_is_a_parse_error() {
        let f = Fixture::new();
        f.fs.write("presets/bad.cbor", &[0x00, 0x01, 0x02]).unwrap();
        assert_eq!(f.preset("bad").load(), Outcome::ParseError);
    }

    #[test]
    fn rename_and_remove_update_the_store() {
        let f = Fixture::new();
        let preset = f.preset("old-name");
        preset.set_description("desc");
        assert_eq!(preset.save(), Outcome::Ok);

        assert_eq!(preset.rename("new-name"), Outcome::Ok);
        assert_eq!(preset.name(), "new-name");
        assert!(!f.fs.exists("presets/old-name.cbor"));
        assert!(f.fs.exists("presets/new-name.cbor"));
        assert_eq!(f.descriptions.get("new-name").as_deref(), Some("desc"));
        assert_eq!(f.descriptions.get("old-name"), None);

        assert_eq!(preset.remove(), Outcome::Ok);
        assert!(!f.fs.exists("presets/new-name.cbor"));
        assert_eq!(preset.remove(), Outcome::NotFound);
    }

    #[test]
    fn rename_rejects_bad_names() {
        let f = Fixture::new();
        let preset = f.preset("fine");
        assert_eq!(preset.rename("not/ok"), Outcome::NotFound);
        assert_eq!(preset.rename(""), Outcome::NotFound);
    }

    #[test]
    fn loop_tick_runs_the_selected_script() {
        let f = Fixture::new();
        f.registry.register("one-frame", || Box::new(one_frame_script));

        let preset = f.preset("demo");
        preset.set_script("one-frame");

        assert!(preset.loop_tick());
        for _ in 0..500 {
            if f.tx.frame_count() > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(f.tx.last_frame().unwrap().data, [1, 2, 3]);
    }

    #[test]
    fn finished_script_waits_out_the_cooldown() {
        let f = Fixture::new();
        f.registry.register("one-frame", || Box::new(one_frame_script));

        let preset = f.preset("demo");
        preset.set_script("one-frame");

        assert!(preset.loop_tick());
        for _ in 0..500 {
            if !preset.running() && f.tx.frame_count() > 0 {
                break;
            }
            preset.loop_tick();
            thread::sleep(Duration::from_millis(2));
        }

        let frames = f.tx.frame_count();
        assert!(frames >= 1);

        // Within the cooldown the script must not restart.
        for _ in 0..10 {
            preset.loop_tick();
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(f.tx.frame_count(), frames);
    }

    #[test]
    fn script_change_restarts_immediately() {
        let f = Fixture::new();
        f.registry.register("one-frame", || Box::new(one_frame_script));
        f.registry.register("solid", || {
            Box::new(|ctx: &mut ScriptContext| {
                ctx.output_rgb(OutputValues::Bytes(vec![9, 9, 9]), OutputArgs::default())
            })
        });

        let preset = f.preset("demo");
        preset.set_script("one-frame");
        preset.loop_tick();

        for _ in 0..500 {
            preset.loop_tick();
            if f.tx.frame_count() > 0 && !preset.running() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        preset.set_script("solid");
        for _ in 0..500 {
            preset.loop_tick();
            if f.tx.last_frame().map(|f| f.data.clone()) == Some(vec![9, 9, 9]) {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("script change did not restart the task");
    }

    #[test]
    fn unknown_script_sets_the_cooldown() {
        let f = Fixture::new();
        let preset = f.preset("demo");
        preset.set_script("does-not-exist");

        assert!(!preset.loop_tick());
        assert!(!preset.loop_tick(), "stays idle during the cooldown");
    }

    #[test]
    fn imported_scripts_feed_uses_scripts() {
        let f = Fixture::new();
        let preset = f.preset("demo");
        preset.set_script("main");
        preset.script_imported("helper");
        preset.script_imported("main"); // self-import is ignored

        assert_eq!(preset.scripts_imported(), ["helper"]);
        assert!(preset.uses_scripts(&BTreeSet::from(["helper".to_owned()])));
        assert!(preset.uses_scripts(&BTreeSet::from(["main".to_owned()])));
        assert!(!preset.uses_scripts(&BTreeSet::from(["other".to_owned()])));
    }
}
