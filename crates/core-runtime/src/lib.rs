//! Script runtime: isolated per-bus script tasks and the API they see.
//!
//! Each running preset gets one [`ScriptTask`]: an OS thread plus three
//! pool blocks (interpreter heap, work stack, LED frame buffer). The
//! [`ScriptContext`] handed to the script carries the whole script-facing
//! API: bus geometry, config registration and readback, the `output_*`
//! pixel pipeline, color conversion helpers, frame-paced time queries,
//! UDP ingress and leveled logging.
//!
//! Scripts are native [`Script`] implementations resolved by name from a
//! [`ScriptRegistry`]; cancellation is cooperative and observed at the
//! context's safepoints, with a panic boundary at the task entry
//! containing anything fatal.

mod context;
mod output;
mod task;
pub mod ulogging;
mod value;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use core_bus::BusError;
use core_color::ColorArgError;
use core_config::{ConfigError, ConfigValue, RegisterEntry};
use core_pool::{MemoryPool, PoolCaps, PoolError};

pub use context::{
    ScriptContext, exp_hsv_to_rgb_buffer, exp_hsv_to_rgb_int, exp_hsv_to_rgb_tuple,
    hsv_to_rgb_buffer, hsv_to_rgb_int, hsv_to_rgb_tuple, rgb_to_exp_hsv_tuple, rgb_to_hsv_tuple,
};
pub use output::{MAX_WAIT_MS, MAX_WAIT_US, OutputArgs, OutputKind};
pub use task::{ScriptTask, TaskIoMode, STDIN_LEN, STDOUT_LEN};
pub use ulogging::ULogging;
pub use value::{OutputValues, ScriptValue};

/// Interpreter arena sizes, one pool block per running task.
pub const HEAP_SIZE: usize = 192 * 1024;
pub const WORK_STACK_SIZE: usize = 4 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    /// Terminal exception injected by `stop`; not a fault.
    #[error("script exit")]
    Exit,
    #[error("type error: {0}")]
    Type(String),
    #[error("value error: {0}")]
    Value(String),
    #[error("maximum config size exceeded")]
    ConfigFull,
    #[error("bus stopped")]
    Stopped,
}

pub type ScriptResult = Result<(), ScriptError>;

impl From<BusError> for ScriptError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::Stopped => ScriptError::Stopped,
        }
    }
}

impl From<ColorArgError> for ScriptError {
    fn from(e: ColorArgError) -> Self {
        ScriptError::Type(e.to_string())
    }
}

impl From<ConfigError> for ScriptError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Full => ScriptError::ConfigFull,
            ConfigError::InvalidKey | ConfigError::InvalidType | ConfigError::WrongType => {
                ScriptError::Value(e.to_string())
            }
        }
    }
}

/// A script program bound to one bus for one run.
pub trait Script: Send {
    fn run(&mut self, ctx: &mut ScriptContext) -> ScriptResult;
}

impl<F> Script for F
where
    F: FnMut(&mut ScriptContext) -> ScriptResult + Send,
{
    fn run(&mut self, ctx: &mut ScriptContext) -> ScriptResult {
        self(ctx)
    }
}

/// The preset-side surface a running script's config calls land on.
pub trait ConfigHost: Send + Sync {
    fn register_config(&self, decls: &[RegisterEntry]) -> Result<(), ConfigError>;
    /// Fill `out` with effective values; returns whether anything
    /// observable changed since the last populate.
    fn populate_config(&self, out: &mut BTreeMap<String, ConfigValue>) -> bool;
    /// The preset's reverse flag (wire order, combined with the bus's).
    fn reverse(&self) -> bool;
    /// Record an indirect script dependency for cache invalidation.
    fn script_imported(&self, name: &str);
}

/// The three process-wide pools every script task borrows from.
pub struct ScriptPools {
    pub heaps: Arc<MemoryPool>,
    pub stacks: Arc<MemoryPool>,
    pub ledbufs: Arc<MemoryPool>,
}

impl ScriptPools {
    pub fn new(led_buffer_size: usize) -> Self {
        Self {
            heaps: MemoryPool::new(HEAP_SIZE, PoolCaps::SPIRAM | PoolCaps::BYTE_ACCESS),
            stacks: MemoryPool::new(WORK_STACK_SIZE, PoolCaps::SPIRAM | PoolCaps::BYTE_ACCESS),
            ledbufs: MemoryPool::new(led_buffer_size, PoolCaps::INTERNAL | PoolCaps::BYTE_ACCESS),
        }
    }

    /// Provision one block of each kind per concurrently running task.
    pub fn resize(&self, task_count: usize) -> Result<(), PoolError> {
        self.heaps.resize(task_count)?;
        self.stacks.resize(task_count)?;
        self.ledbufs.resize(task_count)
    }
}

type ScriptFactory = Arc<dyn Fn() -> Box<dyn Script> + Send + Sync>;

/// Name-keyed registry of available scripts.
#[derive(Default)]
pub struct ScriptRegistry {
    scripts: RwLock<BTreeMap<String, ScriptFactory>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Script> + Send + Sync + 'static,
    {
        self.scripts
            .write()
            .expect("registry lock poisoned")
            .insert(name.into(), Arc::new(factory));
    }

    pub fn names(&self) -> Vec<String> {
        self.scripts.read().expect("registry lock poisoned").keys().cloned().collect()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.scripts.read().expect("registry lock poisoned").contains_key(name)
    }

    pub fn instantiate(&self, name: &str) -> Option<Box<dyn Script>> {
        let factory = self.scripts.read().expect("registry lock poisoned").get(name).cloned()?;
        Some(factory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_instantiates_by_name() {
        let registry = ScriptRegistry::new();
        registry.register("noop", || Box::new(|_ctx: &mut ScriptContext| Ok(())));

        assert!(registry.exists("noop"));
        assert!(!registry.exists("missing"));
        assert_eq!(registry.names(), ["noop"]);
        assert!(registry.instantiate("noop").is_some());
        assert!(registry.instantiate("missing").is_none());
    }

    #[test]
    fn pools_provision_per_task() {
        let pools = ScriptPools::new(15);
        pools.resize(2).unwrap();
        assert_eq!(pools.heaps.available(), 2);
        assert_eq!(pools.stacks.available(), 2);
        assert_eq!(pools.ledbufs.available(), 2);
        assert_eq!(pools.ledbufs.block_size(), 15);
    }
}
