//! The engine: owner of all process-wide state.
//!
//! One instance owns the script pools, the UDP packet pool, the file
//! store, the script registry, and every bus with its preset. Everything
//! else borrows from here, so buses and tasks can be built in tests
//! without global setup.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use core_bus::{LedBus, MAX_LED_BYTES, MAX_PACKET_LEN, NullTransmitter, Transmitter, udp};
use core_fs::FileStore;
use core_pool::{MemoryPool, PoolCaps};
use core_preset::{DescriptionCache, Preset};
use core_runtime::{ScriptPools, ScriptRegistry};

/// One bus to bring up: name plus default chain length.
#[derive(Debug, Clone)]
pub struct BusSpec {
    pub name: String,
    pub default_length: usize,
}

pub struct Engine {
    fs: Arc<FileStore>,
    pools: Arc<ScriptPools>,
    packet_pool: Arc<MemoryPool>,
    registry: Arc<ScriptRegistry>,
    descriptions: Arc<DescriptionCache>,
    buses: Vec<Arc<LedBus>>,
    presets: Vec<Arc<Preset>>,
}

impl Engine {
    pub fn new(data_dir: impl Into<std::path::PathBuf>, specs: &[BusSpec]) -> Result<Self> {
        let fs = Arc::new(FileStore::new(data_dir).context("creating data directory")?);
        let pools = Arc::new(ScriptPools::new(MAX_LED_BYTES));
        let packet_pool = MemoryPool::new(MAX_PACKET_LEN, PoolCaps::SPIRAM | PoolCaps::BYTE_ACCESS);
        let registry = Arc::new(ScriptRegistry::new());
        let descriptions = Arc::new(DescriptionCache::new());

        pools
            .resize(specs.len())
            .context("provisioning script pools")?;
        packet_pool
            .resize(specs.len() * (udp::MAX_QUEUE_SIZE + 1))
            .context("provisioning packet pool")?;

        let mut engine = Self {
            fs,
            pools,
            packet_pool,
            registry,
            descriptions,
            buses: Vec::new(),
            presets: Vec::new(),
        };

        for spec in specs {
            engine.add_bus(spec, Box::new(NullTransmitter::new()));
        }

        engine.descriptions.refresh(&engine.fs);
        Ok(engine)
    }

    /// Register a bus with its transmitter and create its preset slot.
    pub fn add_bus(&mut self, spec: &BusSpec, transmitter: Box<dyn Transmitter>) {
        let bus = LedBus::new(
            &spec.name,
            self.fs.clone(),
            transmitter,
            self.packet_pool.clone(),
            spec.default_length,
        );

        let preset = Preset::new(
            self.fs.clone(),
            bus.clone(),
            self.registry.clone(),
            self.pools.clone(),
            self.descriptions.clone(),
            bus.config().default_preset(),
        );

        info!(target: "engine", bus = spec.name.as_str(), length = bus.length(), "bus registered");
        self.buses.push(bus);
        self.presets.push(preset);
    }

    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.registry
    }

    pub fn fs(&self) -> &Arc<FileStore> {
        &self.fs
    }

    pub fn descriptions(&self) -> &Arc<DescriptionCache> {
        &self.descriptions
    }

    pub fn buses(&self) -> &[Arc<LedBus>] {
        &self.buses
    }

    pub fn presets(&self) -> &[Arc<Preset>] {
        &self.presets
    }

    pub fn bus(&self, name: &str) -> Option<&Arc<LedBus>> {
        self.buses.iter().find(|b| b.name() == name)
    }

    /// Load each bus's default preset and fall back to its configured
    /// default script where the preset has no stored file.
    pub fn load_default_presets(&self) {
        for (bus, preset) in self.buses.iter().zip(&self.presets) {
            let default_preset = bus.config().default_preset();
            if default_preset.is_empty() {
                debug!(target: "engine", bus = bus.name(), "no default preset");
                continue;
            }

            if !preset.load().is_ok() {
                warn!(target: "engine", bus = bus.name(), preset = default_preset.as_str(),
                    "default preset failed to load");
            }
        }
    }

    /// One scheduler pass over every bus and preset.
    pub fn tick(&self) {
        for bus in &self.buses {
            bus.udp_poll();
        }
        for preset in &self.presets {
            preset.loop_tick();
        }
    }

    /// Stop everything: scripts first, then the buses.
    pub fn shutdown(&self) {
        info!(target: "engine", "shutting down");

        loop {
            let mut pending = false;
            for preset in &self.presets {
                pending |= !preset.shutdown();
            }
            if !pending {
                break;
            }
            std::thread::yield_now();
        }

        for bus in &self.buses {
            bus.stop();
        }
    }
}
