//! LED bus core: per-chain state, frame pacing and the transmitter seam.
//!
//! A bus is in exactly one of three phases. `Idle` means the wire is
//! quiet and a frame may start once the inter-frame reset gap has
//! elapsed. `Transmitting` carries a deadline by which the frame
//! (including its trailing reset gap) is over; a second sender blocks
//! against it with a coarse sleep and busy-waits the residual, because a
//! WS281x frame boundary tolerates no scheduler jitter. `Stopped` is
//! terminal. Completion is signalled by the transmitter, possibly from
//! interrupt context, so the whole phase machine lives in atomics.

pub mod clock;
pub mod config;
pub mod format;
pub mod transmit;
pub mod udp;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace};

use core_color::{BYTES_PER_LED, LedProfile, LedProfileId};
use core_fs::FileStore;
use core_fs::outcome::Outcome;
use core_pool::MemoryPool;

pub use config::BusConfig;
pub use format::LedBusFormat;
pub use transmit::{CapturedFrame, LoopbackTransmitter, NullTransmitter, Transmitter, TxDone};
pub use udp::{LedBusUdp, MAX_PACKET_LEN, UdpPacket};

pub const MIN_LEDS: usize = 1;
pub const MAX_LEDS: usize = 1000;
pub const MAX_LED_BYTES: usize = MAX_LEDS * BYTES_PER_LED;

pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 1000;
pub const DEFAULT_FPS: u32 = 50;

pub const DEFAULT_RESET_TIME_US: u32 = 280;
/// Margin subtracted from pacing deadlines before the busy-wait.
pub const TIMING_DELAY_US: u64 = 20;
/// On-wire time per LED byte.
pub const TX_BYTE_US: u64 = 10;
/// Upper bound on wire time still pending once a frame is fully queued.
pub const TX_FIFO_MAX_US: u64 = 400;

const PHASE_IDLE: u8 = 0;
const PHASE_TRANSMITTING: u8 = 1;
const PHASE_STOPPED: u8 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus stopped")]
    Stopped,
}

struct ProfileSlot {
    loaded: bool,
    profile: LedProfile,
}

pub struct LedBus {
    name: String,
    fs: Arc<FileStore>,
    config: BusConfig,
    transmitter: Box<dyn Transmitter>,
    udp: LedBusUdp,
    profiles: [Mutex<ProfileSlot>; LedProfileId::ALL.len()],

    phase: AtomicU8,
    /// While transmitting: when the frame plus reset gap is over.
    deadline_us: AtomicU64,
    /// Earliest time the next frame may start (reset gap after finish).
    next_start_us: AtomicU64,
    /// Reset gap snapshot for the in-flight frame, readable from ISR
    /// context where the config lock is off limits.
    pending_reset_us: AtomicU64,
    last_update_us: AtomicU64,
}

impl LedBus {
    pub fn new(
        name: impl Into<String>,
        fs: Arc<FileStore>,
        transmitter: Box<dyn Transmitter>,
        packet_pool: Arc<MemoryPool>,
        default_length: usize,
    ) -> Arc<Self> {
        let name = name.into();
        let config = BusConfig::new(fs.clone(), &name, default_length);
        let udp = LedBusUdp::new(&name, packet_pool);

        Arc::new(Self {
            config,
            udp,
            transmitter,
            profiles: std::array::from_fn(|_| {
                Mutex::new(ProfileSlot {
                    loaded: false,
                    profile: LedProfile::new(),
                })
            }),
            phase: AtomicU8::new(PHASE_IDLE),
            deadline_us: AtomicU64::new(0),
            next_start_us: AtomicU64::new(0),
            pending_reset_us: AtomicU64::new(0),
            last_update_us: AtomicU64::new(0),
            fs,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn udp(&self) -> &LedBusUdp {
        &self.udp
    }

    /// Service the UDP listener with the current config.
    pub fn udp_poll(&self) {
        self.udp.poll(self.config.udp_port(), self.config.udp_queue_size());
    }

    pub fn length(&self) -> usize {
        self.config.length()
    }

    pub fn default_fps(&self) -> u32 {
        self.config.default_fps()
    }

    pub fn reset_time_us(&self) -> u32 {
        self.config.reset_time_us()
    }

    /// Wire order for a frame: the bus default xor the caller's flag.
    pub fn reverse_xor(&self, reverse: bool) -> bool {
        self.config.reverse() ^ reverse
    }

    /// Monotonic time the last frame was handed to the transmitter.
    pub fn last_update_us(&self) -> u64 {
        self.last_update_us.load(Ordering::Acquire)
    }

    fn profile_filename(&self, id: LedProfileId) -> String {
        format!("profiles/{}.{}.cbor", self.name, id.name())
    }

    /// Run `f` against a profile, lazily loading it from storage first.
    pub fn with_profile<R>(&self, id: LedProfileId, f: impl FnOnce(&mut LedProfile) -> R) -> R {
        let mut slot = self.profiles[id as usize].lock().expect("profile mutex poisoned");

        if !slot.loaded {
            slot.loaded = true;
            match self.fs.read(&self.profile_filename(id)) {
                Ok(Some(bytes)) => match LedProfile::decode(&bytes) {
                    Ok((profile, outcome)) => {
                        if outcome != Outcome::Ok {
                            debug!(target: "bus", bus = self.name.as_str(), profile = id.name(),
                                ?outcome, "profile file contained invalid entries");
                        }
                        slot.profile = profile;
                    }
                    Err(outcome) => {
                        debug!(target: "bus", bus = self.name.as_str(), profile = id.name(),
                            ?outcome, "profile file unreadable, using defaults");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    debug!(target: "bus", bus = self.name.as_str(), profile = id.name(),
                        error = %e, "profile read failed");
                }
            }
        }

        f(&mut slot.profile)
    }

    /// Persist a profile.
    pub fn save_profile(&self, id: LedProfileId) -> Outcome {
        let bytes = self.with_profile(id, |profile| profile.encode());
        let filename = self.profile_filename(id);

        info!(target: "bus", bus = self.name.as_str(), file = filename.as_str(), "writing profile");
        match self.fs.write(&filename, &bytes) {
            Ok(()) => Outcome::Ok,
            Err(_) => Outcome::IoError,
        }
    }

    /// Apply a profile to a packed RGB buffer.
    pub fn profile_transform(&self, id: LedProfileId, buf: &mut [u8]) {
        self.with_profile(id, |profile| profile.transform(buf));
    }

    /// Hand a frame to the transmitter, enforcing serialization and the
    /// inter-frame reset gap.
    ///
    /// Blocks while a previous frame is still on the wire (coarse sleep
    /// to just before its deadline, then a busy-wait) and then spins out
    /// the remainder of the reset gap.
    pub fn start_transmission(self: &Arc<Self>, frame: &[u8], reverse: bool) -> Result<(), BusError> {
        loop {
            match self.phase.load(Ordering::Acquire) {
                PHASE_STOPPED => return Err(BusError::Stopped),
                PHASE_TRANSMITTING => {
                    let deadline = self.deadline_us.load(Ordering::Acquire);
                    let now = clock::now_us();
                    if deadline > now + TIMING_DELAY_US {
                        thread::sleep(Duration::from_micros(deadline - now - TIMING_DELAY_US));
                    }
                    while self.phase.load(Ordering::Acquire) == PHASE_TRANSMITTING
                        && clock::now_us() < deadline
                    {
                        std::hint::spin_loop();
                    }
                    // Transmitter overran its deadline: back off until it
                    // signals completion.
                    while self.phase.load(Ordering::Acquire) == PHASE_TRANSMITTING {
                        thread::yield_now();
                    }
                }
                _ => {
                    let start_at = self.next_start_us.load(Ordering::Acquire);
                    while clock::now_us() < start_at {
                        std::hint::spin_loop();
                    }
                    if self
                        .phase
                        .compare_exchange(
                            PHASE_IDLE,
                            PHASE_TRANSMITTING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        break;
                    }
                }
            }
        }

        let now = clock::now_us();
        let reset = self.config.reset_time_us() as u64;
        let wire = (TX_BYTE_US * frame.len() as u64).min(TX_FIFO_MAX_US);
        self.pending_reset_us.store(reset, Ordering::Release);
        self.deadline_us.store(now + reset + wire + 1, Ordering::Release);
        self.last_update_us.store(now, Ordering::Release);

        trace!(target: "bus", bus = self.name.as_str(), bytes = frame.len(), reverse, "frame start");
        self.transmitter.start(frame, reverse, TxDone {
            bus: Arc::downgrade(self),
        });
        Ok(())
    }

    /// Completion callback from thread context.
    pub fn finish(&self) {
        self.complete();
    }

    /// Completion callback from interrupt-equivalent context. Atomics
    /// only; must never block.
    pub fn finish_isr(&self) {
        self.complete();
    }

    fn complete(&self) {
        let now = clock::now_us();
        let reset = self.pending_reset_us.load(Ordering::Acquire);
        self.next_start_us.store(now + reset, Ordering::Release);
        let _ = self.phase.compare_exchange(
            PHASE_TRANSMITTING,
            PHASE_IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Whether a frame is currently on the wire.
    pub fn transmitting(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_TRANSMITTING
    }

    /// Permanently stop the bus: no further frames are accepted and the
    /// UDP listener shuts down.
    pub fn stop(&self) {
        self.phase.store(PHASE_STOPPED, Ordering::Release);
        self.udp.stop();
        debug!(target: "bus", bus = self.name.as_str(), "stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_pool::PoolCaps;

    fn bus_fixture(default_length: usize) -> (tempfile::TempDir, Arc<LoopbackTransmitter>, Arc<LedBus>) {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FileStore::new(dir.path().join("data")).unwrap());
        let pool = MemoryPool::new(MAX_PACKET_LEN, PoolCaps::SPIRAM);
        pool.resize(4).unwrap();
        let tx = LoopbackTransmitter::new();
        let bus = LedBus::new("strip", fs, Box::new(tx.clone()), pool, default_length);
        (dir, tx, bus)
    }

    #[test]
    fn frames_reach_the_transmitter() {
        let (_dir, tx, bus) = bus_fixture(5);

        bus.start_transmission(&[1, 2, 3], false).unwrap();
        bus.start_transmission(&[4, 5, 6], true).unwrap();

        let frames = tx.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, [1, 2, 3]);
        assert!(!frames[0].reverse);
        assert_eq!(frames[1].data, [4, 5, 6]);
        assert!(frames[1].reverse);
    }

    #[test]
    fn consecutive_frames_respect_the_reset_gap() {
        let (_dir, tx, bus) = bus_fixture(5);
        bus.config().set_reset_time_us(50);

        bus.start_transmission(&[0u8; 15], false).unwrap();
        bus.start_transmission(&[0u8; 15], false).unwrap();

        let frames = tx.frames();
        assert_eq!(frames.len(), 2);
        assert!(
            frames[1].start_us - frames[0].start_us >= 50,
            "gap was {}us",
            frames[1].start_us - frames[0].start_us
        );
    }

    #[test]
    fn stopped_bus_rejects_frames() {
        let (_dir, tx, bus) = bus_fixture(5);
        bus.stop();
        assert_eq!(bus.start_transmission(&[1, 2, 3], false), Err(BusError::Stopped));
        assert_eq!(tx.frame_count(), 0);
    }

    #[test]
    fn last_update_advances_per_frame() {
        let (_dir, _tx, bus) = bus_fixture(5);
        assert_eq!(bus.last_update_us(), 0);

        bus.start_transmission(&[1, 2, 3], false).unwrap();
        let first = bus.last_update_us();
        assert!(first > 0);

        bus.start_transmission(&[1, 2, 3], false).unwrap();
        assert!(bus.last_update_us() > first);
    }

    #[test]
    fn reverse_xor_combines_with_bus_default() {
        let (_dir, _tx, bus) = bus_fixture(5);
        assert!(!bus.reverse_xor(false));
        assert!(bus.reverse_xor(true));

        bus.config().set_reverse(true);
        assert!(bus.reverse_xor(false));
        assert!(!bus.reverse_xor(true));
    }

    #[test]
    fn profiles_load_lazily_and_persist() {
        let (_dir, _tx, bus) = bus_fixture(5);

        bus.with_profile(LedProfileId::Custom1, |profile| {
            profile.set(100, [50, 60, 70]);
        });
        assert_eq!(bus.save_profile(LedProfileId::Custom1), Outcome::Ok);

        // A fresh bus over the same store sees the saved profile.
        let fs = Arc::new(FileStore::new(bus.fs.root()).unwrap());
        let pool = MemoryPool::new(MAX_PACKET_LEN, PoolCaps::SPIRAM);
        let tx = LoopbackTransmitter::new();
        let bus2 = LedBus::new("strip", fs, Box::new(tx), pool, 5);
        assert_eq!(
            bus2.with_profile(LedProfileId::Custom1, |p| p.get(100)),
            Some([50, 60, 70])
        );
        assert_eq!(bus2.with_profile(LedProfileId::Normal, |p| p.indexes()), vec![0]);
    }

    #[test]
    fn identity_profile_transform_is_a_no_op() {
        let (_dir, _tx, bus) = bus_fixture(5);
        let mut buf = [1, 2, 3, 0, 0, 0];
        bus.profile_transform(LedProfileId::Normal, &mut buf);
        assert_eq!(buf, [1, 2, 3, 0, 0, 0]);
    }
}
