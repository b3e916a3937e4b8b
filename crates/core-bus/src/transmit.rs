//! The transmitter contract.
//!
//! A transmitter owns the hardware side of one bus: it expands the RGB
//! byte stream into line symbols in its own DMA-safe buffer and clocks
//! them out. The core only calls [`Transmitter::start`] and expects the
//! completion handle to be signalled exactly once when the frame has left
//! the wire. Completion may come from an interrupt-equivalent context;
//! [`TxDone::finish_isr`] takes no locks.

use std::sync::{Arc, Mutex, Weak};

use crate::{LedBus, clock};

pub trait Transmitter: Send + Sync {
    /// Begin transmitting `frame` (packed RGB bytes). `reverse` asks for
    /// the pixels in reverse wire order. `done` must be signalled when
    /// the frame (and nothing else) has been sent.
    fn start(&self, frame: &[u8], reverse: bool, done: TxDone);
}

/// Completion handle for one frame.
pub struct TxDone {
    pub(crate) bus: Weak<LedBus>,
}

impl TxDone {
    /// Signal completion from thread context.
    pub fn finish(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.finish();
        }
    }

    /// Signal completion from an interrupt-equivalent context. Touches
    /// only atomics.
    pub fn finish_isr(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.finish_isr();
        }
    }
}

/// Transmitter with no backing hardware: frames are counted and
/// completed immediately. Stands in where a UART/SPI back-end would be
/// registered on the target.
#[derive(Default)]
pub struct NullTransmitter {
    frames: std::sync::atomic::AtomicU64,
}

impl NullTransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Transmitter for NullTransmitter {
    fn start(&self, _frame: &[u8], _reverse: bool, done: TxDone) {
        self.frames.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        done.finish_isr();
    }
}

/// A frame captured by the loopback transmitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub start_us: u64,
    pub data: Vec<u8>,
    pub reverse: bool,
}

/// Transmitter that records every frame and completes immediately.
///
/// The bus still enforces the inter-frame reset gap via its deadline, so
/// pacing behaviour is observable even with a zero-latency wire.
#[derive(Default)]
pub struct LoopbackTransmitter {
    frames: Mutex<Vec<CapturedFrame>>,
}

impl LoopbackTransmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<CapturedFrame> {
        self.frames.lock().expect("loopback mutex poisoned").clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().expect("loopback mutex poisoned").len()
    }

    pub fn last_frame(&self) -> Option<CapturedFrame> {
        self.frames.lock().expect("loopback mutex poisoned").last().cloned()
    }
}

impl Transmitter for Arc<LoopbackTransmitter> {
    fn start(&self, frame: &[u8], reverse: bool, done: TxDone) {
        self.frames.lock().expect("loopback mutex poisoned").push(CapturedFrame {
            start_us: clock::now_us(),
            data: frame.to_vec(),
            reverse,
        });
        done.finish_isr();
    }
}
