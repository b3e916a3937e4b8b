//! Per-bus UDP packet ingress.
//!
//! Each bus may listen on a configured port; received datagrams are
//! queued (bounded, oldest evicted first) in buffers borrowed from a
//! shared packet pool and handed to the script with their receive
//! timestamp and source address. The listener only runs while a script
//! is attached (`start`/`stop`), and rebinds whenever the configured
//! port changes.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, error, trace};

use core_pool::{MemoryBlock, MemoryPool};

use crate::clock;

pub const MAX_PACKET_LEN: usize = 1472;
pub const DEFAULT_QUEUE_SIZE: usize = 3;
pub const MIN_QUEUE_SIZE: usize = 1;
pub const MAX_QUEUE_SIZE: usize = 50;

/// A received datagram, as handed to the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpPacket {
    pub receive_ticks64_us: u64,
    pub source_address: SocketAddr,
    pub data: Vec<u8>,
}

struct Queued {
    receive_time_us: u64,
    source: SocketAddr,
    len: usize,
    block: MemoryBlock,
}

struct UdpState {
    running: bool,
    port: u16,
    socket: Option<UdpSocket>,
    next_block: Option<MemoryBlock>,
    queue: VecDeque<Queued>,
}

pub struct LedBusUdp {
    bus_name: String,
    pool: Arc<MemoryPool>,
    inner: Mutex<UdpState>,
    cv: Condvar,
}

impl LedBusUdp {
    pub fn new(bus_name: impl Into<String>, pool: Arc<MemoryPool>) -> Self {
        Self {
            bus_name: bus_name.into(),
            pool,
            inner: Mutex::new(UdpState {
                running: false,
                port: 0,
                socket: None,
                next_block: None,
                queue: VecDeque::new(),
            }),
            cv: Condvar::new(),
        }
    }

    /// Mark the bus's script as attached; the next poll may bind.
    pub fn start(&self) {
        let mut state = self.inner.lock().expect("udp mutex poisoned");
        state.running = true;
    }

    /// Detach: close the socket, drop queued packets, wake waiters.
    pub fn stop(&self) {
        let mut state = self.inner.lock().expect("udp mutex poisoned");
        state.running = false;
        state.socket = None;
        state.port = 0;
        state.queue.clear();
        self.cv.notify_all();
    }

    /// Wake a blocked [`LedBusUdp::receive`] without delivering anything.
    pub fn interrupt(&self) {
        let _state = self.inner.lock().expect("udp mutex poisoned");
        self.cv.notify_all();
    }

    /// Service the listener: rebind if the configured port changed, then
    /// drain the socket into the queue, evicting the oldest entries when
    /// the queue is over `queue_size`.
    pub fn poll(&self, port: u16, queue_size: usize) {
        let mut state = self.inner.lock().expect("udp mutex poisoned");
        let port = if state.running { port } else { 0 };
        self.listen(&mut state, port);
        self.receive_pending(&mut state, queue_size);
    }

    fn listen(&self, state: &mut UdpState, port: u16) {
        if state.port == port {
            return;
        }

        if state.socket.take().is_some() {
            trace!(target: "bus.udp", bus = self.bus_name.as_str(), port = state.port, "stopped listening");
        }

        if port != 0 {
            match Self::bind(port) {
                Ok(socket) => {
                    trace!(target: "bus.udp", bus = self.bus_name.as_str(), port, "listening");
                    state.socket = Some(socket);
                }
                Err(e) => {
                    debug!(target: "bus.udp", bus = self.bus_name.as_str(), port, error = %e, "bind failed");
                }
            }
        }

        state.port = port;
    }

    fn bind(port: u16) -> io::Result<UdpSocket> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    fn receive_pending(&self, state: &mut UdpState, queue_size: usize) {
        loop {
            if state.socket.is_none() {
                return;
            }

            if state.next_block.is_none() {
                state.next_block = self.pool.allocate();
                if state.next_block.is_none() {
                    error!(target: "bus.udp", bus = self.bus_name.as_str(), "out of packet buffers, closing socket");
                    state.socket = None;
                    state.port = 0;
                    return;
                }
            }

            let block = state.next_block.as_mut().expect("just filled");
            let received = {
                let socket = state.socket.as_ref().expect("checked above");
                socket.recv_from(block.as_mut_slice())
            };

            match received {
                Ok((len, source)) => {
                    let block = state.next_block.take().expect("just filled");
                    while state.queue.len() >= queue_size {
                        state.queue.pop_front();
                    }
                    state.queue.push_back(Queued {
                        receive_time_us: clock::now_us(),
                        source,
                        len,
                        block,
                    });
                    self.cv.notify_all();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    debug!(target: "bus.udp", bus = self.bus_name.as_str(), error = %e, "recv failed");
                    return;
                }
            }
        }
    }

    /// Drain queued packets into `sink`. With `wait`, blocks once until a
    /// packet arrives or the listener is stopped or interrupted.
    pub fn receive(&self, wait: bool, sink: &mut Vec<UdpPacket>) {
        let mut state = self.inner.lock().expect("udp mutex poisoned");

        if !state.running {
            return;
        }

        if wait && state.queue.is_empty() {
            state = self.cv.wait(state).expect("udp mutex poisoned");
        }

        while let Some(packet) = state.queue.pop_front() {
            sink.push(UdpPacket {
                receive_ticks64_us: packet.receive_time_us,
                source_address: packet.source,
                data: packet.block.as_slice()[..packet.len].to_vec(),
            });
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().expect("udp mutex poisoned").queue.len()
    }
}
