//! Script task lifecycle.
//!
//! Lifecycle: Unstarted → Running → Stopping → Stopped. `start` needs
//! all three pool blocks to have been secured at construction; `stop` is
//! idempotent, injects the terminal exit at the script's next safepoint,
//! and reports whether the thread is fully joined (the scheduler loop
//! retries until it is). A panicking script is contained at the thread's
//! panic boundary; the task logs it and dies alone.
//!
//! Cross-thread pokes at a live task (interrupt characters for a
//! shell-attached script) must hold both the state-access mutex and the
//! atomic-section mutex, mirroring the discipline interrupt-adjacent
//! code uses on the target.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, trace};

use core_bus::LedBus;
use core_io::IoBuffer;
use core_pool::MemoryBlock;

use crate::context::ScriptContext;
use crate::{ConfigHost, Script, ScriptError, ScriptPools};

/// Shell-attached stdin/stdout ring sizes.
pub const STDIN_LEN: usize = 32;
pub const STDOUT_LEN: usize = 128;

pub(crate) struct TaskShared {
    pub name: String,
    pub bus: Arc<LedBus>,
    pub running: AtomicBool,
    pub stopping: AtomicBool,
    /// Held for long cross-thread sections (state install/restore).
    pub state_mutex: Mutex<()>,
    /// Held for short sections from interrupt-adjacent code.
    pub atomic_section: Mutex<()>,
    pub stdin: Option<Arc<IoBuffer>>,
    pub stdout: Option<Arc<IoBuffer>>,
}

/// Where a task's console I/O goes.
pub enum TaskIoMode {
    /// Stdout is line-buffered into the log; there is no stdin.
    Logging,
    /// Stdout and stdin are ring buffers shared with an attached shell.
    Shell {
        stdin: Arc<IoBuffer>,
        stdout: Arc<IoBuffer>,
    },
}

impl TaskIoMode {
    /// Build a shell mode plus the console-side handles.
    pub fn shell() -> (Self, Arc<IoBuffer>, Arc<IoBuffer>) {
        let stdin = Arc::new(IoBuffer::new(STDIN_LEN));
        let stdout = Arc::new(IoBuffer::new(STDOUT_LEN));
        (
            Self::Shell {
                stdin: stdin.clone(),
                stdout: stdout.clone(),
            },
            stdin,
            stdout,
        )
    }
}

struct PendingRun {
    script: Box<dyn Script>,
    host: Arc<dyn ConfigHost>,
    heap: MemoryBlock,
    stack: MemoryBlock,
    ledbuf: MemoryBlock,
}

pub struct ScriptTask {
    shared: Arc<TaskShared>,
    pending: Option<PendingRun>,
    thread: Option<JoinHandle<()>>,
    started: bool,
    stopped: bool,
}

impl ScriptTask {
    /// Bind a script to a bus, borrowing the interpreter arena blocks.
    /// If any pool is exhausted the task is constructed unstartable.
    pub fn new(
        script_name: &str,
        bus: Arc<LedBus>,
        host: Arc<dyn ConfigHost>,
        script: Box<dyn Script>,
        pools: &ScriptPools,
        io: TaskIoMode,
    ) -> Self {
        let name = format!("{script_name}/{}", bus.name());

        let (stdin, stdout) = match io {
            TaskIoMode::Logging => (None, None),
            TaskIoMode::Shell { stdin, stdout } => (Some(stdin), Some(stdout)),
        };

        let heap = pools.heaps.allocate();
        let stack = pools.stacks.allocate();
        let ledbuf = pools.ledbufs.allocate();

        let pending = match (heap, stack, ledbuf) {
            (Some(heap), Some(stack), Some(ledbuf)) => Some(PendingRun {
                script,
                host,
                heap,
                stack,
                ledbuf,
            }),
            _ => {
                debug!(target: "script", task = name.as_str(), "out of pool blocks");
                None
            }
        };

        Self {
            shared: Arc::new(TaskShared {
                name,
                bus,
                running: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                state_mutex: Mutex::new(()),
                atomic_section: Mutex::new(()),
                stdin,
                stdout,
            }),
            pending,
            thread: None,
            started: false,
            stopped: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether all three pool blocks were secured.
    pub fn memory_blocks_available(&self) -> bool {
        self.pending.is_some()
    }

    /// Spawn the script thread. Returns false when already started,
    /// already stopped, or constructed without pool blocks.
    pub fn start(&mut self) -> bool {
        if self.started || self.stopped {
            return false;
        }
        let Some(run) = self.pending.take() else {
            return false;
        };

        trace!(target: "script", task = self.name(), "starting thread");
        self.started = true;
        self.shared.running.store(true, Ordering::Release);

        let shared = self.shared.clone();
        self.thread = Some(thread::spawn(move || run_thread(shared, run)));
        true
    }

    /// Run `f` with exclusive access to the task's interpreter state:
    /// both the state-access and atomic-section mutexes held.
    fn with_state_access<R>(&self, f: impl FnOnce() -> R) -> R {
        let _state = self.shared.state_mutex.lock().expect("state mutex poisoned");
        let _atomic = self.shared.atomic_section.lock().expect("atomic section poisoned");
        f()
    }

    /// Inject a console byte into a shell-attached task's stdin.
    pub fn inject_input(&self, c: u8) -> bool {
        self.with_state_access(|| match &self.shared.stdin {
            Some(stdin) => {
                stdin.write_byte(c);
                true
            }
            None => false,
        })
    }

    /// Schedule the terminal exit: the script observes it at its next
    /// safepoint, and any blocking waits are interrupted.
    pub fn force_exit(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        self.with_state_access(|| {
            self.shared.stopping.store(true, Ordering::Release);
        });

        self.shared.bus.udp().interrupt();
        if let Some(stdin) = &self.shared.stdin {
            stdin.stop();
        }
        if let Some(stdout) = &self.shared.stdout {
            stdout.stop();
        }
    }

    /// Stop the task. Idempotent; returns whether the thread is fully
    /// joined. A thread still winding down reports false and the caller
    /// retries from its scheduler loop.
    pub fn stop(&mut self) -> bool {
        if !self.started {
            self.pending = None;
            self.stopped = true;
            return true;
        }

        self.shared.stopping.store(true, Ordering::Release);

        if self.running() {
            trace!(target: "script", task = self.name(), "stopping thread");
            self.force_exit();
        }

        if let Some(handle) = &self.thread {
            if handle.is_finished() {
                let handle = self.thread.take().expect("checked above");
                if handle.join().is_err() {
                    // Panic payload already logged at the boundary.
                    debug!(target: "script", task = self.name(), "joined aborted thread");
                }
                trace!(target: "script", task = self.name(), "thread stopped");
            } else if !self.stopped {
                trace!(target: "script", task = self.name(), "waiting for thread to stop");
            }
        }

        self.stopped = true;
        self.thread.is_none()
    }
}

impl Drop for ScriptTask {
    fn drop(&mut self) {
        if self.started && self.thread.is_some() {
            error!(target: "script", task = self.name(), "still running in destructor");
            while !self.stop() {
                thread::yield_now();
            }
        }
    }
}

fn run_thread(shared: Arc<TaskShared>, run: PendingRun) {
    trace!(target: "script", task = shared.name.as_str(), "script initialising");

    let task_name = shared.name.clone();
    let mut ctx = ScriptContext::new(shared.clone(), run.host, run.heap, run.stack, run.ledbuf);
    let mut script = run.script;

    trace!(target: "script", task = task_name.as_str(), "script running");
    let result = catch_unwind(AssertUnwindSafe(|| script.run(&mut ctx)));

    match result {
        Ok(Ok(())) => {
            trace!(target: "script", task = task_name.as_str(), "script finished");
        }
        Ok(Err(ScriptError::Exit)) => {
            debug!(target: "script", task = task_name.as_str(), "script exited");
        }
        Ok(Err(e)) => {
            info!(target: "script", task = task_name.as_str(), error = %e, "script fault");
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!(target: "script", task = task_name.as_str(), message, "script aborted");
        }
    }

    ctx.flush_output();
    drop(ctx); // releases the pool blocks before the running flag clears
    shared.bus.udp().stop();
    shared.running.store(false, Ordering::Release);
    trace!(target: "script", task = task_name.as_str(), "script thread finished");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScriptPools, ScriptResult};
    use core_bus::{LoopbackTransmitter, MAX_LED_BYTES, MAX_PACKET_LEN};
    use core_config::{ConfigValue, RegisterEntry};
    use core_fs::FileStore;
    use core_pool::{MemoryPool, PoolCaps};
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct NullHost;

    impl ConfigHost for NullHost {
        fn register_config(&self, _decls: &[RegisterEntry]) -> Result<(), core_config::ConfigError> {
            Ok(())
        }

        fn populate_config(&self, _out: &mut BTreeMap<String, ConfigValue>) -> bool {
            false
        }

        fn reverse(&self) -> bool {
            false
        }

        fn script_imported(&self, _name: &str) {}
    }

    fn fixture() -> (tempfile::TempDir, Arc<LedBus>, ScriptPools) {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FileStore::new(dir.path().join("data")).unwrap());
        let packet_pool = MemoryPool::new(MAX_PACKET_LEN, PoolCaps::SPIRAM);
        packet_pool.resize(4).unwrap();
        let tx = LoopbackTransmitter::new();
        let bus = LedBus::new("strip", fs, Box::new(tx), packet_pool, 5);

        let pools = ScriptPools::new(MAX_LED_BYTES);
        pools.resize(1).unwrap();
        (dir, bus, pools)
    }

    fn wait_stopped(task: &ScriptTask) {
        for _ in 0..500 {
            if !task.running() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("task did not stop");
    }

    fn make_task(
        bus: &Arc<LedBus>,
        pools: &ScriptPools,
        script: impl FnMut(&mut ScriptContext) -> ScriptResult + Send + 'static,
    ) -> ScriptTask {
        ScriptTask::new(
            "test",
            bus.clone(),
            Arc::new(NullHost),
            Box::new(script),
            pools,
            TaskIoMode::Logging,
        )
    }

    #[test]
    fn start_runs_the_script_to_completion() {
        let (_dir, bus, pools) = fixture();
        let (tx, rx) = std::sync::mpsc::channel();

        let mut task = make_task(&bus, &pools, move |_ctx| {
            tx.send(()).unwrap();
            Ok(())
        });

        assert!(task.memory_blocks_available());
        assert!(task.start());
        assert!(!task.start(), "double start is refused");
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        wait_stopped(&task);
        while !task.stop() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(task.stop(), "stop is idempotent");
    }

    #[test]
    fn unstarted_task_stops_immediately() {
        let (_dir, bus, pools) = fixture();
        let mut task = make_task(&bus, &pools, |_ctx| Ok(()));
        assert!(task.stop());
        assert!(!task.start(), "stopped task cannot start");
    }

    #[test]
    fn pool_exhaustion_makes_the_task_unstartable() {
        let (_dir, bus, pools) = fixture();
        let _first = make_task(&bus, &pools, |_ctx| Ok(()));
        let mut second = make_task(&bus, &pools, |_ctx| Ok(()));
        assert!(!second.memory_blocks_available());
        assert!(!second.start());
    }

    #[test]
    fn blocks_return_to_the_pools_after_the_run() {
        let (_dir, bus, pools) = fixture();
        let mut task = make_task(&bus, &pools, |_ctx| Ok(()));
        assert_eq!(pools.heaps.available(), 0);

        assert!(task.start());
        wait_stopped(&task);
        while !task.stop() {
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(pools.heaps.available(), 1);
        assert_eq!(pools.stacks.available(), 1);
        assert_eq!(pools.ledbufs.available(), 1);
    }

    #[test]
    fn stop_interrupts_a_looping_script() {
        let (_dir, bus, pools) = fixture();
        let mut task = make_task(&bus, &pools, |ctx| {
            loop {
                ctx.checkpoint()?;
                thread::sleep(Duration::from_millis(1));
            }
        });

        assert!(task.start());
        thread::sleep(Duration::from_millis(20));
        assert!(task.running());

        while !task.stop() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!task.running());
    }

    #[test]
    fn panicking_script_is_contained() {
        let (_dir, bus, pools) = fixture();
        let mut task = make_task(&bus, &pools, |_ctx| panic!("scripted disaster"));

        assert!(task.start());
        wait_stopped(&task);
        while !task.stop() {
            thread::sleep(Duration::from_millis(1));
        }

        // Blocks were still reclaimed through the panic path.
        assert_eq!(pools.heaps.available(), 1);
    }

    #[test]
    fn shell_io_reaches_the_script() {
        let (_dir, bus, pools) = fixture();
        let (io, stdin, stdout) = TaskIoMode::shell();

        let mut task = ScriptTask::new(
            "shell",
            bus.clone(),
            Arc::new(NullHost),
            Box::new(|ctx: &mut ScriptContext| {
                let c = ctx.read_input(true).ok_or(ScriptError::Exit)?;
                ctx.print(&format!("got {c}"));
                Ok(())
            }),
            &pools,
            io,
        );

        assert!(task.start());
        assert!(task.inject_input(b'7'));

        let mut line = Vec::new();
        while line.len() < 6 {
            match stdout.read(true) {
                Some(c) => line.push(c),
                None => break,
            }
        }
        assert_eq!(line, b"got 55");

        wait_stopped(&task);
        while !task.stop() {
            thread::sleep(Duration::from_millis(1));
        }
        let _ = stdin;
    }
}
