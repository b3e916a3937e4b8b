//! End-to-end pipeline scenarios on a five-LED bus with the identity
//! profile, observed through a loopback transmitter.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use core_bus::{CapturedFrame, LedBus, LoopbackTransmitter, MAX_LED_BYTES, MAX_PACKET_LEN};
use core_color::{HUE_RANGE, MAX_SATURATION, MAX_VALUE};
use core_config::{ConfigError, ConfigValue, RegisterEntry, ScriptConfig};
use core_fs::FileStore;
use core_pool::{MemoryPool, PoolCaps};
use core_runtime::{
    ConfigHost, OutputArgs, OutputValues, ScriptContext, ScriptPools, ScriptResult, ScriptTask,
    ScriptValue, TaskIoMode,
};

#[derive(Default)]
struct TestHost {
    config: Mutex<(ScriptConfig, bool)>,
}

impl ConfigHost for TestHost {
    fn register_config(&self, decls: &[RegisterEntry]) -> Result<(), ConfigError> {
        let mut guard = self.config.lock().unwrap();
        guard.0.register_properties(decls)?;
        guard.1 = true;
        Ok(())
    }

    fn populate_config(&self, out: &mut BTreeMap<String, ConfigValue>) -> bool {
        let mut guard = self.config.lock().unwrap();
        if guard.1 {
            guard.0.populate_dict(out);
            guard.1 = false;
            true
        } else {
            false
        }
    }

    fn reverse(&self) -> bool {
        false
    }

    fn script_imported(&self, _name: &str) {}
}

struct Harness {
    _dir: tempfile::TempDir,
    tx: Arc<LoopbackTransmitter>,
    bus: Arc<LedBus>,
    pools: ScriptPools,
    host: Arc<TestHost>,
}

impl Harness {
    fn new(bus_length: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FileStore::new(dir.path().join("data")).unwrap());
        let packet_pool = MemoryPool::new(MAX_PACKET_LEN, PoolCaps::SPIRAM);
        packet_pool.resize(4).unwrap();
        let tx = LoopbackTransmitter::new();
        let bus = LedBus::new("strip", fs, Box::new(tx.clone()), packet_pool, bus_length);

        let pools = ScriptPools::new(MAX_LED_BYTES);
        pools.resize(1).unwrap();

        Self {
            _dir: dir,
            tx,
            bus,
            pools,
            host: Arc::new(TestHost::default()),
        }
    }

    fn run(&self, script: impl FnMut(&mut ScriptContext) -> ScriptResult + Send + 'static) {
        let mut task = ScriptTask::new(
            "pipeline",
            self.bus.clone(),
            self.host.clone(),
            Box::new(script),
            &self.pools,
            TaskIoMode::Logging,
        );

        assert!(task.start(), "task must start");
        for _ in 0..2000 {
            if !task.running() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!task.running(), "script did not finish");
        while !task.stop() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn frames(&self) -> Vec<CapturedFrame> {
        self.tx.frames()
    }

    /// The chain's state after a frame: transmitted bytes over a dark
    /// (zeroed) remainder of the chain.
    fn chain_view(&self, frame: &CapturedFrame) -> Vec<u8> {
        let mut view = frame.data.clone();
        view.resize(self.bus.length() * 3, 0);
        view
    }
}

fn rgb_seq(pixels: &[(i64, i64, i64)]) -> OutputValues {
    OutputValues::Sequence(pixels.iter().map(|&p| p.into()).collect())
}

#[test]
fn seed_1_plain_rgb() {
    let h = Harness::new(5);
    h.run(|ctx| ctx.output_rgb(rgb_seq(&[(1, 2, 3), (4, 5, 6), (7, 8, 9)]), OutputArgs::default()));

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(
        h.chain_view(&frames[0]),
        [1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn seed_2_repeat_tiles() {
    let h = Harness::new(5);
    h.run(|ctx| {
        ctx.output_rgb(rgb_seq(&[(1, 2, 3)]), OutputArgs {
            repeat: Some(true),
            ..OutputArgs::default()
        })
    });

    let frames = h.frames();
    assert_eq!(frames[0].data, [1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3]);
}

#[test]
fn seed_3_rotate() {
    let h = Harness::new(5);
    h.run(|ctx| {
        ctx.output_rgb(rgb_seq(&[(1, 2, 3), (4, 5, 6), (7, 8, 9)]), OutputArgs {
            rotate: 1,
            ..OutputArgs::default()
        })
    });

    let frames = h.frames();
    assert_eq!(
        h.chain_view(&frames[0]),
        [4, 5, 6, 7, 8, 9, 1, 2, 3, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn seed_4_hsv_hue_zero_is_red() {
    let h = Harness::new(5);
    h.run(|ctx| {
        ctx.output_hsv(
            OutputValues::Sequence(vec![ScriptValue::Int(0)]),
            OutputArgs::fps(5),
        )
    });

    let frames = h.frames();
    assert_eq!(
        h.chain_view(&frames[0]),
        [0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn seed_5_expanded_hue_lands_in_the_red_orange_band() {
    let h = Harness::new(5);
    h.run(|ctx| {
        ctx.output_exp_hsv(
            OutputValues::Sequence(vec![ScriptValue::Tuple(vec![
                ScriptValue::Int(HUE_RANGE as i64 / 8),
                ScriptValue::Int(MAX_SATURATION as i64),
                ScriptValue::Int(MAX_VALUE as i64),
            ])]),
            OutputArgs::default(),
        )
    });

    let frames = h.frames();
    assert_eq!(
        h.chain_view(&frames[0]),
        [0xff, 0x60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn seed_6_frames_respect_the_reset_gap() {
    let h = Harness::new(5);
    h.bus.config().set_reset_time_us(50);

    h.run(|ctx| {
        let values = rgb_seq(&[(10, 20, 30), (40, 50, 60), (70, 80, 90), (1, 2, 3), (4, 5, 6)]);
        ctx.output_rgb(values, OutputArgs::fps(1000))?;
        ctx.output_rgb(rgb_seq(&[(9, 9, 9)]), OutputArgs::fps(1000))
    });

    let frames = h.frames();
    assert_eq!(frames.len(), 2);
    let gap = frames[1].start_us - frames[0].start_us;
    assert!(gap >= 50, "inter-frame gap was only {gap}us");
}

#[test]
fn byte_values_pass_through_bit_exact() {
    let h = Harness::new(5);
    h.run(|ctx| ctx.output_rgb(OutputValues::Bytes((1..=9).collect()), OutputArgs::default()));

    let frames = h.frames();
    assert_eq!(
        h.chain_view(&frames[0]),
        [1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn reverse_equals_reversed_input() {
    let h = Harness::new(5);
    h.run(|ctx| {
        ctx.output_rgb(rgb_seq(&[(1, 2, 3), (4, 5, 6), (7, 8, 9)]), OutputArgs {
            reverse: Some(true),
            ..OutputArgs::default()
        })?;
        ctx.output_rgb(rgb_seq(&[(7, 8, 9), (4, 5, 6), (1, 2, 3)]), OutputArgs::default())
    });

    let frames = h.frames();
    assert_eq!(frames[0].data, frames[1].data);
}

#[test]
fn generator_reverse_fills_the_tail_and_zeroes_the_head() {
    let h = Harness::new(5);
    h.run(|ctx| {
        let items: Vec<ScriptValue> = vec![(1i64, 2, 3).into(), (4i64, 5, 6).into()];
        ctx.output_rgb(
            OutputValues::Iterator(Box::new(items.into_iter())),
            OutputArgs {
                reverse: Some(true),
                ..OutputArgs::default()
            },
        )
    });

    let frames = h.frames();
    assert_eq!(frames[0].data, [0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 5, 6, 1, 2, 3]);
}

#[test]
fn hue_array_is_rejected_for_rgb_and_accepted_for_hsv() {
    let h = Harness::new(5);
    let (error_tx, error_rx) = std::sync::mpsc::channel();

    h.run(move |ctx| {
        let err = ctx
            .output_rgb(OutputValues::HuesU16(vec![0]), OutputArgs::default())
            .unwrap_err();
        error_tx.send(err).unwrap();
        ctx.output_hsv(OutputValues::HuesU16(vec![0, 256]), OutputArgs::default())
    });

    let err = error_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(err, core_runtime::ScriptError::Type(_)));

    let frames = h.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].data[..6], &[255, 0, 0, 255, 255, 0]);
}

#[test]
fn wait_argument_conflicts_are_value_errors() {
    let h = Harness::new(5);
    let (error_tx, error_rx) = std::sync::mpsc::channel();

    h.run(move |ctx| {
        let err = ctx
            .output_rgb(rgb_seq(&[(1, 2, 3)]), OutputArgs {
                fps: Some(10),
                wait_ms: Some(10),
                ..OutputArgs::default()
            })
            .unwrap_err();
        error_tx.send(err).unwrap();
        Ok(())
    });

    let err = error_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(err, core_runtime::ScriptError::Value(_)));
    assert!(h.frames().is_empty());
}

#[test]
fn output_defaults_apply_to_later_calls() {
    let h = Harness::new(5);
    h.run(|ctx| {
        ctx.output_defaults(OutputArgs {
            repeat: Some(true),
            ..OutputArgs::default()
        })?;
        ctx.output_rgb(rgb_seq(&[(1, 2, 3)]), OutputArgs::default())
    });

    let frames = h.frames();
    assert_eq!(frames[0].data, [1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3]);
}

#[test]
fn config_round_trip_reports_changes_once() {
    let h = Harness::new(5);
    let (result_tx, result_rx) = std::sync::mpsc::channel();

    h.run(move |ctx| {
        ctx.register_config(&[RegisterEntry::new(
            "speed",
            "i",
            Some(ConfigValue::S32(40)),
        )])?;

        let mut values = BTreeMap::new();
        let first = ctx.config(&mut values)?;
        let speed = values.get("speed").cloned();
        let second = ctx.config(&mut BTreeMap::new())?;

        result_tx.send((first, speed, second)).unwrap();
        Ok(())
    });

    let (first, speed, second) = result_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(first, "first populate reports a change");
    assert_eq!(speed, Some(ConfigValue::S32(40)));
    assert!(!second, "unchanged config reports no change");
}

#[test]
fn packed_int_arrays_are_rgb_only() {
    let h = Harness::new(5);
    h.run(|ctx| {
        ctx.output_rgb(
            OutputValues::PackedU32(vec![0x010203, 0x0a0b0c]),
            OutputArgs::default(),
        )
    });

    let frames = h.frames();
    assert_eq!(&frames[0].data, &[1, 2, 3, 0x0a, 0x0b, 0x0c]);
}
