//! Bundled scripts.
//!
//! A real deployment loads user scripts; these built-ins keep a bare
//! device doing something useful and double as living documentation of
//! the script API.

use std::collections::BTreeMap;

use core_color::HUE_RANGE;
use core_config::{ConfigValue, RegisterEntry};
use core_runtime::{
    OutputArgs, OutputValues, ScriptContext, ScriptRegistry, ScriptResult, ScriptValue,
};

pub fn register_builtin_scripts(registry: &ScriptRegistry) {
    registry.register("rainbow", || Box::new(rainbow));
    registry.register("solid", || Box::new(solid));
    registry.register("udp-pixels", || Box::new(udp_pixels));
}

/// A hue gradient across the chain, rotating at a configurable speed.
fn rainbow(ctx: &mut ScriptContext) -> ScriptResult {
    ctx.register_config(&[
        RegisterEntry::new("speed", "i", Some(ConfigValue::S32(8))),
        RegisterEntry::new("fps", "i", Some(ConfigValue::S32(50))),
    ])?;

    let mut values = BTreeMap::new();
    let mut speed: i64 = 8;
    let mut fps: i64 = 50;
    let mut offset: i64 = 0;

    loop {
        if ctx.config(&mut values)? {
            if let Some(ConfigValue::S32(v)) = values.get("speed") {
                speed = *v as i64;
            }
            if let Some(ConfigValue::S32(v)) = values.get("fps") {
                fps = (*v as i64).clamp(1, 1000);
            }
        }

        let length = ctx.length().max(1);
        let hues: Vec<u16> = (0..length)
            .map(|i| {
                let hue = offset + i as i64 * HUE_RANGE as i64 / length as i64;
                hue.rem_euclid(HUE_RANGE as i64) as u16
            })
            .collect();

        ctx.output_hsv(OutputValues::HuesU16(hues), OutputArgs::fps(fps))?;
        offset = (offset + speed).rem_euclid(HUE_RANGE as i64);
    }
}

/// Every LED in one configurable color.
fn solid(ctx: &mut ScriptContext) -> ScriptResult {
    ctx.register_config(&[RegisterEntry::new(
        "color",
        "C",
        Some(ConfigValue::Rgb(0x202020)),
    )])?;

    let mut values = BTreeMap::new();
    let mut color: i64 = 0x202020;

    loop {
        if ctx.config(&mut values)? {
            if let Some(ConfigValue::Rgb(v)) = values.get("color") {
                color = *v as i64;
            }
        }

        ctx.output_rgb(
            OutputValues::Sequence(vec![ScriptValue::Int(color)]),
            OutputArgs {
                repeat: Some(true),
                fps: Some(10),
                ..OutputArgs::default()
            },
        )?;
    }
}

/// Raw pixel frames over UDP: each datagram is a packed RGB byte
/// stream, truncated to whole pixels.
fn udp_pixels(ctx: &mut ScriptContext) -> ScriptResult {
    loop {
        let packets = ctx.udp_receive(true)?;
        ctx.checkpoint()?;

        let Some(packet) = packets.into_iter().last() else {
            continue;
        };

        let mut data = packet.data;
        data.truncate(data.len() - data.len() % 3);
        ctx.output_rgb(OutputValues::Bytes(data), OutputArgs::default())?;
    }
}
