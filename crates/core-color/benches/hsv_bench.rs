use core_color::{HUE_RANGE, MAX_SATURATION, MAX_VALUE, exp_hsv_to_rgb, hsv_to_rgb, rgb_to_hsv};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_hsv_to_rgb(c: &mut Criterion) {
    c.bench_function("hsv_to_rgb_sweep", |b| {
        b.iter(|| {
            let mut acc = 0u32;
            for hue in (0..HUE_RANGE).step_by(3) {
                let rgb = hsv_to_rgb(black_box(hue), MAX_SATURATION, MAX_VALUE);
                acc = acc.wrapping_add(rgb[0] as u32);
            }
            acc
        })
    });

    c.bench_function("exp_hsv_to_rgb_sweep", |b| {
        b.iter(|| {
            let mut acc = 0u32;
            for hue in (0..HUE_RANGE).step_by(3) {
                let rgb = exp_hsv_to_rgb(black_box(hue), MAX_SATURATION, MAX_VALUE);
                acc = acc.wrapping_add(rgb[1] as u32);
            }
            acc
        })
    });

    c.bench_function("rgb_to_hsv_sweep", |b| {
        b.iter(|| {
            let mut acc = 0i32;
            for r in (0..=255u16).step_by(5) {
                let hsv = rgb_to_hsv(black_box(r as u8), 128, 7);
                acc = acc.wrapping_add(hsv[0]);
            }
            acc
        })
    });
}

criterion_group!(benches, bench_hsv_to_rgb);
criterion_main!(benches);
