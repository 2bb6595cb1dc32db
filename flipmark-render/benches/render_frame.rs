use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use flipmark_render::{Corner, SceneConfig, SkiaRenderer};
use flipmark_timing::HighPrecisionTimer;

fn harness() -> (SkiaRenderer, Vec<u8>, HighPrecisionTimer) {
    let width = 1280u32;
    let height = 720u32;
    let scene = SceneConfig {
        marker_corner: Corner::BottomRight,
        ..SceneConfig::default()
    };
    let r = SkiaRenderer::new(width, height, scene).expect("renderer");
    let fb = vec![0u8; (width * height * 4) as usize];
    (r, fb, HighPrecisionTimer::new())
}

pub fn bench_render_frame(c: &mut Criterion) {
    let mut g = c.benchmark_group("render_frame");
    g.sample_size(40);

    g.bench_function("square_only", |b| {
        b.iter_batched(
            harness,
            |(mut r, mut fb, mut t)| {
                for _ in 0..10 {
                    black_box(r.render_frame(false, &mut fb, &mut t).ok());
                }
            },
            BatchSize::SmallInput,
        )
    });

    g.bench_function("square_with_marker", |b| {
        b.iter_batched(
            harness,
            |(mut r, mut fb, mut t)| {
                for i in 0..10 {
                    black_box(r.render_frame(i % 2 == 0, &mut fb, &mut t).ok());
                }
            },
            BatchSize::SmallInput,
        )
    });

    g.finish();
}

criterion_group!(benches, bench_render_frame);
criterion_main!(benches);
