use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use flipmark_experiment::sim::NullAudio;
use flipmark_experiment::{MemoryPort, RunConfig, TriggerScheduler};

fn scheduler() -> (TriggerScheduler, MemoryPort) {
    let config = RunConfig {
        num_frames: u64::MAX,
        trigger_every: 3,
        sound_every_secs: 0.1,
        ..RunConfig::default()
    };
    let sched = TriggerScheduler::new(config, Some(60.0)).expect("valid config");
    (sched, MemoryPort::new(8))
}

pub fn bench_frame_step(c: &mut Criterion) {
    let mut g = c.benchmark_group("frame_step");
    g.sample_size(60);

    g.bench_function("begin_and_flip_1000", |b| {
        b.iter_batched(
            scheduler,
            |(mut sched, mut port)| {
                let mut audio = NullAudio;
                for frame in 0..1000u64 {
                    let t = frame as f64 / 60.0;
                    let decision = sched
                        .begin_frame(t, frame % 17 < 3, &mut audio)
                        .expect("frame");
                    black_box(&decision);
                    let _ = sched.complete_flip(&mut port, t);
                }
                black_box(port.writes().len());
            },
            BatchSize::SmallInput,
        )
    });

    g.finish();
}

criterion_group!(benches, bench_frame_step);
criterion_main!(benches);
