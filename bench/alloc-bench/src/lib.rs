mod direct;
mod global;

use std::time::Duration;

use bytesize::ByteSize;
use criterion::{Criterion, criterion_group, criterion_main};

const BUFSIZES: &[usize] = &[16, 64, 256, 1024, 4096, 16 << 10];

/// Calls per trace.
const OPS: usize = 2000;
/// Blocks a trace keeps alive at most.
const SLOTS: usize = 64;
/// Enough for `SLOTS` blocks of twice the largest size, plus fragmentation.
const ARENA: usize = 64 << 20;

type BenchFn = fn(&[Op], usize) -> Duration;

#[derive(Debug, Clone, Copy)]
enum Op {
    Alloc { slot: usize, size: usize },
    Free { slot: usize },
    Realloc { slot: usize, size: usize },
}

/// A seeded call sequence around `bufsize` that ends with every slot free,
/// so one allocator can replay it any number of times.
fn trace(bufsize: usize, seed: u64) -> Vec<Op> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut live = [false; SLOTS];
    let mut ops = Vec::with_capacity(OPS + SLOTS);
    let mut size = || rng.usize(bufsize / 2 + 1..=bufsize * 2);

    let mut pick = fastrand::Rng::with_seed(seed ^ 0x9e37_79b9);
    for _ in 0..OPS {
        let slot = pick.usize(..SLOTS);
        let op = if !live[slot] {
            live[slot] = true;
            Op::Alloc { slot, size: size() }
        } else if pick.bool() {
            live[slot] = false;
            Op::Free { slot }
        } else {
            Op::Realloc { slot, size: size() }
        };
        ops.push(op);
    }
    for (slot, live) in live.iter().enumerate() {
        if *live {
            ops.push(Op::Free { slot });
        }
    }
    ops
}

fn groups(c: &mut Criterion) {
    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::{EnvFilter, fmt};
        let _ = fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
    }

    let benches: [(&str, BenchFn); 3] = [
        ("system", global::system),
        ("locked", global::locked),
        ("heap", direct::bench),
    ];

    let mut g = c.benchmark_group("alloc_benchmark");

    for (i, bufsize) in BUFSIZES.iter().copied().enumerate() {
        let bsize = ByteSize::b(bufsize as u64).display().iec_short();
        let ops = trace(bufsize, i as u64);

        for (name, f) in benches {
            let id = format!("alloc_benchmark_{i:02}_{bsize:.0}_{name}");
            g.bench_function(&id, |b| b.iter_custom(|iters| f(&ops, iters as usize)));
        }
    }
}

criterion_group!(
    name = alloc_benchmark;
    config = Criterion::default().sample_size(50).measurement_time(Duration::from_secs(10));
    targets = groups
);

criterion_main!(alloc_benchmark);
