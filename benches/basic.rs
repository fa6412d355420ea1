use std::rc::Rc;

use bumpalo::Bump;
use criterion::{Criterion, criterion_group, criterion_main};
use tether::Strong;

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("clone_drop/tether", |b| {
        let p = Strong::new(0u32);

        b.iter(|| p.clone());
    });

    c.bench_function("clone_drop/std_rc", |b| {
        let p = Rc::new(0u32);

        b.iter(|| p.clone());
    });

    c.bench_function("deref/tether", |b| {
        let p = Strong::new(0u32);

        b.iter(|| *p);
    });

    c.bench_function("upgrade/tether", |b| {
        let p = Strong::new(0u32);
        let w = p.downgrade();

        b.iter(|| w.upgrade().unwrap());
    });

    c.bench_function("construct/global", |b| {
        b.iter(|| Strong::new(0u64));
    });

    c.bench_function("construct/bump", |b| {
        let arena = Rc::new(Bump::new());

        b.iter(|| Strong::try_new_in(0u64, arena.clone()).unwrap());
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
