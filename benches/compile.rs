use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dispatch_runner::vulkan_core::shader::{compile_compute, DISPATCH_SHADER, ENTRY_POINT};
use dispatch_runner::vulkan_core::RootSignatureDesc;

pub fn shader(c: &mut Criterion) {
    c.bench_function("compile dispatch shader", |b| {
        b.iter(|| compile_compute(black_box(DISPATCH_SHADER), ENTRY_POINT).unwrap())
    });
}

pub fn root_signature(c: &mut Criterion) {
    let desc = RootSignatureDesc::single_uav();
    c.bench_function("root signature bindings", |b| {
        b.iter(|| black_box(&desc).bindings().unwrap())
    });
}

criterion_group!(benches, shader, root_signature);
criterion_main!(benches);
