use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_bind::{Reference, Result, Stack, TypeRegister, UserType};
use tether_engine::Vm;

#[derive(Clone)]
struct Vec2 {
    x: f64,
    y: f64,
}

impl UserType for Vec2 {
    fn register(reg: &mut TypeRegister<'_, Self>) -> Result<()> {
        reg.register_property_rw("x", |v: &Vec2| v.x, |v: &mut Vec2, x: f64| v.x = x)?
            .register_method("dot", |v: &Vec2, x: f64, y: f64| v.x * x + v.y * y)?;
        Ok(())
    }
}

fn bench_free_function(c: &mut Criterion) {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    stack.push_function(|a: i64, b: i64| a + b).unwrap();
    stack.set_global("add").unwrap();

    c.bench_function("call_free_function", |b| {
        b.iter(|| {
            stack.get_global("add").unwrap();
            stack.push(black_box(2)).unwrap();
            stack.push(black_box(3)).unwrap();
            stack.call(2, 1).unwrap();
            stack.pop(1);
        });
    });
}

fn bench_methods(c: &mut Criterion) {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    stack.push(Vec2 { x: 1.0, y: 2.0 }).unwrap();

    let mut group = c.benchmark_group("bound_object");
    group.bench_function("property_get", |b| {
        b.iter(|| {
            stack.get_field(1, black_box("x")).unwrap();
            stack.pop(1);
        });
    });
    group.bench_function("method_call", |b| {
        b.iter(|| {
            stack.get_field(1, "dot").unwrap();
            stack.push_value(1);
            stack.push(black_box(3.0)).unwrap();
            stack.push(black_box(4.0)).unwrap();
            stack.call(3, 1).unwrap();
            stack.pop(1);
        });
    });
    group.finish();
}

fn bench_embedding(c: &mut Criterion) {
    let mut group = c.benchmark_group("embedding");
    for count in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("new_object", count), &count, |b, &count| {
            let vm = Vm::new();
            let stack = Stack::new(&vm);
            b.iter(|| {
                for i in 0..count {
                    stack.push(Vec2 { x: i as f64, y: 0.0 }).unwrap();
                }
                stack.set_top(0);
                stack.collect_garbage();
            });
        });
    }
    group.finish();
}

fn bench_references(c: &mut Criterion) {
    let vm = Vm::new();
    let stack = Stack::new(&vm);
    stack.push("pinned").unwrap();
    let reference = Reference::capture(&stack);

    c.bench_function("reference_clone_drop", |b| {
        b.iter(|| black_box(reference.clone()));
    });
}

criterion_group!(
    benches,
    bench_free_function,
    bench_methods,
    bench_embedding,
    bench_references
);
criterion_main!(benches);
