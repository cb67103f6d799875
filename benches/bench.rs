use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pyxis::{
    per, pper, Bindings, Command, Context, Safelist, SweepConfigBuilder, Value,
};
use tempfile::tempdir;

const NUM_ITEMS: i64 = 1000;

fn get_context(jobs: usize) -> Context {
    let mut bindings = Bindings::new();
    bindings
        .assign_list("X", (0..NUM_ITEMS).collect::<Vec<i64>>())
        .unwrap();
    let config = SweepConfigBuilder::default().jobs(jobs).build().unwrap();
    Context::new(bindings, config)
}

fn touch() -> Command {
    Command::call("touch", |ctx| {
        black_box(ctx.bindings.get("X")?);
        Ok(())
    })
}

fn bench_serial_sweep(crt: &mut Criterion) {
    let mut ctx = get_context(1);
    let commands = [touch()];
    crt.bench_function(
        format!("per - {} in-process items", NUM_ITEMS).as_str(),
        |bch| bch.iter(|| per(&mut ctx, "X", black_box(&commands)).unwrap()),
    );
}

fn bench_parallel_sweep(crt: &mut Criterion) {
    let mut ctx = get_context(4);
    let commands = [touch()];
    crt.bench_function(
        format!("pper - {} in-process items, 4 jobs", NUM_ITEMS).as_str(),
        |bch| bch.iter(|| pper(&mut ctx, "X", black_box(&commands)).unwrap()),
    );
}

fn bench_safelist(crt: &mut Criterion) {
    let tmp_dir = tempdir().unwrap();
    let list = Safelist::create(tmp_dir.path().join("bench.safelist")).unwrap();
    let value = Value::from("1234567890.ms");
    crt.bench_function("safelist - add", |bch| {
        bch.iter(|| list.add(black_box(&value)).unwrap())
    });
    crt.bench_function("safelist - read_all", |bch| {
        bch.iter(|| black_box(list.read_all::<Value>().unwrap()))
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10);
    targets =
        bench_serial_sweep,
        bench_parallel_sweep,
        bench_safelist,
);
criterion_main!(benches);
