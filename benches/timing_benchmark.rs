use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loragw_rs::config::BusConfig;
use loragw_rs::spi::addressing::{encode_register_header, Access, RegisterAddress};
use loragw_rs::spi::mock::MockSpiBus;
use loragw_rs::{open, time_on_air, MuxTarget};
use std::time::Duration;

fn benchmark_time_on_air(c: &mut Criterion) {
    let mut group = c.benchmark_group("time_on_air");
    group.measurement_time(Duration::from_secs(5));

    for sf in [5u8, 7, 9, 12] {
        group.bench_with_input(BenchmarkId::new("bw125_cr45_64B", sf), &sf, |b, &sf| {
            b.iter(|| {
                let _ = time_on_air(
                    black_box(0x04),
                    black_box(sf),
                    1,
                    8,
                    true,
                    true,
                    black_box(64),
                );
            });
        });
    }

    group.finish();
}

fn benchmark_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    group.bench_function("register_header", |b| {
        let address = RegisterAddress::new(0x5602).unwrap();
        b.iter(|| encode_register_header(black_box(MuxTarget::RadioB), address, Access::Write));
    });

    // Simulated 4 KiB burst through 1 KiB chunks
    let mock = MockSpiBus::new();
    mock.add_fifo_port(0x4000);
    let bus = open(mock.clone(), &BusConfig::default()).unwrap();
    let data = vec![0xA5u8; 4096];
    group.bench_function("write_burst_4k", |b| {
        b.iter(|| {
            bus.write_burst(MuxTarget::Concentrator, 0x4000, black_box(&data))
                .unwrap();
            let _ = bus.read_burst(MuxTarget::Concentrator, 0x4000, data.len());
            mock.clear_transactions();
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_time_on_air, benchmark_framing);
criterion_main!(benches);
