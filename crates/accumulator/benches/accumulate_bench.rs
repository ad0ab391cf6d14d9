//! 누산기 벤치마크
//!
//! 레코드 추가 처리량과 프리픽스 맵 조회 비용을 측정합니다.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flowbag_accumulator::{Accumulator, PmapRegistry, PrefixMapFile};
use flowbag_core::{FlowRecord, PmapKey, PrefixMap};

fn records(count: u32) -> Vec<FlowRecord> {
    (0..count)
        .map(|i| FlowRecord {
            sip: IpAddr::V4(Ipv4Addr::from(0x0A00_0000 + i % 512)),
            dport: (i % 64) as u16,
            protocol: 6,
            packets: 4,
            bytes: u64::from(i) * 10,
            ..FlowRecord::default()
        })
        .collect()
}

fn prefix_map() -> PrefixMapFile {
    let mut text = String::from("mode ip\ndefault 0\n");
    for i in 0..256u32 {
        text.push_str(&format!("10.{}.0.0/16 {}\n", i, i + 1));
    }
    PrefixMapFile::from_text("nets", &text).expect("prefix map")
}

fn bench_add_record(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let input = records(10_000);
    let mut registry = PmapRegistry::new();
    registry
        .register(Arc::new(prefix_map()))
        .expect("register");

    let mut group = c.benchmark_group("accumulator_add");
    group.throughput(Throughput::Elements(input.len() as u64));
    for spec in ["sIPv4:records:-", "sIPv4,dPort:records,sum-bytes:-", "sip-pmap[nets]:records:-"] {
        group.bench_with_input(BenchmarkId::from_parameter(spec), &spec, |b, spec| {
            b.iter(|| {
                let mut acc = runtime
                    .block_on(
                        Accumulator::builder()
                            .output(spec.parse().expect("spec"))
                            .pmaps(registry.clone())
                            .build(),
                    )
                    .expect("accumulator");
                for rec in &input {
                    acc.add_record(black_box(rec)).expect("add");
                }
                acc
            })
        });
    }
    group.finish();
}

fn bench_pmap_lookup(c: &mut Criterion) {
    let map = prefix_map();
    let key = PmapKey::Ip(IpAddr::V4(Ipv4Addr::new(10, 128, 3, 4)));
    c.bench_function("pmap_lookup_ip", |b| b.iter(|| map.lookup(black_box(&key))));
}

criterion_group!(benches, bench_add_record, bench_pmap_lookup);
criterion_main!(benches);
