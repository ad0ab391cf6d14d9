#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use flowbag_aggbag::{AggBag, WriteOptions, read_aggbag, write_aggbag};
use flowbag_core::{FieldKind, FieldValue, Schema};

/// 퍼저용 구조적 행 입력
#[derive(Arbitrary, Debug)]
struct FuzzRow {
    sip: u32,
    dport: u16,
    records: u64,
    bytes: u64,
}

fuzz_target!(|rows: Vec<FuzzRow>| {
    let (Ok(keys), Ok(counters)) = (
        Schema::keys([FieldKind::SIpv4, FieldKind::DPort]),
        Schema::counters([FieldKind::Records, FieldKind::SumBytes]),
    ) else {
        return;
    };
    let Ok(mut bag) = AggBag::new(keys, counters) else {
        return;
    };
    // 행 수 제한 (퍼징 성능)
    for row in rows.iter().take(1000) {
        let key = [
            FieldValue::Ipv4(row.sip.into()),
            FieldValue::Unsigned(u64::from(row.dport)),
        ];
        bag.add(&key, &[row.records, row.bytes]).expect("key matches schema");
    }

    let mut out = Vec::new();
    write_aggbag(&bag, &mut out, &WriteOptions::default()).expect("serialize");
    let back = read_aggbag(&out[..], None).expect("deserialize");
    assert_eq!(back.len(), bag.len());
    assert!(back.iter().eq(bag.iter()));
});
