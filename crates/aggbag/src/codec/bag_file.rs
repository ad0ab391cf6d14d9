//! 레거시 Bag 파일 -- 버전 1~4 읽기, 버전 3/4 쓰기
//!
//! # 버전별 레이아웃
//! - v1: 기술자 없음, 4바이트 키 + 4바이트 카운터 (custom / custom)
//! - v2: 기술자 없음, 4바이트 키 + 8바이트 카운터 (custom / custom)
//! - v3: 기술자 필수, 4바이트 키 + 8바이트 카운터
//! - v4: 기술자 필수, 폭은 기술자가 정함 (키 1/2/4/8/16, 카운터 4/8)
//!
//! 쓰기는 IPv6 키면 v4(16바이트 키), 그 외에는 v3을 사용합니다. 카운터는 항상 8바이트입니다.

use std::io::{Read, Write};

use bytes::BytesMut;
use flowbag_core::catalog::{FieldKind, FieldRole, ValueType};
use flowbag_core::metrics as fb_metrics;
use flowbag_core::value::FieldValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::header::{
    BagDescriptor, FORMAT_BAG, HeaderEntry, Preamble, encode_entries, read_entries, read_preamble,
};
use super::{WriteOptions, be_uint, is_cancelled, provenance_entries, read_row};
use crate::bag::Bag;
use crate::error::AggBagError;

/// 레거시 custom 타입 ID
const LEGACY_CUSTOM: u16 = 255;

/// 카탈로그 필드의 레거시 타입 ID
///
/// 레거시 형식이 표현하지 못하는 필드(ICMP 타입/코드)는 None입니다.
pub fn legacy_type_id(kind: FieldKind) -> Option<u16> {
    use FieldKind::*;
    let id = match kind {
        CustomKey | CustomCounter => LEGACY_CUSTOM,
        IcmpType | IcmpCode => return None,
        SIpv6 => 25,
        DIpv6 => 26,
        NhIpv6 => 27,
        Records => 28,
        SumPackets => 29,
        SumBytes => 30,
        SumDuration => 31,
        AnyIpv4 => 32,
        AnyIpv6 => 33,
        AnyPort => 34,
        AnySnmp => 35,
        AnyTime => 36,
        SipCountry => 37,
        DipCountry => 38,
        AnyCountry => 39,
        SipPmap => 40,
        DipPmap => 41,
        AnyIpPmap => 42,
        SportPmap => 43,
        DportPmap => 44,
        AnyPortPmap => 45,
        // 0~20은 카탈로그 ID와 같음
        other => other.id(),
    };
    Some(id)
}

/// 레거시 타입 ID를 역할에 맞는 카탈로그 필드로 바꿉니다.
pub fn kind_from_legacy(id: u16, role: FieldRole) -> Result<FieldKind, AggBagError> {
    use FieldKind::*;
    let kind = match id {
        LEGACY_CUSTOM => Some(match role {
            FieldRole::Key => CustomKey,
            FieldRole::Counter => CustomCounter,
        }),
        0..=20 => FieldKind::from_id(id),
        25 => Some(SIpv6),
        26 => Some(DIpv6),
        27 => Some(NhIpv6),
        28 => Some(Records),
        29 => Some(SumPackets),
        30 => Some(SumBytes),
        31 => Some(SumDuration),
        32 => Some(AnyIpv4),
        33 => Some(AnyIpv6),
        34 => Some(AnyPort),
        35 => Some(AnySnmp),
        36 => Some(AnyTime),
        37 => Some(SipCountry),
        38 => Some(DipCountry),
        39 => Some(AnyCountry),
        40 => Some(SipPmap),
        41 => Some(DipPmap),
        42 => Some(AnyIpPmap),
        43 => Some(SportPmap),
        44 => Some(DportPmap),
        45 => Some(AnyPortPmap),
        _ => None,
    };
    match kind {
        Some(kind) if kind.role() == role => Ok(kind),
        _ => Err(AggBagError::UnsupportedField { id }),
    }
}

/// 레거시 Bag 파일을 읽습니다.
pub fn read_bag<R: Read>(
    mut src: R,
    cancel: Option<&CancellationToken>,
) -> Result<Bag, AggBagError> {
    let preamble = read_preamble(&mut src)?;
    if preamble.format != FORMAT_BAG {
        return Err(AggBagError::corrupt(format!(
            "not a Bag file (format 0x{:02x})",
            preamble.format
        )));
    }
    read_bag_body(preamble, src, cancel)
}

/// preamble 이후의 Bag 파일 본문을 읽습니다.
pub(crate) fn read_bag_body<R: Read>(
    preamble: Preamble,
    mut src: R,
    cancel: Option<&CancellationToken>,
) -> Result<Bag, AggBagError> {
    if !(1..=4).contains(&preamble.version) {
        return Err(AggBagError::UnsupportedVersion {
            format: "bag".to_owned(),
            version: preamble.version,
        });
    }
    preamble.check_compression()?;

    let entries = read_entries(&mut src)?;
    let mut descriptor = None;
    let mut annotations = Vec::new();
    let mut invocations = Vec::new();
    for entry in entries {
        match entry {
            HeaderEntry::Bag(desc) => descriptor = Some(desc),
            HeaderEntry::Annotation(note) => annotations.push(note),
            HeaderEntry::Invocation(lines) => invocations.extend(lines),
            HeaderEntry::AggBagSchema { .. } => {
                debug!("ignoring aggregate schema entry in Bag file");
            }
        }
    }

    let (key_kind, counter_kind, key_width, counter_width) = match preamble.version {
        1 => (FieldKind::CustomKey, FieldKind::CustomCounter, 4, 4),
        2 => (FieldKind::CustomKey, FieldKind::CustomCounter, 4, 8),
        version => {
            let desc = descriptor.ok_or_else(|| {
                AggBagError::corrupt(format!("Bag version {} without a field descriptor", version))
            })?;
            let key_kind = kind_from_legacy(desc.key_type, FieldRole::Key)?;
            let counter_kind = kind_from_legacy(desc.counter_type, FieldRole::Counter)?;
            if version == 3 {
                (key_kind, counter_kind, 4, 8)
            } else {
                (
                    key_kind,
                    counter_kind,
                    usize::from(desc.key_width),
                    usize::from(desc.counter_width),
                )
            }
        }
    };
    check_key_width(key_kind, key_width)?;
    if counter_width != 4 && counter_width != 8 {
        return Err(AggBagError::corrupt(format!(
            "unsupported Bag counter width {}",
            counter_width
        )));
    }

    let mut bag = Bag::new(key_kind, counter_kind)?;
    {
        let inner = bag.as_aggbag_mut();
        annotations.into_iter().for_each(|n| inner.add_annotation(n));
        invocations.into_iter().for_each(|i| inner.add_invocation(i));
    }

    let mut row = vec![0u8; key_width + counter_width];
    let mut previous: Option<Vec<u8>> = None;
    let mut rows = 0u64;
    loop {
        if is_cancelled(cancel) {
            return Err(AggBagError::Cancelled);
        }
        if !read_row(&mut src, &mut row)? {
            break;
        }
        let (key_bytes, counter_bytes) = row.split_at(key_width);
        if previous.as_deref().is_some_and(|p| key_bytes <= p) {
            return Err(AggBagError::corrupt("Bag keys are not strictly ascending"));
        }
        previous = Some(key_bytes.to_vec());
        rows += 1;

        let counter = be_uint(counter_bytes);
        if counter == 0 {
            continue;
        }
        let key = decode_legacy_key(key_kind, key_bytes)?;
        bag.insert(key, counter)
            .map_err(|e| AggBagError::corrupt(e.to_string()))?;
    }

    metrics::counter!(fb_metrics::CODEC_ROWS_READ_TOTAL, fb_metrics::LABEL_FORMAT => "bag")
        .increment(rows);
    debug!(
        version = preamble.version,
        key = %key_kind,
        counter = %counter_kind,
        rows,
        "read Bag file"
    );
    Ok(bag)
}

/// Bag을 레거시 형식으로 씁니다.
pub fn write_bag<W: Write>(bag: &Bag, mut sink: W, opts: &WriteOptions) -> Result<(), AggBagError> {
    let key_kind = bag.key_kind();
    let counter_kind = bag.counter_kind();
    let key_type = legacy_type_id(key_kind)
        .ok_or_else(|| AggBagError::configuration(format!("{} cannot be stored in a Bag", key_kind)))?;
    let counter_type = legacy_type_id(counter_kind).ok_or_else(|| {
        AggBagError::configuration(format!("{} cannot be stored in a Bag", counter_kind))
    })?;
    let (version, key_width) = if key_kind.value_type() == ValueType::Ipv6 {
        (4, 16u16)
    } else {
        (3, 4u16)
    };

    let mut buf = BytesMut::with_capacity(256);
    Preamble::new(FORMAT_BAG, version).encode(&mut buf);
    let mut entries = vec![HeaderEntry::Bag(BagDescriptor {
        key_type,
        key_width,
        counter_type,
        counter_width: 8,
    })];
    entries.extend(provenance_entries(bag.as_aggbag(), opts));
    encode_entries(&entries, &mut buf);
    sink.write_all(&buf)?;

    let mut row = Vec::with_capacity(usize::from(key_width) + 8);
    let mut rows = 0u64;
    for (key, counter) in bag.iter() {
        row.clear();
        match key {
            FieldValue::Ipv4(addr) => row.extend_from_slice(&addr.octets()),
            FieldValue::Ipv6(addr) => row.extend_from_slice(&addr.octets()),
            FieldValue::Unsigned(v) => {
                let narrow = u32::try_from(v).unwrap_or(u32::MAX);
                row.extend_from_slice(&narrow.to_be_bytes());
            }
        }
        row.extend_from_slice(&counter.to_be_bytes());
        sink.write_all(&row)?;
        rows += 1;
    }
    sink.flush()?;

    metrics::counter!(fb_metrics::CODEC_ROWS_WRITTEN_TOTAL, fb_metrics::LABEL_FORMAT => "bag")
        .increment(rows);
    debug!(version, key = %key_kind, counter = %counter_kind, rows, "wrote Bag file");
    Ok(())
}

fn check_key_width(kind: FieldKind, width: usize) -> Result<(), AggBagError> {
    let ok = match kind.value_type() {
        ValueType::Ipv6 => width == 16,
        ValueType::Ipv4 => width == 4 || width == 16,
        ValueType::Unsigned | ValueType::Seconds => matches!(width, 1 | 2 | 4 | 8),
    };
    if !ok {
        return Err(AggBagError::corrupt(format!(
            "key width {} is not valid for {}",
            width, kind
        )));
    }
    Ok(())
}

fn decode_legacy_key(kind: FieldKind, bytes: &[u8]) -> Result<FieldValue, AggBagError> {
    match kind.value_type() {
        ValueType::Ipv6 => Ok(FieldValue::decode(kind, bytes)),
        ValueType::Ipv4 if bytes.len() == 4 => Ok(FieldValue::decode(kind, bytes)),
        ValueType::Ipv4 => FieldValue::decode(FieldKind::SIpv6, bytes)
            .demote_to_v4()
            .ok_or_else(|| AggBagError::corrupt(format!("{} key is not an IPv4 address", kind))),
        ValueType::Unsigned | ValueType::Seconds => {
            let value = be_uint(bytes);
            if value > u64::from(u32::MAX) {
                return Err(AggBagError::corrupt(format!(
                    "{} key {} does not fit in 32 bits",
                    kind, value
                )));
            }
            FieldValue::Unsigned(value)
                .conform(kind)
                .map_err(|e| AggBagError::corrupt(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    fn legacy_file(version: u8, desc: Option<BagDescriptor>, rows: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        Preamble::new(FORMAT_BAG, version).encode(&mut buf);
        let entries: Vec<HeaderEntry> = desc.into_iter().map(HeaderEntry::Bag).collect();
        encode_entries(&entries, &mut buf);
        buf.put_slice(rows);
        buf.to_vec()
    }

    #[test]
    fn legacy_ids_round_trip() {
        for kind in FieldKind::all() {
            if let Some(id) = legacy_type_id(kind) {
                assert_eq!(kind_from_legacy(id, kind.role()).unwrap(), kind);
            }
        }
        assert!(legacy_type_id(FieldKind::IcmpType).is_none());
    }

    #[test]
    fn legacy_id_errors() {
        assert!(matches!(
            kind_from_legacy(24, FieldRole::Key),
            Err(AggBagError::UnsupportedField { id: 24 })
        ));
        assert!(matches!(
            kind_from_legacy(28, FieldRole::Key),
            Err(AggBagError::UnsupportedField { id: 28 })
        ));
        assert!(kind_from_legacy(0, FieldRole::Counter).is_err());
    }

    #[test]
    fn reads_version_one() {
        let mut rows = BytesMut::new();
        rows.put_u32(7);
        rows.put_u32(3);
        rows.put_u32(9);
        rows.put_u32(0);
        let file = legacy_file(1, None, &rows);
        let bag = read_bag(&file[..], None).unwrap();
        assert_eq!(bag.key_kind(), FieldKind::CustomKey);
        assert_eq!(bag.counter_kind(), FieldKind::CustomCounter);
        assert_eq!(bag.iter().collect::<Vec<_>>(), vec![(FieldValue::Unsigned(7), 3)]);
    }

    #[test]
    fn reads_version_four_ipv4_in_sixteen_bytes() {
        let mut rows = BytesMut::new();
        let addr: std::net::Ipv4Addr = "10.1.2.3".parse().unwrap();
        rows.put_slice(&addr.to_ipv6_mapped().octets());
        rows.put_u64(5);
        let desc = BagDescriptor {
            key_type: 0,
            key_width: 16,
            counter_type: 28,
            counter_width: 8,
        };
        let file = legacy_file(4, Some(desc), &rows);
        let bag = read_bag(&file[..], None).unwrap();
        assert_eq!(bag.key_kind(), FieldKind::SIpv4);
        assert_eq!(bag.get_by_ip(addr.into()).unwrap(), Some(5));
    }

    #[test]
    fn non_mapped_ipv6_for_ipv4_kind_is_corrupt() {
        let mut rows = BytesMut::new();
        rows.put_slice(&"2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap().octets());
        rows.put_u64(1);
        let desc = BagDescriptor {
            key_type: 1,
            key_width: 16,
            counter_type: 28,
            counter_width: 8,
        };
        let file = legacy_file(4, Some(desc), &rows);
        assert!(matches!(
            read_bag(&file[..], None),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn out_of_range_port_is_corrupt() {
        let mut rows = BytesMut::new();
        rows.put_u32(70_000);
        rows.put_u64(1);
        let desc = BagDescriptor {
            key_type: 2,
            key_width: 4,
            counter_type: 28,
            counter_width: 8,
        };
        let file = legacy_file(3, Some(desc), &rows);
        assert!(matches!(
            read_bag(&file[..], None),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn version_three_needs_descriptor() {
        let file = legacy_file(3, None, &[]);
        assert!(matches!(
            read_bag(&file[..], None),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let file = legacy_file(9, None, &[]);
        assert!(matches!(
            read_bag(&file[..], None),
            Err(AggBagError::UnsupportedVersion { version: 9, .. })
        ));
    }

    #[test]
    fn unordered_keys_are_corrupt() {
        let mut rows = BytesMut::new();
        rows.put_u32(9);
        rows.put_u32(1);
        rows.put_u32(7);
        rows.put_u32(1);
        let file = legacy_file(1, None, &rows);
        assert!(matches!(
            read_bag(&file[..], None),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn writes_version_three_and_four() {
        let mut bag = Bag::new(FieldKind::DPort, FieldKind::Records).unwrap();
        bag.add(FieldValue::Unsigned(80), 2).unwrap();
        let mut out = Vec::new();
        write_bag(&bag, &mut out, &WriteOptions::default()).unwrap();
        assert_eq!(out[5], 3);
        assert_eq!(read_bag(&out[..], None).unwrap(), bag);

        let mut v6 = Bag::new(FieldKind::SIpv6, FieldKind::SumBytes).unwrap();
        v6.add(FieldValue::Ipv6("2001:db8::1".parse().unwrap()), 100)
            .unwrap();
        let mut out = Vec::new();
        write_bag(&v6, &mut out, &WriteOptions::default()).unwrap();
        assert_eq!(out[5], 4);
        assert_eq!(read_bag(&out[..], None).unwrap(), v6);
    }
}
