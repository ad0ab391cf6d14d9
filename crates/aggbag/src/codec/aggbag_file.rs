//! Aggregate Bag 파일 읽기/쓰기
//!
//! 헤더의 스키마 엔트리(ID 8) 뒤로 `키 바이트 || 카운터(u64 BE) × n` 행이
//! 키 오름차순으로 EOF까지 이어집니다.

use std::io::{Read, Write};

use bytes::BytesMut;
use flowbag_core::catalog::{FieldKind, FieldRole};
use flowbag_core::metrics as fb_metrics;
use flowbag_core::schema::Schema;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::header::{
    FORMAT_AGGBAG, HeaderEntry, Preamble, encode_entries, read_entries, read_preamble,
};
use super::{AGGBAG_VERSION, WriteOptions, be_uint, is_cancelled, provenance_entries, read_row};
use crate::aggbag::AggBag;
use crate::error::AggBagError;

/// Aggregate Bag 파일을 읽습니다.
pub fn read_aggbag<R: Read>(
    mut src: R,
    cancel: Option<&CancellationToken>,
) -> Result<AggBag, AggBagError> {
    let preamble = read_preamble(&mut src)?;
    if preamble.format != FORMAT_AGGBAG {
        return Err(AggBagError::corrupt(format!(
            "not an Aggregate Bag file (format 0x{:02x})",
            preamble.format
        )));
    }
    read_aggbag_body(preamble, src, cancel)
}

/// preamble 이후의 Aggregate Bag 본문을 읽습니다.
pub(crate) fn read_aggbag_body<R: Read>(
    preamble: Preamble,
    mut src: R,
    cancel: Option<&CancellationToken>,
) -> Result<AggBag, AggBagError> {
    if preamble.version != AGGBAG_VERSION {
        return Err(AggBagError::UnsupportedVersion {
            format: "aggbag".to_owned(),
            version: preamble.version,
        });
    }
    preamble.check_compression()?;

    let mut schema = None;
    let mut annotations = Vec::new();
    let mut invocations = Vec::new();
    for entry in read_entries(&mut src)? {
        match entry {
            HeaderEntry::AggBagSchema { keys, counters } => {
                if schema.is_some() {
                    return Err(AggBagError::corrupt("duplicate schema entry"));
                }
                schema = Some((keys, counters));
            }
            HeaderEntry::Annotation(note) => annotations.push(note),
            HeaderEntry::Invocation(lines) => invocations.extend(lines),
            HeaderEntry::Bag(_) => debug!("ignoring Bag descriptor in Aggregate Bag file"),
        }
    }
    let (keys, counters) = schema.ok_or_else(|| AggBagError::corrupt("missing schema entry"))?;
    let key_schema = decode_schema(FieldRole::Key, &keys)?;
    let counter_schema = decode_schema(FieldRole::Counter, &counters)?;

    let mut bag = AggBag::new(key_schema, counter_schema)?;
    annotations.into_iter().for_each(|n| bag.add_annotation(n));
    invocations.into_iter().for_each(|i| bag.add_invocation(i));

    let key_width = bag.key_schema().encoded_width();
    let mut row = vec![0u8; key_width + 8 * bag.counter_schema().len()];
    let mut previous: Option<Vec<u8>> = None;
    let mut rows = 0u64;
    loop {
        if is_cancelled(cancel) {
            return Err(AggBagError::Cancelled);
        }
        if !read_row(&mut src, &mut row)? {
            break;
        }
        let (key, counter_bytes) = row.split_at(key_width);
        if previous.as_deref().is_some_and(|p| key <= p) {
            return Err(AggBagError::corrupt("rows are not in strictly ascending key order"));
        }
        previous = Some(key.to_vec());
        rows += 1;

        let counters: Vec<u64> = counter_bytes.chunks_exact(8).map(be_uint).collect();
        if counters.iter().all(|c| *c == 0) {
            continue;
        }
        bag.push_decoded(key.to_vec(), counters);
    }

    metrics::counter!(fb_metrics::CODEC_ROWS_READ_TOTAL, fb_metrics::LABEL_FORMAT => "aggbag")
        .increment(rows);
    debug!(
        keys = %bag.key_schema(),
        counters = %bag.counter_schema(),
        rows,
        "read Aggregate Bag file"
    );
    Ok(bag)
}

/// Aggregate Bag을 씁니다.
pub fn write_aggbag<W: Write>(
    bag: &AggBag,
    mut sink: W,
    opts: &WriteOptions,
) -> Result<(), AggBagError> {
    let mut buf = BytesMut::with_capacity(256);
    Preamble::new(FORMAT_AGGBAG, AGGBAG_VERSION).encode(&mut buf);
    let mut entries = vec![HeaderEntry::AggBagSchema {
        keys: schema_pairs(bag.key_schema()),
        counters: schema_pairs(bag.counter_schema()),
    }];
    entries.extend(provenance_entries(bag, opts));
    encode_entries(&entries, &mut buf);
    sink.write_all(&buf)?;

    let mut row = Vec::with_capacity(bag.key_schema().encoded_width() + 8 * bag.counter_schema().len());
    let mut rows = 0u64;
    for (key, counters) in bag.raw_rows() {
        if counters.iter().all(|c| *c == 0) {
            continue;
        }
        row.clear();
        row.extend_from_slice(key);
        for counter in counters {
            row.extend_from_slice(&counter.to_be_bytes());
        }
        sink.write_all(&row)?;
        rows += 1;
    }
    sink.flush()?;

    metrics::counter!(fb_metrics::CODEC_ROWS_WRITTEN_TOTAL, fb_metrics::LABEL_FORMAT => "aggbag")
        .increment(rows);
    debug!(
        keys = %bag.key_schema(),
        counters = %bag.counter_schema(),
        rows,
        "wrote Aggregate Bag file"
    );
    Ok(())
}

fn schema_pairs(schema: &Schema) -> Vec<(u16, u16)> {
    schema
        .iter()
        .map(|kind| (kind.id(), kind.width() as u16))
        .collect()
}

fn decode_schema(role: FieldRole, pairs: &[(u16, u16)]) -> Result<Schema, AggBagError> {
    if pairs.is_empty() {
        return Err(AggBagError::corrupt(format!("empty {} schema", role)));
    }
    let mut kinds = Vec::with_capacity(pairs.len());
    let mut last_id: Option<u16> = None;
    for &(id, width) in pairs {
        let kind = FieldKind::from_id(id).ok_or(AggBagError::UnsupportedField { id })?;
        if kind.role() != role {
            return Err(AggBagError::corrupt(format!(
                "{} is not a {} field",
                kind, role
            )));
        }
        if usize::from(width) != kind.width() {
            return Err(AggBagError::corrupt(format!(
                "{} recorded with width {}, expected {}",
                kind,
                width,
                kind.width()
            )));
        }
        if last_id.is_some_and(|last| last >= id) {
            return Err(AggBagError::corrupt(format!(
                "{} schema fields are duplicated or out of order",
                role
            )));
        }
        last_id = Some(id);
        kinds.push(kind);
    }
    Schema::new(role, kinds).map_err(|e| AggBagError::corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use flowbag_core::value::FieldValue;

    use super::*;

    fn sample() -> AggBag {
        let mut bag = AggBag::new(
            Schema::keys([FieldKind::SIpv4, FieldKind::DPort]).unwrap(),
            Schema::counters([FieldKind::Records, FieldKind::SumBytes]).unwrap(),
        )
        .unwrap();
        bag.add(
            &[FieldValue::Ipv4("10.0.0.2".parse().unwrap()), FieldValue::Unsigned(80)],
            &[1, 100],
        )
        .unwrap();
        bag.add(
            &[FieldValue::Ipv4("10.0.0.1".parse().unwrap()), FieldValue::Unsigned(443)],
            &[2, 300],
        )
        .unwrap();
        bag.add_annotation("first note");
        bag
    }

    fn file_with_schema(keys: &[(u16, u16)], counters: &[(u16, u16)], rows: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        Preamble::new(FORMAT_AGGBAG, AGGBAG_VERSION).encode(&mut buf);
        encode_entries(
            &[HeaderEntry::AggBagSchema {
                keys: keys.to_vec(),
                counters: counters.to_vec(),
            }],
            &mut buf,
        );
        buf.put_slice(rows);
        buf.to_vec()
    }

    #[test]
    fn round_trip_keeps_rows_and_notes() {
        let bag = sample();
        let mut out = Vec::new();
        let opts = WriteOptions {
            invocation: Some("flowbag tool --add".to_owned()),
            ..WriteOptions::default()
        };
        write_aggbag(&bag, &mut out, &opts).unwrap();

        let back = read_aggbag(&out[..], None).unwrap();
        assert_eq!(back, bag);
        assert_eq!(back.annotations(), ["first note"]);
        assert_eq!(back.invocations(), ["flowbag tool --add"]);
    }

    #[test]
    fn strip_options_drop_provenance() {
        let mut bag = sample();
        bag.add_invocation("earlier");
        let mut out = Vec::new();
        let opts = WriteOptions {
            invocation: Some("now".to_owned()),
            invocation_strip: true,
            notes_strip: true,
        };
        write_aggbag(&bag, &mut out, &opts).unwrap();
        let back = read_aggbag(&out[..], None).unwrap();
        assert!(back.annotations().is_empty());
        assert!(back.invocations().is_empty());
    }

    #[test]
    fn empty_container_writes_header_only() {
        let bag = AggBag::new(
            Schema::keys([FieldKind::Protocol]).unwrap(),
            Schema::counters([FieldKind::Records]).unwrap(),
        )
        .unwrap();
        let mut out = Vec::new();
        write_aggbag(&bag, &mut out, &WriteOptions::default()).unwrap();
        let back = read_aggbag(&out[..], None).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.key_schema(), bag.key_schema());
    }

    #[test]
    fn unknown_field_id_is_unsupported() {
        let file = file_with_schema(&[(999, 4)], &[(0xC000, 8)], &[]);
        assert!(matches!(
            read_aggbag(&file[..], None),
            Err(AggBagError::UnsupportedField { id: 999 })
        ));
    }

    #[test]
    fn width_mismatch_is_corrupt() {
        let file = file_with_schema(&[(0, 2)], &[(0xC000, 8)], &[]);
        assert!(matches!(
            read_aggbag(&file[..], None),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn duplicate_field_is_corrupt() {
        let file = file_with_schema(&[(2, 2), (2, 2)], &[(0xC000, 8)], &[]);
        assert!(matches!(
            read_aggbag(&file[..], None),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn partial_row_is_corrupt() {
        let file = file_with_schema(&[(4, 1)], &[(0xC000, 8)], &[6, 0, 0, 0]);
        assert!(matches!(
            read_aggbag(&file[..], None),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn descending_rows_are_corrupt() {
        let mut rows = BytesMut::new();
        rows.put_u8(17);
        rows.put_u64(1);
        rows.put_u8(6);
        rows.put_u64(1);
        let file = file_with_schema(&[(4, 1)], &[(0xC000, 8)], &rows);
        assert!(matches!(
            read_aggbag(&file[..], None),
            Err(AggBagError::Corrupt { .. })
        ));
    }

    #[test]
    fn zero_rows_are_skipped() {
        let mut rows = BytesMut::new();
        rows.put_u8(6);
        rows.put_u64(0);
        rows.put_u8(17);
        rows.put_u64(4);
        let file = file_with_schema(&[(4, 1)], &[(0xC000, 8)], &rows);
        let bag = read_aggbag(&file[..], None).unwrap();
        assert_eq!(bag.len(), 1);
        assert_eq!(bag.get(&[FieldValue::Unsigned(17)]).unwrap(), Some(&[4u64][..]));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut buf = BytesMut::new();
        Preamble::new(FORMAT_AGGBAG, 2).encode(&mut buf);
        assert!(matches!(
            read_aggbag(&buf[..], None),
            Err(AggBagError::UnsupportedVersion { version: 2, .. })
        ));
    }

    #[test]
    fn cancelled_read_stops() {
        let bag = sample();
        let mut out = Vec::new();
        write_aggbag(&bag, &mut out, &WriteOptions::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            read_aggbag(&out[..], Some(&token)),
            Err(AggBagError::Cancelled)
        ));
    }
}
