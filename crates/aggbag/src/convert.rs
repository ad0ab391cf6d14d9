//! Aggregate Bag 변환 -- 레거시 Bag, IP 집합
//!
//! - [`to_bag`]: 키 하나, 카운터 하나를 골라 투영한 뒤 Bag으로 옮깁니다.
//!   32비트를 넘는 정수 키는 `u32::MAX`로 고정됩니다.
//! - [`to_ipset`]: 지정한 카운터가 0이 아닌 행의 키 IP를 모읍니다.

use std::net::{IpAddr, Ipv4Addr};

use flowbag_core::catalog::FieldKind;
use flowbag_core::value::FieldValue;
use tracing::debug;

use crate::aggbag::AggBag;
use crate::bag::Bag;
use crate::error::AggBagError;
use crate::ipset::IpSet;
use crate::projection::{FieldSelection, Projection};

/// Aggregate Bag을 (키, 카운터) Bag으로 변환합니다.
///
/// 두 필드가 각각 키/카운터 스키마에 있어야 하며, 없으면 `Configuration`.
pub fn to_bag(aggbag: &AggBag, key: FieldKind, counter: FieldKind) -> Result<Bag, AggBagError> {
    if !aggbag.key_schema().contains(key) {
        return Err(AggBagError::configuration(format!(
            "to-bag key {} is not a key field of the input ({})",
            key,
            aggbag.key_schema()
        )));
    }
    if !aggbag.counter_schema().contains(counter) {
        return Err(AggBagError::configuration(format!(
            "to-bag counter {} is not a counter field of the input ({})",
            counter,
            aggbag.counter_schema()
        )));
    }

    let mut projection = Projection::new();
    projection.set_selection(FieldSelection::Select(vec![key, counter]))?;
    let projected = projection.apply(aggbag)?;

    let mut bag = Bag::new(key, counter)?;
    let mut clamped = 0usize;
    for (tuple, counters) in projected.iter() {
        let value = match tuple[0] {
            FieldValue::Unsigned(v) if v > u64::from(u32::MAX) => {
                clamped += 1;
                FieldValue::Unsigned(u64::from(u32::MAX))
            }
            other => other,
        };
        bag.add(value, counters[0])?;
    }
    bag.as_aggbag_mut().extend_provenance(aggbag);

    debug!(key = %key, counter = %counter, rows = bag.len(), clamped, "converted to Bag");
    Ok(bag)
}

/// 카운터가 0이 아닌 행의 `field` 값을 IP 집합으로 모읍니다.
///
/// `counter`가 None이면 아무 카운터나 0이 아닌 행이 대상입니다.
/// 정수 필드는 `u32::MAX` 이하인 값만 IPv4 주소로 넣습니다.
pub fn to_ipset(
    aggbag: &AggBag,
    field: FieldKind,
    counter: Option<FieldKind>,
) -> Result<IpSet, AggBagError> {
    let position = aggbag.key_schema().position(field).ok_or_else(|| {
        AggBagError::configuration(format!(
            "to-ipset field {} is not a key field of the input ({})",
            field,
            aggbag.key_schema()
        ))
    })?;
    let column = counter
        .map(|kind| {
            aggbag.counter_schema().position(kind).ok_or_else(|| {
                AggBagError::configuration(format!(
                    "to-ipset counter {} is not a counter field of the input ({})",
                    kind,
                    aggbag.counter_schema()
                ))
            })
        })
        .transpose()?;

    let mut set = IpSet::new();
    let mut skipped = 0usize;
    for (key, counters) in aggbag.raw_rows() {
        let qualifies = match column {
            Some(col) => counters[col] != 0,
            None => counters.iter().any(|c| *c != 0),
        };
        if !qualifies {
            continue;
        }
        match aggbag.key_schema().decode_field(key, position) {
            FieldValue::Ipv4(addr) => set.insert(IpAddr::V4(addr)),
            FieldValue::Ipv6(addr) => set.insert(IpAddr::V6(addr)),
            FieldValue::Unsigned(v) => match u32::try_from(v) {
                Ok(n) => set.insert(IpAddr::V4(Ipv4Addr::from(n))),
                Err(_) => skipped += 1,
            },
        }
    }

    debug!(field = %field, ranges = set.len_ranges(), skipped, "converted to IP set");
    Ok(set)
}
