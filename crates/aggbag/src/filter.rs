//! 필터 엔진 -- 범위(min/max) 및 IP 집합(intersect/complement)
//!
//! 직렬화 직전에 컨테이너를 제자리에서 거릅니다. 모든 조건을 통과한 행만 남고,
//! 하나라도 실패한 행은 카운터가 0이 되어 제거됩니다.
//!
//! 적용 시 컨테이너에 없는 필드의 조건은 조용히 버리고,
//! 나머지는 (역할, 스키마 위치) 순으로 정렬해 평가합니다.

use std::fmt;
use std::sync::Arc;

use flowbag_core::catalog::{FieldKind, FieldRole};
use flowbag_core::lookup::IpSetLookup;
use flowbag_core::metrics as fb_metrics;
use flowbag_core::value::FieldValue;
use tracing::debug;

use crate::aggbag::AggBag;
use crate::error::AggBagError;

/// 범위 조건의 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    /// 값 ≥ 경계
    Min,
    /// 값 ≤ 경계
    Max,
}

/// 집합 조건의 극성
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPolarity {
    /// 집합에 포함되어야 통과
    Intersect,
    /// 집합에 없어야 통과
    Complement,
}

#[derive(Debug, Clone, Copy)]
struct RangeSpec {
    kind: FieldKind,
    bound: RangeBound,
    value: FieldValue,
}

#[derive(Clone)]
struct SetSpec {
    kind: FieldKind,
    polarity: SetPolarity,
    set: Arc<dyn IpSetLookup>,
}

impl fmt::Debug for SetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetSpec")
            .field("kind", &self.kind)
            .field("polarity", &self.polarity)
            .finish_non_exhaustive()
    }
}

/// 필터 설정
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// 범위 조건
    ranges: Vec<RangeSpec>,
    /// 집합 조건
    sets: Vec<SetSpec>,
}

/// 컨테이너 하나에 맞춰 해석된 조건
enum Check<'a> {
    Range {
        role: FieldRole,
        index: usize,
        bound: RangeBound,
        value: FieldValue,
    },
    Set {
        index: usize,
        polarity: SetPolarity,
        set: &'a dyn IpSetLookup,
    },
}

impl Filter {
    /// 빈 필터
    pub fn new() -> Self {
        Self::default()
    }

    /// 조건이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.sets.is_empty()
    }

    /// 범위 조건을 추가합니다. 경계 값은 필드에 맞게 정규화됩니다.
    pub fn add_range(
        &mut self,
        kind: FieldKind,
        bound: RangeBound,
        value: FieldValue,
    ) -> Result<(), AggBagError> {
        let value = value.conform(kind)?;
        self.ranges.push(RangeSpec { kind, bound, value });
        Ok(())
    }

    /// IP 집합 조건을 추가합니다. IP 필드가 아니면 `Configuration`.
    pub fn add_set(
        &mut self,
        kind: FieldKind,
        polarity: SetPolarity,
        set: Arc<dyn IpSetLookup>,
    ) -> Result<(), AggBagError> {
        if !kind.is_ip() {
            return Err(AggBagError::configuration(format!(
                "set filters need an IP field, {} is not one",
                kind
            )));
        }
        self.sets.push(SetSpec {
            kind,
            polarity,
            set,
        });
        Ok(())
    }

    /// 컨테이너를 거르고 제거한 행 수를 반환합니다.
    pub fn apply(&self, bag: &mut AggBag) -> usize {
        let checks = self.resolve(bag);
        if checks.is_empty() {
            debug!("no filter applies to this container");
            return 0;
        }

        let key_schema = bag.key_schema().clone();
        let dropped = bag.retain_encoded(|key, counters| {
            checks.iter().all(|check| match check {
                Check::Range {
                    role: FieldRole::Key,
                    index,
                    bound,
                    value,
                } => in_range(&key_schema.decode_field(key, *index), *bound, value),
                Check::Range {
                    role: FieldRole::Counter,
                    index,
                    bound,
                    value,
                } => in_range(&FieldValue::Unsigned(counters[*index]), *bound, value),
                Check::Set {
                    index,
                    polarity,
                    set,
                } => {
                    let member = key_schema
                        .decode_field(key, *index)
                        .as_ip()
                        .is_some_and(|addr| set.contains(&addr));
                    match polarity {
                        SetPolarity::Intersect => member,
                        SetPolarity::Complement => !member,
                    }
                }
            })
        });

        metrics::counter!(fb_metrics::FILTER_ROWS_DROPPED_TOTAL).increment(dropped as u64);
        debug!(checks = checks.len(), dropped, remaining = bag.len(), "applied filter");
        dropped
    }

    fn resolve(&self, bag: &AggBag) -> Vec<Check<'_>> {
        let mut ordered: Vec<(FieldRole, usize, Check<'_>)> = Vec::new();
        for spec in &self.ranges {
            let role = spec.kind.role();
            let schema = match role {
                FieldRole::Key => bag.key_schema(),
                FieldRole::Counter => bag.counter_schema(),
            };
            if let Some(index) = schema.position(spec.kind) {
                ordered.push((
                    role,
                    index,
                    Check::Range {
                        role,
                        index,
                        bound: spec.bound,
                        value: spec.value,
                    },
                ));
            }
        }
        for spec in &self.sets {
            if let Some(index) = bag.key_schema().position(spec.kind) {
                ordered.push((
                    FieldRole::Key,
                    index,
                    Check::Set {
                        index,
                        polarity: spec.polarity,
                        set: spec.set.as_ref(),
                    },
                ));
            }
        }
        ordered.sort_by_key(|(role, index, _)| (*role == FieldRole::Counter, *index));
        ordered.into_iter().map(|(_, _, check)| check).collect()
    }
}

fn in_range(actual: &FieldValue, bound: RangeBound, limit: &FieldValue) -> bool {
    match bound {
        RangeBound::Min => actual >= limit,
        RangeBound::Max => actual <= limit,
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use flowbag_core::schema::Schema;

    use super::*;

    struct OneAddress(IpAddr);

    impl IpSetLookup for OneAddress {
        fn contains(&self, addr: &IpAddr) -> bool {
            *addr == self.0
        }
    }

    fn ip(text: &str) -> FieldValue {
        FieldValue::Ipv4(text.parse().unwrap())
    }

    fn bytes_bag() -> AggBag {
        let mut bag = AggBag::new(
            Schema::keys([FieldKind::SIpv4]).unwrap(),
            Schema::counters([FieldKind::Records, FieldKind::SumBytes]).unwrap(),
        )
        .unwrap();
        bag.add(&[ip("1.1.1.1")], &[1, 40]).unwrap();
        bag.add(&[ip("2.2.2.2")], &[1, 4000]).unwrap();
        bag
    }

    #[test]
    fn min_on_counter_drops_row() {
        let mut bag = bytes_bag();
        let mut filter = Filter::new();
        filter
            .add_range(FieldKind::SumBytes, RangeBound::Min, FieldValue::Unsigned(1000))
            .unwrap();
        assert_eq!(filter.apply(&mut bag), 1);
        assert_eq!(bag.get(&[ip("2.2.2.2")]).unwrap(), Some(&[1u64, 4000][..]));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn max_on_ip_key() {
        let mut bag = bytes_bag();
        let mut filter = Filter::new();
        filter
            .add_range(FieldKind::SIpv4, RangeBound::Max, ip("1.255.255.255"))
            .unwrap();
        filter.apply(&mut bag);
        assert_eq!(bag.len(), 1);
        assert!(bag.get(&[ip("1.1.1.1")]).unwrap().is_some());
    }

    #[test]
    fn set_complement() {
        let mut bag = AggBag::new(
            Schema::keys([FieldKind::SIpv4]).unwrap(),
            Schema::counters([FieldKind::Records]).unwrap(),
        )
        .unwrap();
        for addr in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            bag.add(&[ip(addr)], &[1]).unwrap();
        }
        let mut filter = Filter::new();
        filter
            .add_set(
                FieldKind::SIpv4,
                SetPolarity::Complement,
                Arc::new(OneAddress("10.0.0.2".parse().unwrap())),
            )
            .unwrap();
        filter.apply(&mut bag);
        let keys: Vec<_> = bag.iter().map(|(k, _)| k[0]).collect();
        assert_eq!(keys, vec![ip("10.0.0.1"), ip("10.0.0.3")]);
    }

    #[test]
    fn set_intersect_keeps_members() {
        let mut bag = bytes_bag();
        let mut filter = Filter::new();
        filter
            .add_set(
                FieldKind::SIpv4,
                SetPolarity::Intersect,
                Arc::new(OneAddress("1.1.1.1".parse().unwrap())),
            )
            .unwrap();
        filter.apply(&mut bag);
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn set_on_non_ip_field_is_rejected() {
        let mut filter = Filter::new();
        let err = filter
            .add_set(
                FieldKind::DPort,
                SetPolarity::Intersect,
                Arc::new(OneAddress("1.1.1.1".parse().unwrap())),
            )
            .unwrap_err();
        assert!(matches!(err, AggBagError::Configuration { .. }));
    }

    #[test]
    fn absent_fields_are_ignored() {
        let mut bag = bytes_bag();
        let before = bag.clone();
        let mut filter = Filter::new();
        filter
            .add_range(FieldKind::DPort, RangeBound::Min, FieldValue::Unsigned(1024))
            .unwrap();
        assert_eq!(filter.apply(&mut bag), 0);
        assert_eq!(bag, before);
    }

    #[test]
    fn bound_must_conform() {
        let mut filter = Filter::new();
        assert!(filter
            .add_range(FieldKind::Protocol, RangeBound::Min, FieldValue::Unsigned(300))
            .is_err());
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let mut bag = bytes_bag();
        let mut filter = Filter::new();
        filter
            .add_range(FieldKind::SumBytes, RangeBound::Max, FieldValue::Unsigned(100))
            .unwrap();
        filter.apply(&mut bag);
        let once = bag.clone();
        assert_eq!(filter.apply(&mut bag), 0);
        assert_eq!(bag, once);
    }
}
