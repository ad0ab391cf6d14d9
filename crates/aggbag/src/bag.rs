//! Bag 컨테이너 -- 키 하나 → 카운터 하나
//!
//! [`Bag`]은 키 필드 하나, 카운터 필드 하나로 고정된 [`AggBag`]입니다.
//! 레거시 Bag 파일 형식이 표현할 수 있는 필드만 허용하며, 정수 키는 32비트 안에 들어가야 합니다.

use std::net::IpAddr;

use flowbag_core::catalog::{FieldKind, ValueType};
use flowbag_core::schema::Schema;
use flowbag_core::value::FieldValue;

use crate::aggbag::{AggBag, Cursor};
use crate::codec::bag_file::legacy_type_id;
use crate::error::AggBagError;

/// 키 하나 → 카운터 하나 컨테이너
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bag {
    /// 1×1 스키마의 내부 컨테이너
    inner: AggBag,
}

impl Bag {
    /// 빈 Bag을 생성합니다.
    pub fn new(key_kind: FieldKind, counter_kind: FieldKind) -> Result<Self, AggBagError> {
        check_legacy(key_kind)?;
        check_legacy(counter_kind)?;
        let inner = AggBag::new(Schema::keys([key_kind])?, Schema::counters([counter_kind])?)?;
        Ok(Self { inner })
    }

    /// 1×1 스키마의 [`AggBag`]을 Bag으로 바꿉니다.
    ///
    /// 필드 수가 하나씩이 아니거나 레거시 형식이 모르는 필드이면 에러를 반환합니다.
    pub fn from_aggbag(aggbag: AggBag) -> Result<Self, AggBagError> {
        if aggbag.key_schema().len() != 1 || aggbag.counter_schema().len() != 1 {
            return Err(AggBagError::SchemaMismatch {
                reason: format!(
                    "a Bag needs one key and one counter field, got {{{}}}:{{{}}}",
                    aggbag.key_schema(),
                    aggbag.counter_schema()
                ),
            });
        }
        let key_kind = aggbag.key_schema().kinds()[0];
        check_legacy(key_kind)?;
        check_legacy(aggbag.counter_schema().kinds()[0])?;
        if key_kind.value_type() != ValueType::Ipv4 && key_kind.value_type() != ValueType::Ipv6 {
            let too_wide = aggbag
                .iter()
                .any(|(key, _)| key[0].as_u64().is_some_and(|v| v > u64::from(u32::MAX)));
            if too_wide {
                return Err(AggBagError::SchemaMismatch {
                    reason: format!("{} values do not fit in a 32-bit Bag key", key_kind),
                });
            }
        }
        Ok(Self { inner: aggbag })
    }

    /// 내부 [`AggBag`]으로 바꿉니다.
    pub fn into_aggbag(self) -> AggBag {
        self.inner
    }

    /// 내부 [`AggBag`] 참조
    pub fn as_aggbag(&self) -> &AggBag {
        &self.inner
    }

    /// 내부 [`AggBag`] 가변 참조 (헤더 정보 편집용)
    pub(crate) fn as_aggbag_mut(&mut self) -> &mut AggBag {
        &mut self.inner
    }

    /// 키 필드
    pub fn key_kind(&self) -> FieldKind {
        self.inner.key_schema().kinds()[0]
    }

    /// 카운터 필드
    pub fn counter_kind(&self) -> FieldKind {
        self.inner.counter_schema().kinds()[0]
    }

    /// 행 수
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// 행이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// 카운터 포화 발생 여부
    pub fn overflowed(&self) -> bool {
        self.inner.overflowed()
    }

    /// 키의 카운터를 덮어씁니다.
    pub fn insert(&mut self, key: FieldValue, counter: u64) -> Result<(), AggBagError> {
        self.check_key(&key)?;
        self.inner.insert(&[key], &[counter])
    }

    /// 키의 카운터에 포화 덧셈을 합니다.
    pub fn add(&mut self, key: FieldValue, counter: u64) -> Result<(), AggBagError> {
        self.check_key(&key)?;
        self.inner.add(&[key], &[counter])
    }

    /// 키의 카운터에서 0 하한 뺄셈을 합니다.
    pub fn subtract(&mut self, key: FieldValue, counter: u64) -> Result<(), AggBagError> {
        self.check_key(&key)?;
        self.inner.subtract(&[key], &[counter])
    }

    /// 키의 카운터를 조회합니다.
    pub fn get(&self, key: FieldValue) -> Result<Option<u64>, AggBagError> {
        Ok(self.inner.get(&[key])?.map(|c| c[0]))
    }

    /// 정수 키로 조회합니다.
    pub fn get_by_u64(&self, key: u64) -> Result<Option<u64>, AggBagError> {
        self.get(FieldValue::Unsigned(key))
    }

    /// IP 키로 조회합니다.
    pub fn get_by_ip(&self, key: IpAddr) -> Result<Option<u64>, AggBagError> {
        self.get(FieldValue::from(key))
    }

    /// 키의 행을 제거합니다.
    pub fn remove(&mut self, key: FieldValue) -> Result<bool, AggBagError> {
        self.inner.remove(&[key])
    }

    /// 다른 Bag의 모든 행을 더합니다.
    pub fn merge_add(&mut self, other: &Bag) -> Result<(), AggBagError> {
        self.inner.merge_add(&other.inner)
    }

    /// 다른 Bag의 모든 행을 뺍니다.
    pub fn merge_sub(&mut self, other: &Bag) -> Result<(), AggBagError> {
        self.inner.merge_sub(&other.inner)
    }

    /// 키 순서로 (키, 카운터)를 순회합니다.
    pub fn iter(&self) -> impl Iterator<Item = (FieldValue, u64)> + '_ {
        self.inner.iter().map(|(key, counters)| (key[0], counters[0]))
    }

    /// 분리된 커서 ([`AggBag::cursor`]와 같은 규칙)
    pub fn cursor(&self) -> Cursor {
        self.inner.cursor()
    }

    /// 파일 헤더 주석
    pub fn annotations(&self) -> &[String] {
        self.inner.annotations()
    }

    /// 주석을 추가합니다.
    pub fn add_annotation(&mut self, note: impl Into<String>) {
        self.inner.add_annotation(note);
    }

    /// 파일 헤더 명령 이력
    pub fn invocations(&self) -> &[String] {
        self.inner.invocations()
    }

    fn check_key(&self, key: &FieldValue) -> Result<(), AggBagError> {
        if let Some(v) = key.as_u64() {
            if v > u64::from(u32::MAX) {
                return Err(AggBagError::SchemaMismatch {
                    reason: format!("Bag key {} does not fit in 32 bits", v),
                });
            }
        }
        Ok(())
    }
}

fn check_legacy(kind: FieldKind) -> Result<(), AggBagError> {
    if legacy_type_id(kind).is_none() {
        return Err(AggBagError::configuration(format!(
            "{} cannot be stored in a Bag",
            kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_legacy_kinds() {
        assert!(Bag::new(FieldKind::SIpv4, FieldKind::Records).is_ok());
        assert!(Bag::new(FieldKind::SIpv6, FieldKind::SumBytes).is_ok());
        let err = Bag::new(FieldKind::IcmpType, FieldKind::Records).unwrap_err();
        assert!(matches!(err, AggBagError::Configuration { .. }));
        assert!(Bag::new(FieldKind::Records, FieldKind::Records).is_err());
    }

    #[test]
    fn integer_and_ip_queries() {
        let mut bag = Bag::new(FieldKind::DPort, FieldKind::Records).unwrap();
        bag.add(FieldValue::Unsigned(443), 2).unwrap();
        bag.add(FieldValue::Unsigned(443), 1).unwrap();
        assert_eq!(bag.get_by_u64(443).unwrap(), Some(3));
        assert_eq!(bag.get_by_u64(80).unwrap(), None);

        let mut ips = Bag::new(FieldKind::SIpv4, FieldKind::SumBytes).unwrap();
        ips.add(FieldValue::Ipv4("10.0.0.1".parse().unwrap()), 40)
            .unwrap();
        assert_eq!(
            ips.get_by_ip("::ffff:10.0.0.1".parse().unwrap()).unwrap(),
            Some(40)
        );
    }

    #[test]
    fn custom_keys_must_fit_in_32_bits() {
        let mut bag = Bag::new(FieldKind::CustomKey, FieldKind::CustomCounter).unwrap();
        bag.add(FieldValue::Unsigned(u64::from(u32::MAX)), 1).unwrap();
        assert!(bag.add(FieldValue::Unsigned(1 << 32), 1).is_err());
    }

    #[test]
    fn from_aggbag_requires_single_fields() {
        let agg = AggBag::new(
            Schema::keys([FieldKind::SIpv4, FieldKind::SPort]).unwrap(),
            Schema::counters([FieldKind::Records]).unwrap(),
        )
        .unwrap();
        assert!(Bag::from_aggbag(agg).is_err());

        let mut agg = AggBag::new(
            Schema::keys([FieldKind::SPort]).unwrap(),
            Schema::counters([FieldKind::Records]).unwrap(),
        )
        .unwrap();
        agg.add(&[FieldValue::Unsigned(22)], &[4]).unwrap();
        let bag = Bag::from_aggbag(agg).unwrap();
        assert_eq!(bag.key_kind(), FieldKind::SPort);
        assert_eq!(bag.iter().collect::<Vec<_>>(), vec![(FieldValue::Unsigned(22), 4)]);
    }

    #[test]
    fn subtract_and_merge() {
        let mut a = Bag::new(FieldKind::Protocol, FieldKind::Records).unwrap();
        a.add(FieldValue::Unsigned(6), 10).unwrap();
        a.add(FieldValue::Unsigned(17), 1).unwrap();
        let mut b = Bag::new(FieldKind::Protocol, FieldKind::Records).unwrap();
        b.add(FieldValue::Unsigned(17), 5).unwrap();
        a.merge_sub(&b).unwrap();
        assert_eq!(a.len(), 1);
        a.subtract(FieldValue::Unsigned(6), 4).unwrap();
        assert_eq!(a.get_by_u64(6).unwrap(), Some(6));
        a.merge_add(&b).unwrap();
        assert_eq!(a.get_by_u64(17).unwrap(), Some(5));
    }
}
