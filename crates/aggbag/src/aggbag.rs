//! Aggregate Bag 컨테이너 -- 복합 키 → 복합 카운터
//!
//! [`AggBag`]는 키 스키마와 카운터 스키마를 고정한 채 행을 키 순서로 보관합니다.
//!
//! # 저장 방식
//! 키는 필드별 빅엔디언 와이어 바이트를 이어 붙인 값으로 저장합니다.
//! 같은 스키마 안에서 이 바이트의 memcmp 순서는 필드 값의 사전식 순서와 같으므로,
//! `BTreeMap` 순회가 곧 키 순서 순회입니다.
//!
//! # 카운터 규칙
//! - 덧셈은 `u64::MAX`에서 포화하고 오버플로 플래그를 세웁니다 (에러 아님).
//! - 뺄셈은 0에서 멈추고, 모든 카운터가 0이 된 행은 제거합니다.
//! - 모든 카운터가 0인 행은 저장하지 않습니다.
//!
//! # 변경 세대
//! 모든 변경 연산은 세대 값을 올립니다. [`Cursor`]는 생성 시점의 세대를 기억하고
//! 이후 변경이 있으면 [`AggBagError::Invalidated`]를 반환합니다.

use std::collections::BTreeMap;
use std::ops::Bound;

use flowbag_core::catalog::FieldRole;
use flowbag_core::metrics as fb_metrics;
use flowbag_core::schema::Schema;
use flowbag_core::value::FieldValue;

use crate::error::AggBagError;

/// 복합 키 → 복합 카운터 컨테이너
///
/// 동등 비교는 스키마와 행만 봅니다. 세대, 오버플로 플래그, 헤더 정보는 제외됩니다.
#[derive(Debug, Clone)]
pub struct AggBag {
    /// 키 스키마
    key_schema: Schema,
    /// 카운터 스키마
    counter_schema: Schema,
    /// 인코딩된 키 → 카운터 열
    rows: BTreeMap<Vec<u8>, Vec<u64>>,
    /// 변경 세대
    generation: u64,
    /// 카운터 포화 발생 여부
    overflowed: bool,
    /// 파일 헤더 주석
    annotations: Vec<String>,
    /// 파일 헤더 명령 이력
    invocations: Vec<String>,
}

impl AggBag {
    /// 빈 컨테이너를 생성합니다.
    ///
    /// 스키마의 역할이 뒤바뀌어 있으면 `SchemaMismatch`를 반환합니다.
    pub fn new(key_schema: Schema, counter_schema: Schema) -> Result<Self, AggBagError> {
        if key_schema.role() != FieldRole::Key || counter_schema.role() != FieldRole::Counter {
            return Err(AggBagError::SchemaMismatch {
                reason: format!(
                    "expected key and counter schemas, got {} and {}",
                    key_schema.role(),
                    counter_schema.role()
                ),
            });
        }
        Ok(Self {
            key_schema,
            counter_schema,
            rows: BTreeMap::new(),
            generation: 0,
            overflowed: false,
            annotations: Vec::new(),
            invocations: Vec::new(),
        })
    }

    /// 키 스키마
    pub fn key_schema(&self) -> &Schema {
        &self.key_schema
    }

    /// 카운터 스키마
    pub fn counter_schema(&self) -> &Schema {
        &self.counter_schema
    }

    /// 행 수
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 행이 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 현재 변경 세대
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 생성 이후 카운터 포화가 한 번이라도 있었는지 여부
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// 모든 행을 제거합니다. 스키마와 헤더 정보는 유지됩니다.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.bump();
    }

    /// 키의 카운터를 덮어씁니다.
    ///
    /// 모든 카운터가 0이면 해당 키의 행을 제거합니다.
    pub fn insert(&mut self, key: &[FieldValue], counters: &[u64]) -> Result<(), AggBagError> {
        let encoded = self.encode_key(key)?;
        self.check_counters(counters)?;
        self.bump();
        if is_zero(counters) {
            self.rows.remove(&encoded);
        } else {
            self.rows.insert(encoded, counters.to_vec());
        }
        Ok(())
    }

    /// 키의 카운터에 포화 덧셈을 합니다 (없는 키는 0에서 시작).
    pub fn add(&mut self, key: &[FieldValue], counters: &[u64]) -> Result<(), AggBagError> {
        let encoded = self.encode_key(key)?;
        self.check_counters(counters)?;
        self.add_encoded(encoded, counters);
        Ok(())
    }

    /// 키의 카운터에서 0 하한 뺄셈을 합니다.
    ///
    /// 모든 카운터가 0이 되면 행을 제거합니다. 없는 키는 변화가 없습니다.
    pub fn subtract(&mut self, key: &[FieldValue], counters: &[u64]) -> Result<(), AggBagError> {
        let encoded = self.encode_key(key)?;
        self.check_counters(counters)?;
        self.subtract_encoded(&encoded, counters);
        Ok(())
    }

    /// 키의 카운터를 조회합니다.
    pub fn get(&self, key: &[FieldValue]) -> Result<Option<&[u64]>, AggBagError> {
        let encoded = self.encode_key(key)?;
        Ok(self.rows.get(&encoded).map(Vec::as_slice))
    }

    /// 키의 행을 제거합니다. 제거했으면 `true`.
    pub fn remove(&mut self, key: &[FieldValue]) -> Result<bool, AggBagError> {
        let encoded = self.encode_key(key)?;
        self.bump();
        Ok(self.rows.remove(&encoded).is_some())
    }

    /// 다른 컨테이너의 모든 행을 더합니다.
    ///
    /// 두 컨테이너의 스키마가 같아야 합니다.
    pub fn merge_add(&mut self, other: &AggBag) -> Result<(), AggBagError> {
        self.check_compatible(other)?;
        for (key, counters) in &other.rows {
            self.add_encoded(key.clone(), counters);
        }
        Ok(())
    }

    /// 다른 컨테이너의 모든 행을 뺍니다.
    pub fn merge_sub(&mut self, other: &AggBag) -> Result<(), AggBagError> {
        self.check_compatible(other)?;
        for (key, counters) in &other.rows {
            self.subtract_encoded(key, counters);
        }
        Ok(())
    }

    /// 키 순서로 행을 빌려 순회합니다.
    ///
    /// 순회 중 변경은 빌림 규칙으로 막힙니다.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<FieldValue>, &[u64])> + '_ {
        self.rows
            .iter()
            .map(|(key, counters)| (self.key_schema.decode_tuple(key), counters.as_slice()))
    }

    /// 컨테이너에서 분리된 전진 전용 커서를 만듭니다.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            generation: self.generation,
            last: None,
            finished: false,
        }
    }

    /// 파일 헤더 주석
    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    /// 주석을 추가합니다.
    pub fn add_annotation(&mut self, note: impl Into<String>) {
        self.annotations.push(note.into());
    }

    /// 주석을 모두 지웁니다.
    pub fn clear_annotations(&mut self) {
        self.annotations.clear();
    }

    /// 파일 헤더 명령 이력
    pub fn invocations(&self) -> &[String] {
        &self.invocations
    }

    /// 명령 이력을 추가합니다.
    pub fn add_invocation(&mut self, invocation: impl Into<String>) {
        self.invocations.push(invocation.into());
    }

    /// 명령 이력을 모두 지웁니다.
    pub fn clear_invocations(&mut self) {
        self.invocations.clear();
    }

    /// 다른 컨테이너의 주석과 명령 이력을 이어 붙입니다.
    pub fn extend_provenance(&mut self, other: &AggBag) {
        self.annotations.extend(other.annotations.iter().cloned());
        self.invocations.extend(other.invocations.iter().cloned());
    }

    // --- 크레이트 내부 (코덱 / 투영 / 필터) ---

    /// 인코딩된 키 순서로 원시 행을 순회합니다.
    pub(crate) fn raw_rows(&self) -> impl Iterator<Item = (&[u8], &[u64])> + '_ {
        self.rows
            .iter()
            .map(|(key, counters)| (key.as_slice(), counters.as_slice()))
    }

    /// 인코딩된 키로 포화 덧셈을 합니다. 포화가 있었으면 `true`.
    pub(crate) fn add_encoded(&mut self, key: Vec<u8>, counters: &[u64]) -> bool {
        self.bump();
        let mut saturated = false;
        match self.rows.get_mut(&key) {
            Some(existing) => {
                for (slot, add) in existing.iter_mut().zip(counters) {
                    let (sum, carry) = slot.overflowing_add(*add);
                    *slot = if carry { u64::MAX } else { sum };
                    saturated |= carry;
                }
            }
            None => {
                if !is_zero(counters) {
                    self.rows.insert(key, counters.to_vec());
                }
            }
        }
        if saturated {
            self.overflowed = true;
            metrics::counter!(fb_metrics::CONTAINER_COUNTER_OVERFLOWS_TOTAL).increment(1);
        }
        saturated
    }

    fn subtract_encoded(&mut self, key: &[u8], counters: &[u64]) {
        self.bump();
        let emptied = match self.rows.get_mut(key) {
            Some(existing) => {
                for (slot, sub) in existing.iter_mut().zip(counters) {
                    *slot = slot.saturating_sub(*sub);
                }
                is_zero(existing)
            }
            None => false,
        };
        if emptied {
            self.rows.remove(key);
        }
    }

    /// 정렬 검증이 끝난 행을 그대로 넣습니다 (코덱 리더 전용).
    pub(crate) fn push_decoded(&mut self, key: Vec<u8>, counters: Vec<u64>) {
        self.bump();
        self.rows.insert(key, counters);
    }

    /// 조건을 만족하지 않는 행을 제거하고 제거한 수를 반환합니다.
    pub(crate) fn retain_encoded<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&[u8], &[u64]) -> bool,
    {
        self.bump();
        let before = self.rows.len();
        self.rows.retain(|key, counters| keep(key, counters));
        before - self.rows.len()
    }

    /// 키 튜플을 검증하고 인코딩합니다.
    pub(crate) fn encode_key(&self, key: &[FieldValue]) -> Result<Vec<u8>, AggBagError> {
        let mut encoded = Vec::with_capacity(self.key_schema.encoded_width());
        self.key_schema.encode_tuple(key, &mut encoded)?;
        Ok(encoded)
    }

    fn check_counters(&self, counters: &[u64]) -> Result<(), AggBagError> {
        if counters.len() != self.counter_schema.len() {
            return Err(AggBagError::SchemaMismatch {
                reason: format!(
                    "counter tuple has {} values, schema has {} fields",
                    counters.len(),
                    self.counter_schema.len()
                ),
            });
        }
        Ok(())
    }

    fn check_compatible(&self, other: &AggBag) -> Result<(), AggBagError> {
        if self.key_schema != other.key_schema || self.counter_schema != other.counter_schema {
            return Err(AggBagError::SchemaMismatch {
                reason: format!(
                    "cannot merge {{{}}}:{{{}}} with {{{}}}:{{{}}}",
                    self.key_schema, self.counter_schema, other.key_schema, other.counter_schema
                ),
            });
        }
        Ok(())
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

impl PartialEq for AggBag {
    fn eq(&self, other: &Self) -> bool {
        self.key_schema == other.key_schema
            && self.counter_schema == other.counter_schema
            && self.rows == other.rows
    }
}

impl Eq for AggBag {}

fn is_zero(counters: &[u64]) -> bool {
    counters.iter().all(|c| *c == 0)
}

/// 컨테이너와 분리된 전진 전용 커서
///
/// 컨테이너를 빌리지 않으므로 순회 도중 컨테이너를 변경할 수 있지만,
/// 변경 이후의 [`Cursor::next`] 호출은 [`AggBagError::Invalidated`]를 반환합니다.
#[derive(Debug, Clone)]
pub struct Cursor {
    /// 생성 시점 세대
    generation: u64,
    /// 마지막으로 반환한 키
    last: Option<Vec<u8>>,
    /// 끝에 도달했는지 여부
    finished: bool,
}

impl Cursor {
    /// 다음 행을 반환합니다. 끝이면 `None`.
    pub fn next(&mut self, bag: &AggBag) -> Result<Option<(Vec<FieldValue>, Vec<u64>)>, AggBagError> {
        if bag.generation != self.generation {
            return Err(AggBagError::Invalidated);
        }
        if self.finished {
            return Ok(None);
        }
        let next = match &self.last {
            None => bag.rows.iter().next(),
            Some(last) => bag
                .rows
                .range::<[u8], _>((Bound::Excluded(last.as_slice()), Bound::Unbounded))
                .next(),
        };
        match next {
            Some((key, counters)) => {
                self.last = Some(key.clone());
                Ok(Some((bag.key_schema.decode_tuple(key), counters.clone())))
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowbag_core::catalog::FieldKind;

    fn ip(s: &str) -> FieldValue {
        FieldValue::Ipv4(s.parse().unwrap())
    }

    fn sip_port_bag() -> AggBag {
        AggBag::new(
            Schema::keys([FieldKind::SIpv4, FieldKind::SPort]).unwrap(),
            Schema::counters([FieldKind::Records, FieldKind::SumBytes]).unwrap(),
        )
        .unwrap()
    }

    fn sip_bag() -> AggBag {
        AggBag::new(
            Schema::keys([FieldKind::SIpv4]).unwrap(),
            Schema::counters([FieldKind::Records]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_swapped_schemas() {
        let err = AggBag::new(
            Schema::counters([FieldKind::Records]).unwrap(),
            Schema::keys([FieldKind::SIpv4]).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, AggBagError::SchemaMismatch { .. }));
    }

    #[test]
    fn add_accumulates_and_get_reads() {
        let mut bag = sip_bag();
        bag.add(&[ip("10.0.0.1")], &[1]).unwrap();
        bag.add(&[ip("10.0.0.2")], &[1]).unwrap();
        bag.add(&[ip("10.0.0.1")], &[1]).unwrap();
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.get(&[ip("10.0.0.1")]).unwrap(), Some(&[2u64][..]));
        assert_eq!(bag.get(&[ip("10.0.0.9")]).unwrap(), None);
    }

    #[test]
    fn iteration_is_key_ordered() {
        let mut bag = sip_bag();
        for addr in ["10.0.0.10", "9.0.0.1", "10.0.0.2"] {
            bag.add(&[ip(addr)], &[1]).unwrap();
        }
        let keys: Vec<FieldValue> = bag.iter().map(|(k, _)| k[0]).collect();
        assert_eq!(keys, vec![ip("9.0.0.1"), ip("10.0.0.2"), ip("10.0.0.10")]);
    }

    #[test]
    fn add_saturates_and_sets_flag() {
        let mut bag = sip_bag();
        bag.add(&[ip("1.2.3.4")], &[1 << 63]).unwrap();
        assert!(!bag.overflowed());
        bag.add(&[ip("1.2.3.4")], &[(1 << 63) + 1]).unwrap();
        assert!(bag.overflowed());
        assert_eq!(bag.get(&[ip("1.2.3.4")]).unwrap(), Some(&[u64::MAX][..]));
    }

    #[test]
    fn subtract_floors_and_removes_only_when_all_zero() {
        let mut bag = sip_port_bag();
        let key = [ip("10.0.0.1"), FieldValue::Unsigned(80)];
        bag.add(&key, &[5, 500]).unwrap();

        bag.subtract(&key, &[5, 100]).unwrap();
        assert_eq!(bag.get(&key).unwrap(), Some(&[0u64, 400][..]));

        bag.subtract(&key, &[1, 1000]).unwrap();
        assert_eq!(bag.get(&key).unwrap(), None);
        assert!(bag.is_empty());
    }

    #[test]
    fn subtract_absent_key_is_noop() {
        let mut bag = sip_bag();
        bag.subtract(&[ip("10.0.0.1")], &[3]).unwrap();
        assert!(bag.is_empty());
    }

    #[test]
    fn zero_counters_create_no_row() {
        let mut bag = sip_port_bag();
        let key = [ip("10.0.0.1"), FieldValue::Unsigned(80)];
        bag.add(&key, &[0, 0]).unwrap();
        assert!(bag.is_empty());

        bag.insert(&key, &[1, 2]).unwrap();
        bag.insert(&key, &[0, 0]).unwrap();
        assert!(bag.is_empty());
    }

    #[test]
    fn insert_overwrites() {
        let mut bag = sip_bag();
        bag.add(&[ip("10.0.0.1")], &[7]).unwrap();
        bag.insert(&[ip("10.0.0.1")], &[2]).unwrap();
        assert_eq!(bag.get(&[ip("10.0.0.1")]).unwrap(), Some(&[2u64][..]));
    }

    #[test]
    fn remove_reports_presence() {
        let mut bag = sip_bag();
        bag.add(&[ip("10.0.0.1")], &[1]).unwrap();
        assert!(bag.remove(&[ip("10.0.0.1")]).unwrap());
        assert!(!bag.remove(&[ip("10.0.0.1")]).unwrap());
    }

    #[test]
    fn shape_errors_leave_container_unchanged() {
        let mut bag = sip_port_bag();
        bag.add(&[ip("10.0.0.1"), FieldValue::Unsigned(80)], &[1, 1])
            .unwrap();
        let snapshot = bag.clone();

        assert!(bag.add(&[ip("10.0.0.1")], &[1, 1]).is_err());
        assert!(
            bag.add(&[ip("10.0.0.1"), FieldValue::Unsigned(80)], &[1])
                .is_err()
        );
        assert!(
            bag.add(&[ip("10.0.0.1"), FieldValue::Unsigned(70_000)], &[1, 1])
                .is_err()
        );
        assert!(
            bag.insert(&[FieldValue::Unsigned(1), FieldValue::Unsigned(80)], &[1, 1])
                .is_err()
        );
        assert_eq!(bag.rows, snapshot.rows);
    }

    #[test]
    fn merge_requires_equal_schemas() {
        let mut a = sip_bag();
        let b = sip_port_bag();
        let err = a.merge_add(&b).unwrap_err();
        assert!(matches!(err, AggBagError::SchemaMismatch { .. }));
    }

    #[test]
    fn merge_sub_empties_identical_container() {
        let mut a = sip_port_bag();
        let key = [ip("10.0.0.1"), FieldValue::Unsigned(80)];
        a.add(&key, &[5, 500]).unwrap();
        let b = a.clone();
        a.merge_sub(&b).unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn cursor_walks_in_order_and_detects_mutation() {
        let mut bag = sip_bag();
        for addr in ["10.0.0.3", "10.0.0.1", "10.0.0.2"] {
            bag.add(&[ip(addr)], &[1]).unwrap();
        }

        let mut cursor = bag.cursor();
        let (first, _) = cursor.next(&bag).unwrap().unwrap();
        assert_eq!(first, vec![ip("10.0.0.1")]);
        let (second, _) = cursor.next(&bag).unwrap().unwrap();
        assert_eq!(second, vec![ip("10.0.0.2")]);

        bag.add(&[ip("10.0.0.4")], &[1]).unwrap();
        assert!(matches!(cursor.next(&bag), Err(AggBagError::Invalidated)));
    }

    #[test]
    fn cursor_reports_end() {
        let mut bag = sip_bag();
        bag.add(&[ip("10.0.0.1")], &[1]).unwrap();
        let mut cursor = bag.cursor();
        assert!(cursor.next(&bag).unwrap().is_some());
        assert!(cursor.next(&bag).unwrap().is_none());
        assert!(cursor.next(&bag).unwrap().is_none());
    }

    #[test]
    fn clone_is_deep() {
        let mut a = sip_bag();
        a.add(&[ip("10.0.0.1")], &[1]).unwrap();
        let b = a.clone();
        a.add(&[ip("10.0.0.1")], &[1]).unwrap();
        assert_eq!(b.get(&[ip("10.0.0.1")]).unwrap(), Some(&[1u64][..]));
    }

    #[test]
    fn provenance_is_kept_separately() {
        let mut bag = sip_bag();
        bag.add_annotation("alpha");
        bag.add_invocation("flowbag accumulate");
        assert_eq!(bag.annotations(), &["alpha".to_owned()]);
        bag.clear_annotations();
        assert!(bag.annotations().is_empty());
        assert_eq!(bag.invocations().len(), 1);
    }
}
