//! 스키마 — 키 또는 카운터 한쪽의 필드 종류 목록
//!
//! 스키마는 필드를 카탈로그 ID 순서(물리 순서)로 보관합니다. 생성자는 임의 순서를 받아
//! 정렬하므로, 같은 필드 집합으로 만든 두 스키마는 항상 같습니다.
//!
//! 튜플(값 목록)은 항상 스키마 순서를 따릅니다. 순서를 신경 쓰지 않고 튜플을 만들려면
//! [`Schema::arrange`]를 사용합니다.

use std::fmt;

use crate::catalog::{FieldKind, FieldRole};
use crate::error::FieldError;
use crate::value::FieldValue;

/// 키 또는 카운터 스키마
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    /// 스키마가 담당하는 쪽
    role: FieldRole,
    /// 카탈로그 순서로 정렬된 필드
    kinds: Vec<FieldKind>,
    /// 필드별 와이어 오프셋
    offsets: Vec<usize>,
    /// 인코딩된 튜플 전체 폭
    width: usize,
}

impl Schema {
    /// 스키마를 생성합니다.
    ///
    /// 필드가 없으면 `EmptySchema`, 역할이 맞지 않거나 중복이 있으면 `SchemaMismatch`.
    pub fn new(
        role: FieldRole,
        kinds: impl IntoIterator<Item = FieldKind>,
    ) -> Result<Self, FieldError> {
        let mut kinds: Vec<FieldKind> = kinds.into_iter().collect();
        if kinds.is_empty() {
            return Err(FieldError::EmptySchema {
                side: role.as_str().to_owned(),
            });
        }
        if let Some(bad) = kinds.iter().find(|k| k.role() != role) {
            return Err(FieldError::SchemaMismatch {
                reason: format!("{} is not a {} field", bad, role),
            });
        }
        kinds.sort_by_key(|k| k.id());
        if let Some(pair) = kinds.windows(2).find(|w| w[0] == w[1]) {
            return Err(FieldError::SchemaMismatch {
                reason: format!("duplicate {} field {}", role, pair[0]),
            });
        }

        let mut offsets = Vec::with_capacity(kinds.len());
        let mut width = 0;
        for kind in &kinds {
            offsets.push(width);
            width += kind.width();
        }

        Ok(Self {
            role,
            kinds,
            offsets,
            width,
        })
    }

    /// 키 스키마 생성
    pub fn keys(kinds: impl IntoIterator<Item = FieldKind>) -> Result<Self, FieldError> {
        Self::new(FieldRole::Key, kinds)
    }

    /// 카운터 스키마 생성
    pub fn counters(kinds: impl IntoIterator<Item = FieldKind>) -> Result<Self, FieldError> {
        Self::new(FieldRole::Counter, kinds)
    }

    /// 스키마 역할
    pub fn role(&self) -> FieldRole {
        self.role
    }

    /// 물리 순서의 필드 목록
    pub fn kinds(&self) -> &[FieldKind] {
        &self.kinds
    }

    /// 필드 수
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// 항상 false (빈 스키마는 만들 수 없음)
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// 필드 순회
    pub fn iter(&self) -> impl Iterator<Item = FieldKind> + '_ {
        self.kinds.iter().copied()
    }

    /// 필드의 위치 (필터 재정렬에 사용)
    pub fn position(&self, kind: FieldKind) -> Option<usize> {
        self.kinds.iter().position(|k| *k == kind)
    }

    /// 필드 포함 여부
    pub fn contains(&self, kind: FieldKind) -> bool {
        self.position(kind).is_some()
    }

    /// 인코딩된 튜플 폭 (바이트)
    pub fn encoded_width(&self) -> usize {
        self.width
    }

    /// `index`번째 필드의 와이어 바이트 범위
    pub fn field_range(&self, index: usize) -> std::ops::Range<usize> {
        let start = self.offsets[index];
        start..start + self.kinds[index].width()
    }

    /// (필드, 값) 쌍을 스키마 순서의 튜플로 배치합니다.
    ///
    /// 모든 필드가 정확히 한 번씩 주어져야 합니다.
    pub fn arrange(&self, pairs: &[(FieldKind, FieldValue)]) -> Result<Vec<FieldValue>, FieldError> {
        if pairs.len() != self.len() {
            return Err(FieldError::SchemaMismatch {
                reason: format!(
                    "expected {} {} values, got {}",
                    self.len(),
                    self.role,
                    pairs.len()
                ),
            });
        }
        let mut slots: Vec<Option<FieldValue>> = vec![None; self.len()];
        for (kind, value) in pairs {
            let pos = self.position(*kind).ok_or_else(|| FieldError::SchemaMismatch {
                reason: format!("{} is not part of the {} schema", kind, self.role),
            })?;
            if slots[pos].replace(*value).is_some() {
                return Err(FieldError::SchemaMismatch {
                    reason: format!("{} given more than once", kind),
                });
            }
        }
        // 길이가 같고 중복이 없으면 모든 슬롯이 채워짐
        Ok(slots.into_iter().flatten().collect())
    }

    /// 튜플을 검증/정규화하여 와이어 바이트로 인코딩합니다.
    pub fn encode_tuple(&self, values: &[FieldValue], out: &mut Vec<u8>) -> Result<(), FieldError> {
        if values.len() != self.len() {
            return Err(FieldError::SchemaMismatch {
                reason: format!(
                    "{} tuple has {} values, schema has {} fields",
                    self.role,
                    values.len(),
                    self.len()
                ),
            });
        }
        out.reserve(self.width);
        for (kind, value) in self.kinds.iter().zip(values) {
            value.conform(*kind)?.encode_into(*kind, out);
        }
        Ok(())
    }

    /// 와이어 바이트를 튜플로 복원합니다.
    pub fn decode_tuple(&self, bytes: &[u8]) -> Vec<FieldValue> {
        (0..self.len()).map(|i| self.decode_field(bytes, i)).collect()
    }

    /// 와이어 바이트에서 `index`번째 필드만 복원합니다.
    pub fn decode_field(&self, bytes: &[u8], index: usize) -> FieldValue {
        FieldValue::decode(self.kinds[index], &bytes[self.field_range(index)])
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.kinds.iter().map(|k| k.name()).collect();
        f.write_str(&names.join(","))
    }
}
