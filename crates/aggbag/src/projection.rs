//! 투영 엔진 -- 필드 선택/제거/상수 삽입
//!
//! # 출력 스키마 계산
//! 1. 선택(select)이 있으면 원본 ∩ 선택, 제거(remove)가 있으면 원본 \ 제거를 유지합니다.
//! 2. 유지되지 않은 삽입 필드는 역할에 맞는 쪽에 추가되고,
//!    이미 유지된 삽입 필드는 상수로 덮어씁니다.
//! 3. 어느 쪽이든 비면 `EmptySchema`.
//!
//! 각 원본 행은 복사 구간과 상수로 출력 행을 만들고, 포화 덧셈으로 합쳐집니다.
//! 키 필드를 제거하면 재집계가 일어납니다.

use std::ops::Range;

use flowbag_core::catalog::FieldKind;
use flowbag_core::schema::Schema;
use flowbag_core::value::FieldValue;
use tracing::debug;

use crate::aggbag::AggBag;
use crate::error::AggBagError;

/// 상수 필드 삽입 지정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertSpec {
    /// 삽입할 필드
    kind: FieldKind,
    /// 정규화된 값
    value: FieldValue,
}

impl InsertSpec {
    /// 값을 필드에 맞게 정규화해 삽입 지정을 만듭니다.
    pub fn new(kind: FieldKind, value: FieldValue) -> Result<Self, AggBagError> {
        let value = value.conform(kind)?;
        Ok(Self { kind, value })
    }

    /// 삽입 필드
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// 삽입 값
    pub fn value(&self) -> FieldValue {
        self.value
    }
}

/// 필드 선택 방식 (둘 중 하나만 지정 가능)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    /// 나열한 필드를 제거
    Remove(Vec<FieldKind>),
    /// 나열한 필드만 유지
    Select(Vec<FieldKind>),
}

impl FieldSelection {
    fn retains(&self, kind: FieldKind) -> bool {
        match self {
            Self::Remove(kinds) => !kinds.contains(&kind),
            Self::Select(kinds) => kinds.contains(&kind),
        }
    }
}

/// 투영 설정
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// 상수 삽입 목록
    inserts: Vec<InsertSpec>,
    /// 선택/제거 목록
    selection: Option<FieldSelection>,
}

/// 출력 필드 하나를 채우는 방법
#[derive(Debug, Clone)]
enum KeySource {
    /// 원본 키 바이트 구간 복사
    Copy(Range<usize>),
    /// 미리 인코딩한 상수
    Constant(Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
enum CounterSource {
    Copy(usize),
    Constant(u64),
}

impl Projection {
    /// 아무것도 바꾸지 않는 투영
    pub fn new() -> Self {
        Self::default()
    }

    /// 상수 삽입을 추가합니다. 같은 필드를 두 번 넣으면 `Configuration`.
    pub fn add_insert(&mut self, spec: InsertSpec) -> Result<(), AggBagError> {
        if self.inserts.iter().any(|s| s.kind == spec.kind) {
            return Err(AggBagError::configuration(format!(
                "field {} inserted more than once",
                spec.kind
            )));
        }
        self.inserts.push(spec);
        Ok(())
    }

    /// 선택/제거 목록을 지정합니다. 이미 지정되어 있으면 `Configuration`.
    pub fn set_selection(&mut self, selection: FieldSelection) -> Result<(), AggBagError> {
        if self.selection.is_some() {
            return Err(AggBagError::configuration(
                "remove-fields and select-fields are mutually exclusive",
            ));
        }
        self.selection = Some(selection);
        Ok(())
    }

    /// 삽입 목록
    pub fn inserts(&self) -> &[InsertSpec] {
        &self.inserts
    }

    /// 선택/제거 목록
    pub fn selection(&self) -> Option<&FieldSelection> {
        self.selection.as_ref()
    }

    /// 원본을 바꾸지 않는 투영인지 여부
    pub fn is_identity(&self) -> bool {
        self.inserts.is_empty() && self.selection.is_none()
    }

    /// 원본 스키마에 대한 출력 (키, 카운터) 스키마
    pub fn output_schemas(
        &self,
        key_schema: &Schema,
        counter_schema: &Schema,
    ) -> Result<(Schema, Schema), AggBagError> {
        Ok((
            self.output_schema(key_schema)?,
            self.output_schema(counter_schema)?,
        ))
    }

    /// 투영을 적용한 새 컨테이너를 반환합니다. 원본의 헤더 정보는 복사됩니다.
    pub fn apply(&self, input: &AggBag) -> Result<AggBag, AggBagError> {
        let (key_schema, counter_schema) =
            self.output_schemas(input.key_schema(), input.counter_schema())?;

        let key_plan: Vec<KeySource> = key_schema
            .iter()
            .map(|kind| match self.copied_position(input.key_schema(), kind) {
                Some(pos) => KeySource::Copy(input.key_schema().field_range(pos)),
                None => {
                    let mut bytes = Vec::with_capacity(kind.width());
                    self.constant(kind).encode_into(kind, &mut bytes);
                    KeySource::Constant(bytes)
                }
            })
            .collect();
        let counter_plan: Vec<CounterSource> = counter_schema
            .iter()
            .map(|kind| match self.copied_position(input.counter_schema(), kind) {
                Some(pos) => CounterSource::Copy(pos),
                None => CounterSource::Constant(self.constant(kind).as_u64().unwrap_or(0)),
            })
            .collect();

        let key_width = key_schema.encoded_width();
        let mut output = AggBag::new(key_schema, counter_schema)?;
        output.extend_provenance(input);

        let mut counters = Vec::with_capacity(counter_plan.len());
        for (src_key, src_counters) in input.raw_rows() {
            let mut key = Vec::with_capacity(key_width);
            for source in &key_plan {
                match source {
                    KeySource::Copy(range) => key.extend_from_slice(&src_key[range.clone()]),
                    KeySource::Constant(bytes) => key.extend_from_slice(bytes),
                }
            }
            counters.clear();
            counters.extend(counter_plan.iter().map(|source| match source {
                CounterSource::Copy(pos) => src_counters[*pos],
                CounterSource::Constant(value) => *value,
            }));
            output.add_encoded(key, &counters);
        }

        debug!(
            input_rows = input.len(),
            output_rows = output.len(),
            keys = %output.key_schema(),
            counters = %output.counter_schema(),
            "applied projection"
        );
        Ok(output)
    }

    fn output_schema(&self, source: &Schema) -> Result<Schema, AggBagError> {
        let role = source.role();
        let mut kinds: Vec<FieldKind> = source
            .iter()
            .filter(|kind| self.selection.as_ref().is_none_or(|sel| sel.retains(*kind)))
            .collect();
        for spec in self.inserts.iter().filter(|s| s.kind.role() == role) {
            if !kinds.contains(&spec.kind) {
                kinds.push(spec.kind);
            }
        }
        if kinds.is_empty() {
            return Err(AggBagError::EmptySchema {
                side: role.as_str().to_owned(),
            });
        }
        Ok(Schema::new(role, kinds)?)
    }

    /// 원본에서 복사할 필드의 위치. 상수로 덮어쓰는 필드는 None.
    fn copied_position(&self, source: &Schema, kind: FieldKind) -> Option<usize> {
        if self.inserts.iter().any(|s| s.kind == kind) {
            return None;
        }
        source.position(kind)
    }

    fn constant(&self, kind: FieldKind) -> FieldValue {
        self.inserts
            .iter()
            .find(|s| s.kind == kind)
            .map_or(FieldValue::Unsigned(0), |s| s.value)
    }
}
