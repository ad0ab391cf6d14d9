//! 출력 구성 -- `KEYS:COUNTERS:PATH` 파싱과 검증
//!
//! # 형식
//! - `KEYS`: 쉼표로 구분한 키 필드. 프리픽스 맵 필드는 `sip-pmap[MAP]`처럼 맵 이름을 붙임
//! - `COUNTERS`: 쉼표로 구분한 카운터 필드 (`records`, `sum-bytes` 등)
//! - `PATH`: 출력 파일 경로. `-`는 표준 출력
//!
//! 경로에 `:`가 들어가도 되도록 앞의 두 구분자만 나눕니다.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use flowbag_aggbag::codec::bag_file::legacy_type_id;
use flowbag_core::config::{OutputSection, STDOUT_PATH};
use flowbag_core::{FieldKind, FieldRole, Schema};

use crate::error::AccumulatorError;

/// 출력 필드 하나 (프리픽스 맵 이름 포함)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// 필드 종류
    pub kind: FieldKind,
    /// 프리픽스 맵 이름 (프리픽스 맵 필드만)
    pub pmap: Option<String>,
}

impl FieldSpec {
    /// 맵이 없는 필드
    pub fn plain(kind: FieldKind) -> Self {
        Self { kind, pmap: None }
    }

    /// 프리픽스 맵 필드
    pub fn with_pmap(kind: FieldKind, map: impl Into<String>) -> Self {
        Self {
            kind,
            pmap: Some(map.into()),
        }
    }

    fn parse(text: &str, role: FieldRole) -> Result<Self, AccumulatorError> {
        let text = text.trim();
        let (name, map) = match text.split_once('[') {
            Some((name, rest)) => {
                let map = rest.strip_suffix(']').ok_or_else(|| {
                    AccumulatorError::configuration(format!(
                        "unterminated prefix map reference in '{}'",
                        text
                    ))
                })?;
                if map.trim().is_empty() {
                    return Err(AccumulatorError::configuration(format!(
                        "empty prefix map name in '{}'",
                        text
                    )));
                }
                (name, Some(map.trim().to_owned()))
            }
            None => (text, None),
        };
        let kind = FieldKind::lookup_in(name, role)?;

        match (is_pmap_kind(kind), map) {
            (true, None) => Err(AccumulatorError::configuration(format!(
                "field {} requires a prefix map: write {}[MAP]",
                kind, kind
            ))),
            (false, Some(map)) => Err(AccumulatorError::configuration(format!(
                "field {} does not take a prefix map (got '{}')",
                kind, map
            ))),
            (_, pmap) => Ok(Self { kind, pmap }),
        }
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pmap {
            Some(map) => write!(f, "{}[{}]", self.kind, map),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// 프리픽스 맵 값을 갖는 필드인지 여부
pub fn is_pmap_kind(kind: FieldKind) -> bool {
    matches!(
        kind,
        FieldKind::SipPmap
            | FieldKind::DipPmap
            | FieldKind::AnyIpPmap
            | FieldKind::SportPmap
            | FieldKind::DportPmap
            | FieldKind::AnyPortPmap
    )
}

/// 출력 대상
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// 표준 출력
    Stdout,
    /// 파일 경로
    File(PathBuf),
}

impl OutputTarget {
    fn parse(text: &str) -> Result<Self, AccumulatorError> {
        match text.trim() {
            "" => Err(AccumulatorError::configuration("output path must not be empty")),
            STDOUT_PATH => Ok(Self::Stdout),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str(STDOUT_PATH),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// 출력 컨테이너 하나의 구성
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    /// 키 필드 (입력 순서)
    pub keys: Vec<FieldSpec>,
    /// 카운터 필드 (입력 순서)
    pub counters: Vec<FieldKind>,
    /// 출력 대상
    pub target: OutputTarget,
}

impl OutputSpec {
    /// 필드 목록과 경로 문자열로 구성합니다.
    pub fn from_parts(keys: &str, counters: &str, path: &str) -> Result<Self, AccumulatorError> {
        let keys = split_list(keys)
            .map(|item| FieldSpec::parse(item, FieldRole::Key))
            .collect::<Result<Vec<_>, _>>()?;
        let counters = split_list(counters)
            .map(|item| {
                if item.contains('[') {
                    return Err(AccumulatorError::configuration(format!(
                        "counter field '{}' cannot take a prefix map",
                        item
                    )));
                }
                Ok(FieldKind::lookup_in(item, FieldRole::Counter)?)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Err(AccumulatorError::configuration("output needs at least one key field"));
        }
        if counters.is_empty() {
            return Err(AccumulatorError::configuration(
                "output needs at least one counter field",
            ));
        }

        let spec = Self {
            keys,
            counters,
            target: OutputTarget::parse(path)?,
        };
        // 스키마 검증 (중복 필드 등)
        spec.key_schema()?;
        spec.counter_schema()?;
        Ok(spec)
    }

    /// 설정 파일의 출력 섹션으로 구성합니다.
    pub fn from_section(section: &OutputSection) -> Result<Self, AccumulatorError> {
        Self::from_parts(&section.keys, &section.counters, &section.path)
    }

    /// 키 스키마 (카탈로그 순서)
    pub fn key_schema(&self) -> Result<Schema, AccumulatorError> {
        Ok(Schema::keys(self.keys.iter().map(|f| f.kind))?)
    }

    /// 카운터 스키마 (카탈로그 순서)
    pub fn counter_schema(&self) -> Result<Schema, AccumulatorError> {
        Ok(Schema::counters(self.counters.iter().copied())?)
    }

    /// 레거시 Bag 파일로 쓸 수 있는 구성인지 여부
    ///
    /// 키와 카운터가 하나씩이고 둘 다 레거시 타입 ID가 있어야 합니다.
    pub fn is_legacy_bag(&self) -> bool {
        match (self.keys.as_slice(), self.counters.as_slice()) {
            ([key], [counter]) => {
                legacy_type_id(key.kind).is_some() && legacy_type_id(*counter).is_some()
            }
            _ => false,
        }
    }
}

impl FromStr for OutputSpec {
    type Err = AccumulatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(keys), Some(counters), Some(path)) => Self::from_parts(keys, counters, path),
            _ => Err(AccumulatorError::configuration(format!(
                "output spec '{}' must have the form KEYS:COUNTERS:PATH",
                s
            ))),
        }
    }
}

impl fmt::Display for OutputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.keys.iter().map(ToString::to_string).collect();
        let counters: Vec<&str> = self.counters.iter().map(|k| k.name()).collect();
        write!(f, "{}:{}:{}", keys.join(","), counters.join(","), self.target)
    }
}

/// 출력 목록 전체를 검증합니다.
///
/// 출력이 없거나, 표준 출력을 둘 이상이 쓰거나, 같은 파일을 둘 이상이 쓰면 에러입니다.
pub fn validate_outputs(outputs: &[OutputSpec]) -> Result<(), AccumulatorError> {
    if outputs.is_empty() {
        return Err(AccumulatorError::configuration("no outputs configured"));
    }
    let stdout_count = outputs
        .iter()
        .filter(|o| o.target == OutputTarget::Stdout)
        .count();
    if stdout_count > 1 {
        return Err(AccumulatorError::configuration(
            "only one output may write to standard output",
        ));
    }
    let mut paths = BTreeSet::new();
    for output in outputs {
        if let OutputTarget::File(path) = &output.target {
            if !paths.insert(path) {
                return Err(AccumulatorError::configuration(format!(
                    "output path '{}' is used more than once",
                    path.display()
                )));
            }
        }
    }
    Ok(())
}

fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty())
}
